// Storage layer: embedded key-value engine + typed resource store.

pub mod kv;
pub mod store;

pub use kv::KvEngine;
pub use store::{ResourceStore, StoreError};
