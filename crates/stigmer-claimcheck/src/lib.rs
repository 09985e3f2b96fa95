// Claim Check: offload large workflow-state fields to object storage and
// leave a typed reference behind; retrieve transparently before the next
// activity runs.

pub mod compress;
pub mod manager;
pub mod reference;
pub mod store;

pub use compress::Compressor;
pub use manager::{ClaimCheckManager, ClaimCheckMetricsSnapshot};
pub use reference::{is_claim_check_ref, ClaimCheckRef};
pub use store::{ClaimCheckError, FsObjectStore, MemoryObjectStore, ObjectStore, S3Config};
