// Domain layer for the stigmer daemon.
//
// Everything here is DB-agnostic and transport-agnostic: the resource
// model (ApiResource over the generated proto types), slug normalization,
// the error taxonomy, and request validation. The daemon crate composes
// these into pipelines; this crate keeps the rules testable in isolation.

pub mod error;
pub mod kind;
pub mod resource;
pub mod slug;
pub mod validation;

pub use error::{ApiError, Result};
pub use kind::ResourceKind;
pub use resource::{ApiResource, ExecutionResource};
pub use slug::{default_instance_slug, slugify};
pub use validation::Validate;
