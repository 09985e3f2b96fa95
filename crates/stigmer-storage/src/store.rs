// Typed resource store over the key-value engine.
//
// One value per (kind, id): `resources/{kind}/{id}` -> prost-encoded
// resource message. List scans the kind prefix; slug lookups filter the
// scan on (owner_scope, org, slug).

use std::sync::Arc;

use thiserror::Error;

use stigmer_core::{ApiResource, ResourceKind};
use stigmer_protocol::proto::OwnerScope;

use crate::kv::KvEngine;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying engine failure
    #[error("storage engine error: {0}")]
    Engine(String),

    /// Stored bytes failed to decode as the expected message
    #[error("corrupt resource record: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Save called without an id
    #[error("resource has no id")]
    MissingId,
}

/// Store adapter shared by every controller.
#[derive(Clone)]
pub struct ResourceStore {
    kv: Arc<KvEngine>,
}

fn resource_key(kind: ResourceKind, id: &str) -> Vec<u8> {
    format!("resources/{}/{}", kind.as_str(), id).into_bytes()
}

fn kind_prefix(kind: ResourceKind) -> Vec<u8> {
    format!("resources/{}/", kind.as_str()).into_bytes()
}

impl ResourceStore {
    pub fn new(kv: Arc<KvEngine>) -> Self {
        Self { kv }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(KvEngine::in_memory()))
    }

    /// Load a resource by id. `Ok(None)` when absent.
    pub async fn get_resource<R: ApiResource>(&self, id: &str) -> Result<Option<R>, StoreError> {
        let Some(bytes) = self.kv.get(&resource_key(R::KIND, id))? else {
            return Ok(None);
        };
        Ok(Some(R::decode(bytes.as_slice())?))
    }

    /// Persist a resource under (kind, metadata.id).
    pub async fn save_resource<R: ApiResource>(&self, resource: &R) -> Result<(), StoreError> {
        let id = resource.id();
        if id.is_empty() {
            return Err(StoreError::MissingId);
        }
        let key = resource_key(R::KIND, id);
        self.kv.put(&key, resource.encode_to_vec())
    }

    /// Remove a resource by id. Removing a missing id is not an error.
    pub async fn delete_resource<R: ApiResource>(&self, id: &str) -> Result<(), StoreError> {
        self.kv.delete(&resource_key(R::KIND, id))
    }

    /// All resources of a kind, in key order.
    pub async fn list_resources<R: ApiResource>(&self) -> Result<Vec<R>, StoreError> {
        let values = self.kv.scan_prefix(&kind_prefix(R::KIND))?;
        let mut resources = Vec::with_capacity(values.len());
        for bytes in values {
            resources.push(R::decode(bytes.as_slice())?);
        }
        Ok(resources)
    }

    /// First resource of a kind matching (owner_scope, org, slug).
    pub async fn find_by_slug<R: ApiResource>(
        &self,
        owner_scope: OwnerScope,
        org: &str,
        slug: &str,
    ) -> Result<Option<R>, StoreError> {
        let resources = self.list_resources::<R>().await?;
        Ok(resources.into_iter().find(|r| {
            r.owner_scope() == owner_scope && r.org() == org && r.slug() == slug
        }))
    }
}
