// The claim check manager: per-step offload, per-activity retrieve.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};

use crate::compress::Compressor;
use crate::reference::{is_claim_check_ref, ClaimCheckRef};
use crate::store::{ClaimCheckError, ObjectStore};

#[derive(Default)]
struct ClaimCheckMetrics {
    offloads: AtomicU64,
    retrievals: AtomicU64,
    failures: AtomicU64,
    bytes_offloaded: AtomicU64,
}

/// Point-in-time copy of the manager's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimCheckMetricsSnapshot {
    pub offloads: u64,
    pub retrievals: u64,
    pub failures: u64,
    pub bytes_offloaded: u64,
}

/// Global offload manager. One instance per daemon, enabled by
/// configuration. Objects live in the store until the backend's lifecycle
/// rules expire them (TTL days); the daemon never deletes on its own.
pub struct ClaimCheckManager {
    enabled: bool,
    threshold_bytes: usize,
    compressor: Compressor,
    ttl_days: u32,
    store: ObjectStore,
    metrics: ClaimCheckMetrics,
}

impl ClaimCheckManager {
    pub fn new(
        enabled: bool,
        threshold_bytes: usize,
        compressor: Compressor,
        ttl_days: u32,
        store: ObjectStore,
    ) -> Self {
        Self {
            enabled,
            threshold_bytes,
            compressor,
            ttl_days,
            store,
            metrics: ClaimCheckMetrics::default(),
        }
    }

    /// Disabled manager: both offload and retrieve are no-ops.
    pub fn disabled() -> Self {
        Self::new(false, usize::MAX, Compressor::NoOp, 0, ObjectStore::in_memory())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl_days(&self) -> u32 {
        self.ttl_days
    }

    pub fn metrics(&self) -> ClaimCheckMetricsSnapshot {
        ClaimCheckMetricsSnapshot {
            offloads: self.metrics.offloads.load(Ordering::Relaxed),
            retrievals: self.metrics.retrievals.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            bytes_offloaded: self.metrics.bytes_offloaded.load(Ordering::Relaxed),
        }
    }

    /// Offload a single value when it crosses the threshold. Returns the
    /// replacement reference, or `None` when the value stays in place
    /// (small, already a reference, or the manager is disabled).
    pub async fn offload_value(&self, value: &Value) -> Result<Option<Value>, ClaimCheckError> {
        if !self.enabled || is_claim_check_ref(value) {
            return Ok(None);
        }
        let serialized =
            serde_json::to_vec(value).map_err(|e| ClaimCheckError::Serialization(e.to_string()))?;
        if serialized.len() < self.threshold_bytes {
            return Ok(None);
        }

        let body = self.compressor.compress(&serialized)?;
        let key = self.store.put(body).await?;
        let reference =
            ClaimCheckRef::new(key, serialized.len() as u64, self.compressor.is_enabled());

        self.metrics.offloads.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .bytes_offloaded
            .fetch_add(serialized.len() as u64, Ordering::Relaxed);
        tracing::debug!(
            key = %reference.key,
            size_bytes = reference.size_bytes,
            compressed = reference.compressed,
            "offloaded payload"
        );
        Ok(Some(reference.to_value()))
    }

    /// Resolve a reference back into the original value.
    pub async fn resolve_value(&self, value: &Value) -> Result<Option<Value>, ClaimCheckError> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(reference) = ClaimCheckRef::from_value(value) else {
            return Ok(None);
        };

        let body = self.store.get(&reference.key).await?;
        let serialized = if reference.compressed {
            Compressor::Gzip.decompress(&body)?
        } else {
            body
        };
        let original: Value = serde_json::from_slice(&serialized)
            .map_err(|e| ClaimCheckError::Serialization(e.to_string()))?;
        self.metrics.retrievals.fetch_add(1, Ordering::Relaxed);
        Ok(Some(original))
    }

    /// Offload every oversized field of a step's state bag in place.
    /// Best effort: failures are logged and the field keeps its value.
    pub async fn offload_state(&self, state: &mut Map<String, Value>) {
        if !self.enabled {
            return;
        }
        for (field, value) in state.iter_mut() {
            match self.offload_value(value).await {
                Ok(Some(reference)) => *value = reference,
                Ok(None) => {}
                Err(err) => {
                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(field = %field, error = %err, "claim check offload failed");
                }
            }
        }
    }

    /// Resolve every reference in a state bag in place before an activity
    /// runs. Best effort: an unresolved reference stays in the bag and the
    /// activity may fail on it.
    pub async fn resolve_state(&self, state: &mut Map<String, Value>) {
        if !self.enabled {
            return;
        }
        for (field, value) in state.iter_mut() {
            match self.resolve_value(value).await {
                Ok(Some(original)) => *value = original,
                Ok(None) => {}
                Err(err) => {
                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(field = %field, error = %err, "claim check retrieve failed");
                }
            }
        }
    }
}
