// The typed stand-in left behind when a payload is offloaded.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const REF_TYPE: &str = "claim_check_ref";

/// Reference to an offloaded payload. References never nest: a value that
/// already is a reference is never offloaded again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimCheckRef {
    #[serde(rename = "_type")]
    pub ref_type: String,
    /// Object-store key (opaque UUID)
    pub key: String,
    /// Size of the original serialized payload
    pub size_bytes: u64,
    /// Whether the stored object is gzip-compressed. Authoritative: the
    /// retriever follows this flag, not the manager's configuration.
    pub compressed: bool,
    /// RFC 3339 offload time
    pub stored_at: String,
}

impl ClaimCheckRef {
    pub fn new(key: impl Into<String>, size_bytes: u64, compressed: bool) -> Self {
        Self {
            ref_type: REF_TYPE.to_string(),
            key: key.into(),
            size_bytes,
            compressed,
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Parse a deserialized JSON value back into a reference, by map shape.
    pub fn from_value(value: &Value) -> Option<ClaimCheckRef> {
        if !is_claim_check_ref(value) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Map-shape detection: any JSON object whose `_type` is
/// `claim_check_ref`. Payloads round-trip through serialization between
/// steps, so type identity cannot be relied on.
pub fn is_claim_check_ref(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|map| map.get("_type"))
        .and_then(Value::as_str)
        == Some(REF_TYPE)
}
