// Wire protocol for the stigmer daemon.
//
// Decision: gRPC with tonic; the generated types double as the persisted
// resource representation (prost-encoded values in the key-value store)
// Decision: timestamps travel as a seconds/nanos pair and convert to chrono
// at the edges

use chrono::{DateTime, TimeZone, Utc};

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("stigmer.v1");
}

pub use proto::*;

/// Convert a proto Timestamp to a chrono DateTime.
pub fn proto_timestamp_to_datetime(value: &proto::Timestamp) -> DateTime<Utc> {
    Utc.timestamp_opt(value.seconds, value.nanos as u32)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Convert a chrono DateTime to a proto Timestamp.
pub fn datetime_to_proto_timestamp(value: DateTime<Utc>) -> proto::Timestamp {
    proto::Timestamp {
        seconds: value.timestamp(),
        nanos: value.timestamp_subsec_nanos() as i32,
    }
}

/// Current wall-clock time as a proto Timestamp.
pub fn timestamp_now() -> proto::Timestamp {
    datetime_to_proto_timestamp(Utc::now())
}

impl proto::Timestamp {
    /// Strictly-after comparison, nanosecond precision.
    pub fn is_after(&self, other: &proto::Timestamp) -> bool {
        (self.seconds, self.nanos) > (other.seconds, other.nanos)
    }
}

impl proto::ExecutionPhase {
    /// COMPLETED, FAILED and CANCELLED are terminal; nothing re-opens them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            proto::ExecutionPhase::ExecutionCompleted
                | proto::ExecutionPhase::ExecutionFailed
                | proto::ExecutionPhase::ExecutionCancelled
        )
    }
}
