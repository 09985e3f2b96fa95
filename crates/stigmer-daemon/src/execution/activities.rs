// Daemon-registered activities.
//
// UpdateExecutionStatus runs as a local activity so it never lands on a
// routed task queue a foreign worker might pick up.
// complete-external-activity is daemon-registered but non-local: it needs
// the engine client to wake the external workflow by task token.

use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use stigmer_core::{ApiResource, ExecutionResource};
use stigmer_protocol::proto::{
    AgentExecution, AgentExecutionStatus, ExecutionMessage, ExecutionPhase, MessageKind,
    WorkflowExecution, WorkflowExecutionStatus,
};
use stigmer_protocol::{datetime_to_proto_timestamp, Timestamp};
use stigmer_temporal::workflow::ActivityFn;
use stigmer_temporal::ActivityError;

use crate::execution::update_status::run_update_status;
use crate::manager::ClientHandle;
use crate::pipeline::Pipeline;

/// Status payload crossing the engine boundary as JSON. Only the fields a
/// workflow ever sets; the runner reports full proto statuses over RPC
/// instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub temporal_workflow_id: Option<String>,
    #[serde(default)]
    pub started_at_unix_ms: Option<i64>,
    #[serde(default)]
    pub completed_at_unix_ms: Option<i64>,
    /// Appended as SYSTEM-kind messages on agent executions
    #[serde(default)]
    pub system_messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusActivityInput {
    pub execution_id: String,
    pub status: StatusUpdate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteExternalInput {
    #[serde(default)]
    pub task_token: Vec<u8>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

fn parse_phase(phase: &str) -> ExecutionPhase {
    match phase {
        "PENDING" => ExecutionPhase::ExecutionPending,
        "IN_PROGRESS" => ExecutionPhase::ExecutionInProgress,
        "COMPLETED" => ExecutionPhase::ExecutionCompleted,
        "FAILED" => ExecutionPhase::ExecutionFailed,
        "CANCELLED" => ExecutionPhase::ExecutionCancelled,
        _ => ExecutionPhase::Unspecified,
    }
}

fn unix_ms_to_timestamp(ms: i64) -> Timestamp {
    Timestamp {
        seconds: ms.div_euclid(1000),
        nanos: (ms.rem_euclid(1000) * 1_000_000) as i32,
    }
}

pub fn now_unix_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn system_message(content: &str) -> ExecutionMessage {
    ExecutionMessage {
        id: Uuid::now_v7().to_string(),
        kind: MessageKind::System as i32,
        content: content.to_string(),
        created_at: Some(datetime_to_proto_timestamp(chrono::Utc::now())),
    }
}

/// StatusUpdate -> agent execution status proto.
pub fn to_agent_status(update: &StatusUpdate) -> AgentExecutionStatus {
    AgentExecutionStatus {
        phase: update
            .phase
            .as_deref()
            .map(parse_phase)
            .unwrap_or(ExecutionPhase::Unspecified) as i32,
        messages: update
            .system_messages
            .iter()
            .map(|m| system_message(m))
            .collect(),
        error: update.error.clone().unwrap_or_default(),
        output: update.output.clone().unwrap_or_default(),
        temporal_workflow_id: update.temporal_workflow_id.clone().unwrap_or_default(),
        started_at: update.started_at_unix_ms.map(unix_ms_to_timestamp),
        completed_at: update.completed_at_unix_ms.map(unix_ms_to_timestamp),
        ..Default::default()
    }
}

/// StatusUpdate -> workflow execution status proto. Workflow executions
/// carry no message array; system diagnostics land in `error`.
pub fn to_workflow_status(update: &StatusUpdate) -> WorkflowExecutionStatus {
    let mut error = update.error.clone().unwrap_or_default();
    if error.is_empty() {
        if let Some(first) = update.system_messages.first() {
            error = first.clone();
        }
    }
    WorkflowExecutionStatus {
        phase: update
            .phase
            .as_deref()
            .map(parse_phase)
            .unwrap_or(ExecutionPhase::Unspecified) as i32,
        error,
        output: update.output.clone().unwrap_or_default(),
        temporal_workflow_id: update.temporal_workflow_id.clone().unwrap_or_default(),
        started_at: update.started_at_unix_ms.map(unix_ms_to_timestamp),
        completed_at: update.completed_at_unix_ms.map(unix_ms_to_timestamp),
        ..Default::default()
    }
}

fn parse_input<T: serde::de::DeserializeOwned>(input: Value) -> Result<T, ActivityError> {
    serde_json::from_value(input)
        .map_err(|e| ActivityError::non_retryable(format!("invalid activity input: {}", e)))
}

/// Local activity applying a StatusUpdate to an agent execution through
/// the update-status pipeline (merge, persist, broadcast).
pub fn update_agent_execution_status_activity(
    pipeline: Arc<Pipeline<AgentExecution>>,
) -> ActivityFn {
    Arc::new(move |_ctx, input| {
        let pipeline = pipeline.clone();
        async move {
            let input: UpdateStatusActivityInput = parse_input(input)?;
            let status = to_agent_status(&input.status);
            let updated = run_update_status(&pipeline, input.execution_id, status)
                .await
                .map_err(|e| ActivityError::retryable(e.to_string()))?;
            Ok(json!({"execution_id": updated.id(), "phase": updated.phase() as i32}))
        }
        .boxed()
    })
}

/// Local activity applying a StatusUpdate to a workflow execution.
pub fn update_workflow_execution_status_activity(
    pipeline: Arc<Pipeline<WorkflowExecution>>,
) -> ActivityFn {
    Arc::new(move |_ctx, input| {
        let pipeline = pipeline.clone();
        async move {
            let input: UpdateStatusActivityInput = parse_input(input)?;
            let status = to_workflow_status(&input.status);
            let updated = run_update_status(&pipeline, input.execution_id, status)
                .await
                .map_err(|e| ActivityError::retryable(e.to_string()))?;
            Ok(json!({"execution_id": updated.id(), "phase": updated.phase() as i32}))
        }
        .boxed()
    })
}

/// System activity completing an open external activity by task token.
/// Empty token: no-op success. An error payload takes precedence over a
/// result payload.
pub fn complete_external_activity(client_handle: Arc<ClientHandle>) -> ActivityFn {
    Arc::new(move |_ctx, input| {
        let client_handle = client_handle.clone();
        async move {
            let input: CompleteExternalInput = parse_input(input)?;
            if input.task_token.is_empty() {
                return Ok(json!({"completed": false}));
            }
            let client = client_handle
                .get()
                .ok_or_else(|| ActivityError::retryable("engine client unavailable"))?;

            let outcome = match input.error {
                Some(error) => Err(ActivityError::non_retryable(error)),
                None => Ok(input.result.unwrap_or(Value::Null)),
            };
            client
                .complete_activity(&input.task_token, outcome)
                .await
                .map_err(|e| ActivityError::retryable(e.to_string()))?;
            Ok(json!({"completed": true}))
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_phase() {
        assert_eq!(parse_phase("FAILED"), ExecutionPhase::ExecutionFailed);
        assert_eq!(parse_phase("IN_PROGRESS"), ExecutionPhase::ExecutionInProgress);
        assert_eq!(parse_phase("bogus"), ExecutionPhase::Unspecified);
    }

    #[test]
    fn test_unix_ms_round_trip() {
        let ts = unix_ms_to_timestamp(1_700_000_123_456);
        assert_eq!(ts.seconds, 1_700_000_123);
        assert_eq!(ts.nanos, 456_000_000);
    }

    #[test]
    fn test_to_agent_status_builds_system_messages() {
        let update = StatusUpdate {
            phase: Some("FAILED".into()),
            error: Some("boom".into()),
            system_messages: vec!["internal system error".into(), "details".into()],
            completed_at_unix_ms: Some(now_unix_ms()),
            ..Default::default()
        };
        let status = to_agent_status(&update);
        assert_eq!(status.phase(), ExecutionPhase::ExecutionFailed);
        assert_eq!(status.messages.len(), 2);
        assert!(status
            .messages
            .iter()
            .all(|m| m.kind() == MessageKind::System));
        assert_eq!(status.error, "boom");
        assert!(status.completed_at.is_some());
    }

    #[test]
    fn test_to_workflow_status_falls_back_to_system_message() {
        let update = StatusUpdate {
            phase: Some("FAILED".into()),
            system_messages: vec!["worker died".into()],
            ..Default::default()
        };
        let status = to_workflow_status(&update);
        assert_eq!(status.error, "worker died");
    }
}
