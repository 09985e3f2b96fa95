// Synchronous workflow-spec validation through the durable engine.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use stigmer_core::ApiError;
use stigmer_protocol::proto::Workflow;
use stigmer_temporal::{EngineClient, WorkflowOptions};

use super::names::{MEMO_ACTIVITY_TASK_QUEUE, WORKFLOW_VALIDATION_WORKFLOW};

/// Overall budget for one validation round trip.
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationVerdict {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationVerdict {
    pub fn is_valid(&self) -> bool {
        self.state == "VALID"
    }

    pub fn is_invalid(&self) -> bool {
        self.state == "INVALID"
    }

    pub fn first_error(&self) -> &str {
        self.errors
            .first()
            .map(String::as_str)
            .unwrap_or("workflow spec is invalid")
    }
}

/// Runs the ValidateWorkflow durable workflow and interprets the verdict.
/// Rebuilt by the connection manager on reconnect, like the creators.
pub struct WorkflowValidator {
    client: Arc<dyn EngineClient>,
    stigmer_queue: String,
    runner_queue: String,
}

impl WorkflowValidator {
    pub fn new(
        client: Arc<dyn EngineClient>,
        stigmer_queue: impl Into<String>,
        runner_queue: impl Into<String>,
    ) -> Self {
        Self {
            client,
            stigmer_queue: stigmer_queue.into(),
            runner_queue: runner_queue.into(),
        }
    }

    /// Validate a workflow spec. INVALID becomes a user-visible
    /// FailedPrecondition carrying the first validator error; an engine
    /// failure or a FAILED verdict is a system error.
    pub async fn validate(&self, workflow: &Workflow) -> Result<(), ApiError> {
        let input = workflow_spec_to_json(workflow);
        let workflow_id = format!("{}/{}", WORKFLOW_VALIDATION_WORKFLOW, Uuid::now_v7());
        let options = WorkflowOptions::new(workflow_id, self.stigmer_queue.clone())
            .with_memo(MEMO_ACTIVITY_TASK_QUEUE, json!(self.runner_queue))
            .with_execution_timeout(VALIDATION_TIMEOUT);

        let handle = self
            .client
            .execute_workflow(options, WORKFLOW_VALIDATION_WORKFLOW, input)
            .await
            .map_err(|e| ApiError::internal(format!("workflow validation failed to start: {}", e)))?;

        let result = tokio::time::timeout(VALIDATION_TIMEOUT, handle.result())
            .await
            .map_err(|_| ApiError::internal("workflow validation timed out"))?
            .map_err(|e| ApiError::internal(format!("workflow validation failed: {}", e)))?;

        let verdict: ValidationVerdict = serde_json::from_value(result)
            .map_err(|e| ApiError::internal(format!("invalid validation verdict: {}", e)))?;

        if verdict.is_valid() {
            for warning in &verdict.warnings {
                tracing::warn!(warning = %warning, "workflow validation warning");
            }
            return Ok(());
        }
        if verdict.is_invalid() {
            return Err(ApiError::failed_precondition(verdict.first_error().to_string()));
        }
        Err(ApiError::internal(format!(
            "workflow validation failed: {}",
            verdict.first_error()
        )))
    }
}

/// Convert the workflow spec into the validator's native JSON form. Task
/// configs are JSON strings on the wire; parse them so the validator sees
/// structure, falling back to the raw string for non-JSON payloads.
pub fn workflow_spec_to_json(workflow: &Workflow) -> Value {
    let spec = workflow.spec.clone().unwrap_or_default();
    let document = spec.document.unwrap_or_default();
    let tasks: Vec<Value> = spec
        .tasks
        .iter()
        .map(|task| {
            let config: Value = serde_json::from_str(&task.config_json)
                .unwrap_or_else(|_| Value::String(task.config_json.clone()));
            json!({
                "name": task.name,
                "kind": task.kind,
                "config": config,
            })
        })
        .collect();
    json!({
        "document": {
            "dsl": document.dsl,
            "namespace": document.namespace,
            "name": document.name,
            "version": document.version,
        },
        "tasks": tasks,
    })
}
