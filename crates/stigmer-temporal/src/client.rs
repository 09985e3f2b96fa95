//! Engine client and dialer traits

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::activity::ActivityError;
use crate::worker::{WorkerHandle, WorkerRegistration};
use crate::workflow::WorkflowError;

/// Payloads cross the engine boundary as JSON values.
pub type Payload = serde_json::Value;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Engine unreachable or unhealthy
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// No workflow/activity registered under the requested name
    #[error("not registered: {0}")]
    NotRegistered(String),

    /// Unknown or already-completed task token
    #[error("unknown task token")]
    UnknownTaskToken,

    /// Client already closed
    #[error("engine client closed")]
    Closed,

    #[error("engine error: {0}")]
    Internal(String),
}

/// Options for starting a durable workflow.
#[derive(Debug, Clone, Default)]
pub struct WorkflowOptions {
    /// Caller-chosen workflow id (`{workflow_name}/{execution_id}`)
    pub workflow_id: String,
    /// Queue the workflow task is scheduled on
    pub task_queue: String,
    /// Per-execution memo, readable from workflow code
    pub memo: HashMap<String, Payload>,
    /// Overall execution deadline
    pub execution_timeout: Option<Duration>,
}

impl WorkflowOptions {
    pub fn new(workflow_id: impl Into<String>, task_queue: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            task_queue: task_queue.into(),
            memo: HashMap::new(),
            execution_timeout: None,
        }
    }

    pub fn with_memo(mut self, key: impl Into<String>, value: Payload) -> Self {
        self.memo.insert(key.into(), value);
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }
}

/// Handle to a started workflow: ids plus an awaitable result.
pub struct WorkflowHandle {
    pub workflow_id: String,
    pub run_id: String,
    result_rx: oneshot::Receiver<Result<Payload, WorkflowError>>,
}

impl WorkflowHandle {
    pub fn new(
        workflow_id: String,
        run_id: String,
        result_rx: oneshot::Receiver<Result<Payload, WorkflowError>>,
    ) -> Self {
        Self {
            workflow_id,
            run_id,
            result_rx,
        }
    }

    /// Wait for the workflow to finish and return its result.
    pub async fn result(self) -> Result<Payload, EngineError> {
        match self.result_rx.await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(err)) => Err(EngineError::Internal(err.to_string())),
            Err(_) => Err(EngineError::Internal(
                "workflow result channel dropped".to_string(),
            )),
        }
    }
}

/// Client surface of the durable engine.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Start a workflow by registered name.
    async fn execute_workflow(
        &self,
        options: WorkflowOptions,
        workflow_name: &str,
        input: Payload,
    ) -> Result<WorkflowHandle, EngineError>;

    /// Complete an activity that previously reported result-pending,
    /// identified by its opaque task token.
    async fn complete_activity(
        &self,
        task_token: &[u8],
        result: Result<Payload, ActivityError>,
    ) -> Result<(), EngineError>;

    /// Liveness probe against the engine.
    async fn check_health(&self) -> Result<(), EngineError>;

    /// Register a worker (workflows + activities on one task queue) and
    /// start it polling.
    fn start_worker(&self, registration: WorkerRegistration) -> Result<WorkerHandle, EngineError>;

    /// Release the connection. Workers started from this client stop
    /// receiving tasks.
    async fn close(&self);
}

/// Connection factory, the seam where the hosted Temporal driver plugs in.
#[async_trait]
pub trait EngineDialer: Send + Sync {
    async fn dial(
        &self,
        host_port: &str,
        namespace: &str,
    ) -> Result<Arc<dyn EngineClient>, EngineError>;
}
