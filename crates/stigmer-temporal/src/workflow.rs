//! Workflow context and registration types

use futures::future::BoxFuture;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::activity::{ActivityError, ActivityOptions};
use crate::client::Payload;

/// Error returned by orchestration workflow code.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// An activity failed after exhausting its retry policy
    #[error("{0}")]
    Activity(#[from] ActivityError),

    /// Deterministic workflow-level failure
    #[error("{0}")]
    Application(String),
}

impl WorkflowError {
    pub fn application(msg: impl Into<String>) -> Self {
        WorkflowError::Application(msg.into())
    }
}

/// What workflow code may do. Implemented by each engine; orchestration
/// workflows are plain async functions over this trait, which keeps them
/// testable with scripted contexts.
#[async_trait]
pub trait WorkflowContext: Send + Sync {
    /// The id this workflow was started under.
    fn workflow_id(&self) -> &str;

    /// Read a memo value supplied at start.
    fn memo(&self, key: &str) -> Option<Payload>;

    /// Execute a remote activity. `options.task_queue` names the target
    /// queue; the workflow's own queue is used when unset.
    async fn execute_activity(
        &self,
        options: ActivityOptions,
        activity: &str,
        input: Payload,
    ) -> Result<Payload, ActivityError>;

    /// Execute a local activity: in-process, never routed through a task
    /// queue a foreign worker could pick up.
    async fn execute_local_activity(
        &self,
        options: ActivityOptions,
        activity: &str,
        input: Payload,
    ) -> Result<Payload, ActivityError>;
}

/// Registered workflow entry point.
pub type WorkflowFn = Arc<
    dyn Fn(Arc<dyn WorkflowContext>, Payload) -> BoxFuture<'static, Result<Payload, WorkflowError>>
        + Send
        + Sync,
>;

/// Registered activity entry point.
pub type ActivityFn = Arc<
    dyn Fn(crate::activity::ActivityContext, Payload) -> BoxFuture<'static, Result<Payload, ActivityError>>
        + Send
        + Sync,
>;
