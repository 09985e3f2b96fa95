//! Activity options, context and errors

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::retry::RetryPolicy;

/// Which activity timeout fired. The distinction drives operator-facing
/// diagnostics: schedule-to-start means no worker was polling the queue,
/// heartbeat means a worker picked the task up and died, start-to-close
/// means the activity ran past its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutKind {
    ScheduleToStart,
    StartToClose,
    Heartbeat,
}

/// Per-invocation activity options: explicit queue routing, timeouts and
/// the retry policy.
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    /// Target task queue. `None` keeps the activity on the workflow's own
    /// queue (local activities never route).
    pub task_queue: Option<String>,
    pub start_to_close: Duration,
    pub schedule_to_start: Option<Duration>,
    pub heartbeat_timeout: Option<Duration>,
    pub retry_policy: RetryPolicy,
}

impl ActivityOptions {
    pub fn new(start_to_close: Duration) -> Self {
        Self {
            task_queue: None,
            start_to_close,
            schedule_to_start: None,
            heartbeat_timeout: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn on_task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = Some(task_queue.into());
        self
    }

    pub fn with_schedule_to_start(mut self, timeout: Duration) -> Self {
        self.schedule_to_start = Some(timeout);
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Error returned by an activity execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Non-retryable errors fail the activity immediately, skipping the
    /// remaining attempts.
    pub retryable: bool,

    /// Set when the failure was a timeout
    pub timeout: Option<TimeoutKind>,

    /// Additional error details (for debugging)
    pub details: Option<Value>,
}

const RESULT_PENDING: &str = "RESULT_PENDING";

impl ActivityError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
            timeout: None,
            details: None,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
            timeout: None,
            details: None,
        }
    }

    pub fn timeout(kind: TimeoutKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: Some("TIMEOUT".to_string()),
            retryable: true,
            timeout: Some(kind),
            details: None,
        }
    }

    /// Sentinel returned by an activity that will be completed later by
    /// task token (`EngineClient::complete_activity`).
    pub fn result_pending() -> Self {
        Self {
            message: "activity result pending".to_string(),
            error_type: Some(RESULT_PENDING.to_string()),
            retryable: false,
            timeout: None,
            details: None,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_result_pending(&self) -> bool {
        self.error_type.as_deref() == Some(RESULT_PENDING)
    }

    pub fn is_timeout(&self, kind: TimeoutKind) -> bool {
        self.timeout == Some(kind)
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

/// Execution context handed to every activity invocation.
pub struct ActivityContext {
    task_token: Vec<u8>,
    attempt: u32,
    heartbeat_fn: Option<Box<dyn Fn(String) + Send + Sync>>,
}

impl ActivityContext {
    pub fn new(task_token: Vec<u8>, attempt: u32) -> Self {
        Self {
            task_token,
            attempt,
            heartbeat_fn: None,
        }
    }

    pub fn with_heartbeat<F>(mut self, f: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.heartbeat_fn = Some(Box::new(f));
        self
    }

    /// Opaque token identifying this invocation; passed to
    /// `complete_activity` for asynchronous completion.
    pub fn task_token(&self) -> &[u8] {
        &self.task_token
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Report progress (heartbeat).
    pub fn heartbeat(&self, details: &str) {
        if let Some(f) = &self.heartbeat_fn {
            f(details.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_pending_detection() {
        assert!(ActivityError::result_pending().is_result_pending());
        assert!(!ActivityError::retryable("boom").is_result_pending());
    }

    #[test]
    fn test_timeout_classification() {
        let err = ActivityError::timeout(TimeoutKind::ScheduleToStart, "no worker");
        assert!(err.is_timeout(TimeoutKind::ScheduleToStart));
        assert!(!err.is_timeout(TimeoutKind::Heartbeat));
        assert!(err.retryable);
    }

    #[test]
    fn test_options_builder() {
        let options = ActivityOptions::new(Duration::from_secs(600))
            .on_task_queue("agent_execution_runner")
            .with_schedule_to_start(Duration::from_secs(60))
            .with_heartbeat_timeout(Duration::from_secs(30))
            .with_retry_policy(RetryPolicy::no_retry());
        assert_eq!(options.task_queue.as_deref(), Some("agent_execution_runner"));
        assert_eq!(options.retry_policy.max_attempts, 1);
    }

    #[test]
    fn test_context_heartbeat_without_handler() {
        let ctx = ActivityContext::new(vec![1, 2, 3], 1);
        // Should not panic even without heartbeat function
        ctx.heartbeat("test");
        assert_eq!(ctx.task_token(), &[1, 2, 3]);
        assert_eq!(ctx.attempt(), 1);
    }
}
