//! Embedded in-memory engine.
//!
//! Executes registered workflows inline on the tokio runtime. Honors the
//! parts of the engine contract the daemon depends on: task-queue
//! routing, memos, retry policies, start-to-close timeouts, local
//! activities, and task-token completion. Nothing is persisted; this is
//! the dev-mode and test engine, not a durability layer.
//!
//! One deliberate divergence: a queue with no registered handler fails
//! fast with a schedule-to-start timeout error instead of waiting the
//! timer out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::activity::{ActivityContext, ActivityError, ActivityOptions, TimeoutKind};
use crate::client::{
    EngineClient, EngineDialer, EngineError, Payload, WorkflowHandle, WorkflowOptions,
};
use crate::worker::{WorkerHandle, WorkerRegistration};
use crate::workflow::{ActivityFn, WorkflowContext};

type PendingSender = oneshot::Sender<Result<Payload, ActivityError>>;

struct RegisteredQueue {
    generation: u64,
    registration: WorkerRegistration,
}

struct EngineState {
    queues: RwLock<HashMap<String, RegisteredQueue>>,
    pending: Mutex<HashMap<Vec<u8>, PendingSender>>,
    generation: AtomicU64,
    healthy: AtomicBool,
    closed: AtomicBool,
}

/// In-process engine implementation.
pub struct MemoryEngine {
    state: Arc<EngineState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(EngineState {
                queues: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                healthy: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Flip the health probe outcome; used to exercise the connection
    /// manager's reconnect path.
    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineClient for MemoryEngine {
    async fn execute_workflow(
        &self,
        options: WorkflowOptions,
        workflow_name: &str,
        input: Payload,
    ) -> Result<WorkflowHandle, EngineError> {
        self.ensure_open()?;
        if !self.state.healthy.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("engine marked unhealthy".into()));
        }

        let workflow = {
            let queues = self.state.queues.read();
            queues
                .get(&options.task_queue)
                .and_then(|q| q.registration.workflows.get(workflow_name))
                .cloned()
        }
        .ok_or_else(|| {
            EngineError::NotRegistered(format!(
                "workflow {} on task queue {}",
                workflow_name, options.task_queue
            ))
        })?;

        let ctx: Arc<dyn WorkflowContext> = Arc::new(MemoryWorkflowContext {
            state: self.state.clone(),
            workflow_id: options.workflow_id.clone(),
            task_queue: options.task_queue.clone(),
            memo: options.memo.clone(),
        });

        let run_id = Uuid::now_v7().to_string();
        let (result_tx, result_rx) = oneshot::channel();
        let workflow_id = options.workflow_id.clone();
        tracing::debug!(workflow_id = %workflow_id, run_id = %run_id, "starting workflow");
        tokio::spawn(async move {
            let result = workflow(ctx, input).await;
            let _ = result_tx.send(result);
        });

        Ok(WorkflowHandle::new(options.workflow_id, run_id, result_rx))
    }

    async fn complete_activity(
        &self,
        task_token: &[u8],
        result: Result<Payload, ActivityError>,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        let sender = self
            .state
            .pending
            .lock()
            .remove(task_token)
            .ok_or(EngineError::UnknownTaskToken)?;
        let _ = sender.send(result);
        Ok(())
    }

    async fn check_health(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        if self.state.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Unavailable("engine marked unhealthy".into()))
        }
    }

    fn start_worker(&self, registration: WorkerRegistration) -> Result<WorkerHandle, EngineError> {
        self.ensure_open()?;
        let task_queue = registration.task_queue.clone();
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst);
        self.state.queues.write().insert(
            task_queue.clone(),
            RegisteredQueue {
                generation,
                registration,
            },
        );

        let state = self.state.clone();
        let queue = task_queue.clone();
        let shutdown = Box::new(move || {
            let mut queues = state.queues.write();
            // A replacement worker may have re-registered the queue; only
            // remove our own registration.
            if queues.get(&queue).map(|q| q.generation) == Some(generation) {
                queues.remove(&queue);
            }
        });
        Ok(WorkerHandle::new(task_queue, shutdown))
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.queues.write().clear();
        self.state.pending.lock().clear();
    }
}

/// Dialer handing out a shared embedded engine.
pub struct MemoryEngineDialer {
    engine: Arc<MemoryEngine>,
}

impl MemoryEngineDialer {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EngineDialer for MemoryEngineDialer {
    async fn dial(
        &self,
        _host_port: &str,
        _namespace: &str,
    ) -> Result<Arc<dyn EngineClient>, EngineError> {
        self.engine.check_health().await?;
        Ok(self.engine.clone())
    }
}

struct MemoryWorkflowContext {
    state: Arc<EngineState>,
    workflow_id: String,
    task_queue: String,
    memo: HashMap<String, Payload>,
}

enum ActivityScope {
    Routed,
    Local,
}

impl MemoryWorkflowContext {
    fn lookup(
        &self,
        scope: &ActivityScope,
        queue: &str,
        activity: &str,
    ) -> Option<ActivityFn> {
        let queues = self.state.queues.read();
        let registration = &queues.get(queue)?.registration;
        match scope {
            ActivityScope::Routed => registration.activities.get(activity).cloned(),
            ActivityScope::Local => registration.local_activities.get(activity).cloned(),
        }
    }

    async fn run_activity(
        &self,
        scope: ActivityScope,
        options: ActivityOptions,
        activity: &str,
        input: Payload,
    ) -> Result<Payload, ActivityError> {
        let queue = match (&scope, &options.task_queue) {
            // Local activities never route off the workflow's own queue.
            (ActivityScope::Local, _) => self.task_queue.clone(),
            (ActivityScope::Routed, Some(q)) => q.clone(),
            (ActivityScope::Routed, None) => self.task_queue.clone(),
        };

        let mut attempt: u32 = 1;
        loop {
            let error = match self.lookup(&scope, &queue, activity) {
                None => ActivityError::timeout(
                    TimeoutKind::ScheduleToStart,
                    format!("no worker polling task queue {} for {}", queue, activity),
                ),
                Some(f) => {
                    let token = Uuid::now_v7().as_bytes().to_vec();
                    let (tx, rx) = oneshot::channel();
                    // Register before running: an external completion may
                    // land while the activity is still returning pending.
                    self.state.pending.lock().insert(token.clone(), tx);

                    let ctx = ActivityContext::new(token.clone(), attempt);
                    let outcome =
                        tokio::time::timeout(options.start_to_close, f(ctx, input.clone())).await;

                    match outcome {
                        Err(_) => {
                            self.state.pending.lock().remove(&token);
                            ActivityError::timeout(
                                TimeoutKind::StartToClose,
                                format!("activity {} exceeded start-to-close timeout", activity),
                            )
                        }
                        Ok(Err(err)) if err.is_result_pending() => {
                            match tokio::time::timeout(options.start_to_close, rx).await {
                                Ok(Ok(result)) => {
                                    match result {
                                        Ok(value) => return Ok(value),
                                        Err(err) => err,
                                    }
                                }
                                Ok(Err(_)) | Err(_) => {
                                    self.state.pending.lock().remove(&token);
                                    ActivityError::timeout(
                                        TimeoutKind::StartToClose,
                                        format!(
                                            "activity {} was not completed before its deadline",
                                            activity
                                        ),
                                    )
                                }
                            }
                        }
                        Ok(Err(err)) => {
                            self.state.pending.lock().remove(&token);
                            err
                        }
                        Ok(Ok(value)) => {
                            self.state.pending.lock().remove(&token);
                            return Ok(value);
                        }
                    }
                }
            };

            if !error.retryable {
                return Err(error);
            }
            match options.retry_policy.delay_after_attempt(attempt) {
                Some(delay) => {
                    tracing::debug!(
                        activity = activity,
                        attempt = attempt,
                        error = %error,
                        "retrying activity"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(error),
            }
        }
    }
}

#[async_trait]
impl WorkflowContext for MemoryWorkflowContext {
    fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    fn memo(&self, key: &str) -> Option<Payload> {
        self.memo.get(key).cloned()
    }

    async fn execute_activity(
        &self,
        options: ActivityOptions,
        activity: &str,
        input: Payload,
    ) -> Result<Payload, ActivityError> {
        self.run_activity(ActivityScope::Routed, options, activity, input)
            .await
    }

    async fn execute_local_activity(
        &self,
        options: ActivityOptions,
        activity: &str,
        input: Payload,
    ) -> Result<Payload, ActivityError> {
        self.run_activity(ActivityScope::Local, options, activity, input)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn options(queue: &str) -> ActivityOptions {
        ActivityOptions::new(Duration::from_secs(5))
            .on_task_queue(queue)
            .with_retry_policy(RetryPolicy::no_retry())
    }

    fn echo_workflow(queue: &'static str) -> crate::workflow::WorkflowFn {
        Arc::new(move |ctx, input| {
            async move {
                let result = ctx
                    .execute_activity(options(queue), "echo", input)
                    .await?;
                Ok(result)
            }
            .boxed()
        })
    }

    fn echo_activity() -> ActivityFn {
        Arc::new(|_ctx, input| async move { Ok(input) }.boxed())
    }

    #[tokio::test]
    async fn test_workflow_routes_activity_to_runner_queue() {
        let engine = MemoryEngine::new();
        let _stigmer = engine
            .start_worker(
                WorkerRegistration::new("exec_stigmer")
                    .register_workflow("invoke", echo_workflow("exec_runner")),
            )
            .unwrap();
        let _runner = engine
            .start_worker(
                WorkerRegistration::new("exec_runner").register_activity("echo", echo_activity()),
            )
            .unwrap();

        let handle = engine
            .execute_workflow(
                WorkflowOptions::new("invoke/e-1", "exec_stigmer"),
                "invoke",
                json!({"x": 1}),
            )
            .await
            .unwrap();
        assert_eq!(handle.result().await.unwrap(), json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_missing_worker_is_schedule_to_start_timeout() {
        let engine = MemoryEngine::new();
        let _stigmer = engine
            .start_worker(
                WorkerRegistration::new("exec_stigmer")
                    .register_workflow("invoke", echo_workflow("empty_queue")),
            )
            .unwrap();

        let handle = engine
            .execute_workflow(
                WorkflowOptions::new("invoke/e-2", "exec_stigmer"),
                "invoke",
                json!({}),
            )
            .await
            .unwrap();
        let err = handle.result().await.unwrap_err();
        assert!(err.to_string().contains("no worker polling"));
    }

    #[tokio::test]
    async fn test_unregistered_workflow_rejected() {
        let engine = MemoryEngine::new();
        let err = engine
            .execute_workflow(WorkflowOptions::new("x", "nowhere"), "missing", json!({}))
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn test_retry_policy_drives_reattempts() {
        let engine = MemoryEngine::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let flaky: ActivityFn = Arc::new(move |_ctx, _input| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ActivityError::retryable("transient"))
                } else {
                    Ok(json!("ok"))
                }
            }
            .boxed()
        });

        let _worker = engine
            .start_worker(
                WorkerRegistration::new("q")
                    .register_workflow(
                        "wf",
                        Arc::new(|ctx, _input| {
                            async move {
                                let opts = ActivityOptions::new(Duration::from_secs(5))
                                    .with_retry_policy(
                                        RetryPolicy::exponential()
                                            .with_initial_interval(Duration::from_millis(1)),
                                    );
                                Ok(ctx.execute_activity(opts, "flaky", json!({})).await?)
                            }
                            .boxed()
                        }),
                    )
                    .register_activity("flaky", flaky),
            )
            .unwrap();

        let handle = engine
            .execute_workflow(WorkflowOptions::new("wf/1", "q"), "wf", json!({}))
            .await
            .unwrap();
        assert_eq!(handle.result().await.unwrap(), json!("ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_result_pending_completed_by_token() {
        let engine = Arc::new(MemoryEngine::new());
        let (token_tx, token_rx) = oneshot::channel::<Vec<u8>>();
        let token_tx = Arc::new(Mutex::new(Some(token_tx)));

        let pending: ActivityFn = Arc::new(move |ctx, _input| {
            let token_tx = token_tx.clone();
            async move {
                if let Some(tx) = token_tx.lock().take() {
                    let _ = tx.send(ctx.task_token().to_vec());
                }
                Err(ActivityError::result_pending())
            }
            .boxed()
        });

        let _worker = engine
            .start_worker(
                WorkerRegistration::new("q")
                    .register_workflow(
                        "wf",
                        Arc::new(|ctx, _input| {
                            async move {
                                Ok(ctx
                                    .execute_activity(
                                        ActivityOptions::new(Duration::from_secs(5)),
                                        "pending",
                                        json!({}),
                                    )
                                    .await?)
                            }
                            .boxed()
                        }),
                    )
                    .register_activity("pending", pending),
            )
            .unwrap();

        let handle = engine
            .execute_workflow(WorkflowOptions::new("wf/1", "q"), "wf", json!({}))
            .await
            .unwrap();

        let token = token_rx.await.unwrap();
        engine
            .complete_activity(&token, Ok(json!("external result")))
            .await
            .unwrap();
        assert_eq!(handle.result().await.unwrap(), json!("external result"));
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let engine = MemoryEngine::new();
        let err = engine
            .complete_activity(b"bogus", Ok(json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownTaskToken));
    }

    #[tokio::test]
    async fn test_local_activity_not_reachable_remotely() {
        let engine = MemoryEngine::new();
        let _worker = engine
            .start_worker(
                WorkerRegistration::new("q")
                    .register_workflow(
                        "wf",
                        Arc::new(|ctx, input| {
                            async move {
                                // Remote call to a local-only activity must
                                // not resolve.
                                let remote = ctx
                                    .execute_activity(
                                        ActivityOptions::new(Duration::from_secs(1))
                                            .with_retry_policy(RetryPolicy::no_retry()),
                                        "update",
                                        input.clone(),
                                    )
                                    .await;
                                assert!(remote.is_err());
                                Ok(ctx
                                    .execute_local_activity(
                                        ActivityOptions::new(Duration::from_secs(1)),
                                        "update",
                                        input,
                                    )
                                    .await?)
                            }
                            .boxed()
                        }),
                    )
                    .register_local_activity("update", echo_activity()),
            )
            .unwrap();

        let handle = engine
            .execute_workflow(WorkflowOptions::new("wf/1", "q"), "wf", json!(7))
            .await
            .unwrap();
        assert_eq!(handle.result().await.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn test_memo_visible_to_workflow() {
        let engine = MemoryEngine::new();
        let _worker = engine
            .start_worker(WorkerRegistration::new("q").register_workflow(
                "wf",
                Arc::new(|ctx, _input| {
                    async move { Ok(ctx.memo("activityTaskQueue").unwrap_or(json!(null))) }.boxed()
                }),
            ))
            .unwrap();

        let handle = engine
            .execute_workflow(
                WorkflowOptions::new("wf/1", "q").with_memo("activityTaskQueue", json!("runner_q")),
                "wf",
                json!({}),
            )
            .await
            .unwrap();
        assert_eq!(handle.result().await.unwrap(), json!("runner_q"));
    }

    #[tokio::test]
    async fn test_worker_shutdown_deregisters_queue() {
        let engine = MemoryEngine::new();
        let worker = engine
            .start_worker(WorkerRegistration::new("q").register_workflow(
                "wf",
                Arc::new(|_ctx, input| async move { Ok(input) }.boxed()),
            ))
            .unwrap();

        worker.shutdown();
        let err = engine
            .execute_workflow(WorkflowOptions::new("wf/1", "q"), "wf", json!({}))
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn test_restarted_worker_survives_stale_shutdown() {
        let engine = MemoryEngine::new();
        let old = engine
            .start_worker(WorkerRegistration::new("q").register_workflow(
                "wf",
                Arc::new(|_ctx, input| async move { Ok(input) }.boxed()),
            ))
            .unwrap();
        let _new = engine
            .start_worker(WorkerRegistration::new("q").register_workflow(
                "wf",
                Arc::new(|_ctx, input| async move { Ok(input) }.boxed()),
            ))
            .unwrap();

        // Stale handle must not tear down the replacement registration.
        old.shutdown();
        assert!(engine
            .execute_workflow(WorkflowOptions::new("wf/1", "q"), "wf", json!({}))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_health_flip() {
        let engine = MemoryEngine::new();
        assert!(engine.check_health().await.is_ok());
        engine.set_healthy(false);
        assert!(engine.check_health().await.is_err());
        engine.set_healthy(true);
        assert!(engine.check_health().await.is_ok());
    }
}
