// Durable-engine connection manager.
//
// Owns the engine client handle, the health-check loop and the worker
// lifecycle. Losing the engine is never fatal: controllers keep serving
// with nil creators/validators and executions stay PENDING until the
// monitor reconnects, rebuilds the workers and re-injects the creators.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use stigmer_temporal::{EngineClient, EngineDialer, EngineError, WorkerHandle};

use crate::config::TemporalConfig;
use crate::controllers::agent_execution::AgentExecutionController;
use crate::controllers::workflow::WorkflowController;
use crate::controllers::workflow_execution::WorkflowExecutionController;
use crate::execution::creator::WorkflowCreator;
use crate::execution::names;
use crate::execution::validator::WorkflowValidator;
use crate::execution::{build_worker_registrations, ExecutionRuntime};

const INITIAL_CONNECT_ATTEMPTS: u32 = 3;
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const MONITOR_INTERVAL: Duration = Duration::from_secs(15);
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

/// Shared handle to the current engine client. Readers clone the Arc and
/// never hold the lock across awaits. Once a client has been stored the
/// slot is never written back to None; shutdown closes the client but
/// leaves the handle intact.
#[derive(Default)]
pub struct ClientHandle {
    inner: RwLock<Option<Arc<dyn EngineClient>>>,
}

impl ClientHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<dyn EngineClient>> {
        self.inner.read().clone()
    }

    fn swap(&self, client: Arc<dyn EngineClient>) -> Option<Arc<dyn EngineClient>> {
        self.inner.write().replace(client)
    }
}

/// Controllers that receive fresh creators/validators on reconnect.
pub struct InjectionTargets {
    pub agent_execution: Arc<AgentExecutionController>,
    pub workflow_execution: Arc<WorkflowExecutionController>,
    pub workflow: Arc<WorkflowController>,
}

pub struct EngineManager {
    dialer: Arc<dyn EngineDialer>,
    config: TemporalConfig,
    handle: Arc<ClientHandle>,
    runtime: ExecutionRuntime,
    targets: InjectionTargets,

    connected: AtomicBool,
    consecutive_failures: AtomicU32,
    last_attempt: Mutex<Option<Instant>>,
    workers: Mutex<Vec<WorkerHandle>>,
    reconnect_gate: tokio::sync::Mutex<()>,
    monitor_interval: Duration,
    monitor_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl EngineManager {
    pub fn new(
        dialer: Arc<dyn EngineDialer>,
        config: TemporalConfig,
        runtime: ExecutionRuntime,
        targets: InjectionTargets,
    ) -> Arc<Self> {
        let handle = runtime.client_handle.clone();
        Arc::new(Self {
            dialer,
            config,
            handle,
            runtime,
            targets,
            connected: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            last_attempt: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            reconnect_gate: tokio::sync::Mutex::new(()),
            monitor_interval: MONITOR_INTERVAL,
            monitor_task: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Shorter monitor ticks for tests.
    pub fn with_monitor_interval(self: Arc<Self>, interval: Duration) -> Arc<Self> {
        let mut manager = Arc::try_unwrap(self).unwrap_or_else(|_| {
            panic!("with_monitor_interval must be called before the manager is shared")
        });
        manager.monitor_interval = interval;
        Arc::new(manager)
    }

    /// Lock-free read of the current client.
    pub fn get_client(&self) -> Option<Arc<dyn EngineClient>> {
        self.handle.get()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Initial connect (bounded retries, never fatal) followed by the
    /// background health monitor.
    pub async fn start(self: &Arc<Self>) {
        for attempt in 1..=INITIAL_CONNECT_ATTEMPTS {
            match self.connect_and_install().await {
                Ok(()) => break,
                Err(err) => {
                    self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(
                        attempt = attempt,
                        host_port = %self.config.host_port,
                        error = %err,
                        "durable engine connection failed"
                    );
                    if attempt < INITIAL_CONNECT_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
                    }
                }
            }
        }
        if !self.is_connected() {
            tracing::warn!(
                "durable engine unavailable after initial attempts; health monitor will keep retrying"
            );
        }

        let manager = self.clone();
        let task = tokio::spawn(async move {
            manager.monitor_loop().await;
        });
        *self.monitor_task.lock() = Some(task);
    }

    async fn monitor_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.monitor_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick fires immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            match self.get_client() {
                Some(client) => {
                    match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, client.check_health()).await {
                        Ok(Ok(())) => {
                            if !self.connected.swap(true, Ordering::SeqCst) {
                                tracing::info!("durable engine healthy again");
                                self.consecutive_failures.store(0, Ordering::SeqCst);
                            }
                        }
                        Ok(Err(err)) => {
                            self.note_unhealthy(&err.to_string()).await;
                        }
                        Err(_) => {
                            self.note_unhealthy("health check timed out").await;
                        }
                    }
                }
                None => self.maybe_reconnect().await,
            }
        }
    }

    async fn note_unhealthy(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::warn!(reason = %reason, "durable engine unhealthy");
        }
        self.maybe_reconnect().await;
    }

    /// Reconnection attempt, gated by exponential backoff on the
    /// consecutive-failure counter. A non-blocking try-lock keeps
    /// concurrent ticks from dialing twice.
    async fn maybe_reconnect(&self) {
        let Ok(_guard) = self.reconnect_gate.try_lock() else {
            return;
        };

        let failures = self.consecutive_failures.load(Ordering::SeqCst);
        let backoff = Duration::from_secs(1u64 << failures.min(5)).min(MAX_RECONNECT_BACKOFF);
        {
            let last = self.last_attempt.lock();
            if let Some(last) = *last {
                if last.elapsed() < backoff {
                    return;
                }
            }
        }
        *self.last_attempt.lock() = Some(Instant::now());

        match self.connect_and_install().await {
            Ok(()) => {
                tracing::info!(host_port = %self.config.host_port, "durable engine reconnected");
            }
            Err(err) => {
                self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    failures = self.consecutive_failures.load(Ordering::SeqCst),
                    error = %err,
                    "reconnection attempt failed"
                );
            }
        }
    }

    /// Dial, swap the client in, restart workers, rebuild and re-inject
    /// creators and the validator, then close the previous client.
    async fn connect_and_install(&self) -> Result<(), EngineError> {
        let client = self
            .dialer
            .dial(&self.config.host_port, &self.config.namespace)
            .await?;

        let previous = self.handle.swap(client.clone());
        self.stop_workers();
        self.start_workers(&client);
        self.inject(&client);
        self.connected.store(true, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);

        if let Some(previous) = previous {
            // The dialer may hand back the same shared client; only close a
            // genuinely replaced one.
            if !Arc::ptr_eq(&previous, &client) {
                previous.close().await;
            }
        }
        Ok(())
    }

    fn start_workers(&self, client: &Arc<dyn EngineClient>) {
        let registrations = build_worker_registrations(&self.runtime, &self.config.task_queues);
        let mut workers = self.workers.lock();
        for registration in registrations {
            let queue = registration.task_queue.clone();
            match client.start_worker(registration) {
                Ok(handle) => {
                    tracing::info!(task_queue = %queue, "worker started");
                    workers.push(handle);
                }
                Err(err) => {
                    tracing::error!(task_queue = %queue, error = %err, "worker failed to start");
                }
            }
        }
    }

    fn stop_workers(&self) {
        let workers: Vec<WorkerHandle> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            tracing::debug!(task_queue = %worker.task_queue(), "stopping worker");
            worker.shutdown();
        }
    }

    fn inject(&self, client: &Arc<dyn EngineClient>) {
        let queues = &self.config.task_queues;
        self.targets
            .agent_execution
            .set_workflow_creator(Some(Arc::new(WorkflowCreator::new(
                client.clone(),
                names::AGENT_EXECUTION_WORKFLOW,
                queues.agent_execution_stigmer.clone(),
                queues.agent_execution_runner.clone(),
            ))));
        self.targets
            .workflow_execution
            .set_workflow_creator(Some(Arc::new(WorkflowCreator::new(
                client.clone(),
                names::WORKFLOW_EXECUTION_WORKFLOW,
                queues.workflow_execution_stigmer.clone(),
                queues.workflow_execution_runner.clone(),
            ))));
        self.targets
            .workflow
            .set_validator(Some(Arc::new(WorkflowValidator::new(
                client.clone(),
                queues.workflow_validation_stigmer.clone(),
                queues.workflow_validation_runner.clone(),
            ))));
    }

    /// Stop workers and close the client. The handle keeps its last value;
    /// nothing downstream ever observes a client being torn back out.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        if let Some(task) = self.monitor_task.lock().take() {
            task.abort();
        }
        self.stop_workers();
        if let Some(client) = self.handle.get() {
            client.close().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        tracing::info!("engine manager shut down");
    }
}
