// Shared harness: a full daemon wired over the in-process transport, with
// the embedded engine standing in for Temporal. Tests register fake
// runner workers on the `*_runner` queues exactly where the foreign
// processes would.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;
use tonic::transport::Channel;

use stigmer_claimcheck::ClaimCheckManager;
use stigmer_daemon::config::{TaskQueues, TemporalConfig};
use stigmer_daemon::manager::{EngineManager, InjectionTargets};
use stigmer_daemon::server::DaemonServices;
use stigmer_protocol::proto::{
    Agent, AgentSpec, ApiResourceMetadata, OwnerScope, Workflow, WorkflowDocument, WorkflowSpec,
    WorkflowTask,
};
use stigmer_storage::ResourceStore;
use stigmer_temporal::{EngineClient, MemoryEngine, MemoryEngineDialer, WorkerRegistration};

pub const AGENT_RUNNER_QUEUE: &str = "agent_execution_runner";
pub const WORKFLOW_RUNNER_QUEUE: &str = "workflow_execution_runner";
pub const VALIDATION_RUNNER_QUEUE: &str = "workflow_validation_runner";

pub fn temporal_config() -> TemporalConfig {
    TemporalConfig {
        host_port: "memory".to_string(),
        namespace: "default".to_string(),
        task_queues: TaskQueues {
            agent_execution_stigmer: "agent_execution_stigmer".to_string(),
            agent_execution_runner: AGENT_RUNNER_QUEUE.to_string(),
            workflow_execution_stigmer: "workflow_execution_stigmer".to_string(),
            workflow_execution_runner: WORKFLOW_RUNNER_QUEUE.to_string(),
            workflow_validation_stigmer: "workflow_validation_stigmer".to_string(),
            workflow_validation_runner: VALIDATION_RUNNER_QUEUE.to_string(),
        },
    }
}

pub struct TestDaemon {
    pub services: DaemonServices,
    pub channel: Channel,
    pub engine: Arc<MemoryEngine>,
    pub manager: Arc<EngineManager>,
}

impl TestDaemon {
    /// Daemon with a healthy embedded engine, connected and injected.
    pub async fn start() -> Self {
        Self::start_with(Arc::new(ClaimCheckManager::disabled()), true).await
    }

    /// Daemon whose engine starts out unreachable; the execution
    /// controllers keep nil creators until `connect` is called.
    pub async fn start_disconnected() -> Self {
        Self::start_with(Arc::new(ClaimCheckManager::disabled()), false).await
    }

    pub async fn start_with(claim_check: Arc<ClaimCheckManager>, connect: bool) -> Self {
        let services = DaemonServices::new(ResourceStore::in_memory(), claim_check);
        let channel = services
            .start_in_process()
            .await
            .expect("in-process transport");

        let engine = Arc::new(MemoryEngine::new());
        let dialer = Arc::new(MemoryEngineDialer::new(engine.clone()));
        let manager = EngineManager::new(
            dialer,
            temporal_config(),
            services.runtime.clone(),
            InjectionTargets {
                agent_execution: services.agent_execution.clone(),
                workflow_execution: services.workflow_execution.clone(),
                workflow: services.workflow.clone(),
            },
        )
        .with_monitor_interval(Duration::from_millis(50));

        let daemon = Self {
            services,
            channel,
            engine,
            manager,
        };
        if connect {
            daemon.manager.start().await;
            assert!(daemon.manager.is_connected());
            daemon.register_valid_validation_runner();
        }
        daemon
    }

    /// Bring a `start_disconnected` daemon's engine up.
    pub async fn connect(&self) {
        self.engine.set_healthy(true);
        self.manager.start().await;
        assert!(self.manager.is_connected());
        self.register_valid_validation_runner();
    }

    /// Stand-in for the foreign validation runner: accepts every spec.
    pub fn register_valid_validation_runner(&self) {
        self.engine
            .start_worker(
                WorkerRegistration::new(VALIDATION_RUNNER_QUEUE).register_activity(
                    "validateWorkflow",
                    Arc::new(|_ctx, _input| {
                        async move { Ok(json!({"state": "VALID", "errors": [], "warnings": []})) }
                            .boxed()
                    }),
                ),
            )
            .expect("validation runner");
    }
}

// ============================================================================
// Resource builders
// ============================================================================

pub fn metadata(name: &str, scope: OwnerScope, org: &str) -> ApiResourceMetadata {
    ApiResourceMetadata {
        name: name.to_string(),
        owner_scope: scope as i32,
        org: org.to_string(),
        ..Default::default()
    }
}

pub fn platform_agent(name: &str) -> Agent {
    Agent {
        metadata: Some(metadata(name, OwnerScope::Platform, "")),
        spec: Some(AgentSpec {
            description: "test agent".to_string(),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn org_agent(name: &str, org: &str) -> Agent {
    Agent {
        metadata: Some(metadata(name, OwnerScope::Organization, org)),
        spec: Some(AgentSpec::default()),
        status: None,
    }
}

pub fn workflow_with_tasks(name: &str, scope: OwnerScope, org: &str) -> Workflow {
    Workflow {
        metadata: Some(metadata(name, scope, org)),
        spec: Some(WorkflowSpec {
            document: Some(WorkflowDocument {
                dsl: "1.0.0".to_string(),
                namespace: "default".to_string(),
                name: name.to_lowercase().replace(' ', "-"),
                version: "0.1.0".to_string(),
            }),
            tasks: vec![WorkflowTask {
                name: "t1".to_string(),
                kind: "SET".to_string(),
                config_json: r#"{"set":{"x":"y"}}"#.to_string(),
            }],
        }),
        status: None,
    }
}

/// Poll until `probe` returns Some or the deadline passes.
pub async fn wait_for<T, F, Fut>(timeout: Duration, mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await {
            return value;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not reached within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
