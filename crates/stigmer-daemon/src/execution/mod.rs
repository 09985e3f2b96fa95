// Execution subsystem: orchestration workflows, local/system activities,
// workflow creators, the update-status pipeline and the stream brokers.

pub mod activities;
pub mod broker;
pub mod creator;
pub mod update_status;
pub mod validator;
pub mod workflows;

use std::sync::Arc;

use stigmer_claimcheck::ClaimCheckManager;
use stigmer_protocol::proto::{AgentExecution, WorkflowExecution};
use stigmer_storage::ResourceStore;
use stigmer_temporal::WorkerRegistration;

use crate::config::TaskQueues;
use crate::manager::ClientHandle;
use crate::pipeline::Pipeline;

use broker::StreamBroker;

/// Published workflow, activity and memo names. Workers must register the
/// exact names; creators and workflows must route by them.
pub mod names {
    pub const AGENT_EXECUTION_WORKFLOW: &str = "stigmer/agent-execution/invoke";
    pub const WORKFLOW_EXECUTION_WORKFLOW: &str = "stigmer/workflow-execution/invoke";
    pub const WORKFLOW_VALIDATION_WORKFLOW: &str = "ValidateWorkflow";

    pub const ACTIVITY_ENSURE_THREAD: &str = "EnsureThread";
    pub const ACTIVITY_EXECUTE_GRAPHTON: &str = "ExecuteGraphton";
    pub const ACTIVITY_EXECUTE_WORKFLOW_TASK: &str = "ExecuteWorkflowTask";
    pub const ACTIVITY_VALIDATE_WORKFLOW: &str = "validateWorkflow";
    pub const ACTIVITY_UPDATE_EXECUTION_STATUS: &str = "UpdateExecutionStatus";
    pub const ACTIVITY_COMPLETE_EXTERNAL: &str = "stigmer/system/complete-external-activity";

    pub const MEMO_ACTIVITY_TASK_QUEUE: &str = "activityTaskQueue";
}

/// Shared dependencies of the daemon-side workers. The connection manager
/// rebuilds workers from this on every reconnect.
#[derive(Clone)]
pub struct ExecutionRuntime {
    pub store: ResourceStore,
    pub agent_broker: Arc<StreamBroker<AgentExecution>>,
    pub workflow_broker: Arc<StreamBroker<WorkflowExecution>>,
    pub agent_update_pipeline: Arc<Pipeline<AgentExecution>>,
    pub workflow_update_pipeline: Arc<Pipeline<WorkflowExecution>>,
    pub claim_check: Arc<ClaimCheckManager>,
    pub client_handle: Arc<ClientHandle>,
}

impl ExecutionRuntime {
    pub fn new(
        store: ResourceStore,
        agent_broker: Arc<StreamBroker<AgentExecution>>,
        workflow_broker: Arc<StreamBroker<WorkflowExecution>>,
        claim_check: Arc<ClaimCheckManager>,
        client_handle: Arc<ClientHandle>,
    ) -> Self {
        let agent_update_pipeline = Arc::new(update_status::update_status_pipeline(
            store.clone(),
            agent_broker.clone(),
        ));
        let workflow_update_pipeline = Arc::new(update_status::update_status_pipeline(
            store.clone(),
            workflow_broker.clone(),
        ));
        Self {
            store,
            agent_broker,
            workflow_broker,
            agent_update_pipeline,
            workflow_update_pipeline,
            claim_check,
            client_handle,
        }
    }
}

/// The daemon's three workers: one per `*_stigmer` queue. Each registers
/// only what this process implements; runner activities stay foreign.
pub fn build_worker_registrations(
    runtime: &ExecutionRuntime,
    queues: &TaskQueues,
) -> Vec<WorkerRegistration> {
    let agent_worker = WorkerRegistration::new(&queues.agent_execution_stigmer)
        .register_workflow(
            names::AGENT_EXECUTION_WORKFLOW,
            workflows::agent_execution_workflow(),
        )
        .register_local_activity(
            names::ACTIVITY_UPDATE_EXECUTION_STATUS,
            activities::update_agent_execution_status_activity(
                runtime.agent_update_pipeline.clone(),
            ),
        )
        .register_activity(
            names::ACTIVITY_COMPLETE_EXTERNAL,
            activities::complete_external_activity(runtime.client_handle.clone()),
        );

    let workflow_worker = WorkerRegistration::new(&queues.workflow_execution_stigmer)
        .register_workflow(
            names::WORKFLOW_EXECUTION_WORKFLOW,
            workflows::workflow_execution_workflow(runtime.claim_check.clone()),
        )
        .register_local_activity(
            names::ACTIVITY_UPDATE_EXECUTION_STATUS,
            activities::update_workflow_execution_status_activity(
                runtime.workflow_update_pipeline.clone(),
            ),
        )
        .register_activity(
            names::ACTIVITY_COMPLETE_EXTERNAL,
            activities::complete_external_activity(runtime.client_handle.clone()),
        );

    let validation_worker = WorkerRegistration::new(&queues.workflow_validation_stigmer)
        .register_workflow(
            names::WORKFLOW_VALIDATION_WORKFLOW,
            workflows::validate_workflow_workflow(),
        );

    vec![agent_worker, workflow_worker, validation_worker]
}
