// In-process RPC clients.
//
// Workflow.Create calls WorkflowInstance.Create and WorkflowInstance.Create
// validates its parent Workflow, so the controllers reference each other.
// The cycle is broken with two-phase wiring: controllers are constructed
// with empty client slots, the in-process transport comes up, then `wire`
// fills every slot. Calls made through these clients traverse the full
// interceptor chain exactly like external traffic; swapping the channel
// for a network endpoint changes nothing here.

use parking_lot::RwLock;
use tonic::transport::Channel;

use stigmer_core::ApiError;
use stigmer_protocol::proto::agent_instance_command_controller_client::AgentInstanceCommandControllerClient;
use stigmer_protocol::proto::session_command_controller_client::SessionCommandControllerClient;
use stigmer_protocol::proto::workflow_instance_command_controller_client::WorkflowInstanceCommandControllerClient;
use stigmer_protocol::proto::workflow_query_controller_client::WorkflowQueryControllerClient;

#[derive(Default)]
pub struct InProcessClients {
    agent_instance_command: RwLock<Option<AgentInstanceCommandControllerClient<Channel>>>,
    session_command: RwLock<Option<SessionCommandControllerClient<Channel>>>,
    workflow_instance_command: RwLock<Option<WorkflowInstanceCommandControllerClient<Channel>>>,
    workflow_query: RwLock<Option<WorkflowQueryControllerClient<Channel>>>,
}

fn not_wired(name: &str) -> ApiError {
    ApiError::internal(format!("in-process {} client is not wired yet", name))
}

impl InProcessClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Second wiring phase: the in-process transport is up, connect every
    /// client over it.
    pub fn wire(&self, channel: Channel) {
        *self.agent_instance_command.write() =
            Some(AgentInstanceCommandControllerClient::new(channel.clone()));
        *self.session_command.write() = Some(SessionCommandControllerClient::new(channel.clone()));
        *self.workflow_instance_command.write() =
            Some(WorkflowInstanceCommandControllerClient::new(channel.clone()));
        *self.workflow_query.write() = Some(WorkflowQueryControllerClient::new(channel));
    }

    pub fn agent_instance_command(
        &self,
    ) -> Result<AgentInstanceCommandControllerClient<Channel>, ApiError> {
        self.agent_instance_command
            .read()
            .clone()
            .ok_or_else(|| not_wired("agent-instance command"))
    }

    pub fn session_command(&self) -> Result<SessionCommandControllerClient<Channel>, ApiError> {
        self.session_command
            .read()
            .clone()
            .ok_or_else(|| not_wired("session command"))
    }

    pub fn workflow_instance_command(
        &self,
    ) -> Result<WorkflowInstanceCommandControllerClient<Channel>, ApiError> {
        self.workflow_instance_command
            .read()
            .clone()
            .ok_or_else(|| not_wired("workflow-instance command"))
    }

    pub fn workflow_query(&self) -> Result<WorkflowQueryControllerClient<Channel>, ApiError> {
        self.workflow_query
            .read()
            .clone()
            .ok_or_else(|| not_wired("workflow query"))
    }
}

/// Map a status coming back over the in-process transport onto the
/// pipeline error taxonomy, preserving the caller-visible code.
pub fn status_to_api_error(status: tonic::Status) -> ApiError {
    match status.code() {
        tonic::Code::InvalidArgument => ApiError::invalid(status.message().to_string()),
        tonic::Code::AlreadyExists => ApiError::already_exists(status.message().to_string()),
        tonic::Code::FailedPrecondition => {
            ApiError::failed_precondition(status.message().to_string())
        }
        tonic::Code::NotFound => ApiError::internal(format!(
            "downstream resource disappeared: {}",
            status.message()
        )),
        _ => ApiError::internal(status.message().to_string()),
    }
}
