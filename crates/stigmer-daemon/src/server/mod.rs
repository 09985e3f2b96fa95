// Daemon assembly: controllers, router, transports.
//
// Wiring order matters (see the client module): controllers come up with
// empty client slots, the in-process transport starts serving the full
// router, then the clients are connected over it. Only after that is the
// network listener opened.

pub mod inprocess;
pub mod interceptor;

use std::sync::Arc;

use tonic::transport::server::Router;
use tonic::transport::{Channel, Server};
use tower::layer::util::{Identity, Stack};

use stigmer_claimcheck::ClaimCheckManager;
use stigmer_protocol::proto::agent_command_controller_server::AgentCommandControllerServer;
use stigmer_protocol::proto::agent_execution_command_controller_server::AgentExecutionCommandControllerServer;
use stigmer_protocol::proto::agent_execution_query_controller_server::AgentExecutionQueryControllerServer;
use stigmer_protocol::proto::agent_instance_command_controller_server::AgentInstanceCommandControllerServer;
use stigmer_protocol::proto::agent_instance_query_controller_server::AgentInstanceQueryControllerServer;
use stigmer_protocol::proto::agent_query_controller_server::AgentQueryControllerServer;
use stigmer_protocol::proto::environment_command_controller_server::EnvironmentCommandControllerServer;
use stigmer_protocol::proto::environment_query_controller_server::EnvironmentQueryControllerServer;
use stigmer_protocol::proto::execution_context_command_controller_server::ExecutionContextCommandControllerServer;
use stigmer_protocol::proto::execution_context_query_controller_server::ExecutionContextQueryControllerServer;
use stigmer_protocol::proto::session_command_controller_server::SessionCommandControllerServer;
use stigmer_protocol::proto::session_query_controller_server::SessionQueryControllerServer;
use stigmer_protocol::proto::skill_command_controller_server::SkillCommandControllerServer;
use stigmer_protocol::proto::skill_query_controller_server::SkillQueryControllerServer;
use stigmer_protocol::proto::workflow_command_controller_server::WorkflowCommandControllerServer;
use stigmer_protocol::proto::workflow_execution_command_controller_server::WorkflowExecutionCommandControllerServer;
use stigmer_protocol::proto::workflow_execution_query_controller_server::WorkflowExecutionQueryControllerServer;
use stigmer_protocol::proto::workflow_instance_command_controller_server::WorkflowInstanceCommandControllerServer;
use stigmer_protocol::proto::workflow_instance_query_controller_server::WorkflowInstanceQueryControllerServer;
use stigmer_protocol::proto::workflow_query_controller_server::WorkflowQueryControllerServer;
use stigmer_storage::ResourceStore;

use crate::controllers::agent::AgentController;
use crate::controllers::agent_execution::AgentExecutionController;
use crate::controllers::agent_instance::AgentInstanceController;
use crate::controllers::clients::InProcessClients;
use crate::controllers::environment::EnvironmentController;
use crate::controllers::execution_context::ExecutionContextController;
use crate::controllers::session::SessionController;
use crate::controllers::skill::SkillController;
use crate::controllers::workflow::WorkflowController;
use crate::controllers::workflow_execution::WorkflowExecutionController;
use crate::controllers::workflow_instance::WorkflowInstanceController;
use crate::execution::broker::StreamBroker;
use crate::execution::ExecutionRuntime;
use crate::manager::ClientHandle;

use inprocess::InProcessTransport;
use interceptor::KindInjectLayer;

pub type DaemonRouter = Router<Stack<KindInjectLayer, Identity>>;

/// Every controller plus the shared runtime pieces, constructed in one
/// place so the two-phase wiring stays obvious.
pub struct DaemonServices {
    pub store: ResourceStore,
    pub clients: Arc<InProcessClients>,
    pub runtime: ExecutionRuntime,

    pub agent: Arc<AgentController>,
    pub agent_instance: Arc<AgentInstanceController>,
    pub session: Arc<SessionController>,
    pub environment: Arc<EnvironmentController>,
    pub execution_context: Arc<ExecutionContextController>,
    pub skill: Arc<SkillController>,
    pub workflow: Arc<WorkflowController>,
    pub workflow_instance: Arc<WorkflowInstanceController>,
    pub agent_execution: Arc<AgentExecutionController>,
    pub workflow_execution: Arc<WorkflowExecutionController>,
}

impl DaemonServices {
    pub fn new(store: ResourceStore, claim_check: Arc<ClaimCheckManager>) -> Self {
        let clients = Arc::new(InProcessClients::new());
        let client_handle = Arc::new(ClientHandle::new());
        let runtime = ExecutionRuntime::new(
            store.clone(),
            Arc::new(StreamBroker::new()),
            Arc::new(StreamBroker::new()),
            claim_check,
            client_handle,
        );

        let agent = AgentController::new(store.clone(), clients.clone());
        let agent_instance = AgentInstanceController::new(store.clone());
        let session = SessionController::new(store.clone());
        let environment = EnvironmentController::new(store.clone());
        let execution_context = ExecutionContextController::new(store.clone());
        let skill = SkillController::new(store.clone());
        let workflow = WorkflowController::new(store.clone(), clients.clone());
        let workflow_instance = WorkflowInstanceController::new(store.clone(), clients.clone());
        let agent_execution = AgentExecutionController::new(
            store.clone(),
            clients.clone(),
            runtime.agent_broker.clone(),
            runtime.agent_update_pipeline.clone(),
        );
        let workflow_execution = WorkflowExecutionController::new(
            store.clone(),
            clients.clone(),
            runtime.workflow_broker.clone(),
            runtime.workflow_update_pipeline.clone(),
        );

        Self {
            store,
            clients,
            runtime,
            agent,
            agent_instance,
            session,
            environment,
            execution_context,
            skill,
            workflow,
            workflow_instance,
            agent_execution,
            workflow_execution,
        }
    }

    /// Build a router carrying every service behind the kind-injection
    /// layer. Called once per transport; the controllers are shared.
    pub fn router(&self) -> DaemonRouter {
        Server::builder()
            .layer(KindInjectLayer)
            .add_service(AgentCommandControllerServer::new((*self.agent).clone()))
            .add_service(AgentQueryControllerServer::new((*self.agent).clone()))
            .add_service(AgentInstanceCommandControllerServer::new(
                (*self.agent_instance).clone(),
            ))
            .add_service(AgentInstanceQueryControllerServer::new(
                (*self.agent_instance).clone(),
            ))
            .add_service(SessionCommandControllerServer::new((*self.session).clone()))
            .add_service(SessionQueryControllerServer::new((*self.session).clone()))
            .add_service(EnvironmentCommandControllerServer::new(
                (*self.environment).clone(),
            ))
            .add_service(EnvironmentQueryControllerServer::new(
                (*self.environment).clone(),
            ))
            .add_service(ExecutionContextCommandControllerServer::new(
                (*self.execution_context).clone(),
            ))
            .add_service(ExecutionContextQueryControllerServer::new(
                (*self.execution_context).clone(),
            ))
            .add_service(SkillCommandControllerServer::new((*self.skill).clone()))
            .add_service(SkillQueryControllerServer::new((*self.skill).clone()))
            .add_service(WorkflowCommandControllerServer::new(
                (*self.workflow).clone(),
            ))
            .add_service(WorkflowQueryControllerServer::new((*self.workflow).clone()))
            .add_service(WorkflowInstanceCommandControllerServer::new(
                (*self.workflow_instance).clone(),
            ))
            .add_service(WorkflowInstanceQueryControllerServer::new(
                (*self.workflow_instance).clone(),
            ))
            .add_service(AgentExecutionCommandControllerServer::new(
                (*self.agent_execution).clone(),
            ))
            .add_service(AgentExecutionQueryControllerServer::new(
                (*self.agent_execution).clone(),
            ))
            .add_service(WorkflowExecutionCommandControllerServer::new(
                (*self.workflow_execution).clone(),
            ))
            .add_service(WorkflowExecutionQueryControllerServer::new(
                (*self.workflow_execution).clone(),
            ))
    }

    /// Phase two of the wiring: start the in-process transport and connect
    /// every internal client over it. Returns the channel for callers that
    /// want their own in-process clients (tests, local tooling).
    pub async fn start_in_process(&self) -> Result<Channel, tonic::transport::Error> {
        let transport = InProcessTransport::start(self.router());
        let channel = transport.channel().await?;
        self.clients.wire(channel.clone());
        tracing::info!("in-process transport wired");
        Ok(channel)
    }
}
