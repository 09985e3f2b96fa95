// AgentExecution controller.
//
// Create resolves the session anchor (with default-session recovery),
// persists the execution in PENDING, then hands it to the workflow
// creator. A missing creator (engine down) is not an error: the execution
// stays PENDING and the caller still gets it back.

use std::sync::Arc;

use parking_lot::RwLock;
use tonic::{Request, Response, Status};

use stigmer_core::{ApiResource, ExecutionResource};
use stigmer_protocol::proto::agent_execution_command_controller_server::AgentExecutionCommandController;
use stigmer_protocol::proto::agent_execution_query_controller_server::AgentExecutionQueryController;
use stigmer_protocol::proto::{
    AgentExecution, AgentExecutionList, ExecutionPhase, GetByIdRequest, GetByReferenceRequest,
    ListByParentIdRequest, ListRequest, SubscribeRequest, UpdateAgentExecutionStatusRequest,
};
use stigmer_storage::ResourceStore;

use super::clients::InProcessClients;
use super::common::{
    run_apply, run_by_id, run_by_reference, run_command, run_list, run_list_by_parent,
    run_subscribe,
};
use super::execution_steps::{
    ResolveOrCreateDefaultSession, SetInitialPhase, ValidateExecutionAnchor,
};
use super::standard::StandardPipelines;
use crate::execution::broker::StreamBroker;
use crate::execution::creator::WorkflowCreator;
use crate::execution::workflows::AgentExecutionWorkflowInput;
use crate::pipeline::steps::{
    BuildNewState, CheckDuplicate, Persist, ResolveSlug, ValidateProto,
};
use crate::pipeline::{keys, Pipeline, RequestContext};
use crate::server::interceptor::expect_kind;

#[derive(Clone)]
pub struct AgentExecutionController {
    store: ResourceStore,
    broker: Arc<StreamBroker<AgentExecution>>,
    pipelines: Arc<StandardPipelines<AgentExecution>>,
    create: Arc<Pipeline<AgentExecution>>,
    update_status: Arc<Pipeline<AgentExecution>>,
    creator: Arc<RwLock<Option<Arc<WorkflowCreator>>>>,
}

impl AgentExecutionController {
    pub fn new(
        store: ResourceStore,
        clients: Arc<InProcessClients>,
        broker: Arc<StreamBroker<AgentExecution>>,
        update_status: Arc<Pipeline<AgentExecution>>,
    ) -> Arc<Self> {
        let create = Pipeline::new("agent_execution.create")
            .step(ValidateProto)
            .step(ValidateExecutionAnchor::new("agent_id", "session_id"))
            .step(ResolveOrCreateDefaultSession::new(store.clone(), clients))
            .step(ResolveSlug)
            .step(CheckDuplicate::new(store.clone()))
            .step(BuildNewState)
            .step(SetInitialPhase)
            .step(Persist::new(store.clone()));
        Arc::new(Self {
            broker,
            pipelines: Arc::new(StandardPipelines::new(store.clone())),
            create: Arc::new(create),
            update_status,
            creator: Arc::new(RwLock::new(None)),
            store,
        })
    }

    /// Injected by the connection manager; None while the engine is down.
    pub fn set_workflow_creator(&self, creator: Option<Arc<WorkflowCreator>>) {
        *self.creator.write() = creator;
    }

    /// Start the durable workflow for a freshly persisted execution.
    /// Failures leave the execution PENDING and are logged, not returned.
    async fn start_durable_workflow(&self, execution: &AgentExecution) {
        let creator = self.creator.read().clone();
        let Some(creator) = creator else {
            tracing::warn!(
                execution_id = %execution.id(),
                "durable engine unavailable, execution stays pending"
            );
            return;
        };

        let spec = execution.spec.clone().unwrap_or_default();
        let input = AgentExecutionWorkflowInput {
            execution_id: execution.id().to_string(),
            agent_id: spec.agent_id,
            session_id: spec.session_id,
            message: spec.message,
            callback_token: spec.callback_token,
        };
        let payload = match serde_json::to_value(&input) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode workflow input");
                return;
            }
        };
        if let Err(err) = creator.start(execution.id(), payload).await {
            tracing::warn!(
                execution_id = %execution.id(),
                error = %err,
                "failed to start durable workflow, execution stays pending"
            );
        }
    }

    fn should_start_workflow(execution: &AgentExecution) -> bool {
        execution.phase() == ExecutionPhase::ExecutionPending
            && execution
                .status
                .as_ref()
                .map(|s| s.temporal_workflow_id.is_empty())
                .unwrap_or(true)
    }
}

#[tonic::async_trait]
impl AgentExecutionCommandController for AgentExecutionController {
    async fn create(
        &self,
        request: Request<AgentExecution>,
    ) -> Result<Response<AgentExecution>, Status> {
        let response = run_command(&self.create, request, false).await?;
        self.start_durable_workflow(response.get_ref()).await;
        Ok(response)
    }

    async fn update(
        &self,
        request: Request<AgentExecution>,
    ) -> Result<Response<AgentExecution>, Status> {
        run_command(&self.pipelines.update, request, false).await
    }

    async fn apply(
        &self,
        request: Request<AgentExecution>,
    ) -> Result<Response<AgentExecution>, Status> {
        let response = run_apply(
            &self.pipelines.apply_probe,
            &self.create,
            &self.pipelines.update,
            request,
        )
        .await?;
        if Self::should_start_workflow(response.get_ref()) {
            self.start_durable_workflow(response.get_ref()).await;
        }
        Ok(response)
    }

    async fn delete(
        &self,
        request: Request<GetByIdRequest>,
    ) -> Result<Response<AgentExecution>, Status> {
        run_by_id(&self.pipelines.delete, request).await
    }

    async fn update_status(
        &self,
        request: Request<UpdateAgentExecutionStatusRequest>,
    ) -> Result<Response<AgentExecution>, Status> {
        expect_kind(&request, AgentExecution::KIND)?;
        let req = request.into_inner();
        let mut ctx = RequestContext::new(AgentExecution::default());
        ctx.bag.set(keys::TARGET_ID, req.execution_id);
        if let Some(status) = req.status {
            ctx.bag.set(keys::STATUS_UPDATE, status);
        }
        self.update_status.run(&mut ctx).await?;
        Ok(Response::new(ctx.take_new_state()))
    }
}

#[tonic::async_trait]
impl AgentExecutionQueryController for AgentExecutionController {
    async fn get(
        &self,
        request: Request<GetByIdRequest>,
    ) -> Result<Response<AgentExecution>, Status> {
        run_by_id(&self.pipelines.get, request).await
    }

    async fn get_by_reference(
        &self,
        request: Request<GetByReferenceRequest>,
    ) -> Result<Response<AgentExecution>, Status> {
        run_by_reference(&self.pipelines.get_by_reference, request).await
    }

    async fn list(
        &self,
        request: Request<ListRequest>,
    ) -> Result<Response<AgentExecutionList>, Status> {
        run_list(&self.store, request, |items| AgentExecutionList { items }).await
    }

    async fn list_by_session_id(
        &self,
        request: Request<ListByParentIdRequest>,
    ) -> Result<Response<AgentExecutionList>, Status> {
        let parent_id = request.get_ref().parent_id.clone();
        run_list_by_parent(
            &self.store,
            request,
            parent_id,
            |execution: &AgentExecution| {
                execution
                    .spec
                    .as_ref()
                    .map(|s| s.session_id.as_str())
                    .unwrap_or("")
            },
            |items| AgentExecutionList { items },
        )
        .await
    }

    type SubscribeStream = crate::controllers::common::SubscribeStream<AgentExecution>;

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        run_subscribe(&self.store, &self.broker, request).await
    }
}
