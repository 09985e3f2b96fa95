// Agent controller.
//
// Create runs the standard pipeline plus two custom steps after Persist:
// CreateDefaultInstance goes through the in-process AgentInstance client
// (so the full interceptor chain and instance pipeline run), then
// UpdateStatusWithDefaultInstance records the new instance id on the
// agent's status.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::{Request, Response, Status};

use stigmer_core::resource::touch_audit;
use stigmer_core::{default_instance_slug, ApiError, ApiResource};
use stigmer_protocol::proto::agent_command_controller_server::AgentCommandController;
use stigmer_protocol::proto::agent_query_controller_server::AgentQueryController;
use stigmer_protocol::proto::{
    Agent, AgentInstance, AgentInstanceSpec, AgentList, ApiResourceMetadata, GetByIdRequest,
    GetByReferenceRequest, ListRequest,
};
use stigmer_storage::ResourceStore;

use super::clients::{status_to_api_error, InProcessClients};
use super::common::{run_apply, run_by_id, run_by_reference, run_command, run_list};
use super::standard::StandardPipelines;
use crate::pipeline::steps::{
    BuildNewState, CheckDuplicate, Persist, ResolveSlug, ValidateProto,
};
use crate::pipeline::{keys, Pipeline, RequestContext, Step};

struct CreateDefaultInstance {
    clients: Arc<InProcessClients>,
}

#[async_trait]
impl Step<Agent> for CreateDefaultInstance {
    fn name(&self) -> &'static str {
        "CreateDefaultInstance"
    }

    async fn execute(&self, ctx: &mut RequestContext<Agent>) -> Result<(), ApiError> {
        let parent = ctx.new_state();
        let instance = AgentInstance {
            metadata: Some(ApiResourceMetadata {
                name: default_instance_slug(parent.slug()),
                owner_scope: parent.owner_scope() as i32,
                org: parent.org().to_string(),
                ..Default::default()
            }),
            spec: Some(AgentInstanceSpec {
                agent_id: parent.id().to_string(),
                ..Default::default()
            }),
            status: None,
        };

        let mut client = self.clients.agent_instance_command()?;
        let created = client
            .create_as_system(instance)
            .await
            .map_err(status_to_api_error)?
            .into_inner();
        tracing::info!(
            agent_id = %parent.id(),
            instance_id = %created.id(),
            "default agent instance created"
        );
        ctx.bag
            .set(keys::DEFAULT_INSTANCE_ID, created.id().to_string());
        Ok(())
    }
}

struct UpdateStatusWithDefaultInstance {
    store: ResourceStore,
}

#[async_trait]
impl Step<Agent> for UpdateStatusWithDefaultInstance {
    fn name(&self) -> &'static str {
        "UpdateStatusWithDefaultInstance"
    }

    async fn execute(&self, ctx: &mut RequestContext<Agent>) -> Result<(), ApiError> {
        let instance_id = ctx
            .bag
            .get::<String>(keys::DEFAULT_INSTANCE_ID)
            .cloned()
            .ok_or_else(|| ApiError::internal("default instance id missing from context"))?;
        let state = ctx.new_state_mut();
        let status = state.status.get_or_insert_with(Default::default);
        status.default_instance_id = instance_id;
        touch_audit(&mut status.audit);
        self.store
            .save_resource(ctx.new_state())
            .await
            .map_err(|e| ApiError::internal(e.to_string()))
    }
}

#[derive(Clone)]
pub struct AgentController {
    pipelines: Arc<StandardPipelines<Agent>>,
    create: Arc<Pipeline<Agent>>,
}

impl AgentController {
    pub fn new(store: ResourceStore, clients: Arc<InProcessClients>) -> Arc<Self> {
        let create = Pipeline::new("agent.create")
            .step(ValidateProto)
            .step(ResolveSlug)
            .step(CheckDuplicate::new(store.clone()))
            .step(BuildNewState)
            .step(Persist::new(store.clone()))
            .step(CreateDefaultInstance { clients })
            .step(UpdateStatusWithDefaultInstance {
                store: store.clone(),
            });
        Arc::new(Self {
            pipelines: Arc::new(StandardPipelines::new(store)),
            create: Arc::new(create),
        })
    }
}

#[tonic::async_trait]
impl AgentCommandController for AgentController {
    async fn create(&self, request: Request<Agent>) -> Result<Response<Agent>, Status> {
        run_command(&self.create, request, false).await
    }

    async fn update(&self, request: Request<Agent>) -> Result<Response<Agent>, Status> {
        run_command(&self.pipelines.update, request, false).await
    }

    async fn apply(&self, request: Request<Agent>) -> Result<Response<Agent>, Status> {
        run_apply(
            &self.pipelines.apply_probe,
            &self.create,
            &self.pipelines.update,
            request,
        )
        .await
    }

    async fn delete(&self, request: Request<GetByIdRequest>) -> Result<Response<Agent>, Status> {
        run_by_id(&self.pipelines.delete, request).await
    }
}

#[tonic::async_trait]
impl AgentQueryController for AgentController {
    async fn get(&self, request: Request<GetByIdRequest>) -> Result<Response<Agent>, Status> {
        run_by_id(&self.pipelines.get, request).await
    }

    async fn get_by_reference(
        &self,
        request: Request<GetByReferenceRequest>,
    ) -> Result<Response<Agent>, Status> {
        run_by_reference(&self.pipelines.get_by_reference, request).await
    }

    async fn list(&self, request: Request<ListRequest>) -> Result<Response<AgentList>, Status> {
        run_list(&self.pipelines.store, request, |items| AgentList { items }).await
    }
}
