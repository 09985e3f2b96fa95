// Workflow controller.
//
// Create and Update run the workflow spec through the durable validator
// when one is wired; the connection manager injects and re-injects it via
// set_validator. Create also provisions the default WorkflowInstance
// through the in-process client, mirroring the Agent controller.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tonic::{Request, Response, Status};

use stigmer_core::resource::touch_audit;
use stigmer_core::{default_instance_slug, ApiError, ApiResource};
use stigmer_protocol::proto::workflow_command_controller_server::WorkflowCommandController;
use stigmer_protocol::proto::workflow_query_controller_server::WorkflowQueryController;
use stigmer_protocol::proto::{
    ApiResourceMetadata, GetByIdRequest, GetByReferenceRequest, ListRequest, Workflow,
    WorkflowInstance, WorkflowInstanceSpec, WorkflowList,
};
use stigmer_storage::ResourceStore;

use super::clients::{status_to_api_error, InProcessClients};
use super::common::{run_apply, run_by_id, run_by_reference, run_command, run_list};
use super::standard::StandardPipelines;
use crate::execution::validator::WorkflowValidator;
use crate::pipeline::steps::{
    BuildNewState, BuildUpdateState, CheckDuplicate, LoadExisting, Persist, ResolveSlug,
    ValidateProto,
};
use crate::pipeline::{keys, Pipeline, RequestContext, Step};

type ValidatorSlot = Arc<RwLock<Option<Arc<WorkflowValidator>>>>;

/// Runs the synchronous durable validation. A no-op while the engine is
/// down: spec structure problems then surface when the runner first picks
/// the workflow up.
struct ValidateWorkflowSpec {
    validator: ValidatorSlot,
}

#[async_trait]
impl Step<Workflow> for ValidateWorkflowSpec {
    fn name(&self) -> &'static str {
        "ValidateWorkflowSpec"
    }

    async fn execute(&self, ctx: &mut RequestContext<Workflow>) -> Result<(), ApiError> {
        let validator = self.validator.read().clone();
        let Some(validator) = validator else {
            tracing::debug!("workflow validator not wired, skipping spec validation");
            return Ok(());
        };
        validator.validate(ctx.input()).await
    }
}

struct CreateDefaultInstance {
    clients: Arc<InProcessClients>,
}

#[async_trait]
impl Step<Workflow> for CreateDefaultInstance {
    fn name(&self) -> &'static str {
        "CreateDefaultInstance"
    }

    async fn execute(&self, ctx: &mut RequestContext<Workflow>) -> Result<(), ApiError> {
        let parent = ctx.new_state();
        let instance = WorkflowInstance {
            metadata: Some(ApiResourceMetadata {
                name: default_instance_slug(parent.slug()),
                owner_scope: parent.owner_scope() as i32,
                org: parent.org().to_string(),
                ..Default::default()
            }),
            spec: Some(WorkflowInstanceSpec {
                workflow_id: parent.id().to_string(),
                ..Default::default()
            }),
            status: None,
        };

        let mut client = self.clients.workflow_instance_command()?;
        let created = client
            .create_as_system(instance)
            .await
            .map_err(status_to_api_error)?
            .into_inner();
        tracing::info!(
            workflow_id = %parent.id(),
            instance_id = %created.id(),
            "default workflow instance created"
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
impl Step<Workflow> for UpdateStatusWithDefaultInstance {
    fn name(&self) -> &'static str {
        "UpdateStatusWithDefaultInstance"
    }

    async fn execute(&self, ctx: &mut RequestContext<Workflow>) -> Result<(), ApiError> {
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
pub struct WorkflowController {
    pipelines: Arc<StandardPipelines<Workflow>>,
    create: Arc<Pipeline<Workflow>>,
    update: Arc<Pipeline<Workflow>>,
    validator: ValidatorSlot,
}

impl WorkflowController {
    pub fn new(store: ResourceStore, clients: Arc<InProcessClients>) -> Arc<Self> {
        let validator: ValidatorSlot = Arc::new(RwLock::new(None));
        let create = Pipeline::new("workflow.create")
            .step(ValidateProto)
            .step(ValidateWorkflowSpec {
                validator: validator.clone(),
            })
            .step(ResolveSlug)
            .step(CheckDuplicate::new(store.clone()))
            .step(BuildNewState)
            .step(Persist::new(store.clone()))
            .step(CreateDefaultInstance { clients })
            .step(UpdateStatusWithDefaultInstance {
                store: store.clone(),
            });
        let update = Pipeline::new("workflow.update")
            .step(ValidateProto)
            .step(ValidateWorkflowSpec {
                validator: validator.clone(),
            })
            .step(LoadExisting::new(store.clone()))
            .step(BuildUpdateState)
            .step(Persist::new(store.clone()));
        Arc::new(Self {
            pipelines: Arc::new(StandardPipelines::new(store)),
            create: Arc::new(create),
            update: Arc::new(update),
            validator,
        })
    }

    /// Injected by the connection manager; None while the engine is down.
    pub fn set_validator(&self, validator: Option<Arc<WorkflowValidator>>) {
        *self.validator.write() = validator;
    }
}

#[tonic::async_trait]
impl WorkflowCommandController for WorkflowController {
    async fn create(&self, request: Request<Workflow>) -> Result<Response<Workflow>, Status> {
        run_command(&self.create, request, false).await
    }

    async fn update(&self, request: Request<Workflow>) -> Result<Response<Workflow>, Status> {
        run_command(&self.update, request, false).await
    }

    async fn apply(&self, request: Request<Workflow>) -> Result<Response<Workflow>, Status> {
        run_apply(&self.pipelines.apply_probe, &self.create, &self.update, request).await
    }

    async fn delete(&self, request: Request<GetByIdRequest>) -> Result<Response<Workflow>, Status> {
        run_by_id(&self.pipelines.delete, request).await
    }
}

#[tonic::async_trait]
impl WorkflowQueryController for WorkflowController {
    async fn get(&self, request: Request<GetByIdRequest>) -> Result<Response<Workflow>, Status> {
        run_by_id(&self.pipelines.get, request).await
    }

    async fn get_by_reference(
        &self,
        request: Request<GetByReferenceRequest>,
    ) -> Result<Response<Workflow>, Status> {
        run_by_reference(&self.pipelines.get_by_reference, request).await
    }

    async fn list(&self, request: Request<ListRequest>) -> Result<Response<WorkflowList>, Status> {
        run_list(&self.pipelines.store, request, |items| WorkflowList { items }).await
    }
}
