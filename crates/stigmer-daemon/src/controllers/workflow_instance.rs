// WorkflowInstance controller.
//
// Create loads the parent Workflow through the in-process query client
// (the other half of the Workflow <-> WorkflowInstance cycle) and
// enforces the same-organization business rule before the standard steps.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::{Request, Response, Status};

use stigmer_core::{ApiError, ApiResource, ResourceKind};
use stigmer_protocol::proto::workflow_instance_command_controller_server::WorkflowInstanceCommandController;
use stigmer_protocol::proto::workflow_instance_query_controller_server::WorkflowInstanceQueryController;
use stigmer_protocol::proto::{
    GetByIdRequest, GetByReferenceRequest, ListByParentIdRequest, ListRequest, OwnerScope,
    Workflow, WorkflowInstance, WorkflowInstanceList,
};
use stigmer_storage::ResourceStore;

use super::clients::InProcessClients;
use super::common::{
    run_apply, run_by_id, run_by_reference, run_command, run_list, run_list_by_parent,
};
use super::standard::StandardPipelines;
use crate::pipeline::steps::{
    BuildNewState, CheckDuplicate, Persist, ResolveSlug, ValidateProto,
};
use crate::pipeline::{keys, Pipeline, RequestContext, Step};

struct LoadParentWorkflow {
    clients: Arc<InProcessClients>,
}

#[async_trait]
impl Step<WorkflowInstance> for LoadParentWorkflow {
    fn name(&self) -> &'static str {
        "LoadParentWorkflow"
    }

    async fn execute(&self, ctx: &mut RequestContext<WorkflowInstance>) -> Result<(), ApiError> {
        let workflow_id = ctx
            .input()
            .spec
            .as_ref()
            .map(|s| s.workflow_id.clone())
            .unwrap_or_default();
        let mut client = self.clients.workflow_query()?;
        match client
            .get(GetByIdRequest {
                id: workflow_id.clone(),
            })
            .await
        {
            Ok(response) => {
                ctx.bag.set(keys::PARENT_WORKFLOW, response.into_inner());
                Ok(())
            }
            Err(status) if status.code() == tonic::Code::NotFound => {
                Err(ApiError::not_found(ResourceKind::Workflow, workflow_id))
            }
            Err(status) => Err(ApiError::internal(format!(
                "failed to load parent workflow: {}",
                status.message()
            ))),
        }
    }
}

/// An org-scoped instance of an org-scoped workflow must live in the same
/// organization. Any other scope combination passes.
struct ValidateSameOrgBusinessRule;

#[async_trait]
impl Step<WorkflowInstance> for ValidateSameOrgBusinessRule {
    fn name(&self) -> &'static str {
        "ValidateSameOrgBusinessRule"
    }

    async fn execute(&self, ctx: &mut RequestContext<WorkflowInstance>) -> Result<(), ApiError> {
        let parent: &Workflow = ctx
            .bag
            .get(keys::PARENT_WORKFLOW)
            .ok_or_else(|| ApiError::internal("parent workflow missing from context"))?;
        let instance = ctx.new_state();
        if parent.owner_scope() == OwnerScope::Organization
            && instance.owner_scope() == OwnerScope::Organization
            && parent.org() != instance.org()
        {
            return Err(ApiError::invalid(format!(
                "workflow belongs to organization {:?} but the instance is in {:?}",
                parent.org(),
                instance.org()
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct WorkflowInstanceController {
    pipelines: Arc<StandardPipelines<WorkflowInstance>>,
    create: Arc<Pipeline<WorkflowInstance>>,
}

impl WorkflowInstanceController {
    pub fn new(store: ResourceStore, clients: Arc<InProcessClients>) -> Arc<Self> {
        let create = Pipeline::new("workflow_instance.create")
            .step(ValidateProto)
            .step(LoadParentWorkflow { clients })
            .step(ValidateSameOrgBusinessRule)
            .step(ResolveSlug)
            .step(CheckDuplicate::new(store.clone()))
            .step(BuildNewState)
            .step(Persist::new(store.clone()));
        Arc::new(Self {
            pipelines: Arc::new(StandardPipelines::new(store)),
            create: Arc::new(create),
        })
    }
}

#[tonic::async_trait]
impl WorkflowInstanceCommandController for WorkflowInstanceController {
    async fn create(
        &self,
        request: Request<WorkflowInstance>,
    ) -> Result<Response<WorkflowInstance>, Status> {
        run_command(&self.create, request, false).await
    }

    async fn create_as_system(
        &self,
        request: Request<WorkflowInstance>,
    ) -> Result<Response<WorkflowInstance>, Status> {
        run_command(&self.create, request, true).await
    }

    async fn update(
        &self,
        request: Request<WorkflowInstance>,
    ) -> Result<Response<WorkflowInstance>, Status> {
        run_command(&self.pipelines.update, request, false).await
    }

    async fn apply(
        &self,
        request: Request<WorkflowInstance>,
    ) -> Result<Response<WorkflowInstance>, Status> {
        run_apply(
            &self.pipelines.apply_probe,
            &self.create,
            &self.pipelines.update,
            request,
        )
        .await
    }

    async fn delete(
        &self,
        request: Request<GetByIdRequest>,
    ) -> Result<Response<WorkflowInstance>, Status> {
        run_by_id(&self.pipelines.delete, request).await
    }
}

#[tonic::async_trait]
impl WorkflowInstanceQueryController for WorkflowInstanceController {
    async fn get(
        &self,
        request: Request<GetByIdRequest>,
    ) -> Result<Response<WorkflowInstance>, Status> {
        run_by_id(&self.pipelines.get, request).await
    }

    async fn get_by_reference(
        &self,
        request: Request<GetByReferenceRequest>,
    ) -> Result<Response<WorkflowInstance>, Status> {
        run_by_reference(&self.pipelines.get_by_reference, request).await
    }

    async fn list(
        &self,
        request: Request<ListRequest>,
    ) -> Result<Response<WorkflowInstanceList>, Status> {
        run_list(&self.pipelines.store, request, |items| WorkflowInstanceList { items }).await
    }

    async fn list_by_workflow_id(
        &self,
        request: Request<ListByParentIdRequest>,
    ) -> Result<Response<WorkflowInstanceList>, Status> {
        let parent_id = request.get_ref().parent_id.clone();
        run_list_by_parent(
            &self.pipelines.store,
            request,
            parent_id,
            |instance: &WorkflowInstance| {
                instance
                    .spec
                    .as_ref()
                    .map(|s| s.workflow_id.as_str())
                    .unwrap_or("")
            },
            |items| WorkflowInstanceList { items },
        )
        .await
    }
}
