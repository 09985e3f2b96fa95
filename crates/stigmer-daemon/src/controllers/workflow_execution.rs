// WorkflowExecution controller.
//
// Mirrors the agent execution controller with workflow-specific anchoring
// (WorkflowInstance resolution) and task material loaded from the parent
// workflow when the durable workflow starts.

use std::sync::Arc;

use parking_lot::RwLock;
use tonic::{Request, Response, Status};

use stigmer_core::{ApiResource, ExecutionResource};
use stigmer_protocol::proto::workflow_execution_command_controller_server::WorkflowExecutionCommandController;
use stigmer_protocol::proto::workflow_execution_query_controller_server::WorkflowExecutionQueryController;
use stigmer_protocol::proto::{
    ExecutionPhase, GetByIdRequest, GetByReferenceRequest, ListByParentIdRequest, ListRequest,
    SubscribeRequest, UpdateWorkflowExecutionStatusRequest, Workflow, WorkflowExecution,
    WorkflowExecutionList, WorkflowInstance,
};
use stigmer_storage::ResourceStore;

use super::clients::InProcessClients;
use super::common::{
    run_apply, run_by_id, run_by_reference, run_command, run_list, run_list_by_parent,
    run_subscribe,
};
use super::execution_steps::{
    ResolveOrCreateDefaultInstance, SetInitialPhase, ValidateExecutionAnchor,
};
use super::standard::StandardPipelines;
use crate::execution::broker::StreamBroker;
use crate::execution::creator::WorkflowCreator;
use crate::execution::workflows::{WorkflowExecutionWorkflowInput, WorkflowTaskDef};
use crate::pipeline::steps::{
    BuildNewState, CheckDuplicate, Persist, ResolveSlug, ValidateProto,
};
use crate::pipeline::{keys, Pipeline, RequestContext};
use crate::server::interceptor::expect_kind;

#[derive(Clone)]
pub struct WorkflowExecutionController {
    store: ResourceStore,
    broker: Arc<StreamBroker<WorkflowExecution>>,
    pipelines: Arc<StandardPipelines<WorkflowExecution>>,
    create: Arc<Pipeline<WorkflowExecution>>,
    update_status: Arc<Pipeline<WorkflowExecution>>,
    creator: Arc<RwLock<Option<Arc<WorkflowCreator>>>>,
}

impl WorkflowExecutionController {
    pub fn new(
        store: ResourceStore,
        clients: Arc<InProcessClients>,
        broker: Arc<StreamBroker<WorkflowExecution>>,
        update_status: Arc<Pipeline<WorkflowExecution>>,
    ) -> Arc<Self> {
        let create = Pipeline::new("workflow_execution.create")
            .step(ValidateProto)
            .step(ValidateExecutionAnchor::new(
                "workflow_id",
                "workflow_instance_id",
            ))
            .step(ResolveOrCreateDefaultInstance::new(store.clone(), clients))
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

    /// Resolve the task list for the execution's parent workflow.
    async fn load_tasks(&self, execution: &WorkflowExecution) -> Option<Vec<WorkflowTaskDef>> {
        let instance: WorkflowInstance = self
            .store
            .get_resource(execution.instance_id())
            .await
            .ok()??;
        let workflow_id = instance.spec.as_ref()?.workflow_id.clone();
        let workflow: Workflow = self.store.get_resource(&workflow_id).await.ok()??;
        let tasks = workflow
            .spec
            .as_ref()?
            .tasks
            .iter()
            .map(|task| WorkflowTaskDef {
                name: task.name.clone(),
                kind: task.kind.clone(),
                config_json: task.config_json.clone(),
            })
            .collect();
        Some(tasks)
    }

    async fn start_durable_workflow(&self, execution: &WorkflowExecution) {
        let creator = self.creator.read().clone();
        let Some(creator) = creator else {
            tracing::warn!(
                execution_id = %execution.id(),
                "durable engine unavailable, execution stays pending"
            );
            return;
        };

        let Some(tasks) = self.load_tasks(execution).await else {
            tracing::warn!(
                execution_id = %execution.id(),
                instance_id = %execution.instance_id(),
                "parent workflow material missing, execution stays pending"
            );
            return;
        };

        let spec = execution.spec.clone().unwrap_or_default();
        let input = WorkflowExecutionWorkflowInput {
            execution_id: execution.id().to_string(),
            workflow_id: spec.workflow_id,
            workflow_instance_id: spec.workflow_instance_id,
            trigger_message: spec.trigger_message,
            callback_token: spec.callback_token,
            tasks,
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

    fn should_start_workflow(execution: &WorkflowExecution) -> bool {
        execution.phase() == ExecutionPhase::ExecutionPending
            && execution
                .status
                .as_ref()
                .map(|s| s.temporal_workflow_id.is_empty())
                .unwrap_or(true)
    }
}

#[tonic::async_trait]
impl WorkflowExecutionCommandController for WorkflowExecutionController {
    async fn create(
        &self,
        request: Request<WorkflowExecution>,
    ) -> Result<Response<WorkflowExecution>, Status> {
        let response = run_command(&self.create, request, false).await?;
        self.start_durable_workflow(response.get_ref()).await;
        Ok(response)
    }

    async fn update(
        &self,
        request: Request<WorkflowExecution>,
    ) -> Result<Response<WorkflowExecution>, Status> {
        run_command(&self.pipelines.update, request, false).await
    }

    async fn apply(
        &self,
        request: Request<WorkflowExecution>,
    ) -> Result<Response<WorkflowExecution>, Status> {
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
    ) -> Result<Response<WorkflowExecution>, Status> {
        run_by_id(&self.pipelines.delete, request).await
    }

    async fn update_status(
        &self,
        request: Request<UpdateWorkflowExecutionStatusRequest>,
    ) -> Result<Response<WorkflowExecution>, Status> {
        expect_kind(&request, WorkflowExecution::KIND)?;
        let req = request.into_inner();
        let mut ctx = RequestContext::new(WorkflowExecution::default());
        ctx.bag.set(keys::TARGET_ID, req.execution_id);
        if let Some(status) = req.status {
            ctx.bag.set(keys::STATUS_UPDATE, status);
        }
        self.update_status.run(&mut ctx).await?;
        Ok(Response::new(ctx.take_new_state()))
    }
}

#[tonic::async_trait]
impl WorkflowExecutionQueryController for WorkflowExecutionController {
    async fn get(
        &self,
        request: Request<GetByIdRequest>,
    ) -> Result<Response<WorkflowExecution>, Status> {
        run_by_id(&self.pipelines.get, request).await
    }

    async fn get_by_reference(
        &self,
        request: Request<GetByReferenceRequest>,
    ) -> Result<Response<WorkflowExecution>, Status> {
        run_by_reference(&self.pipelines.get_by_reference, request).await
    }

    async fn list(
        &self,
        request: Request<ListRequest>,
    ) -> Result<Response<WorkflowExecutionList>, Status> {
        run_list(&self.store, request, |items| WorkflowExecutionList { items }).await
    }

    async fn list_by_workflow_instance_id(
        &self,
        request: Request<ListByParentIdRequest>,
    ) -> Result<Response<WorkflowExecutionList>, Status> {
        let parent_id = request.get_ref().parent_id.clone();
        run_list_by_parent(
            &self.store,
            request,
            parent_id,
            |execution: &WorkflowExecution| {
                execution
                    .spec
                    .as_ref()
                    .map(|s| s.workflow_instance_id.as_str())
                    .unwrap_or("")
            },
            |items| WorkflowExecutionList { items },
        )
        .await
    }

    type SubscribeStream = crate::controllers::common::SubscribeStream<WorkflowExecution>;

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        run_subscribe(&self.store, &self.broker, request).await
    }
}
