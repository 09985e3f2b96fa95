// AgentInstance controller. Instances parent to agents; the default
// instance of every agent is created through CreateAsSystem.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use stigmer_protocol::proto::agent_instance_command_controller_server::AgentInstanceCommandController;
use stigmer_protocol::proto::agent_instance_query_controller_server::AgentInstanceQueryController;
use stigmer_protocol::proto::{
    AgentInstance, AgentInstanceList, GetByIdRequest, GetByReferenceRequest, ListByParentIdRequest,
    ListRequest,
};
use stigmer_storage::ResourceStore;

use super::common::{
    run_apply, run_by_id, run_by_reference, run_command, run_list, run_list_by_parent,
};
use super::standard::StandardPipelines;

#[derive(Clone)]
pub struct AgentInstanceController {
    pipelines: Arc<StandardPipelines<AgentInstance>>,
}

impl AgentInstanceController {
    pub fn new(store: ResourceStore) -> Arc<Self> {
        Arc::new(Self {
            pipelines: Arc::new(StandardPipelines::new(store)),
        })
    }
}

#[tonic::async_trait]
impl AgentInstanceCommandController for AgentInstanceController {
    async fn create(
        &self,
        request: Request<AgentInstance>,
    ) -> Result<Response<AgentInstance>, Status> {
        run_command(&self.pipelines.create, request, false).await
    }

    async fn create_as_system(
        &self,
        request: Request<AgentInstance>,
    ) -> Result<Response<AgentInstance>, Status> {
        run_command(&self.pipelines.create, request, true).await
    }

    async fn update(
        &self,
        request: Request<AgentInstance>,
    ) -> Result<Response<AgentInstance>, Status> {
        run_command(&self.pipelines.update, request, false).await
    }

    async fn apply(
        &self,
        request: Request<AgentInstance>,
    ) -> Result<Response<AgentInstance>, Status> {
        run_apply(
            &self.pipelines.apply_probe,
            &self.pipelines.create,
            &self.pipelines.update,
            request,
        )
        .await
    }

    async fn delete(
        &self,
        request: Request<GetByIdRequest>,
    ) -> Result<Response<AgentInstance>, Status> {
        run_by_id(&self.pipelines.delete, request).await
    }
}

#[tonic::async_trait]
impl AgentInstanceQueryController for AgentInstanceController {
    async fn get(
        &self,
        request: Request<GetByIdRequest>,
    ) -> Result<Response<AgentInstance>, Status> {
        run_by_id(&self.pipelines.get, request).await
    }

    async fn get_by_reference(
        &self,
        request: Request<GetByReferenceRequest>,
    ) -> Result<Response<AgentInstance>, Status> {
        run_by_reference(&self.pipelines.get_by_reference, request).await
    }

    async fn list(
        &self,
        request: Request<ListRequest>,
    ) -> Result<Response<AgentInstanceList>, Status> {
        run_list(&self.pipelines.store, request, |items| AgentInstanceList { items }).await
    }

    async fn list_by_agent_id(
        &self,
        request: Request<ListByParentIdRequest>,
    ) -> Result<Response<AgentInstanceList>, Status> {
        let parent_id = request.get_ref().parent_id.clone();
        run_list_by_parent(
            &self.pipelines.store,
            request,
            parent_id,
            |instance: &AgentInstance| {
                instance
                    .spec
                    .as_ref()
                    .map(|s| s.agent_id.as_str())
                    .unwrap_or("")
            },
            |items| AgentInstanceList { items },
        )
        .await
    }
}
