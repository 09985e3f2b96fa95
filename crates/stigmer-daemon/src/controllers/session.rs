// Session controller. Sessions parent to agent instances and carry the
// conversation anchor for agent executions. CreateAsSystem serves the
// default-session path of template-anchored executions.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use stigmer_protocol::proto::session_command_controller_server::SessionCommandController;
use stigmer_protocol::proto::session_query_controller_server::SessionQueryController;
use stigmer_protocol::proto::{
    GetByIdRequest, GetByReferenceRequest, ListByParentIdRequest, ListRequest, Session,
    SessionList,
};
use stigmer_storage::ResourceStore;

use super::common::{
    run_apply, run_by_id, run_by_reference, run_command, run_list, run_list_by_parent,
};
use super::standard::StandardPipelines;

#[derive(Clone)]
pub struct SessionController {
    pipelines: Arc<StandardPipelines<Session>>,
}

impl SessionController {
    pub fn new(store: ResourceStore) -> Arc<Self> {
        Arc::new(Self {
            pipelines: Arc::new(StandardPipelines::new(store)),
        })
    }
}

#[tonic::async_trait]
impl SessionCommandController for SessionController {
    async fn create(&self, request: Request<Session>) -> Result<Response<Session>, Status> {
        run_command(&self.pipelines.create, request, false).await
    }

    async fn create_as_system(
        &self,
        request: Request<Session>,
    ) -> Result<Response<Session>, Status> {
        run_command(&self.pipelines.create, request, true).await
    }

    async fn update(&self, request: Request<Session>) -> Result<Response<Session>, Status> {
        run_command(&self.pipelines.update, request, false).await
    }

    async fn apply(&self, request: Request<Session>) -> Result<Response<Session>, Status> {
        run_apply(
            &self.pipelines.apply_probe,
            &self.pipelines.create,
            &self.pipelines.update,
            request,
        )
        .await
    }

    async fn delete(&self, request: Request<GetByIdRequest>) -> Result<Response<Session>, Status> {
        run_by_id(&self.pipelines.delete, request).await
    }
}

#[tonic::async_trait]
impl SessionQueryController for SessionController {
    async fn get(&self, request: Request<GetByIdRequest>) -> Result<Response<Session>, Status> {
        run_by_id(&self.pipelines.get, request).await
    }

    async fn get_by_reference(
        &self,
        request: Request<GetByReferenceRequest>,
    ) -> Result<Response<Session>, Status> {
        run_by_reference(&self.pipelines.get_by_reference, request).await
    }

    async fn list(&self, request: Request<ListRequest>) -> Result<Response<SessionList>, Status> {
        run_list(&self.pipelines.store, request, |items| SessionList { items }).await
    }

    async fn list_by_agent_instance_id(
        &self,
        request: Request<ListByParentIdRequest>,
    ) -> Result<Response<SessionList>, Status> {
        let parent_id = request.get_ref().parent_id.clone();
        run_list_by_parent(
            &self.pipelines.store,
            request,
            parent_id,
            |session: &Session| {
                session
                    .spec
                    .as_ref()
                    .map(|s| s.agent_instance_id.as_str())
                    .unwrap_or("")
            },
            |items| SessionList { items },
        )
        .await
    }
}
