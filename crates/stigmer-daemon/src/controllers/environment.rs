// Environment controller: standard pipelines only.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use stigmer_protocol::proto::environment_command_controller_server::EnvironmentCommandController;
use stigmer_protocol::proto::environment_query_controller_server::EnvironmentQueryController;
use stigmer_protocol::proto::{
    Environment, EnvironmentList, GetByIdRequest, GetByReferenceRequest, ListRequest,
};
use stigmer_storage::ResourceStore;

use super::common::{run_apply, run_by_id, run_by_reference, run_command, run_list};
use super::standard::StandardPipelines;

#[derive(Clone)]
pub struct EnvironmentController {
    pipelines: Arc<StandardPipelines<Environment>>,
}

impl EnvironmentController {
    pub fn new(store: ResourceStore) -> Arc<Self> {
        Arc::new(Self {
            pipelines: Arc::new(StandardPipelines::new(store)),
        })
    }
}

#[tonic::async_trait]
impl EnvironmentCommandController for EnvironmentController {
    async fn create(
        &self,
        request: Request<Environment>,
    ) -> Result<Response<Environment>, Status> {
        run_command(&self.pipelines.create, request, false).await
    }

    async fn update(
        &self,
        request: Request<Environment>,
    ) -> Result<Response<Environment>, Status> {
        run_command(&self.pipelines.update, request, false).await
    }

    async fn apply(&self, request: Request<Environment>) -> Result<Response<Environment>, Status> {
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
    ) -> Result<Response<Environment>, Status> {
        run_by_id(&self.pipelines.delete, request).await
    }
}

#[tonic::async_trait]
impl EnvironmentQueryController for EnvironmentController {
    async fn get(&self, request: Request<GetByIdRequest>) -> Result<Response<Environment>, Status> {
        run_by_id(&self.pipelines.get, request).await
    }

    async fn get_by_reference(
        &self,
        request: Request<GetByReferenceRequest>,
    ) -> Result<Response<Environment>, Status> {
        run_by_reference(&self.pipelines.get_by_reference, request).await
    }

    async fn list(&self, request: Request<ListRequest>) -> Result<Response<EnvironmentList>, Status> {
        run_list(&self.pipelines.store, request, |items| EnvironmentList { items }).await
    }
}
