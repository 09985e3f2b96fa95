// Skill controller: standard pipelines only.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use stigmer_protocol::proto::skill_command_controller_server::SkillCommandController;
use stigmer_protocol::proto::skill_query_controller_server::SkillQueryController;
use stigmer_protocol::proto::{
    GetByIdRequest, GetByReferenceRequest, ListRequest, Skill, SkillList,
};
use stigmer_storage::ResourceStore;

use super::common::{run_apply, run_by_id, run_by_reference, run_command, run_list};
use super::standard::StandardPipelines;

#[derive(Clone)]
pub struct SkillController {
    pipelines: Arc<StandardPipelines<Skill>>,
}

impl SkillController {
    pub fn new(store: ResourceStore) -> Arc<Self> {
        Arc::new(Self {
            pipelines: Arc::new(StandardPipelines::new(store)),
        })
    }
}

#[tonic::async_trait]
impl SkillCommandController for SkillController {
    async fn create(&self, request: Request<Skill>) -> Result<Response<Skill>, Status> {
        run_command(&self.pipelines.create, request, false).await
    }

    async fn update(&self, request: Request<Skill>) -> Result<Response<Skill>, Status> {
        run_command(&self.pipelines.update, request, false).await
    }

    async fn apply(&self, request: Request<Skill>) -> Result<Response<Skill>, Status> {
        run_apply(
            &self.pipelines.apply_probe,
            &self.pipelines.create,
            &self.pipelines.update,
            request,
        )
        .await
    }

    async fn delete(&self, request: Request<GetByIdRequest>) -> Result<Response<Skill>, Status> {
        run_by_id(&self.pipelines.delete, request).await
    }
}

#[tonic::async_trait]
impl SkillQueryController for SkillController {
    async fn get(&self, request: Request<GetByIdRequest>) -> Result<Response<Skill>, Status> {
        run_by_id(&self.pipelines.get, request).await
    }

    async fn get_by_reference(
        &self,
        request: Request<GetByReferenceRequest>,
    ) -> Result<Response<Skill>, Status> {
        run_by_reference(&self.pipelines.get_by_reference, request).await
    }

    async fn list(&self, request: Request<ListRequest>) -> Result<Response<SkillList>, Status> {
        run_list(&self.pipelines.store, request, |items| SkillList { items }).await
    }
}
