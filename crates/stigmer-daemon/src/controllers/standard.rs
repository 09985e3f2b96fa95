// The standard pipeline set every resource kind starts from. Kinds with
// custom behavior (Agent, Workflow, WorkflowInstance, executions) splice
// extra steps into these orders.

use stigmer_core::{ApiResource, Validate};
use stigmer_storage::ResourceStore;

use crate::pipeline::steps::{
    BuildNewState, BuildUpdateState, CheckDuplicate, DeleteResource, LoadByReference,
    LoadExisting, LoadExistingForDelete, LoadForApply, LoadTarget, Persist, ResolveSlug,
    ValidateProto,
};
use crate::pipeline::Pipeline;

pub struct StandardPipelines<R: ApiResource> {
    pub store: ResourceStore,
    pub create: Pipeline<R>,
    pub update: Pipeline<R>,
    pub apply_probe: Pipeline<R>,
    pub delete: Pipeline<R>,
    pub get: Pipeline<R>,
    pub get_by_reference: Pipeline<R>,
}

impl<R: ApiResource + Validate> StandardPipelines<R> {
    pub fn new(store: ResourceStore) -> Self {
        Self {
            create: Pipeline::new("create")
                .step(ValidateProto)
                .step(ResolveSlug)
                .step(CheckDuplicate::new(store.clone()))
                .step(BuildNewState)
                .step(Persist::new(store.clone())),
            update: Pipeline::new("update")
                .step(ValidateProto)
                .step(LoadExisting::new(store.clone()))
                .step(BuildUpdateState)
                .step(Persist::new(store.clone())),
            apply_probe: Pipeline::new("apply.probe")
                .step(ValidateProto)
                .step(ResolveSlug)
                .step(LoadForApply::new(store.clone())),
            delete: Pipeline::new("delete")
                .step(LoadExistingForDelete::new(store.clone()))
                .step(DeleteResource::new(store.clone())),
            get: Pipeline::new("get").step(LoadTarget::new(store.clone())),
            get_by_reference: Pipeline::new("get_by_reference")
                .step(LoadByReference::new(store.clone())),
            store,
        }
    }
}
