// Standard pipeline steps, reused across every resource kind.

use async_trait::async_trait;
use uuid::Uuid;

use stigmer_core::kind::API_VERSION;
use stigmer_core::resource::{audit_created, touch_audit};
use stigmer_core::{slugify, ApiError, ApiResource, Validate};
use stigmer_protocol::proto::OwnerScope;
use stigmer_storage::ResourceStore;

use super::{keys, RequestContext, Step};

/// Lookup input for GetByReference.
#[derive(Debug, Clone)]
pub struct ReferenceLookup {
    pub slug: String,
    pub owner_scope: OwnerScope,
    pub org: String,
}

fn store_error(err: stigmer_storage::StoreError) -> ApiError {
    ApiError::internal(err.to_string())
}

// ============================================================================
// ValidateProto
// ============================================================================

/// Runs field-constraint validation against the original input.
pub struct ValidateProto;

#[async_trait]
impl<R: ApiResource + Validate> Step<R> for ValidateProto {
    fn name(&self) -> &'static str {
        "ValidateProto"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        ctx.input().validate()
    }
}

// ============================================================================
// ResolveSlug
// ============================================================================

/// Computes `metadata.slug` from `metadata.name` into the new state.
pub struct ResolveSlug;

#[async_trait]
impl<R: ApiResource> Step<R> for ResolveSlug {
    fn name(&self) -> &'static str {
        "ResolveSlug"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let name = ctx.new_state().name().to_string();
        if name.trim().is_empty() {
            return Err(ApiError::invalid("metadata.name is required"));
        }
        let slug = slugify(&name);
        if slug.is_empty() {
            return Err(ApiError::invalid(format!(
                "metadata.name {:?} does not produce a usable slug",
                name
            )));
        }
        ctx.new_state_mut().meta_mut().slug = slug;
        Ok(())
    }
}

// ============================================================================
// CheckDuplicate
// ============================================================================

/// Rejects a Create whose (owner_scope, org, slug) slot is already taken.
pub struct CheckDuplicate {
    store: ResourceStore,
}

impl CheckDuplicate {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: ApiResource> Step<R> for CheckDuplicate {
    fn name(&self) -> &'static str {
        "CheckDuplicate"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let candidate = ctx.new_state();
        let existing = self
            .store
            .find_by_slug::<R>(candidate.owner_scope(), candidate.org(), candidate.slug())
            .await
            .map_err(store_error)?;
        if existing.is_some() {
            return Err(ApiError::already_exists(format!(
                "{} with slug {:?} already exists in this scope",
                ctx.kind(),
                candidate.slug()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// BuildNewState
// ============================================================================

/// Assigns a fresh id, stamps kind/api_version and the creation audit, and
/// discards any caller-provided status.
pub struct BuildNewState;

#[async_trait]
impl<R: ApiResource> Step<R> for BuildNewState {
    fn name(&self) -> &'static str {
        "BuildNewState"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let kind = ctx.kind();
        let state = ctx.new_state_mut();
        state.clear_status();
        let meta = state.meta_mut();
        meta.id = Uuid::now_v7().to_string();
        meta.kind = kind.type_name().to_string();
        meta.api_version = API_VERSION.to_string();
        meta.audit = Some(audit_created());
        Ok(())
    }
}

// ============================================================================
// LoadExisting
// ============================================================================

/// Loads the persisted resource named by the input's `metadata.id` and
/// stashes it in the context.
pub struct LoadExisting {
    store: ResourceStore,
}

impl LoadExisting {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: ApiResource> Step<R> for LoadExisting {
    fn name(&self) -> &'static str {
        "LoadExisting"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let id = ctx.input().id().to_string();
        if id.is_empty() {
            return Err(ApiError::invalid("metadata.id is required"));
        }
        let existing: R = self
            .store
            .get_resource(&id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| ApiError::not_found(ctx.kind(), &id))?;
        ctx.bag.set(keys::EXISTING, existing);
        Ok(())
    }
}

// ============================================================================
// BuildUpdateState
// ============================================================================

/// Merges the caller's spec onto the loaded resource. Identity fields,
/// slug, scope, creation audit and the existing status are preserved; the
/// modification audit advances.
pub struct BuildUpdateState;

#[async_trait]
impl<R: ApiResource> Step<R> for BuildUpdateState {
    fn name(&self) -> &'static str {
        "BuildUpdateState"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let existing: R = ctx
            .bag
            .take(keys::EXISTING)
            .ok_or_else(|| ApiError::internal("BuildUpdateState requires a loaded resource"))?;
        let input_name = ctx.input().name().to_string();
        let input = ctx.input().clone();

        let mut updated = existing.clone();
        updated.merge_spec_from(&input);
        let meta = updated.meta_mut();
        if !input_name.is_empty() {
            meta.name = input_name;
        }
        touch_audit(&mut meta.audit);

        ctx.bag.set(keys::EXISTING, existing);
        ctx.set_new_state(updated);
        Ok(())
    }
}

// ============================================================================
// Persist
// ============================================================================

/// Writes the new state to the store under (kind, id).
pub struct Persist {
    store: ResourceStore,
}

impl Persist {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: ApiResource> Step<R> for Persist {
    fn name(&self) -> &'static str {
        "Persist"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        self.store
            .save_resource(ctx.new_state())
            .await
            .map_err(store_error)
    }
}

// ============================================================================
// LoadTarget
// ============================================================================

/// Loads a resource by the id placed under `keys::TARGET_ID` (Get and
/// Delete paths) into the new state.
pub struct LoadTarget {
    store: ResourceStore,
}

impl LoadTarget {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: ApiResource> Step<R> for LoadTarget {
    fn name(&self) -> &'static str {
        "LoadTarget"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let id = ctx
            .bag
            .get::<String>(keys::TARGET_ID)
            .cloned()
            .unwrap_or_default();
        if id.is_empty() {
            return Err(ApiError::invalid("id is required"));
        }
        let resource: R = self
            .store
            .get_resource(&id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| ApiError::not_found(ctx.kind(), &id))?;
        ctx.bag.set(keys::EXISTING, resource.clone());
        ctx.set_new_state(resource);
        Ok(())
    }
}

/// Alias used on the delete path; same contract as LoadTarget.
pub struct LoadExistingForDelete {
    inner: LoadTarget,
}

impl LoadExistingForDelete {
    pub fn new(store: ResourceStore) -> Self {
        Self {
            inner: LoadTarget::new(store),
        }
    }
}

#[async_trait]
impl<R: ApiResource> Step<R> for LoadExistingForDelete {
    fn name(&self) -> &'static str {
        "LoadExistingForDelete"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        self.inner.execute(ctx).await
    }
}

// ============================================================================
// LoadByReference
// ============================================================================

/// Resolves a resource by (slug, owner_scope, org).
pub struct LoadByReference {
    store: ResourceStore,
}

impl LoadByReference {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: ApiResource> Step<R> for LoadByReference {
    fn name(&self) -> &'static str {
        "LoadByReference"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let lookup = ctx
            .bag
            .get::<ReferenceLookup>(keys::REFERENCE)
            .cloned()
            .ok_or_else(|| ApiError::internal("LoadByReference requires a reference lookup"))?;
        if lookup.slug.is_empty() {
            return Err(ApiError::invalid("slug is required"));
        }
        if lookup.owner_scope == OwnerScope::Unspecified {
            return Err(ApiError::failed_precondition(
                "owner_scope must be specified for reference lookups",
            ));
        }
        let resource: R = self
            .store
            .find_by_slug(lookup.owner_scope, &lookup.org, &lookup.slug)
            .await
            .map_err(store_error)?
            .ok_or_else(|| ApiError::not_found(ctx.kind(), &lookup.slug))?;
        ctx.set_new_state(resource);
        Ok(())
    }
}

// ============================================================================
// DeleteResource
// ============================================================================

/// Removes (kind, id) from the store.
pub struct DeleteResource {
    store: ResourceStore,
}

impl DeleteResource {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: ApiResource> Step<R> for DeleteResource {
    fn name(&self) -> &'static str {
        "DeleteResource"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let id = ctx.new_state().id().to_string();
        self.store
            .delete_resource::<R>(&id)
            .await
            .map_err(store_error)
    }
}

// ============================================================================
// LoadForApply
// ============================================================================

/// Apply (upsert) probe: records whether the slug slot is vacant.
pub struct LoadForApply {
    store: ResourceStore,
}

impl LoadForApply {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: ApiResource> Step<R> for LoadForApply {
    fn name(&self) -> &'static str {
        "LoadForApply"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let candidate = ctx.new_state();
        let existing = self
            .store
            .find_by_slug::<R>(candidate.owner_scope(), candidate.org(), candidate.slug())
            .await
            .map_err(store_error)?;
        match existing {
            Some(resource) => {
                ctx.bag.set(keys::SHOULD_CREATE, false);
                ctx.bag.set(keys::EXISTING, resource);
            }
            None => ctx.bag.set(keys::SHOULD_CREATE, true),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use stigmer_protocol::proto::{Agent, ApiResourceMetadata};

    fn named_agent(name: &str) -> Agent {
        Agent {
            metadata: Some(ApiResourceMetadata {
                name: name.to_string(),
                owner_scope: OwnerScope::Platform as i32,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn create_pipeline(store: &ResourceStore) -> Pipeline<Agent> {
        Pipeline::new("agent.create")
            .step(ValidateProto)
            .step(ResolveSlug)
            .step(CheckDuplicate::new(store.clone()))
            .step(BuildNewState)
            .step(Persist::new(store.clone()))
    }

    #[tokio::test]
    async fn test_create_assigns_identity_and_persists() {
        let store = ResourceStore::in_memory();
        let mut ctx = RequestContext::new(named_agent("My Agent"));
        create_pipeline(&store).run(&mut ctx).await.unwrap();

        let created = ctx.take_new_state();
        assert!(!created.id().is_empty());
        assert_eq!(created.slug(), "my-agent");
        let meta = created.meta().unwrap();
        assert_eq!(meta.kind, "Agent");
        assert_eq!(meta.api_version, API_VERSION);
        assert_eq!(meta.audit.as_ref().unwrap().event, "created");

        let loaded: Agent = store.get_resource(created.id()).await.unwrap().unwrap();
        assert_eq!(loaded, created);
    }

    #[tokio::test]
    async fn test_create_discards_caller_status() {
        let store = ResourceStore::in_memory();
        let mut input = named_agent("Sneaky");
        input.status = Some(stigmer_protocol::proto::AgentStatus {
            default_instance_id: "fake".into(),
            ..Default::default()
        });
        let mut ctx = RequestContext::new(input);
        create_pipeline(&store).run(&mut ctx).await.unwrap();
        assert!(ctx.take_new_state().status.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_slug_rejected() {
        let store = ResourceStore::in_memory();
        let mut ctx = RequestContext::new(named_agent("Twin"));
        create_pipeline(&store).run(&mut ctx).await.unwrap();

        let mut ctx = RequestContext::new(named_agent("Twin"));
        let err = create_pipeline(&store).run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ApiError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_update_preserves_identity_and_slug() {
        let store = ResourceStore::in_memory();
        let mut ctx = RequestContext::new(named_agent("Original Name"));
        create_pipeline(&store).run(&mut ctx).await.unwrap();
        let created = ctx.take_new_state();

        let mut update_input = named_agent("Renamed");
        update_input.meta_mut().id = created.id().to_string();
        update_input.spec = Some(stigmer_protocol::proto::AgentSpec {
            description: "new description".into(),
            ..Default::default()
        });

        let update = Pipeline::new("agent.update")
            .step(ValidateProto)
            .step(LoadExisting::new(store.clone()))
            .step(BuildUpdateState)
            .step(Persist::new(store.clone()));
        let mut ctx = RequestContext::new(update_input);
        update.run(&mut ctx).await.unwrap();

        let updated = ctx.take_new_state();
        assert_eq!(updated.id(), created.id());
        // Slug is not recomputed on update.
        assert_eq!(updated.slug(), "original-name");
        assert_eq!(updated.name(), "Renamed");
        assert_eq!(updated.spec.as_ref().unwrap().description, "new description");
        let audit = updated.meta().unwrap().audit.as_ref().unwrap();
        assert_eq!(audit.event, "updated");
    }

    #[tokio::test]
    async fn test_update_missing_resource_not_found() {
        let store = ResourceStore::in_memory();
        let mut input = named_agent("Ghost");
        input.meta_mut().id = "missing-id".into();
        let update = Pipeline::new("agent.update")
            .step(LoadExisting::new(store.clone()))
            .step(BuildUpdateState);
        let mut ctx = RequestContext::new(input);
        let err = update.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_load_by_reference_requires_scope() {
        let store = ResourceStore::in_memory();
        let step = LoadByReference::new(store);
        let mut ctx = RequestContext::new(Agent::default());
        ctx.bag.set(
            keys::REFERENCE,
            ReferenceLookup {
                slug: "x".into(),
                owner_scope: OwnerScope::Unspecified,
                org: String::new(),
            },
        );
        let err = Step::<Agent>::execute(&step, &mut ctx).await.unwrap_err();
        assert!(matches!(err, ApiError::FailedPrecondition(_)));
    }

    #[tokio::test]
    async fn test_load_for_apply_flags_vacant_slot() {
        let store = ResourceStore::in_memory();
        let probe = Pipeline::new("agent.apply.probe")
            .step(ValidateProto)
            .step(ResolveSlug)
            .step(LoadForApply::new(store.clone()));

        let mut ctx = RequestContext::new(named_agent("Fresh"));
        probe.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.bag.get::<bool>(keys::SHOULD_CREATE), Some(&true));

        let mut create_ctx = RequestContext::new(named_agent("Fresh"));
        create_pipeline(&store).run(&mut create_ctx).await.unwrap();

        let mut ctx = RequestContext::new(named_agent("Fresh"));
        probe.run(&mut ctx).await.unwrap();
        assert_eq!(ctx.bag.get::<bool>(keys::SHOULD_CREATE), Some(&false));
        assert!(ctx.bag.contains(keys::EXISTING));
    }
}
