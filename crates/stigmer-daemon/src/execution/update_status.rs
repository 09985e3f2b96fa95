// Update-status pipeline.
//
// Shared by the UpdateStatus RPC (runner progress reports) and the local
// UpdateExecutionStatus activity (system failure marking). Load-merge-save
// is not atomic: concurrent reports linearize as last-persist-wins, which
// the full-replace array semantics make safe for snapshot-sending runners.

use std::sync::Arc;

use async_trait::async_trait;

use stigmer_core::{ApiError, ExecutionResource};
use stigmer_storage::ResourceStore;

use crate::execution::broker::StreamBroker;
use crate::pipeline::{keys, Pipeline, RequestContext, Step};

/// Requires a non-empty execution id and a status payload in the context.
pub struct ValidateUpdateStatusInput;

#[async_trait]
impl<R: ExecutionResource> Step<R> for ValidateUpdateStatusInput {
    fn name(&self) -> &'static str {
        "ValidateUpdateStatusInput"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let id = ctx
            .bag
            .get::<String>(keys::TARGET_ID)
            .cloned()
            .unwrap_or_default();
        if id.is_empty() {
            return Err(ApiError::invalid("execution_id is required"));
        }
        if !ctx.bag.contains(keys::STATUS_UPDATE) {
            return Err(ApiError::invalid("status is required"));
        }
        Ok(())
    }
}

pub struct LoadExistingExecution {
    store: ResourceStore,
}

impl LoadExistingExecution {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: ExecutionResource> Step<R> for LoadExistingExecution {
    fn name(&self) -> &'static str {
        "LoadExistingExecution"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let id = ctx
            .bag
            .get::<String>(keys::TARGET_ID)
            .cloned()
            .unwrap_or_default();
        let existing: R = self
            .store
            .get_resource(&id)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?
            .ok_or_else(|| ApiError::not_found(ctx.kind(), &id))?;
        ctx.bag.set(keys::EXISTING, existing);
        Ok(())
    }
}

/// Clones the stored execution and merges the incoming status onto it.
/// Spec and metadata are never touched.
pub struct BuildNewStateWithStatus;

#[async_trait]
impl<R: ExecutionResource> Step<R> for BuildNewStateWithStatus {
    fn name(&self) -> &'static str {
        "BuildNewStateWithStatus"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let existing: R = ctx
            .bag
            .take(keys::EXISTING)
            .ok_or_else(|| ApiError::internal("BuildNewStateWithStatus requires a loaded execution"))?;
        let incoming: R::Status = ctx
            .bag
            .take(keys::STATUS_UPDATE)
            .ok_or_else(|| ApiError::invalid("status is required"))?;

        let mut updated = existing.clone();
        updated.merge_status(&incoming);

        ctx.bag.set(keys::EXISTING, existing);
        ctx.set_new_state(updated);
        Ok(())
    }
}

pub struct PersistExecution {
    store: ResourceStore,
}

impl PersistExecution {
    pub fn new(store: ResourceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<R: ExecutionResource> Step<R> for PersistExecution {
    fn name(&self) -> &'static str {
        "PersistExecution"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        self.store
            .save_resource(ctx.new_state())
            .await
            .map_err(|e| ApiError::internal(e.to_string()))
    }
}

/// Publishes the persisted snapshot to subscribers. Runs strictly after
/// the persist succeeded, so subscribers never observe a state that is not
/// already in the store.
pub struct BroadcastToStreams<R> {
    broker: Arc<StreamBroker<R>>,
}

impl<R> BroadcastToStreams<R> {
    pub fn new(broker: Arc<StreamBroker<R>>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl<R: ExecutionResource> Step<R> for BroadcastToStreams<R> {
    fn name(&self) -> &'static str {
        "BroadcastToStreams"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let execution = ctx.new_state().clone();
        let id = execution.id().to_string();
        self.broker.broadcast(&id, execution);
        Ok(())
    }
}

/// The full update-status pipeline for one execution kind.
pub fn update_status_pipeline<R: ExecutionResource>(
    store: ResourceStore,
    broker: Arc<StreamBroker<R>>,
) -> Pipeline<R> {
    Pipeline::new("execution.update_status")
        .step(ValidateUpdateStatusInput)
        .step(LoadExistingExecution::new(store.clone()))
        .step(BuildNewStateWithStatus)
        .step(PersistExecution::new(store))
        .step(BroadcastToStreams::new(broker))
}

/// Run the update-status pipeline for one report.
pub async fn run_update_status<R: ExecutionResource>(
    pipeline: &Pipeline<R>,
    execution_id: String,
    status: R::Status,
) -> Result<R, ApiError> {
    let mut ctx = RequestContext::new(R::default());
    ctx.bag.set(keys::TARGET_ID, execution_id);
    ctx.bag.set(keys::STATUS_UPDATE, status);
    pipeline.run(&mut ctx).await?;
    Ok(ctx.take_new_state())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stigmer_core::ApiResource;
    use stigmer_protocol::proto::{
        AgentExecution, AgentExecutionStatus, ExecutionMessage, ExecutionPhase, MessageKind,
    };

    async fn seed_execution(store: &ResourceStore) -> AgentExecution {
        let mut exec = AgentExecution::default();
        exec.meta_mut().id = "e-1".into();
        exec.meta_mut().name = "run".into();
        exec.set_phase(ExecutionPhase::ExecutionPending);
        store.save_resource(&exec).await.unwrap();
        exec
    }

    #[tokio::test]
    async fn test_merge_persist_broadcast() {
        let store = ResourceStore::in_memory();
        let broker = Arc::new(StreamBroker::<AgentExecution>::new());
        let pipeline = update_status_pipeline(store.clone(), broker.clone());
        let seeded = seed_execution(&store).await;

        let (_sub, mut rx) = broker.subscribe("e-1");

        let incoming = AgentExecutionStatus {
            phase: ExecutionPhase::ExecutionInProgress as i32,
            messages: vec![ExecutionMessage {
                id: "m1".into(),
                kind: MessageKind::Agent as i32,
                content: "working".into(),
                created_at: None,
            }],
            ..Default::default()
        };
        let updated = run_update_status(&pipeline, "e-1".into(), incoming)
            .await
            .unwrap();

        // Spec and metadata untouched; status merged.
        assert_eq!(updated.metadata, seeded.metadata);
        assert_eq!(updated.spec, seeded.spec);
        assert_eq!(updated.phase(), ExecutionPhase::ExecutionInProgress);
        assert_eq!(updated.status.as_ref().unwrap().messages.len(), 1);

        // Broadcast carries the persisted snapshot.
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame, updated);
        let stored: AgentExecution = store.get_resource("e-1").await.unwrap().unwrap();
        assert_eq!(stored, updated);
    }

    #[tokio::test]
    async fn test_missing_execution_not_found() {
        let store = ResourceStore::in_memory();
        let broker = Arc::new(StreamBroker::<AgentExecution>::new());
        let pipeline = update_status_pipeline(store, broker);
        let err = run_update_status::<AgentExecution>(
            &pipeline,
            "missing".into(),
            AgentExecutionStatus::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_empty_execution_id_invalid() {
        let store = ResourceStore::in_memory();
        let broker = Arc::new(StreamBroker::<AgentExecution>::new());
        let pipeline = update_status_pipeline(store, broker);
        let err = run_update_status::<AgentExecution>(
            &pipeline,
            String::new(),
            AgentExecutionStatus::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }
}
