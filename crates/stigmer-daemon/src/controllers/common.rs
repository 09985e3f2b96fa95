// Shared handler glue between the generated service traits and the
// pipeline framework.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use stigmer_core::{ApiError, ApiResource, ExecutionResource};
use stigmer_protocol::proto::{GetByIdRequest, GetByReferenceRequest, SubscribeRequest};
use stigmer_storage::ResourceStore;

use crate::execution::broker::{StreamBroker, SUBSCRIBER_BUFFER};
use crate::pipeline::steps::ReferenceLookup;
use crate::pipeline::{keys, Pipeline, RequestContext};
use crate::server::interceptor::expect_kind;

/// Run a command pipeline over the request payload and return the
/// resulting new state.
pub async fn run_command<R: ApiResource>(
    pipeline: &Pipeline<R>,
    request: Request<R>,
    system_call: bool,
) -> Result<Response<R>, Status> {
    expect_kind(&request, R::KIND)?;
    let input = request.into_inner();
    let mut ctx = if system_call {
        RequestContext::new_system(input)
    } else {
        RequestContext::new(input)
    };
    pipeline.run(&mut ctx).await?;
    Ok(Response::new(ctx.take_new_state()))
}

/// Apply (upsert): probe by slug, then delegate to the full Create or
/// Update pipeline so their invariants run unchanged.
pub async fn run_apply<R: ApiResource>(
    probe: &Pipeline<R>,
    create: &Pipeline<R>,
    update: &Pipeline<R>,
    request: Request<R>,
) -> Result<Response<R>, Status> {
    expect_kind(&request, R::KIND)?;
    let input = request.into_inner();

    let mut probe_ctx = RequestContext::new(input.clone());
    probe.run(&mut probe_ctx).await?;
    let should_create = probe_ctx
        .bag
        .get::<bool>(keys::SHOULD_CREATE)
        .copied()
        .unwrap_or(true);

    if should_create {
        let mut ctx = RequestContext::new(input);
        create.run(&mut ctx).await?;
        return Ok(Response::new(ctx.take_new_state()));
    }

    let existing: R = probe_ctx
        .bag
        .take(keys::EXISTING)
        .ok_or_else(|| Status::internal("apply probe lost the existing resource"))?;
    let mut input = input;
    input.meta_mut().id = existing.id().to_string();
    let mut ctx = RequestContext::new(input);
    update.run(&mut ctx).await?;
    Ok(Response::new(ctx.take_new_state()))
}

/// Get / Delete style requests: run a pipeline keyed by target id.
pub async fn run_by_id<R: ApiResource>(
    pipeline: &Pipeline<R>,
    request: Request<GetByIdRequest>,
) -> Result<Response<R>, Status> {
    expect_kind(&request, R::KIND)?;
    let id = request.into_inner().id;
    let mut ctx = RequestContext::new(R::default());
    ctx.bag.set(keys::TARGET_ID, id);
    pipeline.run(&mut ctx).await?;
    Ok(Response::new(ctx.take_new_state()))
}

pub async fn run_by_reference<R: ApiResource>(
    pipeline: &Pipeline<R>,
    request: Request<GetByReferenceRequest>,
) -> Result<Response<R>, Status> {
    expect_kind(&request, R::KIND)?;
    let lookup = request.into_inner();
    let mut ctx = RequestContext::new(R::default());
    ctx.bag.set(
        keys::REFERENCE,
        ReferenceLookup {
            slug: lookup.slug.clone(),
            owner_scope: lookup.owner_scope(),
            org: lookup.org,
        },
    );
    pipeline.run(&mut ctx).await?;
    Ok(Response::new(ctx.take_new_state()))
}

/// List every resource of a kind, wrapped into the kind's list message.
pub async fn run_list<R: ApiResource, L, T>(
    store: &ResourceStore,
    request: Request<T>,
    wrap: impl FnOnce(Vec<R>) -> L,
) -> Result<Response<L>, Status> {
    expect_kind(&request, R::KIND)?;
    let items = store
        .list_resources::<R>()
        .await
        .map_err(|e| Status::from(ApiError::internal(e.to_string())))?;
    Ok(Response::new(wrap(items)))
}

/// List the resources of a kind whose parent id matches.
pub async fn run_list_by_parent<R: ApiResource, L, T>(
    store: &ResourceStore,
    request: Request<T>,
    parent_id: String,
    parent_of: impl Fn(&R) -> &str,
    wrap: impl FnOnce(Vec<R>) -> L,
) -> Result<Response<L>, Status> {
    expect_kind(&request, R::KIND)?;
    if parent_id.is_empty() {
        return Err(Status::from(ApiError::invalid("parent_id is required")));
    }
    let items = store
        .list_resources::<R>()
        .await
        .map_err(|e| Status::from(ApiError::internal(e.to_string())))?
        .into_iter()
        .filter(|r| parent_of(r) == parent_id)
        .collect();
    Ok(Response::new(wrap(items)))
}

pub type SubscribeStream<R> = Pin<Box<dyn Stream<Item = Result<R, Status>> + Send>>;

/// Server-streaming subscribe: current persisted state first, then every
/// broadcast frame until a terminal phase, caller cancellation, or broker
/// close. Unsubscribes on every exit path.
pub async fn run_subscribe<R: ExecutionResource>(
    store: &ResourceStore,
    broker: &Arc<StreamBroker<R>>,
    request: Request<SubscribeRequest>,
) -> Result<Response<SubscribeStream<R>>, Status> {
    expect_kind(&request, R::KIND)?;
    let execution_id = request.into_inner().execution_id;
    if execution_id.is_empty() {
        return Err(Status::from(ApiError::invalid("execution_id is required")));
    }

    let initial: R = store
        .get_resource(&execution_id)
        .await
        .map_err(|e| Status::from(ApiError::internal(e.to_string())))?
        .ok_or_else(|| Status::from(ApiError::not_found(R::KIND, &execution_id)))?;

    let (subscription_id, mut updates) = broker.subscribe(&execution_id);
    let (tx, rx) = mpsc::channel::<Result<R, Status>>(SUBSCRIBER_BUFFER);

    let broker = broker.clone();
    tokio::spawn(async move {
        let initial_terminal = initial.phase().is_terminal();
        let mut open = tx.send(Ok(initial)).await.is_ok() && !initial_terminal;
        while open {
            match updates.recv().await {
                Some(update) => {
                    let terminal = update.phase().is_terminal();
                    if tx.send(Ok(update)).await.is_err() || terminal {
                        open = false;
                    }
                }
                // Broker closed the channel.
                None => open = false,
            }
        }
        broker.unsubscribe(&execution_id, subscription_id);
        tracing::debug!(execution_id = %execution_id, "subscription closed");
    });

    Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
}
