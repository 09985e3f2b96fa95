// Custom create-path steps for the two execution kinds: anchoring
// validation, default-instance resolution with crash recovery, and the
// initial phase stamp.

use std::sync::Arc;

use async_trait::async_trait;

use stigmer_core::resource::touch_audit;
use stigmer_core::{default_instance_slug, ApiError, ApiResource, ExecutionResource, ResourceKind};
use stigmer_protocol::proto::{
    Agent, AgentExecution, AgentInstance, AgentInstanceSpec, ApiResourceMetadata, ExecutionPhase,
    OwnerScope, Session, SessionSpec, Workflow, WorkflowExecution, WorkflowInstance,
    WorkflowInstanceSpec,
};
use stigmer_storage::ResourceStore;

use crate::controllers::clients::{status_to_api_error, InProcessClients};
use crate::pipeline::{RequestContext, Step};

fn store_error(err: stigmer_storage::StoreError) -> ApiError {
    ApiError::internal(err.to_string())
}

// ============================================================================
// ValidateExecutionAnchor
// ============================================================================

/// An execution must name its parent instance, its parent template, or
/// both.
pub struct ValidateExecutionAnchor {
    template_field: &'static str,
    instance_field: &'static str,
}

impl ValidateExecutionAnchor {
    pub fn new(template_field: &'static str, instance_field: &'static str) -> Self {
        Self {
            template_field,
            instance_field,
        }
    }
}

#[async_trait]
impl<R: ExecutionResource> Step<R> for ValidateExecutionAnchor {
    fn name(&self) -> &'static str {
        "ValidateExecutionAnchor"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        let state = ctx.new_state();
        if state.template_id().is_empty() && state.instance_id().is_empty() {
            return Err(ApiError::invalid(format!(
                "at least one of spec.{} or spec.{} is required",
                self.template_field, self.instance_field
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SetInitialPhase
// ============================================================================

/// Every execution is born PENDING; the runner moves it forward.
pub struct SetInitialPhase;

#[async_trait]
impl<R: ExecutionResource> Step<R> for SetInitialPhase {
    fn name(&self) -> &'static str {
        "SetInitialPhase"
    }

    async fn execute(&self, ctx: &mut RequestContext<R>) -> Result<(), ApiError> {
        ctx.new_state_mut().set_phase(ExecutionPhase::ExecutionPending);
        Ok(())
    }
}

// ============================================================================
// ResolveOrCreateDefaultInstance (workflow executions)
// ============================================================================

fn instance_metadata(name: String, scope: OwnerScope, org: &str) -> ApiResourceMetadata {
    ApiResourceMetadata {
        name,
        owner_scope: scope as i32,
        org: org.to_string(),
        ..Default::default()
    }
}

/// Resolve the parent WorkflowInstance for a template-anchored execution.
///
/// Prefers the template's recorded default instance; falls back to a slug
/// lookup (recovery from a create that persisted the instance but crashed
/// before the status write); creates a fresh default instance through the
/// in-process client as the last resort. Either recovery path repairs the
/// template's status.
pub struct ResolveOrCreateDefaultInstance {
    store: ResourceStore,
    clients: Arc<InProcessClients>,
}

impl ResolveOrCreateDefaultInstance {
    pub fn new(store: ResourceStore, clients: Arc<InProcessClients>) -> Self {
        Self { store, clients }
    }
}

#[async_trait]
impl Step<WorkflowExecution> for ResolveOrCreateDefaultInstance {
    fn name(&self) -> &'static str {
        "ResolveOrCreateDefaultInstance"
    }

    async fn execute(&self, ctx: &mut RequestContext<WorkflowExecution>) -> Result<(), ApiError> {
        if !ctx.new_state().instance_id().is_empty() {
            return Ok(());
        }
        let template_id = ctx.new_state().template_id().to_string();
        let mut workflow: Workflow = self
            .store
            .get_resource(&template_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| ApiError::not_found(ResourceKind::Workflow, &template_id))?;

        let recorded = workflow
            .status
            .as_ref()
            .map(|s| s.default_instance_id.clone())
            .unwrap_or_default();
        let instance_id = if !recorded.is_empty() {
            recorded
        } else {
            let slug = default_instance_slug(workflow.slug());
            let existing: Option<WorkflowInstance> = self
                .store
                .find_by_slug(workflow.owner_scope(), workflow.org(), &slug)
                .await
                .map_err(store_error)?;
            let instance_id = match existing {
                Some(instance) => {
                    tracing::info!(
                        workflow_id = %template_id,
                        instance_id = %instance.id(),
                        "recovered default instance by slug"
                    );
                    instance.id().to_string()
                }
                None => {
                    let instance = WorkflowInstance {
                        metadata: Some(instance_metadata(
                            slug,
                            workflow.owner_scope(),
                            workflow.org(),
                        )),
                        spec: Some(WorkflowInstanceSpec {
                            workflow_id: template_id.clone(),
                            ..Default::default()
                        }),
                        status: None,
                    };
                    let mut client = self.clients.workflow_instance_command()?;
                    let created = client
                        .create_as_system(instance)
                        .await
                        .map_err(status_to_api_error)?
                        .into_inner();
                    created.id().to_string()
                }
            };
            let status = workflow.status.get_or_insert_with(Default::default);
            status.default_instance_id = instance_id.clone();
            touch_audit(&mut status.audit);
            self.store
                .save_resource(&workflow)
                .await
                .map_err(store_error)?;
            instance_id
        };

        ctx.new_state_mut().set_instance_id(&instance_id);
        Ok(())
    }
}

// ============================================================================
// ResolveOrCreateDefaultSession (agent executions)
// ============================================================================

/// Resolve the parent Session for a template-anchored agent execution.
///
/// Agent executions anchor to Sessions, one level below the agent's
/// default AgentInstance: the chain is Agent -> AgentInstance -> Session.
/// The same status-then-slug-then-create recovery applies at both levels,
/// and both repairs are written back to the agent's status. The default
/// session inherits the execution's scope (sessions reject platform
/// scope, so a platform-scoped execution must name a session explicitly).
pub struct ResolveOrCreateDefaultSession {
    store: ResourceStore,
    clients: Arc<InProcessClients>,
}

impl ResolveOrCreateDefaultSession {
    pub fn new(store: ResourceStore, clients: Arc<InProcessClients>) -> Self {
        Self { store, clients }
    }

    async fn resolve_default_instance(&self, agent: &mut Agent) -> Result<String, ApiError> {
        let recorded = agent
            .status
            .as_ref()
            .map(|s| s.default_instance_id.clone())
            .unwrap_or_default();
        if !recorded.is_empty() {
            return Ok(recorded);
        }

        let slug = default_instance_slug(agent.slug());
        let existing: Option<AgentInstance> = self
            .store
            .find_by_slug(agent.owner_scope(), agent.org(), &slug)
            .await
            .map_err(store_error)?;
        let instance_id = match existing {
            Some(instance) => instance.id().to_string(),
            None => {
                let instance = AgentInstance {
                    metadata: Some(instance_metadata(slug, agent.owner_scope(), agent.org())),
                    spec: Some(AgentInstanceSpec {
                        agent_id: agent.id().to_string(),
                        ..Default::default()
                    }),
                    status: None,
                };
                let mut client = self.clients.agent_instance_command()?;
                client
                    .create_as_system(instance)
                    .await
                    .map_err(status_to_api_error)?
                    .into_inner()
                    .id()
                    .to_string()
            }
        };
        let status = agent.status.get_or_insert_with(Default::default);
        status.default_instance_id = instance_id.clone();
        Ok(instance_id)
    }
}

#[async_trait]
impl Step<AgentExecution> for ResolveOrCreateDefaultSession {
    fn name(&self) -> &'static str {
        "ResolveOrCreateDefaultInstance"
    }

    async fn execute(&self, ctx: &mut RequestContext<AgentExecution>) -> Result<(), ApiError> {
        if !ctx.new_state().instance_id().is_empty() {
            return Ok(());
        }
        let template_id = ctx.new_state().template_id().to_string();
        let mut agent: Agent = self
            .store
            .get_resource(&template_id)
            .await
            .map_err(store_error)?
            .ok_or_else(|| ApiError::not_found(ResourceKind::Agent, &template_id))?;

        let recorded = agent
            .status
            .as_ref()
            .map(|s| s.default_session_id.clone())
            .unwrap_or_default();
        if !recorded.is_empty() {
            ctx.new_state_mut().set_instance_id(&recorded);
            return Ok(());
        }

        let mut scope = ctx.new_state().owner_scope();
        let mut org = ctx.new_state().org().to_string();
        if scope == OwnerScope::Platform {
            // Sessions cannot be platform-scoped; fall back to the agent's
            // own scope when it has one.
            if agent.owner_scope() == OwnerScope::Platform {
                return Err(ApiError::invalid(
                    "platform-scoped executions must name spec.session_id explicitly",
                ));
            }
            scope = agent.owner_scope();
            org = agent.org().to_string();
        }

        let session_slug = default_instance_slug(agent.slug());
        let existing: Option<Session> = self
            .store
            .find_by_slug(scope, &org, &session_slug)
            .await
            .map_err(store_error)?;
        let session_id = match existing {
            Some(session) => {
                tracing::info!(
                    agent_id = %template_id,
                    session_id = %session.id(),
                    "recovered default session by slug"
                );
                session.id().to_string()
            }
            None => {
                let instance_id = self.resolve_default_instance(&mut agent).await?;
                let session = Session {
                    metadata: Some(instance_metadata(session_slug, scope, &org)),
                    spec: Some(SessionSpec {
                        agent_instance_id: instance_id,
                        subject: format!("Default session for {}", agent.name()),
                        ..Default::default()
                    }),
                    status: None,
                };
                let mut client = self.clients.session_command()?;
                client
                    .create_as_system(session)
                    .await
                    .map_err(status_to_api_error)?
                    .into_inner()
                    .id()
                    .to_string()
            }
        };

        let status = agent.status.get_or_insert_with(Default::default);
        status.default_session_id = session_id.clone();
        touch_audit(&mut status.audit);
        self.store
            .save_resource(&agent)
            .await
            .map_err(store_error)?;

        ctx.new_state_mut().set_instance_id(&session_id);
        Ok(())
    }
}
