// Uniform access to the metadata/spec/status envelope of every resource
// kind, plus the status-merge rules for executions.
//
// Decision: implemented per kind by hand instead of codegen; the envelope
// is stable and the impls are the single place where kind-specific fields
// meet the generic pipeline.

use stigmer_protocol::proto::{
    Agent, AgentExecution, AgentExecutionStatus, AgentInstance, ApiResourceMetadata, AuditInfo,
    Environment, ExecutionContext, ExecutionPhase, Session, Skill, Workflow, WorkflowExecution,
    WorkflowExecutionStatus, WorkflowInstance,
};
use stigmer_protocol::{timestamp_now, Timestamp};

use crate::kind::ResourceKind;

/// Fresh audit block for a newly created resource.
pub fn audit_created() -> AuditInfo {
    let now = timestamp_now();
    AuditInfo {
        created_at: Some(now.clone()),
        updated_at: Some(now),
        event: "created".to_string(),
    }
}

/// Bump an audit block for a mutation. `updated_at` stays strictly
/// monotonic even on coarse clocks.
pub fn touch_audit(audit: &mut Option<AuditInfo>) {
    let entry = audit.get_or_insert_with(AuditInfo::default);
    let mut now = timestamp_now();
    if let Some(prev) = &entry.updated_at {
        if !now.is_after(prev) {
            now = Timestamp {
                seconds: prev.seconds,
                nanos: prev.nanos + 1,
            };
        }
    }
    if entry.created_at.is_none() {
        entry.created_at = Some(now.clone());
    }
    entry.updated_at = Some(now);
    entry.event = "updated".to_string();
}

/// Uniform envelope access for every persisted resource kind.
pub trait ApiResource: prost::Message + Clone + Default + Send + Sync + 'static {
    const KIND: ResourceKind;

    fn meta(&self) -> Option<&ApiResourceMetadata>;
    fn meta_mut(&mut self) -> &mut ApiResourceMetadata;

    /// Drop any caller-provided status. Status is system-owned.
    fn clear_status(&mut self);

    /// Replace this resource's spec with the incoming one (Update merge:
    /// spec is fully user-mutable, metadata/status are preserved by the
    /// caller).
    fn merge_spec_from(&mut self, incoming: &Self);

    fn id(&self) -> &str {
        self.meta().map(|m| m.id.as_str()).unwrap_or("")
    }

    fn name(&self) -> &str {
        self.meta().map(|m| m.name.as_str()).unwrap_or("")
    }

    fn slug(&self) -> &str {
        self.meta().map(|m| m.slug.as_str()).unwrap_or("")
    }

    fn org(&self) -> &str {
        self.meta().map(|m| m.org.as_str()).unwrap_or("")
    }

    fn owner_scope(&self) -> stigmer_protocol::proto::OwnerScope {
        self.meta()
            .map(|m| m.owner_scope())
            .unwrap_or(stigmer_protocol::proto::OwnerScope::Unspecified)
    }

    /// True when another resource occupies the same slug slot
    /// (owner_scope, org, slug) within this kind.
    fn same_slug_slot(&self, other: &Self) -> bool {
        self.owner_scope() == other.owner_scope()
            && self.org() == other.org()
            && !self.slug().is_empty()
            && self.slug() == other.slug()
    }
}

macro_rules! impl_api_resource {
    ($ty:ty, $kind:expr) => {
        impl ApiResource for $ty {
            const KIND: ResourceKind = $kind;

            fn meta(&self) -> Option<&ApiResourceMetadata> {
                self.metadata.as_ref()
            }

            fn meta_mut(&mut self) -> &mut ApiResourceMetadata {
                self.metadata.get_or_insert_with(ApiResourceMetadata::default)
            }

            fn clear_status(&mut self) {
                self.status = None;
            }

            fn merge_spec_from(&mut self, incoming: &Self) {
                self.spec = incoming.spec.clone();
            }
        }
    };
}

impl_api_resource!(Agent, ResourceKind::Agent);
impl_api_resource!(AgentInstance, ResourceKind::AgentInstance);
impl_api_resource!(Session, ResourceKind::Session);
impl_api_resource!(Environment, ResourceKind::Environment);
impl_api_resource!(ExecutionContext, ResourceKind::ExecutionContext);
impl_api_resource!(Skill, ResourceKind::Skill);
impl_api_resource!(Workflow, ResourceKind::Workflow);
impl_api_resource!(WorkflowInstance, ResourceKind::WorkflowInstance);
impl_api_resource!(AgentExecution, ResourceKind::AgentExecution);
impl_api_resource!(WorkflowExecution, ResourceKind::WorkflowExecution);

/// Execution-specific envelope access: phase machine, status merge, and
/// the template/instance anchoring fields.
pub trait ExecutionResource: ApiResource {
    type Status: Clone + PartialEq + Default + Send + Sync + 'static;

    fn status(&self) -> Option<&Self::Status>;
    fn status_mut(&mut self) -> &mut Self::Status;

    fn phase(&self) -> ExecutionPhase;
    fn set_phase(&mut self, phase: ExecutionPhase);

    /// Id of the parent template (Agent / Workflow) named in the spec.
    fn template_id(&self) -> &str;
    /// Id of the parent instance (Session / WorkflowInstance) named in the
    /// spec.
    fn instance_id(&self) -> &str;
    fn set_instance_id(&mut self, id: &str);

    fn callback_token(&self) -> &[u8];

    fn set_engine_workflow_id(&mut self, workflow_id: &str);

    /// Merge an incoming status report onto this execution.
    ///
    /// Arrays replace wholesale when non-empty; scalars replace when
    /// provided; a terminal phase is never re-opened. The status audit is
    /// bumped on every merge, terminal or not.
    fn merge_status(&mut self, incoming: &Self::Status);
}

impl ExecutionResource for AgentExecution {
    type Status = AgentExecutionStatus;

    fn status(&self) -> Option<&AgentExecutionStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut AgentExecutionStatus {
        self.status.get_or_insert_with(AgentExecutionStatus::default)
    }

    fn phase(&self) -> ExecutionPhase {
        self.status.as_ref().map(|s| s.phase()).unwrap_or(ExecutionPhase::Unspecified)
    }

    fn set_phase(&mut self, phase: ExecutionPhase) {
        self.status_mut().phase = phase as i32;
    }

    fn template_id(&self) -> &str {
        self.spec.as_ref().map(|s| s.agent_id.as_str()).unwrap_or("")
    }

    fn instance_id(&self) -> &str {
        self.spec.as_ref().map(|s| s.session_id.as_str()).unwrap_or("")
    }

    fn set_instance_id(&mut self, id: &str) {
        self.spec.get_or_insert_with(Default::default).session_id = id.to_string();
    }

    fn callback_token(&self) -> &[u8] {
        self.spec
            .as_ref()
            .map(|s| s.callback_token.as_slice())
            .unwrap_or(&[])
    }

    fn set_engine_workflow_id(&mut self, workflow_id: &str) {
        self.status_mut().temporal_workflow_id = workflow_id.to_string();
    }

    fn merge_status(&mut self, incoming: &AgentExecutionStatus) {
        let terminal = self.phase().is_terminal();
        let status = self.status_mut();
        if !incoming.messages.is_empty() {
            status.messages = incoming.messages.clone();
        }
        if !incoming.tool_calls.is_empty() {
            status.tool_calls = incoming.tool_calls.clone();
        }
        if incoming.phase() != ExecutionPhase::Unspecified && !terminal {
            status.phase = incoming.phase;
        }
        if !incoming.output.is_empty() {
            status.output = incoming.output.clone();
        }
        if !incoming.error.is_empty() {
            status.error = incoming.error.clone();
        }
        if !incoming.temporal_workflow_id.is_empty() {
            status.temporal_workflow_id = incoming.temporal_workflow_id.clone();
        }
        if incoming.started_at.is_some() {
            status.started_at = incoming.started_at.clone();
        }
        if incoming.completed_at.is_some() {
            status.completed_at = incoming.completed_at.clone();
        }
        touch_audit(&mut status.audit);
    }
}

impl ExecutionResource for WorkflowExecution {
    type Status = WorkflowExecutionStatus;

    fn status(&self) -> Option<&WorkflowExecutionStatus> {
        self.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut WorkflowExecutionStatus {
        self.status.get_or_insert_with(WorkflowExecutionStatus::default)
    }

    fn phase(&self) -> ExecutionPhase {
        self.status.as_ref().map(|s| s.phase()).unwrap_or(ExecutionPhase::Unspecified)
    }

    fn set_phase(&mut self, phase: ExecutionPhase) {
        self.status_mut().phase = phase as i32;
    }

    fn template_id(&self) -> &str {
        self.spec.as_ref().map(|s| s.workflow_id.as_str()).unwrap_or("")
    }

    fn instance_id(&self) -> &str {
        self.spec
            .as_ref()
            .map(|s| s.workflow_instance_id.as_str())
            .unwrap_or("")
    }

    fn set_instance_id(&mut self, id: &str) {
        self.spec.get_or_insert_with(Default::default).workflow_instance_id = id.to_string();
    }

    fn callback_token(&self) -> &[u8] {
        self.spec
            .as_ref()
            .map(|s| s.callback_token.as_slice())
            .unwrap_or(&[])
    }

    fn set_engine_workflow_id(&mut self, workflow_id: &str) {
        self.status_mut().temporal_workflow_id = workflow_id.to_string();
    }

    fn merge_status(&mut self, incoming: &WorkflowExecutionStatus) {
        let terminal = self.phase().is_terminal();
        let status = self.status_mut();
        if !incoming.tasks.is_empty() {
            status.tasks = incoming.tasks.clone();
        }
        if incoming.phase() != ExecutionPhase::Unspecified && !terminal {
            status.phase = incoming.phase;
        }
        if !incoming.output.is_empty() {
            status.output = incoming.output.clone();
        }
        if !incoming.error.is_empty() {
            status.error = incoming.error.clone();
        }
        if !incoming.temporal_workflow_id.is_empty() {
            status.temporal_workflow_id = incoming.temporal_workflow_id.clone();
        }
        if incoming.started_at.is_some() {
            status.started_at = incoming.started_at.clone();
        }
        if incoming.completed_at.is_some() {
            status.completed_at = incoming.completed_at.clone();
        }
        touch_audit(&mut status.audit);
    }
}
