// Resource kinds and the service-name mapping used by the server
// interceptor to inject the kind before any pipeline step runs.

use std::fmt;

/// API version stamped into every resource's metadata on create.
pub const API_VERSION: &str = "stigmer.io/v1";

/// Every resource kind the daemon persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Agent,
    AgentInstance,
    Session,
    Environment,
    ExecutionContext,
    Skill,
    Workflow,
    WorkflowInstance,
    AgentExecution,
    WorkflowExecution,
}

impl ResourceKind {
    /// Stable lowercase identifier, used as the store key segment.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Agent => "agent",
            ResourceKind::AgentInstance => "agent_instance",
            ResourceKind::Session => "session",
            ResourceKind::Environment => "environment",
            ResourceKind::ExecutionContext => "execution_context",
            ResourceKind::Skill => "skill",
            ResourceKind::Workflow => "workflow",
            ResourceKind::WorkflowInstance => "workflow_instance",
            ResourceKind::AgentExecution => "agent_execution",
            ResourceKind::WorkflowExecution => "workflow_execution",
        }
    }

    /// PascalCase name stamped into `metadata.kind`.
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceKind::Agent => "Agent",
            ResourceKind::AgentInstance => "AgentInstance",
            ResourceKind::Session => "Session",
            ResourceKind::Environment => "Environment",
            ResourceKind::ExecutionContext => "ExecutionContext",
            ResourceKind::Skill => "Skill",
            ResourceKind::Workflow => "Workflow",
            ResourceKind::WorkflowInstance => "WorkflowInstance",
            ResourceKind::AgentExecution => "AgentExecution",
            ResourceKind::WorkflowExecution => "WorkflowExecution",
        }
    }

    /// Derive the resource kind from a fully-qualified gRPC service name
    /// (e.g. `stigmer.v1.AgentCommandController`). Both the command and the
    /// query service of a kind map to the same value.
    pub fn from_service_name(service: &str) -> Option<ResourceKind> {
        let name = service.strip_prefix("stigmer.v1.")?;
        let base = name
            .strip_suffix("CommandController")
            .or_else(|| name.strip_suffix("QueryController"))?;
        match base {
            "Agent" => Some(ResourceKind::Agent),
            "AgentInstance" => Some(ResourceKind::AgentInstance),
            "Session" => Some(ResourceKind::Session),
            "Environment" => Some(ResourceKind::Environment),
            "ExecutionContext" => Some(ResourceKind::ExecutionContext),
            "Skill" => Some(ResourceKind::Skill),
            "Workflow" => Some(ResourceKind::Workflow),
            "WorkflowInstance" => Some(ResourceKind::WorkflowInstance),
            "AgentExecution" => Some(ResourceKind::AgentExecution),
            "WorkflowExecution" => Some(ResourceKind::WorkflowExecution),
            _ => None,
        }
    }

    /// Derive the resource kind from a gRPC request path
    /// (`/stigmer.v1.AgentCommandController/Create`).
    pub fn from_grpc_path(path: &str) -> Option<ResourceKind> {
        let mut parts = path.trim_start_matches('/').split('/');
        let service = parts.next()?;
        Self::from_service_name(service)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}
