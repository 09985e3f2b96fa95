// Request validation.
//
// The wire layer carries no declarative constraints, so every message
// validates itself here. The ValidateProto pipeline step calls into this
// before any other step runs.

use stigmer_protocol::proto::{
    Agent, AgentExecution, AgentInstance, Environment, ExecutionContext, OwnerScope, Session,
    Skill, Workflow, WorkflowInstance,
};
use stigmer_protocol::WorkflowExecution;

use crate::error::ApiError;
use crate::resource::ApiResource;

/// Field-constraint validation for inbound command payloads.
pub trait Validate {
    fn validate(&self) -> Result<(), ApiError>;
}

/// Constraints shared by every resource kind: metadata present, name
/// non-empty, scope specified, org present exactly when org-scoped.
fn validate_metadata<R: ApiResource>(resource: &R) -> Result<(), ApiError> {
    let meta = resource
        .meta()
        .ok_or_else(|| ApiError::invalid("metadata is required"))?;
    if meta.name.trim().is_empty() {
        return Err(ApiError::invalid("metadata.name is required"));
    }
    match meta.owner_scope() {
        OwnerScope::Unspecified => {
            return Err(ApiError::invalid("metadata.owner_scope must be specified"));
        }
        OwnerScope::Organization => {
            if meta.org.is_empty() {
                return Err(ApiError::invalid(
                    "metadata.org is required for organization-scoped resources",
                ));
            }
        }
        _ => {
            if !meta.org.is_empty() {
                return Err(ApiError::invalid(
                    "metadata.org is only valid for organization-scoped resources",
                ));
            }
        }
    }
    Ok(())
}

impl Validate for Agent {
    fn validate(&self) -> Result<(), ApiError> {
        validate_metadata(self)
    }
}

impl Validate for AgentInstance {
    fn validate(&self) -> Result<(), ApiError> {
        validate_metadata(self)?;
        let spec = self
            .spec
            .as_ref()
            .ok_or_else(|| ApiError::invalid("spec is required"))?;
        if spec.agent_id.is_empty() {
            return Err(ApiError::invalid("spec.agent_id is required"));
        }
        Ok(())
    }
}

impl Validate for Session {
    fn validate(&self) -> Result<(), ApiError> {
        validate_metadata(self)?;
        // Sessions belong to an organization or an individual account;
        // platform-wide sessions are rejected.
        if self.owner_scope() == OwnerScope::Platform {
            return Err(ApiError::invalid(
                "sessions must be organization or identity_account scoped",
            ));
        }
        let spec = self
            .spec
            .as_ref()
            .ok_or_else(|| ApiError::invalid("spec is required"))?;
        if spec.agent_instance_id.is_empty() {
            return Err(ApiError::invalid("spec.agent_instance_id is required"));
        }
        Ok(())
    }
}

impl Validate for Environment {
    fn validate(&self) -> Result<(), ApiError> {
        validate_metadata(self)
    }
}

impl Validate for ExecutionContext {
    fn validate(&self) -> Result<(), ApiError> {
        validate_metadata(self)?;
        let spec = self
            .spec
            .as_ref()
            .ok_or_else(|| ApiError::invalid("spec is required"))?;
        if spec.session_id.is_empty() {
            return Err(ApiError::invalid("spec.session_id is required"));
        }
        Ok(())
    }
}

impl Validate for Skill {
    fn validate(&self) -> Result<(), ApiError> {
        validate_metadata(self)
    }
}

impl Validate for Workflow {
    fn validate(&self) -> Result<(), ApiError> {
        validate_metadata(self)?;
        let spec = self
            .spec
            .as_ref()
            .ok_or_else(|| ApiError::invalid("spec is required"))?;
        if spec.document.is_none() {
            return Err(ApiError::invalid("spec.document is required"));
        }
        for (i, task) in spec.tasks.iter().enumerate() {
            if task.name.is_empty() {
                return Err(ApiError::invalid(format!("spec.tasks[{}].name is required", i)));
            }
        }
        Ok(())
    }
}

impl Validate for WorkflowInstance {
    fn validate(&self) -> Result<(), ApiError> {
        validate_metadata(self)?;
        let spec = self
            .spec
            .as_ref()
            .ok_or_else(|| ApiError::invalid("spec is required"))?;
        if spec.workflow_id.is_empty() {
            return Err(ApiError::invalid("spec.workflow_id is required"));
        }
        Ok(())
    }
}

impl Validate for AgentExecution {
    fn validate(&self) -> Result<(), ApiError> {
        // The agent/session anchor requirement is a dedicated pipeline step.
        validate_metadata(self)
    }
}

impl Validate for WorkflowExecution {
    fn validate(&self) -> Result<(), ApiError> {
        validate_metadata(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stigmer_protocol::proto::{ApiResourceMetadata, SessionSpec};

    fn metadata(name: &str, scope: OwnerScope, org: &str) -> ApiResourceMetadata {
        ApiResourceMetadata {
            name: name.to_string(),
            owner_scope: scope as i32,
            org: org.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_metadata_rejected() {
        let agent = Agent::default();
        assert!(matches!(
            agent.validate(),
            Err(ApiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_name_rejected() {
        let agent = Agent {
            metadata: Some(metadata("", OwnerScope::Platform, "")),
            ..Default::default()
        };
        assert!(agent.validate().is_err());
    }

    #[test]
    fn test_org_required_for_org_scope() {
        let agent = Agent {
            metadata: Some(metadata("a", OwnerScope::Organization, "")),
            ..Default::default()
        };
        assert!(agent.validate().is_err());

        let agent = Agent {
            metadata: Some(metadata("a", OwnerScope::Organization, "acme")),
            ..Default::default()
        };
        assert!(agent.validate().is_ok());
    }

    #[test]
    fn test_org_rejected_outside_org_scope() {
        let agent = Agent {
            metadata: Some(metadata("a", OwnerScope::Platform, "acme")),
            ..Default::default()
        };
        assert!(agent.validate().is_err());
    }

    #[test]
    fn test_platform_session_rejected() {
        let session = Session {
            metadata: Some(metadata("chat", OwnerScope::Platform, "")),
            spec: Some(SessionSpec {
                agent_instance_id: "ai-1".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = session.validate().unwrap_err();
        assert!(err.to_string().contains("organization or identity_account"));
    }

    #[test]
    fn test_session_requires_instance() {
        let session = Session {
            metadata: Some(metadata("chat", OwnerScope::IdentityAccount, "")),
            spec: Some(SessionSpec::default()),
            ..Default::default()
        };
        assert!(session.validate().is_err());
    }

    #[test]
    fn test_workflow_requires_document() {
        let workflow = Workflow {
            metadata: Some(metadata("Pipeline", OwnerScope::Platform, "")),
            spec: Some(stigmer_protocol::proto::WorkflowSpec::default()),
            ..Default::default()
        };
        assert!(workflow.validate().is_err());
    }
}
