// Workflow creators: bridge from a persisted execution to a durable
// workflow. Rebuilt by the connection manager on every reconnect; a
// controller holding no creator simply leaves the execution PENDING.

use std::sync::Arc;

use serde_json::json;

use stigmer_temporal::{EngineClient, EngineError, Payload, WorkflowOptions};

use super::names::MEMO_ACTIVITY_TASK_QUEUE;

pub struct WorkflowCreator {
    client: Arc<dyn EngineClient>,
    workflow_name: &'static str,
    stigmer_queue: String,
    runner_queue: String,
}

impl WorkflowCreator {
    pub fn new(
        client: Arc<dyn EngineClient>,
        workflow_name: &'static str,
        stigmer_queue: impl Into<String>,
        runner_queue: impl Into<String>,
    ) -> Self {
        Self {
            client,
            workflow_name,
            stigmer_queue: stigmer_queue.into(),
            runner_queue: runner_queue.into(),
        }
    }

    /// Deterministic engine workflow id for an execution.
    pub fn workflow_id(&self, execution_id: &str) -> String {
        format!("{}/{}", self.workflow_name, execution_id)
    }

    /// Start the durable workflow for an execution. The runner queue goes
    /// into the memo so the orchestration workflow can route its remote
    /// activities.
    pub async fn start(&self, execution_id: &str, input: Payload) -> Result<String, EngineError> {
        let workflow_id = self.workflow_id(execution_id);
        let options = WorkflowOptions::new(workflow_id.clone(), self.stigmer_queue.clone())
            .with_memo(MEMO_ACTIVITY_TASK_QUEUE, json!(self.runner_queue));
        self.client
            .execute_workflow(options, self.workflow_name, input)
            .await?;
        tracing::info!(
            workflow_id = %workflow_id,
            task_queue = %self.stigmer_queue,
            runner_queue = %self.runner_queue,
            "durable workflow started"
        );
        Ok(workflow_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::names::AGENT_EXECUTION_WORKFLOW;
    use stigmer_temporal::MemoryEngine;

    #[tokio::test]
    async fn test_workflow_id_format() {
        let creator = WorkflowCreator::new(
            Arc::new(MemoryEngine::new()),
            AGENT_EXECUTION_WORKFLOW,
            "agent_execution_stigmer",
            "agent_execution_runner",
        );
        assert_eq!(
            creator.workflow_id("0193-aaaa"),
            "stigmer/agent-execution/invoke/0193-aaaa"
        );
    }
}
