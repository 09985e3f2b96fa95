// Orchestration workflows.
//
// These run on the daemon's `*_stigmer` queues. All runtime work happens in
// the foreign runner workers: every remote activity call routes to the
// queue named in the `activityTaskQueue` memo. Real-time status updates
// during execution come from the runner over RPC; the value returned here
// only feeds the engine UI.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use stigmer_claimcheck::ClaimCheckManager;
use stigmer_temporal::workflow::WorkflowFn;
use stigmer_temporal::{
    ActivityError, ActivityOptions, Payload, RetryPolicy, TimeoutKind, WorkflowContext,
    WorkflowError,
};

use super::activities::{now_unix_ms, CompleteExternalInput, StatusUpdate, UpdateStatusActivityInput};
use super::names::*;

pub const SYSTEM_FAILURE_MESSAGE: &str =
    "internal system error; please contact support if persistent";

// ============================================================================
// Inputs
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentExecutionWorkflowInput {
    pub execution_id: String,
    pub agent_id: String,
    pub session_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub callback_token: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowTaskDef {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub config_json: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowExecutionWorkflowInput {
    pub execution_id: String,
    pub workflow_id: String,
    pub workflow_instance_id: String,
    #[serde(default)]
    pub trigger_message: String,
    #[serde(default)]
    pub callback_token: Vec<u8>,
    #[serde(default)]
    pub tasks: Vec<WorkflowTaskDef>,
}

// ============================================================================
// Activity options
// ============================================================================

fn ensure_thread_options(queue: &str) -> ActivityOptions {
    ActivityOptions::new(Duration::from_secs(60))
        .on_task_queue(queue)
        .with_retry_policy(RetryPolicy::exponential())
}

/// Long-running, heartbeated, and not idempotent: a single attempt.
fn execute_graphton_options(queue: &str) -> ActivityOptions {
    ActivityOptions::new(Duration::from_secs(600))
        .on_task_queue(queue)
        .with_schedule_to_start(Duration::from_secs(60))
        .with_heartbeat_timeout(Duration::from_secs(30))
        .with_retry_policy(RetryPolicy::no_retry())
}

fn workflow_task_options(queue: &str) -> ActivityOptions {
    ActivityOptions::new(Duration::from_secs(600))
        .on_task_queue(queue)
        .with_schedule_to_start(Duration::from_secs(60))
        .with_heartbeat_timeout(Duration::from_secs(30))
        .with_retry_policy(RetryPolicy::no_retry())
}

fn local_update_options() -> ActivityOptions {
    ActivityOptions::new(Duration::from_secs(60)).with_retry_policy(RetryPolicy::exponential())
}

fn complete_external_options() -> ActivityOptions {
    ActivityOptions::new(Duration::from_secs(60)).with_retry_policy(
        RetryPolicy::exponential()
            .with_max_attempts(3)
            .with_initial_interval(Duration::from_secs(1)),
    )
}

fn validation_options(queue: &str) -> ActivityOptions {
    ActivityOptions::new(Duration::from_secs(30))
        .on_task_queue(queue)
        .with_retry_policy(
            RetryPolicy::exponential()
                .with_max_attempts(3)
                .with_initial_interval(Duration::from_secs(1)),
        )
}

// ============================================================================
// Shared helpers
// ============================================================================

fn workflow_input<T: serde::de::DeserializeOwned>(input: Payload) -> Result<T, WorkflowError> {
    serde_json::from_value(input)
        .map_err(|e| WorkflowError::application(format!("invalid workflow input: {}", e)))
}

fn runner_queue(ctx: &dyn WorkflowContext) -> Result<String, WorkflowError> {
    ctx.memo(MEMO_ACTIVITY_TASK_QUEUE)
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| {
            WorkflowError::application(format!("memo {} is missing", MEMO_ACTIVITY_TASK_QUEUE))
        })
}

/// Turn an activity failure into an actionable operator diagnostic.
pub fn classify_activity_error(activity: &str, err: &ActivityError) -> String {
    match err.timeout {
        Some(TimeoutKind::ScheduleToStart) => format!(
            "{}: no worker is polling the runner task queue (schedule-to-start timeout): {}",
            activity, err
        ),
        Some(TimeoutKind::Heartbeat) => format!(
            "{}: the runner worker died mid-task (heartbeat timeout): {}",
            activity, err
        ),
        Some(TimeoutKind::StartToClose) => format!(
            "{}: the activity ran past its deadline (start-to-close timeout): {}",
            activity, err
        ),
        None => format!("{}: {}; check activity logs for details", activity, err),
    }
}

/// Best-effort local status update; failures are logged, never propagated.
async fn update_status(ctx: &dyn WorkflowContext, execution_id: &str, status: StatusUpdate) {
    let input = UpdateStatusActivityInput {
        execution_id: execution_id.to_string(),
        status,
    };
    let payload = match serde_json::to_value(&input) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(error = %err, "failed to encode status update");
            return;
        }
    };
    if let Err(err) = ctx
        .execute_local_activity(
            local_update_options(),
            ACTIVITY_UPDATE_EXECUTION_STATUS,
            payload,
        )
        .await
    {
        tracing::warn!(
            execution_id = %execution_id,
            error = %err,
            "status update activity failed"
        );
    }
}

async fn record_workflow_started(ctx: &dyn WorkflowContext, execution_id: &str) {
    update_status(
        ctx,
        execution_id,
        StatusUpdate {
            temporal_workflow_id: Some(ctx.workflow_id().to_string()),
            started_at_unix_ms: Some(now_unix_ms()),
            ..Default::default()
        },
    )
    .await;
}

async fn mark_failed(ctx: &dyn WorkflowContext, execution_id: &str, diagnostic: &str) {
    update_status(
        ctx,
        execution_id,
        StatusUpdate {
            phase: Some("FAILED".into()),
            error: Some(diagnostic.to_string()),
            system_messages: vec![SYSTEM_FAILURE_MESSAGE.to_string(), diagnostic.to_string()],
            completed_at_unix_ms: Some(now_unix_ms()),
            ..Default::default()
        },
    )
    .await;
}

/// Wake the external workflow holding an open activity for this execution.
async fn complete_external(
    ctx: &dyn WorkflowContext,
    token: &[u8],
    outcome: Result<Value, String>,
) -> Result<(), ActivityError> {
    let (result, error) = match outcome {
        Ok(result) => (Some(result), None),
        Err(error) => (None, Some(error)),
    };
    let input = CompleteExternalInput {
        task_token: token.to_vec(),
        result,
        error,
    };
    let payload = serde_json::to_value(&input)
        .map_err(|e| ActivityError::non_retryable(format!("encode complete-external: {}", e)))?;
    ctx.execute_activity(complete_external_options(), ACTIVITY_COMPLETE_EXTERNAL, payload)
        .await
        .map(|_| ())
}

// ============================================================================
// Agent execution workflow
// ============================================================================

pub fn agent_execution_workflow() -> WorkflowFn {
    Arc::new(|ctx, input| agent_execution(ctx, input).boxed())
}

async fn agent_execution(
    ctx: Arc<dyn WorkflowContext>,
    input: Payload,
) -> Result<Payload, WorkflowError> {
    let input: AgentExecutionWorkflowInput = workflow_input(input)?;
    let queue = runner_queue(ctx.as_ref())?;
    let has_token = !input.callback_token.is_empty();
    tracing::info!(
        execution_id = %input.execution_id,
        has_callback_token = has_token,
        "agent execution workflow started"
    );

    record_workflow_started(ctx.as_ref(), &input.execution_id).await;

    match run_agent_execution(ctx.as_ref(), &input, &queue).await {
        Ok(final_status) => {
            if has_token {
                complete_external(ctx.as_ref(), &input.callback_token, Ok(final_status.clone()))
                    .await
                    .map_err(|e| {
                        WorkflowError::application(format!(
                            "failed to complete external activity: {}",
                            e
                        ))
                    })?;
            }
            Ok(final_status)
        }
        Err((activity, err)) => {
            let diagnostic = classify_activity_error(activity, &err);
            mark_failed(ctx.as_ref(), &input.execution_id, &diagnostic).await;
            if has_token {
                if let Err(err) =
                    complete_external(ctx.as_ref(), &input.callback_token, Err(diagnostic.clone()))
                        .await
                {
                    tracing::warn!(error = %err, "failed to complete external activity");
                }
            }
            Err(WorkflowError::application(diagnostic))
        }
    }
}

async fn run_agent_execution(
    ctx: &dyn WorkflowContext,
    input: &AgentExecutionWorkflowInput,
    queue: &str,
) -> Result<Payload, (&'static str, ActivityError)> {
    // Idempotent: ensures conversation state exists for the session.
    let thread = ctx
        .execute_activity(
            ensure_thread_options(queue),
            ACTIVITY_ENSURE_THREAD,
            json!({
                "session_id": input.session_id,
                "agent_id": input.agent_id,
            }),
        )
        .await
        .map_err(|e| (ACTIVITY_ENSURE_THREAD, e))?;
    let thread_id = thread
        .get("thread_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    ctx.execute_activity(
        execute_graphton_options(queue),
        ACTIVITY_EXECUTE_GRAPHTON,
        json!({
            "execution_id": input.execution_id,
            "agent_id": input.agent_id,
            "session_id": input.session_id,
            "thread_id": thread_id,
            "message": input.message,
        }),
    )
    .await
    .map_err(|e| (ACTIVITY_EXECUTE_GRAPHTON, e))
}

// ============================================================================
// Workflow execution workflow
// ============================================================================

pub fn workflow_execution_workflow(claim_check: Arc<ClaimCheckManager>) -> WorkflowFn {
    Arc::new(move |ctx, input| workflow_execution(ctx, input, claim_check.clone()).boxed())
}

async fn workflow_execution(
    ctx: Arc<dyn WorkflowContext>,
    input: Payload,
    claim_check: Arc<ClaimCheckManager>,
) -> Result<Payload, WorkflowError> {
    let input: WorkflowExecutionWorkflowInput = workflow_input(input)?;
    let queue = runner_queue(ctx.as_ref())?;
    let has_token = !input.callback_token.is_empty();
    tracing::info!(
        execution_id = %input.execution_id,
        task_count = input.tasks.len(),
        has_callback_token = has_token,
        "workflow execution workflow started"
    );

    record_workflow_started(ctx.as_ref(), &input.execution_id).await;

    let mut state: Map<String, Value> = Map::new();
    if !input.trigger_message.is_empty() {
        state.insert("trigger".to_string(), json!(input.trigger_message));
    }

    for task in &input.tasks {
        // Restore any offloaded values so task runtime expressions
        // (`.S1.whatever`) resolve against real data.
        claim_check.resolve_state(&mut state).await;

        let result = ctx
            .execute_activity(
                workflow_task_options(&queue),
                ACTIVITY_EXECUTE_WORKFLOW_TASK,
                json!({
                    "execution_id": input.execution_id,
                    "task": task,
                    "state": Value::Object(state.clone()),
                }),
            )
            .await;

        match result {
            Ok(output) => {
                state.insert(task.name.clone(), output);
                // Large step outputs leave the state bag right away.
                claim_check.offload_state(&mut state).await;
            }
            Err(err) => {
                let diagnostic = classify_activity_error(ACTIVITY_EXECUTE_WORKFLOW_TASK, &err);
                let diagnostic = format!("task {:?}: {}", task.name, diagnostic);
                mark_failed(ctx.as_ref(), &input.execution_id, &diagnostic).await;
                if has_token {
                    if let Err(err) = complete_external(
                        ctx.as_ref(),
                        &input.callback_token,
                        Err(diagnostic.clone()),
                    )
                    .await
                    {
                        tracing::warn!(error = %err, "failed to complete external activity");
                    }
                }
                return Err(WorkflowError::application(diagnostic));
            }
        }
    }

    let final_state = json!({"state": Value::Object(state)});
    if has_token {
        complete_external(ctx.as_ref(), &input.callback_token, Ok(final_state.clone()))
            .await
            .map_err(|e| {
                WorkflowError::application(format!("failed to complete external activity: {}", e))
            })?;
    }
    Ok(final_state)
}

// ============================================================================
// Workflow validation workflow
// ============================================================================

pub fn validate_workflow_workflow() -> WorkflowFn {
    Arc::new(|ctx, input| validate_workflow(ctx, input).boxed())
}

async fn validate_workflow(
    ctx: Arc<dyn WorkflowContext>,
    input: Payload,
) -> Result<Payload, WorkflowError> {
    let queue = runner_queue(ctx.as_ref())?;
    let verdict = ctx
        .execute_activity(validation_options(&queue), ACTIVITY_VALIDATE_WORKFLOW, input)
        .await?;
    Ok(verdict)
}
