// Execution subsystem end to end: anchoring and default-instance
// resolution, subscribe streaming, engine outage degradation and
// recovery, and the async completion token handshake.

mod support;

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;

use stigmer_protocol::proto::agent_command_controller_client::AgentCommandControllerClient;
use stigmer_protocol::proto::agent_execution_command_controller_client::AgentExecutionCommandControllerClient;
use stigmer_protocol::proto::agent_execution_query_controller_client::AgentExecutionQueryControllerClient;
use stigmer_protocol::proto::agent_query_controller_client::AgentQueryControllerClient;
use stigmer_protocol::proto::session_query_controller_client::SessionQueryControllerClient;
use stigmer_protocol::proto::workflow_command_controller_client::WorkflowCommandControllerClient;
use stigmer_protocol::proto::workflow_execution_command_controller_client::WorkflowExecutionCommandControllerClient;
use stigmer_protocol::proto::{
    AgentExecution, AgentExecutionSpec, AgentExecutionStatus, ExecutionMessage, ExecutionPhase,
    GetByIdRequest, MessageKind, OwnerScope, SubscribeRequest, UpdateAgentExecutionStatusRequest,
    WorkflowExecution, WorkflowExecutionSpec,
};
use stigmer_temporal::{
    ActivityError, ActivityOptions, EngineClient, WorkerRegistration, WorkflowOptions,
};

use support::{
    metadata, org_agent, wait_for, workflow_with_tasks, TestDaemon, AGENT_RUNNER_QUEUE,
};

fn agent_execution(name: &str, agent_id: &str) -> AgentExecution {
    AgentExecution {
        metadata: Some(metadata(name, OwnerScope::Organization, "acme")),
        spec: Some(AgentExecutionSpec {
            agent_id: agent_id.to_string(),
            message: "hello".to_string(),
            ..Default::default()
        }),
        status: None,
    }
}

#[tokio::test]
async fn test_template_only_workflow_execution_resolves_default_instance() {
    let daemon = TestDaemon::start_disconnected().await;
    let mut workflows = WorkflowCommandControllerClient::new(daemon.channel.clone());
    let mut executions = WorkflowExecutionCommandControllerClient::new(daemon.channel.clone());

    let workflow = workflows
        .create(workflow_with_tasks("Pipeline", OwnerScope::Organization, "acme"))
        .await
        .unwrap()
        .into_inner();
    let workflow_id = workflow.metadata.as_ref().unwrap().id.clone();
    let default_instance_id = workflow.status.as_ref().unwrap().default_instance_id.clone();

    let execution = executions
        .create(WorkflowExecution {
            metadata: Some(metadata("Run-1", OwnerScope::Organization, "acme")),
            spec: Some(WorkflowExecutionSpec {
                workflow_id,
                trigger_message: "go".to_string(),
                ..Default::default()
            }),
            status: None,
        })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(
        execution.status.as_ref().unwrap().phase(),
        ExecutionPhase::ExecutionPending
    );
    assert_eq!(
        execution.spec.as_ref().unwrap().workflow_instance_id,
        default_instance_id
    );
}

#[tokio::test]
async fn test_template_only_agent_execution_resolves_default_session() {
    let daemon = TestDaemon::start_disconnected().await;
    let mut agents = AgentCommandControllerClient::new(daemon.channel.clone());
    let mut agent_queries = AgentQueryControllerClient::new(daemon.channel.clone());
    let mut sessions = SessionQueryControllerClient::new(daemon.channel.clone());
    let mut executions = AgentExecutionCommandControllerClient::new(daemon.channel.clone());

    let agent = agents
        .create(org_agent("Helper", "acme"))
        .await
        .unwrap()
        .into_inner();
    let agent_id = agent.metadata.as_ref().unwrap().id.clone();

    let execution = executions
        .create(agent_execution("Run-1", &agent_id))
        .await
        .unwrap()
        .into_inner();

    let session_id = execution.spec.as_ref().unwrap().session_id.clone();
    assert!(!session_id.is_empty());

    let session = sessions
        .get(GetByIdRequest {
            id: session_id.clone(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(session.metadata.as_ref().unwrap().slug, "helper-default");
    // The default session parents to the agent's default instance.
    assert_eq!(
        session.spec.as_ref().unwrap().agent_instance_id,
        agent.status.as_ref().unwrap().default_instance_id
    );

    // The agent's status was repaired with the session id.
    let reloaded = agent_queries
        .get(GetByIdRequest {
            id: agent_id.clone(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(
        reloaded.status.as_ref().unwrap().default_session_id,
        session_id
    );

    // A second template-only execution reuses the same session.
    let second = executions
        .create(agent_execution("Run-2", &agent_id))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(second.spec.as_ref().unwrap().session_id, session_id);
}

#[tokio::test]
async fn test_execution_requires_an_anchor() {
    let daemon = TestDaemon::start_disconnected().await;
    let mut executions = AgentExecutionCommandControllerClient::new(daemon.channel.clone());

    let err = executions
        .create(AgentExecution {
            metadata: Some(metadata("Run", OwnerScope::IdentityAccount, "")),
            spec: Some(AgentExecutionSpec {
                message: "hi".to_string(),
                ..Default::default()
            }),
            status: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn test_execution_with_missing_template() {
    let daemon = TestDaemon::start_disconnected().await;
    let mut executions = AgentExecutionCommandControllerClient::new(daemon.channel.clone());

    let err = executions
        .create(agent_execution("Run", "no-such-agent"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);
}

#[tokio::test]
async fn test_subscribe_streams_to_terminal() {
    let daemon = TestDaemon::start_disconnected().await;
    let mut agents = AgentCommandControllerClient::new(daemon.channel.clone());
    let mut commands = AgentExecutionCommandControllerClient::new(daemon.channel.clone());
    let mut queries = AgentExecutionQueryControllerClient::new(daemon.channel.clone());

    let agent = agents
        .create(org_agent("Streamer", "acme"))
        .await
        .unwrap()
        .into_inner();
    let execution = commands
        .create(agent_execution(
            "Run-1",
            &agent.metadata.as_ref().unwrap().id,
        ))
        .await
        .unwrap()
        .into_inner();
    let execution_id = execution.metadata.as_ref().unwrap().id.clone();

    let mut stream = queries
        .subscribe(SubscribeRequest {
            execution_id: execution_id.clone(),
        })
        .await
        .unwrap()
        .into_inner();

    // First frame: the current persisted state.
    let initial = tokio::time::timeout(Duration::from_secs(5), stream.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        initial.status.as_ref().unwrap().phase(),
        ExecutionPhase::ExecutionPending
    );

    let message = |id: &str, content: &str| ExecutionMessage {
        id: id.to_string(),
        kind: MessageKind::Agent as i32,
        content: content.to_string(),
        created_at: None,
    };
    let updates = [
        AgentExecutionStatus {
            phase: ExecutionPhase::ExecutionInProgress as i32,
            ..Default::default()
        },
        AgentExecutionStatus {
            phase: ExecutionPhase::ExecutionInProgress as i32,
            messages: vec![message("m1", "thinking")],
            ..Default::default()
        },
        AgentExecutionStatus {
            phase: ExecutionPhase::ExecutionCompleted as i32,
            messages: vec![message("m1", "thinking"), message("m2", "done")],
            ..Default::default()
        },
    ];
    for update in updates {
        commands
            .update_status(UpdateAgentExecutionStatusRequest {
                execution_id: execution_id.clone(),
                status: Some(update),
            })
            .await
            .unwrap();
    }

    let mut frames = Vec::new();
    while let Some(frame) = tokio::time::timeout(Duration::from_secs(5), stream.message())
        .await
        .unwrap()
        .unwrap()
    {
        frames.push(frame);
    }
    // Three update frames, in publish order, then a clean close after the
    // terminal one.
    assert_eq!(frames.len(), 3);
    assert_eq!(
        frames[0].status.as_ref().unwrap().phase(),
        ExecutionPhase::ExecutionInProgress
    );
    assert_eq!(frames[1].status.as_ref().unwrap().messages.len(), 1);
    let last = frames[2].status.as_ref().unwrap();
    assert_eq!(last.phase(), ExecutionPhase::ExecutionCompleted);
    assert_eq!(last.messages.len(), 2);
}

#[tokio::test]
async fn test_subscribe_to_unknown_execution() {
    let daemon = TestDaemon::start_disconnected().await;
    let mut queries = AgentExecutionQueryControllerClient::new(daemon.channel.clone());
    let err = queries
        .subscribe(SubscribeRequest {
            execution_id: "missing".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::NotFound);
}

#[tokio::test]
async fn test_engine_outage_leaves_execution_pending_then_recovers() {
    let daemon = TestDaemon::start_disconnected().await;
    let mut agents = AgentCommandControllerClient::new(daemon.channel.clone());
    let mut commands = AgentExecutionCommandControllerClient::new(daemon.channel.clone());
    let mut queries = AgentExecutionQueryControllerClient::new(daemon.channel.clone());

    let agent = agents
        .create(org_agent("Resilient", "acme"))
        .await
        .unwrap()
        .into_inner();
    let agent_id = agent.metadata.as_ref().unwrap().id.clone();

    // Engine down: create still succeeds and the execution stays PENDING.
    let stranded = commands
        .create(agent_execution("Run-1", &agent_id))
        .await
        .unwrap()
        .into_inner();
    let stranded_id = stranded.metadata.as_ref().unwrap().id.clone();
    assert_eq!(
        stranded.status.as_ref().unwrap().phase(),
        ExecutionPhase::ExecutionPending
    );
    assert!(stranded
        .status
        .as_ref()
        .unwrap()
        .temporal_workflow_id
        .is_empty());

    // Engine comes back; the manager re-injects creators.
    daemon.connect().await;
    daemon
        .engine
        .start_worker(
            WorkerRegistration::new(AGENT_RUNNER_QUEUE)
                .register_activity(
                    "EnsureThread",
                    Arc::new(|_ctx, _input| {
                        async move { Ok(json!({"thread_id": "thread-1"})) }.boxed()
                    }),
                )
                .register_activity(
                    "ExecuteGraphton",
                    Arc::new(|_ctx, _input| async move { Ok(json!({"phase": "COMPLETED"})) }.boxed()),
                ),
        )
        .unwrap();

    let second = commands
        .create(agent_execution("Run-2", &agent_id))
        .await
        .unwrap()
        .into_inner();
    let second_id = second.metadata.as_ref().unwrap().id.clone();

    // The orchestration workflow records its engine workflow id through
    // the local update-status activity.
    let probe = queries.clone();
    let recorded = wait_for(Duration::from_secs(5), move || {
        let mut probe = probe.clone();
        let second_id = second_id.clone();
        async move {
            let execution = probe
                .get(GetByIdRequest { id: second_id })
                .await
                .ok()?
                .into_inner();
            let workflow_id = execution.status.as_ref()?.temporal_workflow_id.clone();
            (!workflow_id.is_empty()).then_some(workflow_id)
        }
    })
    .await;
    assert!(recorded.starts_with("stigmer/agent-execution/invoke/"));

    // No catch-up for executions created during the outage.
    let still_pending = queries
        .get(GetByIdRequest { id: stranded_id })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(
        still_pending.status.as_ref().unwrap().phase(),
        ExecutionPhase::ExecutionPending
    );
    assert!(still_pending
        .status
        .as_ref()
        .unwrap()
        .temporal_workflow_id
        .is_empty());
}

#[tokio::test]
async fn test_agent_execution_completes_external_activity_by_token() {
    let daemon = TestDaemon::start().await;
    let mut agents = AgentCommandControllerClient::new(daemon.channel.clone());
    let mut commands = AgentExecutionCommandControllerClient::new(daemon.channel.clone());

    // Fake runner: EnsureThread + ExecuteGraphton, the latter reporting
    // completion over the UpdateStatus RPC exactly like the real runner.
    let rpc_channel = daemon.channel.clone();
    daemon
        .engine
        .start_worker(
            WorkerRegistration::new(AGENT_RUNNER_QUEUE)
                .register_activity(
                    "EnsureThread",
                    Arc::new(|_ctx, input| {
                        async move {
                            let session_id = input["session_id"].as_str().unwrap_or_default();
                            Ok(json!({"thread_id": format!("thread-{}", session_id)}))
                        }
                        .boxed()
                    }),
                )
                .register_activity(
                    "ExecuteGraphton",
                    Arc::new(move |_ctx, input| {
                        let channel = rpc_channel.clone();
                        async move {
                            let execution_id =
                                input["execution_id"].as_str().unwrap_or_default().to_string();
                            let mut client =
                                AgentExecutionCommandControllerClient::new(channel);
                            let status = AgentExecutionStatus {
                                phase: ExecutionPhase::ExecutionCompleted as i32,
                                output: "all done".to_string(),
                                ..Default::default()
                            };
                            client
                                .update_status(UpdateAgentExecutionStatusRequest {
                                    execution_id,
                                    status: Some(status),
                                })
                                .await
                                .map_err(|e| ActivityError::retryable(e.to_string()))?;
                            Ok(json!({"phase": "COMPLETED", "output": "all done"}))
                        }
                        .boxed()
                    }),
                ),
        )
        .unwrap();

    // External workflow holding an activity open for our execution.
    let (token_tx, token_rx) = tokio::sync::oneshot::channel::<Vec<u8>>();
    let token_tx = Arc::new(parking_lot::Mutex::new(Some(token_tx)));
    daemon
        .engine
        .start_worker(
            WorkerRegistration::new("external_queue")
                .register_workflow(
                    "external/await-agent",
                    Arc::new(|ctx, _input| {
                        async move {
                            let result = ctx
                                .execute_activity(
                                    ActivityOptions::new(Duration::from_secs(30)),
                                    "await-agent",
                                    json!({}),
                                )
                                .await?;
                            Ok(result)
                        }
                        .boxed()
                    }),
                )
                .register_activity(
                    "await-agent",
                    Arc::new(move |ctx, _input| {
                        let token_tx = token_tx.clone();
                        async move {
                            if let Some(tx) = token_tx.lock().take() {
                                let _ = tx.send(ctx.task_token().to_vec());
                            }
                            Err(ActivityError::result_pending())
                        }
                        .boxed()
                    }),
                ),
        )
        .unwrap();

    let external = daemon
        .engine
        .execute_workflow(
            WorkflowOptions::new("external/await-agent/1", "external_queue"),
            "external/await-agent",
            json!({}),
        )
        .await
        .unwrap();
    let token = tokio::time::timeout(Duration::from_secs(5), token_rx)
        .await
        .unwrap()
        .unwrap();

    let agent = agents
        .create(org_agent("Callback Agent", "acme"))
        .await
        .unwrap()
        .into_inner();
    let mut execution = agent_execution("Run-1", &agent.metadata.as_ref().unwrap().id);
    execution.spec.as_mut().unwrap().callback_token = token;
    let created = commands.create(execution).await.unwrap().into_inner();

    // The orchestration workflow finishes and wakes the external workflow
    // with the runner's final status.
    let external_result = tokio::time::timeout(Duration::from_secs(10), external.result())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(external_result["phase"], "COMPLETED");
    assert_eq!(external_result["output"], "all done");

    // The runner's RPC report landed in the store.
    let mut queries = AgentExecutionQueryControllerClient::new(daemon.channel.clone());
    let finished = queries
        .get(GetByIdRequest {
            id: created.metadata.as_ref().unwrap().id.clone(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(
        finished.status.as_ref().unwrap().phase(),
        ExecutionPhase::ExecutionCompleted
    );
    assert_eq!(finished.status.as_ref().unwrap().output, "all done");
}

#[tokio::test]
async fn test_invalid_workflow_spec_rejected_by_validator() {
    let daemon = TestDaemon::start().await;
    let mut workflows = WorkflowCommandControllerClient::new(daemon.channel.clone());

    // Replace the accepting validation runner with a rejecting one.
    daemon
        .engine
        .start_worker(
            WorkerRegistration::new(support::VALIDATION_RUNNER_QUEUE).register_activity(
                "validateWorkflow",
                Arc::new(|_ctx, _input| {
                    async move {
                        Ok(json!({
                            "state": "INVALID",
                            "errors": ["task t1: unknown kind BOGUS"],
                            "warnings": [],
                        }))
                    }
                    .boxed()
                }),
            ),
        )
        .unwrap();

    let err = workflows
        .create(workflow_with_tasks("Broken", OwnerScope::Platform, ""))
        .await
        .unwrap_err();
    assert_eq!(err.code(), tonic::Code::FailedPrecondition);
    assert!(err.message().contains("unknown kind BOGUS"));

    // An unreachable validator (engine down) skips validation instead of
    // failing closed.
    let offline = TestDaemon::start_disconnected().await;
    let mut offline_workflows = WorkflowCommandControllerClient::new(offline.channel.clone());
    offline_workflows
        .create(workflow_with_tasks("Broken", OwnerScope::Platform, ""))
        .await
        .unwrap();
}
