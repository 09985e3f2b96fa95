// Claim check across workflow steps: a large task output leaves the state
// bag as a reference and is restored before the next task dispatch.

mod support;

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::json;

use stigmer_claimcheck::{is_claim_check_ref, ClaimCheckManager, Compressor, ObjectStore};
use stigmer_protocol::proto::workflow_command_controller_client::WorkflowCommandControllerClient;
use stigmer_protocol::proto::workflow_execution_command_controller_client::WorkflowExecutionCommandControllerClient;
use stigmer_protocol::proto::{
    OwnerScope, Workflow, WorkflowDocument, WorkflowExecution, WorkflowExecutionSpec,
    WorkflowSpec, WorkflowTask,
};
use stigmer_temporal::{EngineClient, WorkerRegistration};

use support::{metadata, TestDaemon, WORKFLOW_RUNNER_QUEUE};

const THRESHOLD: usize = 10 * 1024;

fn two_step_workflow() -> Workflow {
    Workflow {
        metadata: Some(metadata("Two Steps", OwnerScope::Organization, "acme")),
        spec: Some(WorkflowSpec {
            document: Some(WorkflowDocument {
                dsl: "1.0.0".to_string(),
                namespace: "default".to_string(),
                name: "two-steps".to_string(),
                version: "0.1.0".to_string(),
            }),
            tasks: vec![
                WorkflowTask {
                    name: "s1".to_string(),
                    kind: "SET".to_string(),
                    config_json: r#"{"set":{"payload":"large"}}"#.to_string(),
                },
                WorkflowTask {
                    name: "s2".to_string(),
                    kind: "SET".to_string(),
                    config_json: r#"{"set":{"uses":"${.s1}"}}"#.to_string(),
                },
            ],
        }),
        status: None,
    }
}

#[tokio::test]
async fn test_large_step_output_round_trips_through_claim_check() {
    let claim_check = Arc::new(ClaimCheckManager::new(
        true,
        THRESHOLD,
        Compressor::Gzip,
        30,
        ObjectStore::in_memory(),
    ));
    let daemon = TestDaemon::start_with(claim_check.clone(), true).await;

    let large_payload = "x".repeat(500 * 1024);
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<serde_json::Value>();
    let done_tx = Arc::new(parking_lot::Mutex::new(Some(done_tx)));

    let expected = large_payload.clone();
    daemon
        .engine
        .start_worker(
            WorkerRegistration::new(WORKFLOW_RUNNER_QUEUE).register_activity(
                "ExecuteWorkflowTask",
                Arc::new(move |_ctx, input| {
                    let done_tx = done_tx.clone();
                    let large_payload = large_payload.clone();
                    async move {
                        let task_name = input["task"]["name"].as_str().unwrap_or_default();
                        match task_name {
                            "s1" => Ok(json!({"data": large_payload})),
                            "s2" => {
                                // The previous step's output must arrive
                                // resolved, not as a reference.
                                let s1 = input["state"]["s1"].clone();
                                if let Some(tx) = done_tx.lock().take() {
                                    let _ = tx.send(s1);
                                }
                                Ok(json!({"ok": true}))
                            }
                            other => panic!("unexpected task {other}"),
                        }
                    }
                    .boxed()
                }),
            ),
        )
        .unwrap();

    let mut workflows = WorkflowCommandControllerClient::new(daemon.channel.clone());
    let mut executions = WorkflowExecutionCommandControllerClient::new(daemon.channel.clone());

    let workflow = workflows
        .create(two_step_workflow())
        .await
        .unwrap()
        .into_inner();
    executions
        .create(WorkflowExecution {
            metadata: Some(metadata("Run-1", OwnerScope::Organization, "acme")),
            spec: Some(WorkflowExecutionSpec {
                workflow_id: workflow.metadata.as_ref().unwrap().id.clone(),
                trigger_message: "go".to_string(),
                ..Default::default()
            }),
            status: None,
        })
        .await
        .unwrap();

    let seen_by_s2 = tokio::time::timeout(Duration::from_secs(10), done_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(!is_claim_check_ref(&seen_by_s2));
    assert_eq!(seen_by_s2["data"].as_str().unwrap(), expected);

    // s1's output was offloaded once and retrieved before s2 ran.
    let metrics = claim_check.metrics();
    assert!(metrics.offloads >= 1);
    assert!(metrics.retrievals >= 1);
    assert_eq!(metrics.failures, 0);
    assert!(metrics.bytes_offloaded >= 500 * 1024);
}

#[tokio::test]
async fn test_disabled_claim_check_keeps_state_inline() {
    let daemon = TestDaemon::start().await;

    let large_payload = "y".repeat(200 * 1024);
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<serde_json::Value>();
    let done_tx = Arc::new(parking_lot::Mutex::new(Some(done_tx)));

    daemon
        .engine
        .start_worker(
            WorkerRegistration::new(WORKFLOW_RUNNER_QUEUE).register_activity(
                "ExecuteWorkflowTask",
                Arc::new(move |_ctx, input| {
                    let done_tx = done_tx.clone();
                    let large_payload = large_payload.clone();
                    async move {
                        let task_name = input["task"]["name"].as_str().unwrap_or_default();
                        if task_name == "s2" {
                            if let Some(tx) = done_tx.lock().take() {
                                let _ = tx.send(input["state"]["s1"].clone());
                            }
                        }
                        Ok(json!({"data": large_payload}))
                    }
                    .boxed()
                }),
            ),
        )
        .unwrap();

    let mut workflows = WorkflowCommandControllerClient::new(daemon.channel.clone());
    let mut executions = WorkflowExecutionCommandControllerClient::new(daemon.channel.clone());
    let workflow = workflows
        .create(two_step_workflow())
        .await
        .unwrap()
        .into_inner();
    executions
        .create(WorkflowExecution {
            metadata: Some(metadata("Run-1", OwnerScope::Organization, "acme")),
            spec: Some(WorkflowExecutionSpec {
                workflow_id: workflow.metadata.as_ref().unwrap().id.clone(),
                ..Default::default()
            }),
            status: None,
        })
        .await
        .unwrap();

    let seen_by_s2 = tokio::time::timeout(Duration::from_secs(10), done_rx)
        .await
        .unwrap()
        .unwrap();
    // With claim check disabled the raw value flows between steps.
    assert!(!is_claim_check_ref(&seen_by_s2));
    assert!(seen_by_s2["data"].as_str().unwrap().len() >= 200 * 1024);
}
