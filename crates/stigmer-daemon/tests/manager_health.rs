// Connection manager behavior: health transitions, worker registration
// and shutdown semantics against the embedded engine.

mod support;

use std::time::Duration;

use serde_json::json;

use stigmer_temporal::{EngineClient, WorkflowOptions};

use support::{wait_for, TestDaemon};

#[tokio::test]
async fn test_connect_registers_daemon_workers() {
    let daemon = TestDaemon::start().await;

    // The daemon's orchestration workflows are registered on the three
    // stigmer queues; starting one directly proves the worker is live.
    let result = daemon
        .engine
        .execute_workflow(
            WorkflowOptions::new(
                "stigmer/agent-execution/invoke/probe",
                "agent_execution_stigmer",
            ),
            "stigmer/agent-execution/invoke",
            json!({"execution_id": "probe", "agent_id": "a", "session_id": "s"}),
        )
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_health_monitor_tracks_engine_state() {
    let daemon = TestDaemon::start().await;
    assert!(daemon.manager.is_connected());

    daemon.engine.set_healthy(false);
    wait_for(Duration::from_secs(5), || async {
        (!daemon.manager.is_connected()).then_some(())
    })
    .await;

    daemon.engine.set_healthy(true);
    wait_for(Duration::from_secs(5), || async {
        daemon.manager.is_connected().then_some(())
    })
    .await;
}

#[tokio::test]
async fn test_shutdown_keeps_handle_but_closes_client() {
    let daemon = TestDaemon::start().await;
    daemon.manager.shutdown().await;

    // The handle keeps its last client; the client itself is closed.
    let client = daemon.manager.get_client().expect("handle stays populated");
    assert!(client.check_health().await.is_err());
    assert!(!daemon.manager.is_connected());
}

#[tokio::test]
async fn test_initial_connect_failure_is_not_fatal() {
    let daemon = TestDaemon::start_disconnected().await;
    assert!(!daemon.manager.is_connected());
    assert!(daemon.manager.get_client().is_none());

    // Recovery through the same manager wires everything up.
    daemon.connect().await;
    assert!(daemon.manager.get_client().is_some());
}
