//! Integration tests for the execution session flow.
//!
//! Drive the full stack (session facade -> connection manager -> transport)
//! over the mock backend and mock transport: live streaming, disconnection
//! and reconnect, snapshot rehydration, and the replay round trip.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use flowlens::api::mock::MockBackend;
use flowlens::model::{Execution, ExecutionStatus, NodeSnapshot, Snapshot, Step, StepType};
use flowlens::session::{ExecutionSession, SessionPhase};
use flowlens::stream::mock::MockTransport;
use flowlens::stream::{ConnectionNotice, ConnectionState};
use flowlens::Config;

fn step(id: &str, output: Option<&str>, tokens: Option<i64>) -> Step {
    Step {
        step_id: id.to_string(),
        step_type: StepType::Think,
        input: None,
        output: output.map(String::from),
        prompt: None,
        tokens,
        latency_ms: None,
        timestamp: None,
        tool: None,
        arguments: None,
        result: None,
    }
}

fn execution(id: &str, status: ExecutionStatus, snapshot: Option<Snapshot>) -> Execution {
    Execution {
        id: id.to_string(),
        workflow_id: "w1".to_string(),
        status,
        snapshot,
        started_at: None,
        finished_at: None,
        created_at: None,
    }
}

fn single_node_snapshot(execution_id: &str, steps: Vec<Step>) -> Snapshot {
    Snapshot {
        workflow_id: "w1".to_string(),
        execution_id: execution_id.to_string(),
        nodes: vec![NodeSnapshot {
            node_id: "n1".to_string(),
            agent_name: "researcher".to_string(),
            steps,
            final_output: String::new(),
        }],
        edges: vec![],
        execution_meta: None,
    }
}

fn new_session(backend: Arc<MockBackend>, transport: Arc<MockTransport>) -> ExecutionSession {
    ExecutionSession::with_parts(Config::with_base_url("http://mock:8080"), backend, transport)
}

/// Live run end to end: execute, stream steps from two nodes, survive a
/// mid-run disconnect, then settle on execution_complete.
#[tokio::test(start_paused = true)]
async fn live_run_with_reconnect() {
    let backend = Arc::new(MockBackend::new());
    backend.push_execute_ok("e1");
    let transport = Arc::new(MockTransport::new());
    let first = transport.push_session();
    let second = transport.push_session();
    let mut session = new_session(Arc::clone(&backend), Arc::clone(&transport));

    let id = session.execute("w1", None).await.unwrap();
    assert_eq!(id, "e1");
    assert_eq!(session.phase(), SessionPhase::Live);
    assert_eq!(
        session.poll_notice().await,
        Some(ConnectionNotice::Connectivity(true))
    );

    first.push_json(json!({
        "type": "step_update",
        "execution_id": "e1",
        "data": {"node_id": "n1", "step": {"step_id": "s1", "type": "think", "tokens": 10, "latency_ms": 30}}
    }));
    first.push_json(json!({
        "type": "step_update",
        "execution_id": "e1",
        "data": {"node_id": "n2", "step": {"step_id": "s2", "type": "tool_call", "tokens": 4}}
    }));
    session.poll_notice().await;
    session.poll_notice().await;

    // Server drops the connection; the session reconnects and keeps going.
    first.close();
    assert_eq!(
        session.poll_notice().await,
        Some(ConnectionNotice::Connectivity(false))
    );
    assert_eq!(
        session.poll_notice().await,
        Some(ConnectionNotice::Connectivity(true))
    );

    second.push_json(json!({
        "type": "step_complete",
        "execution_id": "e1",
        "data": {"node_id": "n1", "step": {"step_id": "s3", "type": "result", "tokens": 2, "latency_ms": 5}}
    }));
    assert_eq!(
        session.poll_notice().await,
        Some(ConnectionNotice::StepAppended {
            node_id: "n1".into(),
            step_id: "s3".into()
        })
    );

    // Nothing lost, nothing duplicated across the reconnect.
    let agg = session.aggregate("n1");
    assert_eq!(agg.total_tokens, 12);
    assert_eq!(agg.total_latency_ms, 35);
    assert_eq!(session.steps("n2").len(), 1);

    backend.put_execution(execution(
        "e1",
        ExecutionStatus::Success,
        Some(single_node_snapshot("e1", vec![step("s1", Some("A"), Some(10))])),
    ));
    second.push_json(json!({"type": "node_complete", "data": {"node_id": "n1"}}));
    second.push_json(json!({"type": "execution_complete"}));
    session.poll_notice().await;
    assert_eq!(
        session.poll_notice().await,
        Some(ConnectionNotice::ExecutionCompleted)
    );

    assert_eq!(session.phase(), SessionPhase::Settled);
    assert_eq!(session.status(), Some(ExecutionStatus::Success));
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
}

/// Exhausted reconnects leave the session inspectable with its streamed data.
#[tokio::test(start_paused = true)]
async fn exhausted_reconnects_keep_state_inspectable() {
    let backend = Arc::new(MockBackend::new());
    backend.put_execution(execution("e1", ExecutionStatus::Running, None));
    let transport = Arc::new(MockTransport::new());
    let only = transport.push_session();
    let mut session = new_session(backend, Arc::clone(&transport));

    session.open("e1").await.unwrap();
    session.poll_notice().await; // connected

    only.push_json(json!({
        "type": "step_update",
        "data": {"node_id": "n1", "step": {"step_id": "s1", "type": "think", "tokens": 7}}
    }));
    session.poll_notice().await;
    only.close();

    // No more scripted sessions: five retries fail, then the stream gives up.
    loop {
        match session.poll_notice().await {
            Some(ConnectionNotice::Exhausted) => break,
            Some(_) => continue,
            None => panic!("notice channel closed before exhaustion"),
        }
    }

    assert_eq!(session.connection_state(), ConnectionState::Exhausted);
    assert_eq!(transport.connect_count(), 6);
    assert_eq!(session.phase(), SessionPhase::Live);
    assert_eq!(session.aggregate("n1").total_tokens, 7);
    assert!(session.last_error().unwrap().contains("exhausted"));
}

/// Replay round trip: rehydrate a settled execution, edit a step, submit,
/// and stream the fresh replacement execution.
#[tokio::test(start_paused = true)]
async fn replay_round_trip() {
    let backend = Arc::new(MockBackend::new());
    backend.put_execution(execution(
        "e1",
        ExecutionStatus::Success,
        Some(single_node_snapshot(
            "e1",
            vec![step("s1", Some("A"), Some(3)), step("s2", Some("mid"), None)],
        )),
    ));
    backend.push_replay_ok("e1", "e2");
    let transport = Arc::new(MockTransport::new());
    let replay_stream = transport.push_session();
    let mut session = new_session(Arc::clone(&backend), Arc::clone(&transport));

    session.open("e1").await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Settled);

    session.enter_replay().unwrap();
    session.edit_step("s1", "B");

    // Historical display for e1 shows the pending edit.
    let view = session.view();
    assert_eq!(view.nodes[0].steps[0].output.as_deref(), Some("B"));
    assert_eq!(view.nodes[0].steps[1].output.as_deref(), Some("mid"));
    assert_eq!(view.pending_edits, 1);

    let new_id = session.submit_replay().await.unwrap();
    assert_eq!(new_id, "e2");
    assert_eq!(session.phase(), SessionPhase::Replaying);
    assert_eq!(session.status(), Some(ExecutionStatus::Replaying));

    // E2 starts fresh: empty logs, empty overlay.
    assert!(session.view().nodes.is_empty());
    assert_eq!(session.view().pending_edits, 0);

    // The submission carried exactly the edited step.
    let calls = backend.replay_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "e1");
    assert_eq!(calls[0].1.len(), 1);
    assert_eq!(calls[0].1[0].step_id, "s1");
    assert_eq!(calls[0].1[0].new_output, "B");

    // The new execution streams into the session.
    assert_eq!(
        session.poll_notice().await,
        Some(ConnectionNotice::Connectivity(true))
    );
    assert_eq!(session.phase(), SessionPhase::Live);
    replay_stream.push_json(json!({
        "type": "step_update",
        "execution_id": "e2",
        "data": {"node_id": "n1", "step": {"step_id": "r1", "type": "think"}}
    }));
    session.poll_notice().await;
    assert_eq!(session.steps("n1").len(), 1);
    assert_eq!(session.steps("n1")[0].step_id, "r1");

    let urls = transport.connect_urls();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].ends_with("/ws/executions/e2"));
}

/// A live edit while connected also pings the stream channel, best-effort.
#[tokio::test(start_paused = true)]
async fn live_edit_notifies_stream() {
    let backend = Arc::new(MockBackend::new());
    backend.put_execution(execution("e1", ExecutionStatus::Replaying, None));
    let transport = Arc::new(MockTransport::new());
    let handle = transport.push_session();
    let mut session = new_session(backend, transport);

    session.open("e1").await.unwrap();
    session.poll_notice().await; // connected
    session.enter_replay().unwrap();
    session.edit_step("s1", "B");

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        handle.sent(),
        vec![r#"{"type":"modify_step","data":{"step_id":"s1","new_output":"B"}}"#]
    );
    assert_eq!(session.view().pending_edits, 1);
}

/// Disconnected edits are recorded locally and survive for submission.
#[tokio::test]
async fn offline_edit_recorded_locally() {
    let backend = Arc::new(MockBackend::new());
    backend.put_execution(execution(
        "e1",
        ExecutionStatus::Failed,
        Some(single_node_snapshot("e1", vec![step("s1", Some("A"), None)])),
    ));
    let transport = Arc::new(MockTransport::new());
    let mut session = new_session(backend, transport);

    session.open("e1").await.unwrap();
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    session.enter_replay().unwrap();
    session.edit_step("s1", "B");
    assert_eq!(session.view().pending_edits, 1);
    assert_eq!(session.view().nodes[0].steps[0].output.as_deref(), Some("B"));
}
