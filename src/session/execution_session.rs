//! The session facade: one bound execution, its step logs, stream binding,
//! and replay overlay, composed behind a single owner.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::{ApiClient, WorkflowBackend};
use crate::config::Config;
use crate::model::{Execution, ExecutionStatus, Step};
use crate::session::error::SessionError;
use crate::session::overlay::ReplayOverlay;
use crate::snapshot;
use crate::store::{NodeAggregate, StepStore};
use crate::stream::{
    ConnectionManager, ConnectionNotice, ConnectionState, StreamError, StreamTransport, WsTransport,
};

/// Lifecycle of the session facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No execution bound.
    Idle,
    /// Record fetch or execute request in flight (or failed; the error field
    /// says which).
    Loading,
    /// Stream bound to a running execution.
    Live,
    /// Terminal execution, connection unbound, history inspectable.
    Settled,
    /// Rebound to a fresh execution after replay submission.
    Replaying,
}

/// One step as presented to the operator, with any pending overlay edit
/// merged in at read time.
#[derive(Debug, Clone)]
pub struct StepView {
    pub step: Step,
    /// Effective output: the overlay's replacement if one is pending, else
    /// the step's own output.
    pub output: Option<String>,
    pub edited: bool,
}

#[derive(Debug, Clone)]
pub struct NodeView {
    pub node_id: String,
    pub steps: Vec<StepView>,
    pub aggregate: NodeAggregate,
}

/// Consistent point-in-time view over the session.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub execution_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub phase: SessionPhase,
    pub connection: ConnectionState,
    pub replay_mode: bool,
    pub pending_edits: usize,
    pub nodes: Vec<NodeView>,
    pub error: Option<String>,
}

/// Owns all client-side state for the execution it is bound to.
///
/// Constructed on open, torn down (or `reset`) on close; there is no ambient
/// singleton. All mutation goes through `&mut self`, so the stream task's
/// appends are the only concurrent writes and they stay behind the store
/// lock.
pub struct ExecutionSession {
    backend: Arc<dyn WorkflowBackend>,
    store: Arc<RwLock<StepStore>>,
    connection: ConnectionManager,
    notices: mpsc::Receiver<ConnectionNotice>,
    overlay: ReplayOverlay,
    replay_mode: bool,
    execution: Option<Execution>,
    phase: SessionPhase,
    last_error: Option<String>,
}

impl ExecutionSession {
    /// Production wiring: REST client + WebSocket transport.
    pub fn new(config: Config) -> Self {
        let backend = Arc::new(ApiClient::new(config.clone()));
        Self::with_parts(config, backend, Arc::new(WsTransport))
    }

    /// Explicit wiring for tests and embedding.
    pub fn with_parts(
        config: Config,
        backend: Arc<dyn WorkflowBackend>,
        transport: Arc<dyn StreamTransport>,
    ) -> Self {
        let store = Arc::new(RwLock::new(StepStore::new()));
        let (connection, notices) = ConnectionManager::new(config, transport, Arc::clone(&store));
        Self {
            backend,
            store,
            connection,
            notices,
            overlay: ReplayOverlay::new(),
            replay_mode: false,
            execution: None,
            phase: SessionPhase::Idle,
            last_error: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn status(&self) -> Option<ExecutionStatus> {
        self.execution.as_ref().map(|e| e.status)
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution.as_ref().map(|e| e.id.as_str())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn replay_mode(&self) -> bool {
        self.replay_mode
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Bind to an execution by id: fetch its record, rehydrate from the
    /// snapshot if it is terminal, or attach the live stream if it is not.
    pub async fn open(&mut self, execution_id: &str) -> Result<(), SessionError> {
        self.phase = SessionPhase::Loading;
        self.last_error = None;

        let execution = match self.backend.get_execution(execution_id).await {
            Ok(execution) => execution,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(err.into());
            }
        };
        self.bind_record(execution)
    }

    /// Start a new run of a workflow and bind to it.
    pub async fn execute(
        &mut self,
        workflow_id: &str,
        input_data: Option<&serde_json::Value>,
    ) -> Result<String, SessionError> {
        self.phase = SessionPhase::Loading;
        self.last_error = None;

        let response = match self.backend.execute_workflow(workflow_id, input_data).await {
            Ok(response) => response,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(err.into());
            }
        };

        let execution = Execution {
            id: response.execution_id.clone(),
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Running,
            snapshot: None,
            started_at: None,
            finished_at: None,
            created_at: None,
        };
        self.bind_record(execution)?;
        Ok(response.execution_id)
    }

    /// Install a fetched execution record as the bound one.
    fn bind_record(&mut self, execution: Execution) -> Result<(), SessionError> {
        // No modification may leak across executions.
        if self.execution_id() != Some(execution.id.as_str()) {
            self.overlay.clear();
            self.replay_mode = false;
        }

        let nodes = match snapshot::load(&execution) {
            Ok(nodes) => nodes,
            Err(err) => {
                // No partial population; the session stays inspectable in its
                // previous state with the load error recorded.
                self.last_error = Some(err.to_string());
                return Err(err.into());
            }
        };
        self.store.write().replace_all(nodes);
        let terminal = execution.status.is_terminal();
        let id = execution.id.clone();
        self.execution = Some(execution);

        if terminal {
            self.connection.unbind();
            self.phase = SessionPhase::Settled;
        } else {
            self.connection.bind(&id);
            self.phase = SessionPhase::Live;
        }
        Ok(())
    }

    /// Attach the live stream for the bound execution.
    pub fn connect(&mut self) -> Result<(), SessionError> {
        let Some(execution) = &self.execution else {
            return Err(SessionError::NoExecution);
        };
        if execution.status.is_terminal() {
            return Ok(());
        }
        let id = execution.id.clone();
        self.connection.bind(&id);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.connection.unbind();
    }

    /// Next stream notice, with session phase transitions applied.
    ///
    /// Returns the notice so a front-end can render incrementally; `None`
    /// when the notice channel has drained and closed.
    pub async fn poll_notice(&mut self) -> Option<ConnectionNotice> {
        let notice = self.notices.recv().await?;
        self.apply_notice(&notice).await;
        Some(notice)
    }

    async fn apply_notice(&mut self, notice: &ConnectionNotice) {
        match notice {
            ConnectionNotice::Connectivity(true) => {
                if self.phase == SessionPhase::Replaying {
                    self.phase = SessionPhase::Live;
                }
            }
            ConnectionNotice::Connectivity(false) | ConnectionNotice::StepAppended { .. } => {}
            ConnectionNotice::NodeFinished { node_id, failed } => {
                debug!(node_id = ?node_id, failed, "node finished");
            }
            ConnectionNotice::ExecutionCompleted => {
                self.connection.unbind();
                self.settle().await;
            }
            ConnectionNotice::Exhausted => {
                // Existing store content stays valid and inspectable.
                self.last_error = Some("reconnect attempts exhausted".to_string());
            }
        }
    }

    /// Poll the REST record for the bound execution and settle if terminal.
    pub async fn refresh_status(&mut self) -> Result<(), SessionError> {
        let Some(id) = self.execution_id().map(String::from) else {
            return Err(SessionError::NoExecution);
        };
        let fetched = self.backend.get_execution(&id).await?;
        // Compare at completion time: a stale response for a since-changed
        // binding is discarded.
        if self.execution_id() != Some(fetched.id.as_str()) {
            debug!(fetched = %fetched.id, "discarding stale execution record");
            return Ok(());
        }
        let terminal = fetched.status.is_terminal();
        if let Some(execution) = &mut self.execution {
            execution.status = fetched.status;
            execution.finished_at = fetched.finished_at;
        }
        if terminal {
            self.connection.unbind();
            self.phase = SessionPhase::Settled;
        }
        Ok(())
    }

    /// Learn the final status after the stream reported completion. Keeps the
    /// streamed step logs; only the status is taken from the record.
    async fn settle(&mut self) {
        if let Err(err) = self.refresh_status().await {
            warn!(error = %err, "failed to fetch final execution status");
            self.last_error = Some(err.to_string());
            self.phase = SessionPhase::Settled;
        }
    }

    /// Enter replay mode; only meaningful once the execution stopped running.
    pub fn enter_replay(&mut self) -> Result<(), SessionError> {
        let Some(execution) = &self.execution else {
            return Err(SessionError::NoExecution);
        };
        if execution.status == ExecutionStatus::Running {
            return Err(SessionError::ReplayUnavailable);
        }
        self.replay_mode = true;
        Ok(())
    }

    /// Leave replay mode. Pending edits are kept so re-entering resumes where
    /// the operator left off; they are cleared on rebind or submit.
    pub fn exit_replay(&mut self) {
        self.replay_mode = false;
    }

    /// Record a step-output edit in the overlay and, best-effort, notify the
    /// live channel. The overlay is the source of truth for submission; a
    /// dead channel only loses the live hint.
    pub fn edit_step(&mut self, step_id: &str, new_output: &str) {
        self.overlay.set(step_id, new_output);
        match self.connection.send_modification(step_id, new_output) {
            Ok(()) => {}
            Err(StreamError::NotConnected) => {
                debug!(step_id, "edit recorded locally; stream not connected");
            }
            Err(err) => {
                debug!(step_id, error = %err, "live edit notification failed");
            }
        }
    }

    /// Submit the overlay as a replay request. On success the session rebinds
    /// to the new execution (status `replaying`, fresh step logs) and the
    /// overlay is cleared. On failure both the overlay and the replay flag
    /// are left untouched so the operator can retry.
    pub async fn submit_replay(&mut self) -> Result<String, SessionError> {
        let Some(original) = self.execution_id().map(String::from) else {
            return Err(SessionError::NoExecution);
        };
        let modifications = self.overlay.modifications();

        let response = match self
            .backend
            .replay_execution(&original, &modifications)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(err.into());
            }
        };

        self.overlay.clear();
        self.replay_mode = false;
        self.last_error = None;

        let workflow_id = self
            .execution
            .as_ref()
            .map(|e| e.workflow_id.clone())
            .unwrap_or_default();
        self.execution = Some(Execution {
            id: response.new_execution_id.clone(),
            workflow_id,
            status: ExecutionStatus::Replaying,
            snapshot: None,
            started_at: None,
            finished_at: None,
            created_at: None,
        });
        self.store.write().clear();
        self.phase = SessionPhase::Replaying;
        self.connection.bind(&response.new_execution_id);
        Ok(response.new_execution_id)
    }

    /// Back to idle: unbind, drop all state for the old execution.
    pub fn reset(&mut self) {
        self.connection.unbind();
        self.store.write().clear();
        self.overlay.clear();
        self.replay_mode = false;
        self.execution = None;
        self.phase = SessionPhase::Idle;
        self.last_error = None;
    }

    pub fn aggregate(&self, node_id: &str) -> NodeAggregate {
        self.store.read().aggregate(node_id)
    }

    /// Ordered steps for one node (copy-on-read).
    pub fn steps(&self, node_id: &str) -> Vec<Step> {
        self.store.read().get(node_id).to_vec()
    }

    /// Consistent `(status, steps, overlay)` view, overlay merged at read
    /// time. Nodes are sorted by id for stable presentation.
    pub fn view(&self) -> SessionView {
        let store = self.store.read();
        let mut node_ids = store.node_ids();
        node_ids.sort();

        let nodes = node_ids
            .into_iter()
            .map(|node_id| {
                let steps = store
                    .get(&node_id)
                    .iter()
                    .map(|step| StepView {
                        output: self.overlay.merged_output(step).map(String::from),
                        edited: self.overlay.get(&step.step_id).is_some(),
                        step: step.clone(),
                    })
                    .collect();
                NodeView {
                    aggregate: store.aggregate(&node_id),
                    node_id,
                    steps,
                }
            })
            .collect();

        SessionView {
            execution_id: self.execution_id().map(String::from),
            status: self.status(),
            phase: self.phase,
            connection: self.connection.state(),
            replay_mode: self.replay_mode,
            pending_edits: self.overlay.len(),
            nodes,
            error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockBackend;
    use crate::model::{NodeSnapshot, Snapshot, StepType};
    use crate::stream::mock::MockTransport;
    use serde_json::json;

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

    fn snapshot(execution_id: &str, steps: Vec<Step>) -> Snapshot {
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

    fn session(
        backend: Arc<MockBackend>,
        transport: Arc<MockTransport>,
    ) -> ExecutionSession {
        ExecutionSession::with_parts(
            Config::with_base_url("http://mock:8080"),
            backend,
            transport,
        )
    }

    #[tokio::test]
    async fn open_terminal_execution_settles_from_snapshot() {
        let backend = Arc::new(MockBackend::new());
        backend.put_execution(execution(
            "e1",
            ExecutionStatus::Success,
            Some(snapshot("e1", vec![step("s1", Some("A"), Some(5))])),
        ));
        let transport = Arc::new(MockTransport::new());
        let mut session = session(Arc::clone(&backend), Arc::clone(&transport));

        session.open("e1").await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Settled);
        assert_eq!(session.status(), Some(ExecutionStatus::Success));
        assert_eq!(session.steps("n1").len(), 1);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(transport.connect_count(), 0);
    }

    #[tokio::test]
    async fn open_terminal_without_snapshot_is_recoverable_error() {
        let backend = Arc::new(MockBackend::new());
        backend.put_execution(execution("e1", ExecutionStatus::Failed, None));
        let transport = Arc::new(MockTransport::new());
        let mut session = session(backend, transport);

        let err = session.open("e1").await.unwrap_err();
        assert!(matches!(err, SessionError::Snapshot(_)));
        assert_eq!(session.phase(), SessionPhase::Loading);
        assert!(session.view().nodes.is_empty());
        assert!(session.last_error().unwrap().contains("no snapshot"));
    }

    #[tokio::test]
    async fn open_unknown_execution_surfaces_api_error() {
        let backend = Arc::new(MockBackend::new());
        let transport = Arc::new(MockTransport::new());
        let mut session = session(backend, transport);

        let err = session.open("missing").await.unwrap_err();
        assert!(matches!(err, SessionError::Api(_)));
        assert!(session.last_error().unwrap().contains("missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn live_execution_streams_steps_then_settles() {
        let backend = Arc::new(MockBackend::new());
        backend.put_execution(execution("e1", ExecutionStatus::Running, None));
        let transport = Arc::new(MockTransport::new());
        let handle = transport.push_session();
        let mut session = session(Arc::clone(&backend), Arc::clone(&transport));

        session.open("e1").await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Live);
        assert_eq!(
            session.poll_notice().await,
            Some(ConnectionNotice::Connectivity(true))
        );

        handle.push_json(json!({
            "type": "step_update",
            "execution_id": "e1",
            "data": {"node_id": "n1", "step": {"step_id": "s1", "type": "think", "tokens": 12}}
        }));
        assert_eq!(
            session.poll_notice().await,
            Some(ConnectionNotice::StepAppended {
                node_id: "n1".into(),
                step_id: "s1".into()
            })
        );
        let agg = session.aggregate("n1");
        assert_eq!(agg.total_tokens, 12);
        assert_eq!(agg.total_latency_ms, 0);

        // Completion: the record is now terminal with its snapshot.
        backend.put_execution(execution(
            "e1",
            ExecutionStatus::Success,
            Some(snapshot("e1", vec![step("s1", Some("A"), Some(12))])),
        ));
        handle.push_json(json!({"type": "execution_complete"}));
        assert_eq!(
            session.poll_notice().await,
            Some(ConnectionNotice::ExecutionCompleted)
        );
        assert_eq!(session.phase(), SessionPhase::Settled);
        assert_eq!(session.status(), Some(ExecutionStatus::Success));
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);

        // Simulated late delivery lands nowhere: the transport is closed.
        handle.push_json(json!({
            "type": "step_update",
            "execution_id": "e1",
            "data": {"node_id": "n1", "step": {"step_id": "late", "type": "think"}}
        }));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(session.steps("n1").len(), 1);
    }

    #[tokio::test]
    async fn enter_replay_rejected_while_running() {
        let backend = Arc::new(MockBackend::new());
        backend.put_execution(execution("e1", ExecutionStatus::Running, None));
        let transport = Arc::new(MockTransport::new());
        let _handle = transport.push_session();
        let mut session = session(backend, transport);

        session.open("e1").await.unwrap();
        assert!(matches!(
            session.enter_replay(),
            Err(SessionError::ReplayUnavailable)
        ));
        assert!(!session.replay_mode());
    }

    #[tokio::test]
    async fn submit_failure_keeps_overlay_for_retry() {
        let backend = Arc::new(MockBackend::new());
        backend.put_execution(execution(
            "e1",
            ExecutionStatus::Success,
            Some(snapshot("e1", vec![step("s1", Some("A"), None)])),
        ));
        backend.push_replay_err("replay rejected");
        backend.push_replay_ok("e1", "e2");
        let transport = Arc::new(MockTransport::new());
        let _e2 = transport.push_session();
        let mut session = session(Arc::clone(&backend), transport);

        session.open("e1").await.unwrap();
        session.enter_replay().unwrap();
        session.edit_step("s1", "B");

        let view = session.view();
        assert_eq!(view.nodes[0].steps[0].output.as_deref(), Some("B"));
        assert!(view.nodes[0].steps[0].edited);

        let err = session.submit_replay().await.unwrap_err();
        assert!(matches!(err, SessionError::Api(_)));
        assert!(session.replay_mode());
        assert_eq!(session.view().pending_edits, 1);
        assert_eq!(session.execution_id(), Some("e1"));

        // Idempotent retry succeeds and rebinds to the new execution.
        let new_id = session.submit_replay().await.unwrap();
        assert_eq!(new_id, "e2");
        assert_eq!(session.phase(), SessionPhase::Replaying);
        assert_eq!(session.status(), Some(ExecutionStatus::Replaying));
        assert_eq!(session.view().pending_edits, 0);
        assert!(!session.replay_mode());
        assert!(session.view().nodes.is_empty());

        let calls = backend.replay_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].0, "e1");
        assert_eq!(calls[1].1[0].step_id, "s1");
        assert_eq!(calls[1].1[0].new_output, "B");
    }

    #[tokio::test]
    async fn rebinding_clears_overlay() {
        let backend = Arc::new(MockBackend::new());
        backend.put_execution(execution(
            "e1",
            ExecutionStatus::Success,
            Some(snapshot("e1", vec![step("s1", Some("A"), None)])),
        ));
        backend.put_execution(execution(
            "e2",
            ExecutionStatus::Success,
            Some(snapshot("e2", vec![step("s9", Some("Z"), None)])),
        ));
        let transport = Arc::new(MockTransport::new());
        let mut session = session(backend, transport);

        session.open("e1").await.unwrap();
        session.enter_replay().unwrap();
        session.edit_step("s1", "B");

        session.open("e2").await.unwrap();
        assert_eq!(session.view().pending_edits, 0);
        assert!(!session.replay_mode());
    }

    #[tokio::test]
    async fn reset_returns_to_idle() {
        let backend = Arc::new(MockBackend::new());
        backend.put_execution(execution(
            "e1",
            ExecutionStatus::Success,
            Some(snapshot("e1", vec![step("s1", None, None)])),
        ));
        let transport = Arc::new(MockTransport::new());
        let mut session = session(backend, transport);

        session.open("e1").await.unwrap();
        session.reset();
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.execution_id().is_none());
        assert!(session.view().nodes.is_empty());
    }
}
