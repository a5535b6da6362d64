//! Connection manager for the per-execution event stream.
//!
//! Maintains at most one live stream bound to an execution id, feeds the
//! step store, and reconnects with exponential backoff when the transport
//! drops. State transitions are serialized behind one lock; a reconnect
//! timer that fires after `unbind` finds its generation stale and does
//! nothing.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Config;
use crate::store::StepStore;
use crate::stream::error::StreamError;
use crate::stream::protocol::{Envelope, EventKind, ModifyStepMessage};
use crate::stream::transport::StreamTransport;

/// First reconnect delay; doubles per attempt.
pub const BASE_RECONNECT_DELAY_MS: u64 = 1000;

/// Automatic reconnects stop after this many failed attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Lifecycle of the stream binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Exhausted,
}

impl ConnectionState {
    /// A binding is active while it holds or pursues a connection.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }
}

/// Narrow event channel from the connection task to the session facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotice {
    /// Transport opened (true) or closed (false).
    Connectivity(bool),
    /// A step was appended to the store for this node.
    StepAppended { node_id: String, step_id: String },
    /// A node finished; observability hint only, the store is untouched.
    NodeFinished { node_id: Option<String>, failed: bool },
    /// The execution reported completion; the facade should unbind and poll
    /// for the final status.
    ExecutionCompleted,
    /// Reconnect attempts are exhausted; the binding is dead until rebound.
    Exhausted,
}

struct ConnState {
    state: ConnectionState,
    attempts: u32,
    execution_id: Option<String>,
    /// Bumped on every bind/unbind; stale tasks and timers check it before
    /// acting.
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    cancel: Option<CancellationToken>,
}

struct Shared {
    transport: Arc<dyn StreamTransport>,
    store: Arc<RwLock<StepStore>>,
    notices: mpsc::Sender<ConnectionNotice>,
    conn: Mutex<ConnState>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.conn.lock().generation == generation
    }

    async fn notify(&self, notice: ConnectionNotice) {
        // Receiver dropped means the owning session is gone; nothing to do.
        let _ = self.notices.send(notice).await;
    }

    async fn dispatch(&self, bound_execution: &str, text: &str) {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "dropping malformed stream message");
                return;
            }
        };

        // Late-delivery guard: frames stamped for another execution are stale.
        if let Some(id) = &envelope.execution_id {
            if id != bound_execution {
                debug!(frame_execution = %id, "dropping frame for unbound execution");
                return;
            }
        }

        match envelope.kind {
            EventKind::StepUpdate | EventKind::StepComplete => {
                let Some(data) = envelope.data else { return };
                let (Some(node_id), Some(step)) = (data.node_id, data.step) else {
                    return;
                };
                let step_id = step.step_id.clone();
                self.store.write().append(&node_id, step);
                self.notify(ConnectionNotice::StepAppended { node_id, step_id })
                    .await;
            }
            EventKind::NodeComplete | EventKind::NodeFailed => {
                let node_id = envelope
                    .data
                    .and_then(|data| data.node_id.or(data.result.map(|r| r.node_id)));
                self.notify(ConnectionNotice::NodeFinished {
                    node_id,
                    failed: envelope.kind == EventKind::NodeFailed,
                })
                .await;
            }
            EventKind::ExecutionComplete => {
                self.notify(ConnectionNotice::ExecutionCompleted).await;
            }
            EventKind::Unknown => {
                debug!("dropping unknown stream event");
            }
        }
    }
}

/// Owns the one live stream binding and its reconnect loop.
pub struct ConnectionManager {
    config: Config,
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Returns the manager and the notice receiver the facade drains.
    pub fn new(
        config: Config,
        transport: Arc<dyn StreamTransport>,
        store: Arc<RwLock<StepStore>>,
    ) -> (Self, mpsc::Receiver<ConnectionNotice>) {
        let (notices, rx) = mpsc::channel(256);
        let shared = Arc::new(Shared {
            transport,
            store,
            notices,
            conn: Mutex::new(ConnState {
                state: ConnectionState::Disconnected,
                attempts: 0,
                execution_id: None,
                generation: 0,
                outbound: None,
                cancel: None,
            }),
        });
        (Self { config, shared }, rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.conn.lock().state
    }

    pub fn attempts(&self) -> u32 {
        self.shared.conn.lock().attempts
    }

    pub fn bound_execution_id(&self) -> Option<String> {
        self.shared.conn.lock().execution_id.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Bind the stream to an execution id.
    ///
    /// An existing binding for a different id is torn down first; rebinding
    /// the same id while the binding is active is a no-op.
    pub fn bind(&self, execution_id: &str) {
        {
            let conn = self.shared.conn.lock();
            if conn.execution_id.as_deref() == Some(execution_id) && conn.state.is_active() {
                return;
            }
        }
        self.unbind();

        let (generation, cancel) = {
            let mut conn = self.shared.conn.lock();
            conn.generation += 1;
            conn.execution_id = Some(execution_id.to_string());
            conn.state = ConnectionState::Connecting;
            conn.attempts = 0;
            let cancel = CancellationToken::new();
            conn.cancel = Some(cancel.clone());
            (conn.generation, cancel)
        };

        let url = self.config.stream_url(execution_id);
        let shared = Arc::clone(&self.shared);
        let execution_id = execution_id.to_string();
        tokio::spawn(run_stream(shared, url, execution_id, generation, cancel));
    }

    /// Tear down the binding: cancel pending reconnect timers, close the
    /// transport, return to disconnected. Safe to call from any state.
    pub fn unbind(&self) {
        let mut conn = self.shared.conn.lock();
        conn.generation += 1;
        if let Some(cancel) = conn.cancel.take() {
            cancel.cancel();
        }
        conn.outbound = None;
        conn.execution_id = None;
        conn.state = ConnectionState::Disconnected;
        conn.attempts = 0;
    }

    /// Best-effort live notification of a step edit.
    ///
    /// Only transmits while connected; the caller records the edit in the
    /// overlay regardless, which is what replay submission reads.
    pub fn send_modification(&self, step_id: &str, new_output: &str) -> Result<(), StreamError> {
        let conn = self.shared.conn.lock();
        if conn.state != ConnectionState::Connected {
            return Err(StreamError::NotConnected);
        }
        let Some(tx) = &conn.outbound else {
            return Err(StreamError::NotConnected);
        };
        let text = serde_json::to_string(&ModifyStepMessage::new(step_id, new_output))
            .map_err(|err| StreamError::Transport(err.to_string()))?;
        tx.send(text).map_err(|_| StreamError::NotConnected)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.unbind();
    }
}

/// Connect/read/reconnect loop for one binding generation.
async fn run_stream(
    shared: Arc<Shared>,
    url: String,
    execution_id: String,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = shared.transport.connect(&url) => result,
        };
        if !shared.is_current(generation) {
            return;
        }

        match result {
            Ok(mut conn) => {
                let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
                {
                    let mut state = shared.conn.lock();
                    if state.generation != generation {
                        return;
                    }
                    state.state = ConnectionState::Connected;
                    // Counter resets only on transport open, not on message
                    // receipt.
                    state.attempts = 0;
                    state.outbound = Some(out_tx);
                }
                debug!(execution_id = %execution_id, "stream connected");
                shared.notify(ConnectionNotice::Connectivity(true)).await;

                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return,
                        outbound = out_rx.recv() => {
                            let Some(text) = outbound else { break };
                            if let Err(err) = conn.send(text).await {
                                warn!(error = %err, "stream send failed");
                                break;
                            }
                        }
                        inbound = conn.recv() => {
                            if !shared.is_current(generation) {
                                return;
                            }
                            match inbound {
                                Some(Ok(text)) => shared.dispatch(&execution_id, &text).await,
                                Some(Err(err)) => {
                                    warn!(error = %err, "stream error");
                                    break;
                                }
                                None => {
                                    debug!(execution_id = %execution_id, "stream closed");
                                    break;
                                }
                            }
                        }
                    }
                }

                {
                    let mut state = shared.conn.lock();
                    if state.generation != generation {
                        return;
                    }
                    state.outbound = None;
                }
                shared.notify(ConnectionNotice::Connectivity(false)).await;
            }
            Err(err) => {
                warn!(error = %err, execution_id = %execution_id, "stream connect failed");
            }
        }
        if !shared.is_current(generation) {
            return;
        }

        // Increment first, then compute the delay from the new attempt count.
        let delay = {
            let mut state = shared.conn.lock();
            if state.generation != generation {
                return;
            }
            if state.attempts >= MAX_RECONNECT_ATTEMPTS {
                state.state = ConnectionState::Exhausted;
                None
            } else {
                state.attempts += 1;
                state.state = ConnectionState::Reconnecting;
                Some(Duration::from_millis(
                    BASE_RECONNECT_DELAY_MS << (state.attempts - 1),
                ))
            }
        };

        let Some(delay) = delay else {
            warn!(execution_id = %execution_id, "reconnect attempts exhausted");
            shared.notify(ConnectionNotice::Connectivity(false)).await;
            shared.notify(ConnectionNotice::Exhausted).await;
            return;
        };

        debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        // A timer that outlived its binding must not act.
        if !shared.is_current(generation) {
            return;
        }
    }
}
