//! Mock stream transport for deterministic testing.
//!
//! Implements the transport seam to serve scripted connections without a
//! server. Use this for integration tests that need to verify stream
//! dispatch, reconnect policy, and teardown flows.
//!
//! Each `connect` call pops the next scripted outcome: either a failure or a
//! live session whose frames are injected through a [`MockSessionHandle`].
//! When the script runs dry, connects fail, which is convenient for
//! exhausting the reconnect policy.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::stream::error::StreamError;
use crate::stream::transport::{StreamConnection, StreamTransport};

enum Frame {
    Text(String),
    Close,
}

enum ConnectOutcome {
    Fail,
    Session(mpsc::UnboundedReceiver<Frame>, Arc<Mutex<Vec<String>>>),
}

/// Handle to one scripted live session.
#[derive(Clone)]
pub struct MockSessionHandle {
    tx: mpsc::UnboundedSender<Frame>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockSessionHandle {
    /// Deliver a raw text frame to the reader.
    pub fn push_frame(&self, text: impl Into<String>) {
        let _ = self.tx.send(Frame::Text(text.into()));
    }

    /// Deliver a JSON value as a text frame.
    pub fn push_json(&self, value: serde_json::Value) {
        self.push_frame(value.to_string());
    }

    /// Close the connection from the server side.
    pub fn close(&self) {
        let _ = self.tx.send(Frame::Close);
    }

    /// Frames the client sent on this connection, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

/// Scripted transport for tests.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<ConnectOutcome>>,
    connect_urls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next connect attempt to fail.
    pub fn push_failure(&self) {
        self.script.lock().push_back(ConnectOutcome::Fail);
    }

    /// Script the next connect attempt to succeed, returning the handle that
    /// drives the resulting session.
    pub fn push_session(&self) -> MockSessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        self.script
            .lock()
            .push_back(ConnectOutcome::Session(rx, Arc::clone(&sent)));
        MockSessionHandle { tx, sent }
    }

    /// Number of connect attempts observed so far.
    pub fn connect_count(&self) -> usize {
        self.connect_urls.lock().len()
    }

    /// URLs passed to connect, in order.
    pub fn connect_urls(&self) -> Vec<String> {
        self.connect_urls.lock().clone()
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, StreamError> {
        self.connect_urls.lock().push(url.to_string());
        match self.script.lock().pop_front() {
            Some(ConnectOutcome::Session(rx, sent)) => Ok(Box::new(MockConnection { rx, sent })),
            Some(ConnectOutcome::Fail) | None => {
                Err(StreamError::Transport("mock connect refused".into()))
            }
        }
    }
}

struct MockConnection {
    rx: mpsc::UnboundedReceiver<Frame>,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl StreamConnection for MockConnection {
    async fn recv(&mut self) -> Option<Result<String, StreamError>> {
        match self.rx.recv().await {
            Some(Frame::Text(text)) => Some(Ok(text)),
            Some(Frame::Close) | None => None,
        }
    }

    async fn send(&mut self, text: String) -> Result<(), StreamError> {
        self.sent.lock().push(text);
        Ok(())
    }
}
