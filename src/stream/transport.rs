//! Transport seam between the connection manager and the wire.
//!
//! The manager only sees text frames; framing, pings, and close handling live
//! behind this trait so tests can script connections without a server.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::stream::error::StreamError;

/// Factory for stream connections.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, StreamError>;
}

/// One live connection to an execution's event channel.
#[async_trait]
pub trait StreamConnection: Send {
    /// Next text frame. `None` means the peer closed the connection;
    /// `Some(Err)` is a transport fault. Both end the read loop.
    async fn recv(&mut self) -> Option<Result<String, StreamError>>;

    /// Send a text frame.
    async fn send(&mut self, text: String) -> Result<(), StreamError>;
}

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

#[async_trait]
impl StreamTransport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, StreamError> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|err| StreamError::Transport(err.to_string()))?;
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl StreamConnection for WsConnection {
    async fn recv(&mut self) -> Option<Result<String, StreamError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(err) => return Some(Err(StreamError::Transport(err.to_string()))),
            };
            match msg {
                WsMessage::Text(text) => return Some(Ok(text.to_string())),
                WsMessage::Ping(data) => {
                    let _ = self.stream.send(WsMessage::Pong(data)).await;
                }
                WsMessage::Close(_) => return None,
                _ => {}
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<(), StreamError> {
        self.stream
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|err| StreamError::Transport(err.to_string()))
    }
}
