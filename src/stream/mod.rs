pub mod connection;
pub mod error;
pub mod mock;
pub mod protocol;
pub mod transport;

pub use connection::{
    ConnectionManager, ConnectionNotice, ConnectionState, BASE_RECONNECT_DELAY_MS,
    MAX_RECONNECT_ATTEMPTS,
};
pub use error::StreamError;
pub use protocol::{Envelope, EventData, EventKind, ModifyStepMessage, NodeResult};
pub use transport::{StreamConnection, StreamTransport, WsTransport};
