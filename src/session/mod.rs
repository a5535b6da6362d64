pub mod error;
pub mod execution_session;
pub mod overlay;

pub use error::SessionError;
pub use execution_session::{ExecutionSession, NodeView, SessionPhase, SessionView, StepView};
pub use overlay::ReplayOverlay;
