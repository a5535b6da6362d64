pub mod api;
pub mod config;
pub mod model;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod stream;

pub use api::{ApiClient, ApiError, ModifiedStep, WorkflowBackend};
pub use config::Config;
pub use model::{Execution, ExecutionStatus, Step, StepType, Workflow};
pub use session::{ExecutionSession, SessionError, SessionPhase, SessionView};
pub use store::{NodeAggregate, StepStore};
pub use stream::{ConnectionManager, ConnectionNotice, ConnectionState, StreamError};
