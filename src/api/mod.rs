pub mod backend;
pub mod client;
pub mod error;
pub mod mock;

pub use backend::WorkflowBackend;
pub use client::{ApiClient, ExecuteResponse, ModifiedStep, ReplayResponse};
pub use error::ApiError;
