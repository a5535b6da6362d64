//! Backend seam used by the execution session.
//!
//! Only the operations the session itself drives live here; the full CRUD
//! surface stays on [`ApiClient`](crate::api::ApiClient) for the CLI.

use async_trait::async_trait;

use crate::api::client::{ApiClient, ExecuteResponse, ModifiedStep, ReplayResponse};
use crate::api::error::ApiError;
use crate::model::Execution;

#[async_trait]
pub trait WorkflowBackend: Send + Sync {
    async fn get_execution(&self, id: &str) -> Result<Execution, ApiError>;

    async fn execute_workflow(
        &self,
        workflow_id: &str,
        input_data: Option<&serde_json::Value>,
    ) -> Result<ExecuteResponse, ApiError>;

    async fn replay_execution(
        &self,
        execution_id: &str,
        modified_steps: &[ModifiedStep],
    ) -> Result<ReplayResponse, ApiError>;
}

#[async_trait]
impl WorkflowBackend for ApiClient {
    async fn get_execution(&self, id: &str) -> Result<Execution, ApiError> {
        ApiClient::get_execution(self, id).await
    }

    async fn execute_workflow(
        &self,
        workflow_id: &str,
        input_data: Option<&serde_json::Value>,
    ) -> Result<ExecuteResponse, ApiError> {
        ApiClient::execute_workflow(self, workflow_id, input_data).await
    }

    async fn replay_execution(
        &self,
        execution_id: &str,
        modified_steps: &[ModifiedStep],
    ) -> Result<ReplayResponse, ApiError> {
        ApiClient::replay_execution(self, execution_id, modified_steps).await
    }
}
