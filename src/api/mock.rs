//! Mock backend for deterministic session testing.
//!
//! Serves canned execution records and scripted execute/replay outcomes
//! without a server, and captures the calls it receives.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;

use crate::api::backend::WorkflowBackend;
use crate::api::client::{ExecuteResponse, ModifiedStep, ReplayResponse};
use crate::api::error::ApiError;
use crate::model::Execution;

#[derive(Default)]
pub struct MockBackend {
    executions: Mutex<HashMap<String, Execution>>,
    execute_results: Mutex<VecDeque<Result<ExecuteResponse, String>>>,
    replay_results: Mutex<VecDeque<Result<ReplayResponse, String>>>,
    replay_calls: Mutex<Vec<(String, Vec<ModifiedStep>)>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve this record for `get_execution(record.id)`.
    pub fn put_execution(&self, execution: Execution) {
        self.executions
            .lock()
            .insert(execution.id.clone(), execution);
    }

    pub fn push_execute_ok(&self, execution_id: &str) {
        self.execute_results.lock().push_back(Ok(ExecuteResponse {
            execution_id: execution_id.to_string(),
            status: "running".to_string(),
        }));
    }

    pub fn push_replay_ok(&self, original: &str, new_execution_id: &str) {
        self.replay_results.lock().push_back(Ok(ReplayResponse {
            original_execution_id: original.to_string(),
            new_execution_id: new_execution_id.to_string(),
            status: "replaying".to_string(),
        }));
    }

    pub fn push_replay_err(&self, message: &str) {
        self.replay_results.lock().push_back(Err(message.to_string()));
    }

    /// Replay calls received so far, as (execution_id, modifications).
    pub fn replay_calls(&self) -> Vec<(String, Vec<ModifiedStep>)> {
        self.replay_calls.lock().clone()
    }

    fn server_error(message: String) -> ApiError {
        ApiError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
        }
    }
}

#[async_trait]
impl WorkflowBackend for MockBackend {
    async fn get_execution(&self, id: &str) -> Result<Execution, ApiError> {
        self.executions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::Status {
                status: StatusCode::NOT_FOUND,
                message: format!("execution {id} not found"),
            })
    }

    async fn execute_workflow(
        &self,
        _workflow_id: &str,
        _input_data: Option<&serde_json::Value>,
    ) -> Result<ExecuteResponse, ApiError> {
        match self.execute_results.lock().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(Self::server_error(message)),
            None => Err(Self::server_error("no scripted execute result".into())),
        }
    }

    async fn replay_execution(
        &self,
        execution_id: &str,
        modified_steps: &[ModifiedStep],
    ) -> Result<ReplayResponse, ApiError> {
        self.replay_calls
            .lock()
            .push((execution_id.to_string(), modified_steps.to_vec()));
        match self.replay_results.lock().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(Self::server_error(message)),
            None => Err(Self::server_error("no scripted replay result".into())),
        }
    }
}
