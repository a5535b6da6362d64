//! Typed client for the workflow backend's REST interface.

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ErrorBody};
use crate::config::Config;
use crate::model::{Agent, Execution, ExecutionStatus, Workflow};

/// Response to `POST /api/v1/workflows/{id}/execute`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteResponse {
    pub execution_id: String,
    pub status: String,
}

/// One overlay entry as submitted to the replay endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedStep {
    pub step_id: String,
    pub new_output: String,
}

/// Response to `POST /api/v1/executions/{id}/replay`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayResponse {
    pub original_execution_id: String,
    pub new_execution_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    input_data: Option<&'a serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ReplayRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    modified_steps: Option<&'a [ModifiedStep]>,
}

/// Map a non-2xx response to `ApiError::Status`: the server's `{error}` body
/// message when it decodes, the HTTP status text otherwise.
fn status_error(status: reqwest::StatusCode, body: &str) -> ApiError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|body| body.error)
        .unwrap_or_else(|_| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });
    ApiError::Status { status, message }
}

/// Client for the workflow backend REST API.
#[derive(Clone)]
pub struct ApiClient {
    config: Config,
    client: Client,
}

impl ApiClient {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.config.api_url(path))
    }

    /// Send a request and decode a JSON body, mapping non-2xx statuses to
    /// `ApiError::Status` with the server's `{error}` message when present.
    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(status_error(status, &text));
        }

        serde_json::from_str(&text).map_err(|err| ApiError::Decode(format!("{err} - {text}")))
    }

    /// Like `send` but ignores the response body (delete endpoints).
    async fn send_empty(&self, builder: RequestBuilder) -> Result<(), ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }
        Ok(())
    }

    // Agents

    pub async fn list_agents(&self) -> Result<Vec<Agent>, ApiError> {
        self.send(self.request(Method::GET, "/api/v1/agents")).await
    }

    pub async fn get_agent(&self, id: &str) -> Result<Agent, ApiError> {
        self.send(self.request(Method::GET, &format!("/api/v1/agents/{id}")))
            .await
    }

    pub async fn create_agent(&self, agent: &serde_json::Value) -> Result<Agent, ApiError> {
        self.send(self.request(Method::POST, "/api/v1/agents").json(agent))
            .await
    }

    pub async fn update_agent(
        &self,
        id: &str,
        agent: &serde_json::Value,
    ) -> Result<Agent, ApiError> {
        self.send(
            self.request(Method::PUT, &format!("/api/v1/agents/{id}"))
                .json(agent),
        )
        .await
    }

    pub async fn delete_agent(&self, id: &str) -> Result<(), ApiError> {
        self.send_empty(self.request(Method::DELETE, &format!("/api/v1/agents/{id}")))
            .await
    }

    // Workflows

    pub async fn list_workflows(&self) -> Result<Vec<Workflow>, ApiError> {
        self.send(self.request(Method::GET, "/api/v1/workflows"))
            .await
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Workflow, ApiError> {
        self.send(self.request(Method::GET, &format!("/api/v1/workflows/{id}")))
            .await
    }

    pub async fn create_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<Workflow, ApiError> {
        self.send(self.request(Method::POST, "/api/v1/workflows").json(workflow))
            .await
    }

    pub async fn update_workflow(
        &self,
        id: &str,
        workflow: &serde_json::Value,
    ) -> Result<Workflow, ApiError> {
        self.send(
            self.request(Method::PUT, &format!("/api/v1/workflows/{id}"))
                .json(workflow),
        )
        .await
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<(), ApiError> {
        self.send_empty(self.request(Method::DELETE, &format!("/api/v1/workflows/{id}")))
            .await
    }

    /// Kick off a run of a workflow. The returned execution id is what the
    /// streaming channel and session bind to.
    pub async fn execute_workflow(
        &self,
        id: &str,
        input_data: Option<&serde_json::Value>,
    ) -> Result<ExecuteResponse, ApiError> {
        self.send(
            self.request(Method::POST, &format!("/api/v1/workflows/{id}/execute"))
                .json(&ExecuteRequest { input_data }),
        )
        .await
    }

    // Executions

    pub async fn list_executions(
        &self,
        workflow_id: Option<&str>,
        status: Option<ExecutionStatus>,
    ) -> Result<Vec<Execution>, ApiError> {
        let mut builder = self.request(Method::GET, "/api/v1/executions");
        if let Some(workflow_id) = workflow_id {
            builder = builder.query(&[("workflow_id", workflow_id)]);
        }
        if let Some(status) = status {
            builder = builder.query(&[("status", status.as_str())]);
        }
        self.send(builder).await
    }

    pub async fn get_execution(&self, id: &str) -> Result<Execution, ApiError> {
        self.send(self.request(Method::GET, &format!("/api/v1/executions/{id}")))
            .await
    }

    /// Request a replay of `id` with the given step-output overrides.
    pub async fn replay_execution(
        &self,
        id: &str,
        modified_steps: &[ModifiedStep],
    ) -> Result<ReplayResponse, ApiError> {
        let body = ReplayRequest {
            modified_steps: if modified_steps.is_empty() {
                None
            } else {
                Some(modified_steps)
            },
        };
        self.send(
            self.request(Method::POST, &format!("/api/v1/executions/{id}/replay"))
                .json(&body),
        )
        .await
    }

    pub async fn health(&self) -> Result<serde_json::Value, ApiError> {
        self.send(self.request(Method::GET, "/health")).await
    }
}
