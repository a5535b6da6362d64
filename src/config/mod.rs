//! Client configuration.
//!
//! The only setting this client carries is the backend base URL; everything
//! else (reconnect policy, routes) is protocol, not configuration.

use std::env;

/// Environment variable holding the backend base URL.
pub const BASE_URL_ENV: &str = "FLOWLENS_BASE_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the REST/stream backend, e.g. `http://localhost:8080`.
    pub base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Config {
    /// Build from the environment, falling back to the local default.
    pub fn from_env() -> Self {
        let base_url = env::var(BASE_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(base_url)
    }

    /// Build with an explicit base URL (CLI flag override).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }

    /// Absolute URL for a REST path (`path` starts with `/`).
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// WebSocket URL for an execution's event channel.
    ///
    /// Same host as the REST endpoint with an http→ws scheme swap, matching
    /// how the backend mounts its stream routes.
    pub fn stream_url(&self, execution_id: &str) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.base_url.clone()
        };
        format!("{ws_base}/ws/executions/{execution_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let cfg = Config::with_base_url("http://example.com:9000/");
        assert_eq!(
            cfg.api_url("/api/v1/agents"),
            "http://example.com:9000/api/v1/agents"
        );
    }

    #[test]
    fn stream_url_swaps_scheme() {
        let cfg = Config::with_base_url("http://localhost:8080");
        assert_eq!(cfg.stream_url("e1"), "ws://localhost:8080/ws/executions/e1");
        let tls = Config::with_base_url("https://flow.example.com");
        assert_eq!(
            tls.stream_url("e2"),
            "wss://flow.example.com/ws/executions/e2"
        );
    }
}
