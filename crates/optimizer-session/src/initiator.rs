//! HTTP session initiator.

use std::time::Duration;

use async_trait::async_trait;
use optimizer_core::{InitiateError, SessionId, SessionInitiator, TaskSpec};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::ClientConfig;

/// Path of the start call under the API base URL.
pub const START_PATH: &str = "/api/optimize/start";

#[derive(Debug, Deserialize)]
struct StartResponse {
    session_id: String,
}

/// Allocates sessions with a single POST.
#[derive(Debug, Clone)]
pub struct HttpInitiator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpInitiator {
    /// Create an initiator for `api_base_url`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(api_base_url: &str, request_timeout: Duration) -> Result<Self, InitiateError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| InitiateError::ServiceUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}{START_PATH}", api_base_url.trim_end_matches('/')),
        })
    }

    /// Create an initiator from client configuration.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, InitiateError> {
        Self::new(&config.api_base_url, config.request_timeout())
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SessionInitiator for HttpInitiator {
    async fn start(&self, task: &TaskSpec) -> Result<SessionId, InitiateError> {
        task.validate()?;

        let response = self
            .client
            .post(&self.endpoint)
            .json(task)
            .send()
            .await
            .map_err(|e| InitiateError::ServiceUnavailable(e.to_string()))?;

        let status = response.status();
        if matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY) {
            let body = response.text().await.unwrap_or_default();
            return Err(InitiateError::Validation(if body.is_empty() {
                format!("rejected with status {status}")
            } else {
                body
            }));
        }
        if !status.is_success() {
            return Err(InitiateError::ServiceUnavailable(format!(
                "start failed with status {status}"
            )));
        }

        let body: StartResponse = response
            .json()
            .await
            .map_err(|e| InitiateError::ServiceUnavailable(format!("invalid start response: {e}")))?;
        if body.session_id.trim().is_empty() {
            return Err(InitiateError::ServiceUnavailable(
                "service returned an empty session id".to_string(),
            ));
        }

        tracing::info!(session_id = %body.session_id, mode = ?task.mode, "Session allocated");
        Ok(SessionId::from(body.session_id))
    }
}
