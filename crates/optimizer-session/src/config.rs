//! Client configuration.

use std::time::Duration;

use optimizer_transport::Connector;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Where and how to reach the optimization service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the start call.
    pub api_base_url: String,
    /// Base URL of session channels.
    pub ws_base_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Give up on an unanswered question after this many seconds.
    /// `None` (or 0) waits forever.
    pub answer_timeout_secs: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:3000".to_string(),
            ws_base_url: "ws://127.0.0.1:3000".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            answer_timeout_secs: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `OPTIMIZER_*` environment variables.
    ///
    /// # Errors
    /// Returns error if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from a key lookup.
    ///
    /// # Errors
    /// Returns error if a numeric value does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("OPTIMIZER_API_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = lookup("OPTIMIZER_WS_URL") {
            self.ws_base_url = url;
        }
        if let Some(value) = lookup("OPTIMIZER_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = parse_secs("OPTIMIZER_CONNECT_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("OPTIMIZER_REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_secs("OPTIMIZER_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("OPTIMIZER_ANSWER_TIMEOUT_SECS") {
            self.answer_timeout_secs = Some(parse_secs("OPTIMIZER_ANSWER_TIMEOUT_SECS", &value)?);
        }
        Ok(())
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn answer_timeout(&self) -> Option<Duration> {
        self.answer_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Channel connector for this configuration.
    #[must_use]
    pub fn connector(&self) -> Connector {
        Connector::new(self.ws_base_url.clone()).with_connect_timeout(self.connect_timeout())
    }
}

fn parse_secs(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("OPTIMIZER_WS_URL", "wss://agent.example.com"),
            ("OPTIMIZER_ANSWER_TIMEOUT_SECS", "120"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.ws_base_url, "wss://agent.example.com");
        assert_eq!(config.api_base_url, "http://127.0.0.1:3000");
        assert_eq!(config.answer_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_invalid_number_rejected() {
        let mut config = ClientConfig::default();
        let err = config
            .apply_overrides(|key| (key == "OPTIMIZER_CONNECT_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "OPTIMIZER_CONNECT_TIMEOUT_SECS",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_answer_timeout_disables() {
        let config = ClientConfig {
            answer_timeout_secs: Some(0),
            ..ClientConfig::default()
        };
        assert_eq!(config.answer_timeout(), None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"api_base_url":"https://api.example.com"}"#).unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert_eq!(config.connect_timeout_secs, 10);
    }
}
