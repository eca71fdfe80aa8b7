//! Task specification submitted when a session is started.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::error::InitiateError;

/// What kind of prompt is being optimized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeMode {
    #[default]
    Text,
    Image,
    Video,
}

/// A file attached to the task, already base64 encoded.
///
/// The payload is opaque to the session core; size and type checks belong
/// to whoever produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    /// Base64 (standard alphabet) file contents.
    pub file_data: String,
    pub mime_type: String,
}

impl Attachment {
    /// Create an attachment from raw bytes.
    #[must_use]
    pub fn from_bytes(file_name: impl Into<String>, mime_type: impl Into<String>, data: &[u8]) -> Self {
        Self {
            file_name: file_name.into(),
            file_data: BASE64.encode(data),
            mime_type: mime_type.into(),
        }
    }

    /// Decode the attachment payload.
    ///
    /// # Errors
    /// Returns error if `file_data` is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.file_data)
    }
}

/// Task handed to the session initiator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Free-form description of what to optimize.
    pub description: String,
    /// Existing prompt to improve, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_prompt: Option<String>,
    #[serde(default)]
    pub mode: OptimizeMode,
    /// Aspect ratio hint, e.g. `16:9`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl TaskSpec {
    /// Create a task with just a description.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: OptimizeMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_existing_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.existing_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Check the task before anything is sent to the remote.
    ///
    /// # Errors
    /// Returns [`InitiateError::Validation`] if the description is blank.
    pub fn validate(&self) -> Result<(), InitiateError> {
        if self.description.trim().is_empty() {
            return Err(InitiateError::Validation(
                "task description must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
