//! Collaborator traits: session allocation and result persistence.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{error::InitiateError, event::OptimizationResult, task::TaskSpec};

/// Opaque session identifier allocated by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Allocates a session before any channel is opened.
#[async_trait]
pub trait SessionInitiator: Send + Sync {
    /// Submit a task and get back the id of the session that will run it.
    async fn start(&self, task: &TaskSpec) -> Result<SessionId, InitiateError>;
}

/// Identifier of a saved library entry.
pub type EntryId = Uuid;

/// A result persisted by the library.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    pub id: EntryId,
    pub session_id: SessionId,
    pub result: Arc<OptimizationResult>,
    /// Unix epoch milliseconds.
    pub saved_at: i64,
}

/// Library query filter.
#[derive(Debug, Clone, Default)]
pub struct LibraryFilter {
    pub session_id: Option<SessionId>,
    pub limit: Option<usize>,
}

/// Library error.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Library error: {0}")]
    Internal(String),
}

/// Destination for completed results.
///
/// The session core never stores anything itself; it hands each completed
/// result to whichever library the application wires in.
#[async_trait]
pub trait ResultLibrary: Send + Sync {
    /// Persist a completed result.
    async fn save(
        &self,
        session_id: &SessionId,
        result: Arc<OptimizationResult>,
    ) -> Result<LibraryEntry, LibraryError>;

    /// Get an entry by id.
    async fn get(&self, id: EntryId) -> Result<Option<LibraryEntry>, LibraryError>;

    /// List entries, newest first.
    async fn list(&self, filter: LibraryFilter) -> Result<Vec<LibraryEntry>, LibraryError>;
}
