//! Session manager for orchestrating optimization sessions.

use std::{collections::HashMap, sync::Arc, time::Duration};

use optimizer_core::{
    ChannelError, InitiateError, Phase, ResultLibrary, SessionId, SessionInitiator, TaskSpec,
};
use optimizer_transport::Connector;
use tokio::sync::{RwLock, mpsc};

use crate::{
    actor::{ActorOptions, InputForwarder, spawn_session},
    config::ClientConfig,
    handle::SessionHandle,
    initiator::HttpInitiator,
};

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Initiate error: {0}")]
    Initiate(#[from] InitiateError),
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("Session not found: {0}")]
    NotFound(SessionId),
}

/// Starts sessions and keeps track of the ones still running.
pub struct SessionManager<I: SessionInitiator> {
    initiator: I,
    connector: Connector,
    options: ActorOptions,
    active_sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionManager<HttpInitiator> {
    /// Manager talking to the service described by `config`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ManagerError> {
        let initiator = HttpInitiator::from_config(config)?;
        Ok(Self::new(initiator, config.connector()).with_answer_timeout(config.answer_timeout()))
    }
}

impl<I: SessionInitiator> SessionManager<I> {
    /// Create a new session manager.
    #[must_use]
    pub fn new(initiator: I, connector: Connector) -> Self {
        Self {
            initiator,
            connector,
            options: ActorOptions::default(),
            active_sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Save every completed result to `library`.
    #[must_use]
    pub fn with_library(mut self, library: Arc<dyn ResultLibrary>) -> Self {
        self.options.library = Some(library);
        self
    }

    /// Fail sessions whose pending question goes unanswered this long.
    #[must_use]
    pub fn with_answer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.answer_timeout = timeout;
        self
    }

    /// Allocate a session for `task` and open its channel.
    ///
    /// # Errors
    /// Returns [`ManagerError::Initiate`] if the service refuses the task,
    /// or [`ManagerError::Channel`] if the channel cannot be opened.
    pub async fn start_session(&self, task: &TaskSpec) -> Result<SessionHandle, ManagerError> {
        let session_id = self.initiator.start(task).await?;
        self.open_session(session_id).await
    }

    /// Open the channel for an already allocated session.
    ///
    /// # Errors
    /// Returns [`ManagerError::Channel`] if the channel cannot be opened.
    pub async fn open_session(&self, session_id: SessionId) -> Result<SessionHandle, ManagerError> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let channel = self
            .connector
            .connect(&session_id, InputForwarder::new(inbound_tx))
            .await?;

        let handle = spawn_session(session_id.clone(), channel, inbound_rx, self.options.clone());
        tracing::info!(%session_id, "Session opened");

        let mut sessions = self.active_sessions.write().await;
        sessions.retain(|_, h| h.phase() != Phase::Closed);
        sessions.insert(session_id, handle.clone());
        Ok(handle)
    }

    /// Handle for a session this manager opened.
    pub async fn get_session(&self, session_id: &SessionId) -> Option<SessionHandle> {
        self.active_sessions.read().await.get(session_id).cloned()
    }

    /// Sessions that have not closed yet.
    pub async fn active_sessions(&self) -> Vec<SessionId> {
        self.active_sessions
            .read()
            .await
            .iter()
            .filter(|(_, h)| h.phase() != Phase::Closed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Cancel a session.
    ///
    /// # Errors
    /// Returns error if session not found.
    pub async fn cancel_session(&self, session_id: &SessionId) -> Result<(), ManagerError> {
        let sessions = self.active_sessions.read().await;
        let handle = sessions
            .get(session_id)
            .ok_or_else(|| ManagerError::NotFound(session_id.clone()))?;
        handle.cancel();
        Ok(())
    }

    /// Forget closed sessions. Returns how many were removed.
    pub async fn prune(&self) -> usize {
        let mut sessions = self.active_sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, h| h.phase() != Phase::Closed);
        before - sessions.len()
    }

    /// Cancel every session and wait for each to close.
    pub async fn shutdown(&self) {
        let handles: Vec<SessionHandle> = self
            .active_sessions
            .write()
            .await
            .drain()
            .map(|(_, h)| h)
            .collect();
        for handle in &handles {
            handle.cancel();
        }
        futures::future::join_all(handles.iter().map(SessionHandle::wait_for_closed)).await;
        tracing::info!(count = handles.len(), "Sessions shut down");
    }
}
