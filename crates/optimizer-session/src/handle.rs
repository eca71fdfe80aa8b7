//! Caller-facing view of a running session.

use std::sync::Arc;

use futures::stream::BoxStream;
use optimizer_core::{AgentEvent, Phase, SessionId, SessionSnapshot, SessionUpdate, UpdateStore};
use tokio::sync::{mpsc, watch};

use crate::{
    actor::Command,
    answer::{AnswerSubmitter, SubmitError},
};

/// Handle to one session.
///
/// Cheap to clone. All clones talk to the same session task. Dropping the
/// last handle (and every [`AnswerSubmitter`] taken from it) cancels the
/// session and closes its channel.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    updates: Arc<UpdateStore>,
    submitter: AnswerSubmitter,
}

impl SessionHandle {
    pub(crate) const fn new(
        id: SessionId,
        commands: mpsc::UnboundedSender<Command>,
        snapshots: watch::Receiver<SessionSnapshot>,
        updates: Arc<UpdateStore>,
        submitter: AnswerSubmitter,
    ) -> Self {
        Self {
            id,
            commands,
            snapshots,
            updates,
            submitter,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.snapshots.borrow().phase
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Update log from the start, then live updates, ending after
    /// [`SessionUpdate::Finished`].
    #[must_use]
    pub fn updates(&self) -> BoxStream<'static, SessionUpdate> {
        self.updates.history_plus_stream()
    }

    /// Applied agent events only.
    #[must_use]
    pub fn events(&self) -> BoxStream<'static, AgentEvent> {
        self.updates.event_stream()
    }

    #[must_use]
    pub fn submitter(&self) -> AnswerSubmitter {
        self.submitter.clone()
    }

    /// Answer the pending question.
    ///
    /// # Errors
    /// See [`AnswerSubmitter::submit`].
    pub async fn submit_answer(&self, question_id: &str, text: &str) -> Result<(), SubmitError> {
        self.submitter.submit(question_id, text).await
    }

    /// Stop the session and close its channel. Safe to call repeatedly.
    pub fn cancel(&self) {
        if self.commands.send(Command::Cancel).is_err() {
            tracing::debug!(session_id = %self.id, "Cancel after session task finished");
        }
    }

    /// Wait for `completed`, `errored` or `closed`.
    ///
    /// The channel is closed right after `completed` or `errored`, so the
    /// returned snapshot may already be `closed`. Use
    /// [`SessionSnapshot::outcome`] for how the run ended.
    pub async fn wait_for_terminal(&self) -> SessionSnapshot {
        self.wait_until(SessionSnapshot::is_terminal).await
    }

    /// Wait for the channel to be closed and the session released.
    pub async fn wait_for_closed(&self) -> SessionSnapshot {
        self.wait_until(|s| s.phase == Phase::Closed).await
    }

    async fn wait_until(&self, done: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
        let mut rx = self.snapshots.clone();
        let matched = rx.wait_for(done).await.map(|snapshot| snapshot.clone());
        // Fails only when the task is gone, and then its last snapshot is final.
        matched.unwrap_or_else(|_| rx.borrow().clone())
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
