//! Answer submission.
//!
//! An answer is only accepted while the session is awaiting one, for the
//! question that is actually pending, and with non-blank text. Anything
//! else fails before a frame is sent.

use optimizer_core::{Answer, ChannelError, InvalidAnswer, Phase, Session, SessionSnapshot};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use crate::actor::Command;

/// Answer submission error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Invalid answer: {0}")]
    Invalid(#[from] InvalidAnswer),
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Check the answer preconditions against the session.
///
/// # Errors
/// Returns [`InvalidAnswer`] describing the first failed precondition.
pub fn validate_answer(session: &Session, question_id: &str, text: &str) -> Result<Answer, InvalidAnswer> {
    if session.phase() != Phase::AwaitingAnswer {
        return Err(InvalidAnswer::NotAwaitingAnswer(session.phase()));
    }
    let pending = session
        .pending_question()
        .ok_or(InvalidAnswer::NotAwaitingAnswer(session.phase()))?;
    if pending.question_id != question_id {
        return Err(InvalidAnswer::QuestionMismatch {
            expected: pending.question_id.clone(),
            received: question_id.to_string(),
        });
    }
    let text = text.trim();
    if text.is_empty() {
        return Err(InvalidAnswer::EmptyAnswer);
    }
    Ok(Answer {
        question_id: question_id.to_string(),
        text: text.to_string(),
    })
}

/// Sends answers for one session.
///
/// Submission goes through the session task, so it is checked against the
/// authoritative state and ordered with inbound events. The call returns
/// once the frame is written; the agent's reaction arrives as later events.
#[derive(Clone)]
pub struct AnswerSubmitter {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl AnswerSubmitter {
    pub(crate) const fn new(
        commands: mpsc::UnboundedSender<Command>,
        snapshots: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        Self {
            commands,
            snapshots,
        }
    }

    /// Submit `text` as the answer to `question_id`.
    ///
    /// # Errors
    /// Returns [`SubmitError::Invalid`] if a precondition fails (nothing is
    /// sent), or [`SubmitError::Channel`] if the frame could not be written.
    pub async fn submit(&self, question_id: &str, text: &str) -> Result<(), SubmitError> {
        let (reply, reply_rx) = oneshot::channel();
        let command = Command::Submit {
            question_id: question_id.to_string(),
            text: text.to_string(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return Err(self.ended());
        }
        reply_rx.await.unwrap_or_else(|_| Err(self.ended()))
    }

    // The session task is gone, so the last snapshot is final.
    fn ended(&self) -> SubmitError {
        SubmitError::Invalid(InvalidAnswer::NotAwaitingAnswer(self.snapshots.borrow().phase))
    }
}
