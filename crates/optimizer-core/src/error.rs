//! Error taxonomy shared by every layer of the session stack.

use thiserror::Error;

use crate::machine::Phase;

/// Malformed frame or out-of-order event.
///
/// Protocol errors are absorbed at the codec / state machine boundary:
/// they are logged and surfaced to subscribers, never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {reason}")]
    Malformed { reason: String },
    #[error("Question {incoming} received while question {pending} is still pending")]
    QuestionWhilePending { pending: String, incoming: String },
    #[error("Event '{kind}' received before the channel was connected")]
    NotConnected { kind: &'static str },
    #[error("Answer for question {question_id} does not match session state ({phase})")]
    UnexpectedAnswer { question_id: String, phase: Phase },
}

impl ProtocolError {
    /// Shorthand for [`ProtocolError::Malformed`].
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// Connection-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Channel closed")]
    Closed,
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Send failed: {0}")]
    Send(String),
}

/// Answer rejected before anything was sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidAnswer {
    #[error("Session is not awaiting an answer (phase: {0})")]
    NotAwaitingAnswer(Phase),
    #[error("Answer targets question {received} but the pending question is {expected}")]
    QuestionMismatch { expected: String, received: String },
    #[error("Answer text is empty")]
    EmptyAnswer,
}

/// Session initiation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitiateError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}
