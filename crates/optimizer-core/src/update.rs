//! Typed updates published to session subscribers.

use serde::{Deserialize, Serialize};

use crate::{event::AgentEvent, machine::Phase};

/// One entry in a session's update log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// The session moved to a new phase.
    Phase { from: Phase, to: Phase },
    /// An agent event was applied.
    Event { event: AgentEvent },
    /// An inbound frame or event was rejected; the session continues.
    Rejected { reason: String },
    /// An answer frame went out.
    AnswerSent { question_id: String },
    /// The channel closed. `reason` is the close-frame text or socket error.
    Closed {
        unexpected: bool,
        reason: Option<String>,
    },
    /// No more updates will follow.
    Finished,
}

impl SessionUpdate {
    /// Rough in-memory size, used to cap history.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 16;
        match self {
            Self::Event { event } => {
                serde_json::to_vec(event).map_or(OVERHEAD, |v| v.len() + OVERHEAD)
            }
            Self::Rejected { reason } => reason.len() + OVERHEAD,
            Self::AnswerSent { question_id } => question_id.len() + OVERHEAD,
            Self::Closed { reason, .. } => reason.as_ref().map_or(0, String::len) + OVERHEAD,
            Self::Phase { .. } | Self::Finished => OVERHEAD,
        }
    }
}
