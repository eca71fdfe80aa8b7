//! Event vocabulary exchanged with the remote agent.
//!
//! The serde representation of these types is the wire format: one JSON
//! object per frame, discriminated by `type`. Optional fields are always
//! emitted (as `null` when absent) so encoded frames match what the agent
//! sends byte for byte.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event received from the remote agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Free-form progress report.
    Progress(ProgressUpdate),
    /// The agent invoked a tool.
    ToolCalled(ToolCallRecord),
    /// The agent paused and needs a human answer before it can resume.
    Question(Question),
    /// The run finished successfully.
    Completed { result: OptimizationResult },
    /// The run failed on the agent side.
    Error { message: String },
}

impl AgentEvent {
    /// Wire name of the event kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Progress(_) => "progress",
            Self::ToolCalled(_) => "tool_called",
            Self::Question(_) => "question",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
        }
    }

    /// Whether this event ends the run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Error { .. })
    }
}

/// Latest progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub step: u32,
    pub message: String,
}

/// A tool invocation reported by the agent.
///
/// Records are appended in arrival order and never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub args: Map<String, Value>,
    pub result_summary: Option<String>,
}

/// A clarifying question the agent is waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub question_id: String,
    pub question: String,
    pub reason: String,
    /// Suggested answers. `None` and an empty list are distinct on the wire.
    pub options: Option<Vec<String>>,
}

/// Final artifact of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub optimized_prompt: String,
    pub original_score: f64,
    pub optimized_score: f64,
    pub improvements: Vec<String>,
    pub tips: Option<Vec<String>>,
    pub parameters: Option<String>,
    pub reasoning: Option<String>,
}

impl OptimizationResult {
    /// Score gained by the optimization (may be negative).
    #[must_use]
    pub fn score_delta(&self) -> f64 {
        self.optimized_score - self.original_score
    }
}

/// Human answer to an outstanding [`Question`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: String,
    pub text: String,
}
