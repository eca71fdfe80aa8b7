//! Session state machine.
//!
//! [`transition`] is a pure function of `(phase, data, input)`. It knows
//! nothing about sockets or tasks, so the whole transition table can be
//! exercised without a live connection. [`Session`] wraps it with identity
//! and is the only owner of the accumulated session data.

use std::{
    fmt,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::ProtocolError,
    event::{AgentEvent, OptimizationResult, ProgressUpdate, Question, ToolCallRecord},
    traits::SessionId,
};

/// Message recorded when the answer timeout fires.
pub const ANSWER_TIMEOUT_MESSAGE: &str = "timed out waiting for an answer";

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Running,
    AwaitingAnswer,
    Completed,
    Errored,
    Closed,
}

impl Phase {
    /// `completed`, `errored` and `closed` never go back to an active phase.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Closed)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::AwaitingAnswer => "awaiting_answer",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a session accumulates while it runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionData {
    /// Most recent progress report.
    pub progress: Option<ProgressUpdate>,
    /// Tool calls in arrival order.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Question the agent is waiting on.
    pub pending_question: Option<Question>,
    /// Id of a question answered locally but not yet acknowledged by the agent.
    pub answered_question: Option<String>,
    pub result: Option<Arc<OptimizationResult>>,
    pub error: Option<String>,
    /// `Completed` or `Errored`, once reached. Kept after the session closes.
    pub terminal: Option<Phase>,
    /// Transport dropped before a `completed` or `error` event.
    pub closed_unexpectedly: bool,
    /// Close-frame text or socket error reported by the transport.
    pub close_reason: Option<String>,
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// The channel opened.
    Connected,
    /// A decoded event from the agent.
    Event(AgentEvent),
    /// An answer frame for `question_id` was written to the channel.
    AnswerSent { question_id: String },
    /// The transport closed, with the close-frame text or socket error if any.
    TransportClosed { reason: Option<String> },
    /// The local side cancelled the session.
    Cancelled,
    /// Nobody answered the pending question in time.
    AnswerTimeout,
}

impl Input {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Event(event) => event.kind(),
            Self::AnswerSent { .. } => "answer_sent",
            Self::TransportClosed { .. } => "transport_closed",
            Self::Cancelled => "cancelled",
            Self::AnswerTimeout => "answer_timeout",
        }
    }
}

/// What happened to an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Stale or irrelevant input; nothing changed.
    Ignored,
    /// Protocol violation; nothing changed.
    Rejected(ProtocolError),
}

/// Result of a single transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub phase: Phase,
    pub data: SessionData,
    pub outcome: Outcome,
}

impl Step {
    const fn applied(phase: Phase, data: SessionData) -> Self {
        Self {
            phase,
            data,
            outcome: Outcome::Applied,
        }
    }

    const fn ignored(phase: Phase, data: SessionData) -> Self {
        Self {
            phase,
            data,
            outcome: Outcome::Ignored,
        }
    }

    const fn rejected(phase: Phase, data: SessionData, error: ProtocolError) -> Self {
        Self {
            phase,
            data,
            outcome: Outcome::Rejected(error),
        }
    }
}

/// Compute the next phase and data for `input`.
#[must_use]
pub fn transition(phase: Phase, mut data: SessionData, input: Input) -> Step {
    match (phase, input) {
        (Phase::Closed, _) => Step::ignored(phase, data),
        (_, Input::Cancelled) => Step::applied(Phase::Closed, data),
        (Phase::Completed | Phase::Errored, Input::TransportClosed { reason }) => {
            data.close_reason = reason;
            Step::applied(Phase::Closed, data)
        }
        // Pending question is kept for inspection.
        (_, Input::TransportClosed { reason }) => {
            data.closed_unexpectedly = true;
            data.close_reason = reason;
            Step::applied(Phase::Closed, data)
        }
        (Phase::Idle, Input::Connected) => Step::applied(Phase::Running, SessionData::default()),
        (_, Input::Connected) => Step::ignored(phase, data),
        (Phase::Idle, Input::Event(AgentEvent::Error { message })) => {
            data.error = Some(message);
            data.terminal = Some(Phase::Errored);
            Step::applied(Phase::Errored, data)
        }
        (Phase::Idle, Input::Event(event)) => Step::rejected(
            phase,
            data,
            ProtocolError::NotConnected { kind: event.kind() },
        ),
        (Phase::Completed | Phase::Errored, Input::Event(_)) => Step::ignored(phase, data),
        (Phase::Running | Phase::AwaitingAnswer, Input::Event(event)) => {
            apply_event(phase, data, event)
        }
        (Phase::AwaitingAnswer, Input::AnswerSent { question_id })
            if data
                .pending_question
                .as_ref()
                .is_some_and(|q| q.question_id == question_id) =>
        {
            data.pending_question = None;
            data.answered_question = Some(question_id);
            Step::applied(phase, data)
        }
        (_, Input::AnswerSent { question_id }) => Step::rejected(
            phase,
            data,
            ProtocolError::UnexpectedAnswer { question_id, phase },
        ),
        (Phase::AwaitingAnswer, Input::AnswerTimeout) if data.pending_question.is_some() => {
            data.error = Some(ANSWER_TIMEOUT_MESSAGE.to_string());
            data.terminal = Some(Phase::Errored);
            Step::applied(Phase::Errored, data)
        }
        (_, Input::AnswerTimeout) => Step::ignored(phase, data),
    }
}

fn apply_event(mut phase: Phase, mut data: SessionData, event: AgentEvent) -> Step {
    // First inbound event after an answer acknowledges it.
    if phase == Phase::AwaitingAnswer
        && data.pending_question.is_none()
        && data.answered_question.take().is_some()
    {
        phase = Phase::Running;
    }

    match event {
        AgentEvent::Progress(update) => {
            data.progress = Some(update);
            Step::applied(phase, data)
        }
        AgentEvent::ToolCalled(record) => {
            data.tool_calls.push(record);
            Step::applied(phase, data)
        }
        AgentEvent::Question(question) => {
            if let Some(pending) = &data.pending_question {
                let error = ProtocolError::QuestionWhilePending {
                    pending: pending.question_id.clone(),
                    incoming: question.question_id,
                };
                return Step::rejected(phase, data, error);
            }
            data.pending_question = Some(question);
            Step::applied(Phase::AwaitingAnswer, data)
        }
        AgentEvent::Completed { result } => {
            data.pending_question = None;
            data.result = Some(Arc::new(result));
            data.terminal = Some(Phase::Completed);
            Step::applied(Phase::Completed, data)
        }
        AgentEvent::Error { message } => {
            data.error = Some(message);
            data.terminal = Some(Phase::Errored);
            Step::applied(Phase::Errored, data)
        }
    }
}

/// Read-only copy of a session handed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub created_at: i64,
    pub phase: Phase,
    pub data: SessionData,
}

impl SessionSnapshot {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Closed without a terminal event.
    #[must_use]
    pub const fn closed_unexpectedly(&self) -> bool {
        matches!(self.phase, Phase::Closed) && self.data.closed_unexpectedly
    }

    /// How the run ended: `Completed` or `Errored` even after the channel
    /// closed, `Closed` if it closed first, `None` while still active.
    #[must_use]
    pub fn outcome(&self) -> Option<Phase> {
        self.data
            .terminal
            .or_else(|| self.phase.is_terminal().then_some(self.phase))
    }
}

/// One optimization run.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    created_at: i64,
    phase: Phase,
    data: SessionData,
}

impl Session {
    /// Create an idle session.
    #[must_use]
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: now(),
            phase: Phase::Idle,
            data: SessionData::default(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub const fn created_at(&self) -> i64 {
        self.created_at
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub const fn data(&self) -> &SessionData {
        &self.data
    }

    #[must_use]
    pub const fn pending_question(&self) -> Option<&Question> {
        self.data.pending_question.as_ref()
    }

    /// Feed one input through [`transition`].
    pub fn apply(&mut self, input: Input) -> Outcome {
        let name = input.name();
        let data = std::mem::take(&mut self.data);
        let Step {
            phase,
            data,
            outcome,
        } = transition(self.phase, data, input);

        if phase != self.phase {
            tracing::debug!(session_id = %self.id, from = %self.phase, to = %phase, input = name, "Phase transition");
        }
        match &outcome {
            Outcome::Rejected(e) => {
                tracing::warn!(session_id = %self.id, phase = %phase, "Rejected {name}: {e}");
            }
            Outcome::Ignored => {
                tracing::debug!(session_id = %self.id, phase = %phase, "Ignored stale {name}");
            }
            Outcome::Applied => {}
        }

        self.phase = phase;
        self.data = data;
        outcome
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            created_at: self.created_at,
            phase: self.phase,
            data: self.data.clone(),
        }
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn running() -> Session {
        let mut session = Session::new(SessionId::from("s1"));
        assert_eq!(session.apply(Input::Connected), Outcome::Applied);
        session
    }

    #[test]
    fn test_connect_starts_running() {
        let session = running();
        assert_eq!(session.phase(), Phase::Running);
        assert_eq!(session.data(), &SessionData::default());
    }

    #[test]
    fn test_event_before_connect_rejected() {
        let mut session = Session::new(SessionId::from("s1"));
        let outcome = session.apply(Input::Event(progress(1)));
        assert_eq!(
            outcome,
            Outcome::Rejected(ProtocolError::NotConnected { kind: "progress" })
        );
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.data().progress.is_none());
    }

    #[test]
    fn test_error_before_connect_is_terminal() {
        let mut session = Session::new(SessionId::from("s1"));
        let outcome = session.apply(Input::Event(AgentEvent::Error {
            message: "boom".to_string(),
        }));
        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(session.phase(), Phase::Errored);
        assert_eq!(session.data().error.as_deref(), Some("boom"));

        // Other kinds still need an open channel.
        let step = transition(Phase::Idle, SessionData::default(), Input::Event(completed()));
        assert_eq!(step.phase, Phase::Idle);
        assert_eq!(
            step.outcome,
            Outcome::Rejected(ProtocolError::NotConnected { kind: "completed" })
        );
    }

    #[test]
    fn test_progress_and_tool_calls_accumulate() {
        let mut session = running();
        session.apply(Input::Event(progress(1)));
        session.apply(Input::Event(tool("score")));
        session.apply(Input::Event(progress(2)));
        session.apply(Input::Event(tool("rewrite")));

        assert_eq!(session.phase(), Phase::Running);
        assert_eq!(session.data().progress.as_ref().unwrap().step, 2);
        let tools: Vec<_> = session.data().tool_calls.iter().map(|t| t.tool.as_str()).collect();
        assert_eq!(tools, ["score", "rewrite"]);
    }

    #[test]
    fn test_question_then_answer_then_ack() {
        let mut session = running();
        session.apply(Input::Event(question("q1")));
        assert_eq!(session.phase(), Phase::AwaitingAnswer);
        assert_eq!(session.pending_question().unwrap().question_id, "q1");

        let outcome = session.apply(Input::AnswerSent {
            question_id: "q1".to_string(),
        });
        assert_eq!(outcome, Outcome::Applied);
        assert!(session.pending_question().is_none());
        // Still waiting for the agent to pick the answer up.
        assert_eq!(session.phase(), Phase::AwaitingAnswer);

        session.apply(Input::Event(progress(3)));
        assert_eq!(session.phase(), Phase::Running);
        assert!(session.data().answered_question.is_none());
    }

    #[test]
    fn test_second_question_rejected_while_pending() {
        let mut session = running();
        session.apply(Input::Event(question("q1")));
        let outcome = session.apply(Input::Event(question("q2")));

        assert_eq!(
            outcome,
            Outcome::Rejected(ProtocolError::QuestionWhilePending {
                pending: "q1".to_string(),
                incoming: "q2".to_string(),
            })
        );
        assert_eq!(session.pending_question().unwrap().question_id, "q1");
    }

    #[test]
    fn test_new_question_accepted_after_answer() {
        let mut session = running();
        session.apply(Input::Event(question("q1")));
        session.apply(Input::AnswerSent {
            question_id: "q1".to_string(),
        });
        assert_eq!(session.apply(Input::Event(question("q2"))), Outcome::Applied);
        assert_eq!(session.phase(), Phase::AwaitingAnswer);
        assert_eq!(session.pending_question().unwrap().question_id, "q2");
    }

    #[test]
    fn test_answer_for_wrong_question_rejected() {
        let mut session = running();
        session.apply(Input::Event(question("q1")));
        let outcome = session.apply(Input::AnswerSent {
            question_id: "q2".to_string(),
        });
        assert!(matches!(
            outcome,
            Outcome::Rejected(ProtocolError::UnexpectedAnswer { .. })
        ));
        assert_eq!(session.pending_question().unwrap().question_id, "q1");
    }

    #[test]
    fn test_completed_sets_result() {
        let mut session = running();
        session.apply(Input::Event(completed()));
        assert_eq!(session.phase(), Phase::Completed);
        assert_eq!(session.data().result.as_deref(), Some(&result()));
    }

    #[test]
    fn test_stale_events_after_terminal_ignored() {
        let mut session = running();
        session.apply(Input::Event(AgentEvent::Error {
            message: "agent crashed".to_string(),
        }));
        assert_eq!(session.phase(), Phase::Errored);

        assert_eq!(session.apply(Input::Event(tool("late"))), Outcome::Ignored);
        assert_eq!(session.apply(Input::Event(completed())), Outcome::Ignored);
        assert_eq!(session.phase(), Phase::Errored);
        assert!(session.data().tool_calls.is_empty());
        assert_eq!(session.data().error.as_deref(), Some("agent crashed"));
    }

    #[test]
    fn test_clean_close_after_completed() {
        let mut session = running();
        session.apply(Input::Event(completed()));
        session.apply(Input::TransportClosed { reason: None });
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, Phase::Closed);
        assert!(!snapshot.closed_unexpectedly());
        assert!(snapshot.data.result.is_some());
        assert_eq!(snapshot.outcome(), Some(Phase::Completed));
    }

    #[test]
    fn test_unexpected_close_keeps_pending_question() {
        let mut session = running();
        session.apply(Input::Event(question("q1")));
        session.apply(Input::TransportClosed {
            reason: Some("connection reset".to_string()),
        });

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, Phase::Closed);
        assert!(snapshot.closed_unexpectedly());
        assert_eq!(snapshot.outcome(), Some(Phase::Closed));
        assert_eq!(snapshot.data.close_reason.as_deref(), Some("connection reset"));
        assert_eq!(snapshot.data.pending_question.unwrap().question_id, "q1");
    }

    #[test]
    fn test_cancel_is_not_unexpected() {
        let mut session = running();
        session.apply(Input::Cancelled);
        assert_eq!(session.phase(), Phase::Closed);
        assert!(!session.data().closed_unexpectedly);
        assert_eq!(
            session.apply(Input::TransportClosed { reason: None }),
            Outcome::Ignored
        );
        assert!(!session.data().closed_unexpectedly);
    }

    #[test]
    fn test_answer_timeout_only_while_question_pending() {
        let mut session = running();
        assert_eq!(session.apply(Input::AnswerTimeout), Outcome::Ignored);

        session.apply(Input::Event(question("q1")));
        session.apply(Input::AnswerTimeout);
        assert_eq!(session.phase(), Phase::Errored);
        assert_eq!(session.data().error.as_deref(), Some(ANSWER_TIMEOUT_MESSAGE));
    }

    mod proptests {
        use proptest::prelude::*;
        use serde_json::Map;

        use super::super::fixtures::*;
        use super::super::*;

        fn event_strategy() -> impl Strategy<Value = AgentEvent> {
            prop_oneof![
                4 => (0u32..20, "[a-z ]{0,12}").prop_map(|(step, message)| {
                    AgentEvent::Progress(ProgressUpdate { step, message })
                }),
                4 => ("[a-z_]{1,8}", proptest::option::of("[a-z]{0,6}")).prop_map(
                    |(tool, result_summary)| {
                        AgentEvent::ToolCalled(ToolCallRecord {
                            tool,
                            args: Map::new(),
                            result_summary,
                        })
                    }
                ),
                3 => (0u8..3).prop_map(|n| question(&format!("q{n}"))),
                1 => Just(completed()),
                1 => "[a-z]{1,8}".prop_map(|message| AgentEvent::Error { message }),
            ]
        }

        fn input_strategy() -> impl Strategy<Value = Input> {
            prop_oneof![
                10 => event_strategy().prop_map(Input::Event),
                3 => (0u8..3).prop_map(|n| Input::AnswerSent { question_id: format!("q{n}") }),
                1 => Just(Input::AnswerTimeout),
                1 => Just(Input::TransportClosed { reason: None }),
                1 => Just(Input::Cancelled),
                1 => Just(Input::Connected),
            ]
        }

        proptest! {
            #[test]
            fn second_question_never_overwrites_pending(
                inputs in proptest::collection::vec(input_strategy(), 0..60)
            ) {
                let mut session = Session::new(SessionId::from("p"));
                session.apply(Input::Connected);
                for input in inputs {
                    let before = session.pending_question().cloned();
                    let was_active = !session.phase().is_terminal();
                    let is_question = matches!(input, Input::Event(AgentEvent::Question(_)));
                    let outcome = session.apply(input);
                    if is_question && was_active && before.is_some() {
                        let rejected = matches!(
                            outcome,
                            Outcome::Rejected(ProtocolError::QuestionWhilePending { .. })
                        );
                        prop_assert!(rejected);
                        prop_assert_eq!(session.pending_question(), before.as_ref());
                    }
                    if session.pending_question().is_some() && !session.phase().is_terminal() {
                        prop_assert_eq!(session.phase(), Phase::AwaitingAnswer);
                    }
                }
            }

            #[test]
            fn tool_calls_match_arrival_order(
                events in proptest::collection::vec(event_strategy(), 0..60)
            ) {
                let mut session = Session::new(SessionId::from("p"));
                session.apply(Input::Connected);
                let expected: Vec<ToolCallRecord> = events
                    .iter()
                    .take_while(|e| !e.is_terminal())
                    .filter_map(|e| match e {
                        AgentEvent::ToolCalled(record) => Some(record.clone()),
                        _ => None,
                    })
                    .collect();
                for event in events {
                    session.apply(Input::Event(event));
                }
                prop_assert_eq!(&session.data().tool_calls, &expected);
            }

            #[test]
            fn terminal_phases_are_final(
                inputs in proptest::collection::vec(input_strategy(), 0..60)
            ) {
                let mut session = Session::new(SessionId::from("p"));
                session.apply(Input::Connected);
                for input in inputs {
                    let phase = session.phase();
                    let data = session.data().clone();
                    let closes = matches!(input, Input::TransportClosed { .. } | Input::Cancelled);
                    session.apply(input);
                    if phase == Phase::Closed || (phase.is_terminal() && !closes) {
                        prop_assert_eq!(session.phase(), phase);
                        prop_assert_eq!(session.data(), &data);
                    }
                    if phase.is_terminal() {
                        prop_assert!(session.phase().is_terminal());
                    }
                }
            }
        }
    }
}
