//! Per-session task.
//!
//! The actor is the only owner of a [`Session`]. Channel callbacks, answer
//! submissions, cancellation and the answer timeout all reach it as
//! messages, so inputs are applied one at a time in arrival order.
//! Subscribers only ever see snapshots and the update log.

use std::{sync::Arc, time::Duration};

use optimizer_core::{
    AgentEvent, Input, OptimizationResult, Outcome, Phase, ProgressUpdate, Question, ResultLibrary,
    Session, SessionId, SessionSnapshot, SessionUpdate, ToolCallRecord, UpdateStore,
};
use optimizer_transport::{ChannelHandler, ClientFrame, CloseInfo, FrameSink, TransportError};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::Instant,
};

use crate::{
    answer::{AnswerSubmitter, SubmitError, validate_answer},
    handle::SessionHandle,
};

/// Request from a handle to the actor.
pub(crate) enum Command {
    Submit {
        question_id: String,
        text: String,
        reply: oneshot::Sender<Result<(), SubmitError>>,
    },
    Cancel,
}

/// Something that arrived on the channel.
#[derive(Debug)]
pub(crate) enum Inbound {
    Input(Input),
    TransportError(TransportError),
}

/// Channel handler that forwards every callback to the actor.
pub(crate) struct InputForwarder {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl InputForwarder {
    pub(crate) const fn new(tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { tx }
    }

    fn forward(&self, input: Input) {
        if self.tx.send(Inbound::Input(input)).is_err() {
            tracing::debug!("Session task gone, dropping channel input");
        }
    }
}

impl ChannelHandler for InputForwarder {
    fn on_progress(&mut self, update: ProgressUpdate) {
        self.forward(Input::Event(AgentEvent::Progress(update)));
    }

    fn on_tool_called(&mut self, record: ToolCallRecord) {
        self.forward(Input::Event(AgentEvent::ToolCalled(record)));
    }

    fn on_question(&mut self, question: Question) {
        self.forward(Input::Event(AgentEvent::Question(question)));
    }

    fn on_completed(&mut self, result: OptimizationResult) {
        self.forward(Input::Event(AgentEvent::Completed { result }));
    }

    fn on_error(&mut self, message: String) {
        self.forward(Input::Event(AgentEvent::Error { message }));
    }

    fn on_close(&mut self, close: CloseInfo) {
        self.forward(Input::TransportClosed {
            reason: close.reason,
        });
    }

    fn on_transport_error(&mut self, error: TransportError) {
        let _ = self.tx.send(Inbound::TransportError(error));
    }
}

/// Per-session settings.
#[derive(Clone, Default)]
pub(crate) struct ActorOptions {
    pub answer_timeout: Option<Duration>,
    pub library: Option<Arc<dyn ResultLibrary>>,
}

struct SessionActor<S> {
    session: Session,
    sink: S,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    commands: mpsc::UnboundedReceiver<Command>,
    snapshots: watch::Sender<SessionSnapshot>,
    updates: Arc<UpdateStore>,
    options: ActorOptions,
    answer_deadline: Option<Instant>,
}

/// Spawn the task for a session whose channel is already open.
pub(crate) fn spawn_session<S>(
    id: SessionId,
    sink: S,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    options: ActorOptions,
) -> SessionHandle
where
    S: FrameSink + 'static,
{
    let session = Session::new(id.clone());
    let (snapshots, snapshot_rx) = watch::channel(session.snapshot());
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let updates = Arc::new(UpdateStore::new());

    let actor = SessionActor {
        session,
        sink,
        inbound,
        commands,
        snapshots,
        updates: Arc::clone(&updates),
        options,
        answer_deadline: None,
    };
    tokio::spawn(actor.run());

    let submitter = AnswerSubmitter::new(commands_tx.clone(), snapshot_rx.clone());
    SessionHandle::new(id, commands_tx, snapshot_rx, updates, submitter)
}

impl<S: FrameSink> SessionActor<S> {
    async fn run(mut self) {
        self.apply(Input::Connected);

        while self.session.phase() != Phase::Closed {
            let deadline = self.answer_deadline;
            tokio::select! {
                inbound = self.inbound.recv() => match inbound {
                    Some(Inbound::Input(input)) => self.apply(input),
                    Some(Inbound::TransportError(e)) => {
                        tracing::warn!(session_id = %self.session.id(), "Transport error: {e}");
                        self.updates.push(SessionUpdate::Rejected { reason: e.to_string() });
                    }
                    None => self.apply(Input::TransportClosed { reason: None }),
                },
                command = self.commands.recv() => match command {
                    Some(Command::Submit { question_id, text, reply }) => {
                        let result = self.submit(&question_id, &text).await;
                        let _ = reply.send(result);
                    }
                    Some(Command::Cancel) | None => self.apply(Input::Cancelled),
                },
                () = wait_until(deadline) => self.apply(Input::AnswerTimeout),
            }
        }

        self.sink.close();
        self.updates.push_finished();
        tracing::debug!(session_id = %self.session.id(), "Session task finished");
    }

    async fn submit(&mut self, question_id: &str, text: &str) -> Result<(), SubmitError> {
        let answer = validate_answer(&self.session, question_id, text)?;
        self.sink.send(&ClientFrame::from(answer)).await?;
        tracing::debug!(session_id = %self.session.id(), question_id, "Answer sent");
        self.apply(Input::AnswerSent {
            question_id: question_id.to_string(),
        });
        Ok(())
    }

    fn apply(&mut self, input: Input) {
        let from = self.session.phase();
        let event = match &input {
            Input::Event(event) => Some(event.clone()),
            _ => None,
        };
        let answered = match &input {
            Input::AnswerSent { question_id } => Some(question_id.clone()),
            _ => None,
        };

        match self.session.apply(input) {
            Outcome::Applied => {
                if let Some(event) = event {
                    self.updates.push_event(event);
                }
                if let Some(question_id) = answered {
                    self.updates.push(SessionUpdate::AnswerSent { question_id });
                }
            }
            Outcome::Rejected(e) => {
                self.updates.push(SessionUpdate::Rejected {
                    reason: e.to_string(),
                });
            }
            Outcome::Ignored => {}
        }

        let to = self.session.phase();
        if from != to {
            self.updates.push_phase(from, to);
            self.entered(to);
        }
        self.rearm_deadline();
        self.snapshots.send_replace(self.session.snapshot());
    }

    fn entered(&self, phase: Phase) {
        match phase {
            Phase::Completed => {
                if let (Some(library), Some(result)) =
                    (&self.options.library, &self.session.data().result)
                {
                    let library = Arc::clone(library);
                    let result = Arc::clone(result);
                    let session_id = self.session.id().clone();
                    tokio::spawn(async move {
                        match library.save(&session_id, result).await {
                            Ok(entry) => {
                                tracing::info!(%session_id, entry_id = %entry.id, "Result saved to library");
                            }
                            Err(e) => tracing::error!(%session_id, "Failed to save result: {e}"),
                        }
                    });
                }
                self.sink.close();
            }
            Phase::Errored => {
                if let Some(error) = &self.session.data().error {
                    tracing::warn!(session_id = %self.session.id(), "Session errored: {error}");
                }
                self.sink.close();
            }
            Phase::Closed => {
                let data = self.session.data();
                let unexpected = data.closed_unexpectedly;
                let reason = data.close_reason.clone();
                if unexpected {
                    tracing::warn!(session_id = %self.session.id(), ?reason, "Connection closed unexpectedly");
                }
                self.updates.push(SessionUpdate::Closed { unexpected, reason });
            }
            Phase::Idle | Phase::Running | Phase::AwaitingAnswer => {}
        }
    }

    fn rearm_deadline(&mut self) {
        self.answer_deadline = match (self.options.answer_timeout, self.session.pending_question()) {
            (Some(timeout), Some(_)) if self.session.phase() == Phase::AwaitingAnswer => {
                Some(self.answer_deadline.unwrap_or_else(|| Instant::now() + timeout))
            }
            _ => None,
        };
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
