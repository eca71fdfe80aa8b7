//! Per-kind callbacks invoked by the channel transport.

use optimizer_core::{AgentEvent, OptimizationResult, ProgressUpdate, ProtocolError, Question, ToolCallRecord};
use thiserror::Error;

/// How the channel ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// No `completed`/`error` event was seen and the client did not ask to close.
    pub unexpected: bool,
    /// Close frame reason or socket error, if any.
    pub reason: Option<String>,
}

/// Non-fatal transport error delivered to [`ChannelHandler::on_transport_error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Callbacks for one channel, one per event kind.
///
/// Callbacks run on the connection task, one at a time, in frame arrival
/// order. Every method defaults to a no-op.
pub trait ChannelHandler: Send + 'static {
    fn on_progress(&mut self, _update: ProgressUpdate) {}

    fn on_tool_called(&mut self, _record: ToolCallRecord) {}

    fn on_question(&mut self, _question: Question) {}

    fn on_completed(&mut self, _result: OptimizationResult) {}

    fn on_error(&mut self, _message: String) {}

    /// Called exactly once, after the last event.
    fn on_close(&mut self, _close: CloseInfo) {}

    fn on_transport_error(&mut self, _error: TransportError) {}
}

/// Route a decoded event to its callback.
pub fn dispatch<H: ChannelHandler + ?Sized>(handler: &mut H, event: AgentEvent) {
    match event {
        AgentEvent::Progress(update) => handler.on_progress(update),
        AgentEvent::ToolCalled(record) => handler.on_tool_called(record),
        AgentEvent::Question(question) => handler.on_question(question),
        AgentEvent::Completed { result } => handler.on_completed(result),
        AgentEvent::Error { message } => handler.on_error(message),
    }
}
