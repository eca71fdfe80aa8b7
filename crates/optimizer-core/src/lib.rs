//! Core types for interactive optimization sessions.
//!
//! This crate provides the transport-independent building blocks:
//! - `AgentEvent` - Typed event vocabulary exchanged with the agent
//! - `Session` / `transition` - Phase tracking as a pure state machine
//! - `UpdateStore` - Broadcast + history of session updates
//! - `TaskSpec` - What a session is asked to optimize
//! - Initiator and result library traits

pub mod error;
pub mod event;
pub mod machine;
pub mod task;
pub mod traits;
pub mod update;
pub mod update_store;

pub use error::{ChannelError, InitiateError, InvalidAnswer, ProtocolError};
pub use event::{AgentEvent, Answer, OptimizationResult, ProgressUpdate, Question, ToolCallRecord};
pub use machine::{Input, Outcome, Phase, Session, SessionData, SessionSnapshot, transition};
pub use task::{Attachment, OptimizeMode, TaskSpec};
pub use traits::{ResultLibrary, SessionId, SessionInitiator};
pub use update::SessionUpdate;
pub use update_store::UpdateStore;
