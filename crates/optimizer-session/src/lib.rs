//! Session orchestration for interactive optimization.
//!
//! Provides:
//! - `SessionManager` - Start sessions and track the running ones
//! - `SessionHandle` - Observe a session and answer its questions
//! - `HttpInitiator` - Allocate sessions over HTTP
//! - Result library implementations (memory)

mod actor;
pub mod answer;
pub mod config;
pub mod handle;
pub mod initiator;
pub mod library;
pub mod manager;

pub use answer::{AnswerSubmitter, SubmitError, validate_answer};
pub use config::{ClientConfig, ConfigError};
pub use handle::SessionHandle;
pub use initiator::HttpInitiator;
#[cfg(feature = "memory")]
pub use library::MemoryLibrary;
pub use manager::{ManagerError, SessionManager};
