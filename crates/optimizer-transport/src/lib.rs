//! Channel transport for optimization sessions.
//!
//! Provides:
//! - Wire protocol (JSON frames, one event per frame)
//! - WebSocket channel with per-kind handler callbacks
//! - Scripted mock agent (feature: mock-agent)

pub mod handler;
pub mod protocol;
pub mod websocket;

#[cfg(feature = "mock-agent")]
pub mod mock;

pub use handler::{ChannelHandler, CloseInfo, TransportError};
pub use protocol::ClientFrame;
pub use websocket::{ChannelHandle, Connector, FrameSink};
