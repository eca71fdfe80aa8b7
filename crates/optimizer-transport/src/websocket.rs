//! WebSocket channel transport.
//!
//! One physical connection per [`ChannelHandle`]. A single task owns the
//! socket: it decodes inbound frames and hands them to the
//! [`ChannelHandler`] in arrival order, and it writes outbound frames queued
//! by [`ChannelHandle::send`].

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use optimizer_core::{AgentEvent, ChannelError, ProtocolError, SessionId};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::{
    handler::{ChannelHandler, CloseInfo, TransportError, dispatch},
    protocol::{ClientFrame, decode_event, decode_event_bytes, encode_client_frame},
};

/// How long the connection task waits for the close frame to go out.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

enum Command {
    Send {
        text: String,
        ack: oneshot::Sender<Result<(), ChannelError>>,
    },
    Close,
}

/// Outbound side of a channel, as seen by the session layer.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Write a frame. Resolves once the frame is on the socket.
    async fn send(&self, frame: &ClientFrame) -> Result<(), ChannelError>;

    /// Request close. Idempotent and non-blocking.
    fn close(&self);
}

/// Opens session channels under a base URL.
#[derive(Debug, Clone)]
pub struct Connector {
    ws_base_url: String,
    connect_timeout: Duration,
}

impl Connector {
    /// Create a connector for `ws_base_url` (e.g. `ws://127.0.0.1:3000`).
    #[must_use]
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Channel URL for a session.
    #[must_use]
    pub fn session_url(&self, session_id: &SessionId) -> String {
        format!(
            "{}/ws/optimize/{session_id}",
            self.ws_base_url.trim_end_matches('/')
        )
    }

    /// Open the channel for `session_id`.
    ///
    /// # Errors
    /// Returns [`ChannelError::Connect`] if the connection cannot be established.
    pub async fn connect<H: ChannelHandler>(
        &self,
        session_id: &SessionId,
        handler: H,
    ) -> Result<ChannelHandle, ChannelError> {
        connect_url(&self.session_url(session_id), handler, self.connect_timeout).await
    }
}

/// Open a channel at an explicit URL.
///
/// # Errors
/// Returns [`ChannelError::Connect`] on handshake failure or timeout.
pub async fn connect_url<H: ChannelHandler>(
    url: &str,
    handler: H,
    connect_timeout: Duration,
) -> Result<ChannelHandle, ChannelError> {
    let (ws, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
        .await
        .map_err(|_| ChannelError::Connect(format!("timed out after {connect_timeout:?}")))?
        .map_err(|e| ChannelError::Connect(e.to_string()))?;

    tracing::debug!(url, "Channel connected");

    let (commands, commands_rx) = mpsc::unbounded_channel();
    let open = Arc::new(AtomicBool::new(true));
    tokio::spawn(run_connection(ws, handler, commands_rx, Arc::clone(&open)));

    Ok(ChannelHandle {
        commands,
        open,
        closing: AtomicBool::new(false),
    })
}

/// Handle to one open channel.
///
/// Dropping the handle closes the channel.
pub struct ChannelHandle {
    commands: mpsc::UnboundedSender<Command>,
    open: Arc<AtomicBool>,
    closing: AtomicBool,
}

impl ChannelHandle {
    /// Whether frames can still be sent.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.closing.load(Ordering::Acquire)
    }

    /// Write a frame to the channel.
    ///
    /// # Errors
    /// Returns [`ChannelError::Closed`] if the channel is closed (nothing is
    /// sent), or [`ChannelError::Send`] if the socket write fails.
    pub async fn send(&self, frame: &ClientFrame) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed);
        }
        let text = encode_client_frame(frame).map_err(|e| ChannelError::Send(e.to_string()))?;
        let (ack, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Send { text, ack })
            .map_err(|_| ChannelError::Closed)?;
        ack_rx.await.map_err(|_| ChannelError::Closed)?
    }

    /// Close the channel.
    ///
    /// Safe to call any number of times, including after a remote close.
    /// Does not wait for the close handshake.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.commands.send(Command::Close);
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl FrameSink for ChannelHandle {
    async fn send(&self, frame: &ClientFrame) -> Result<(), ChannelError> {
        Self::send(self, frame).await
    }

    fn close(&self) {
        Self::close(self);
    }
}

async fn run_connection<H: ChannelHandler>(
    ws: WsStream,
    mut handler: H,
    mut commands: mpsc::UnboundedReceiver<Command>,
    open: Arc<AtomicBool>,
) {
    let (mut sink, mut stream) = ws.split();
    let mut saw_terminal = false;

    let close = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send { text, ack }) => {
                    let result = sink
                        .send(Message::Text(text.into()))
                        .await
                        .map_err(|e| ChannelError::Send(e.to_string()));
                    if let Err(e) = &result {
                        tracing::error!("Failed to send frame: {e}");
                    }
                    let _ = ack.send(result);
                }
                Some(Command::Close) | None => {
                    open.store(false, Ordering::Release);
                    match tokio::time::timeout(CLOSE_GRACE, sink.send(Message::Close(None))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::debug!("Close frame not sent: {e}"),
                        Err(_) => tracing::debug!("Close frame timed out"),
                    }
                    break CloseInfo { unexpected: false, reason: None };
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    deliver(&mut handler, decode_event(text.as_str()), &mut saw_terminal);
                }
                Some(Ok(Message::Binary(data))) => {
                    deliver(&mut handler, decode_event_bytes(&data), &mut saw_terminal);
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty());
                    break CloseInfo { unexpected: !saw_terminal, reason };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Channel read error: {e}");
                    break CloseInfo { unexpected: !saw_terminal, reason: Some(e.to_string()) };
                }
                None => break CloseInfo { unexpected: !saw_terminal, reason: None },
            },
        }
    };

    open.store(false, Ordering::Release);
    if close.unexpected {
        tracing::warn!(reason = ?close.reason, "Channel closed unexpectedly");
    } else {
        tracing::debug!("Channel closed");
    }
    handler.on_close(close);
}

fn deliver<H: ChannelHandler>(
    handler: &mut H,
    decoded: Result<AgentEvent, ProtocolError>,
    saw_terminal: &mut bool,
) {
    match decoded {
        Ok(event) => {
            tracing::trace!(kind = event.kind(), "Frame received");
            *saw_terminal |= event.is_terminal();
            dispatch(handler, event);
        }
        Err(e) => {
            tracing::warn!("Dropping malformed frame: {e}");
            handler.on_transport_error(TransportError::Protocol(e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    impl ChannelHandler for Noop {}

    #[test]
    fn test_session_url() {
        let connector = Connector::new("ws://localhost:3000/");
        assert_eq!(
            connector.session_url(&SessionId::from("abc")),
            "ws://localhost:3000/ws/optimize/abc"
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 9 (discard) is essentially never listening locally.
        let result = connect_url("ws://127.0.0.1:9/ws", Noop, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ChannelError::Connect(_))));
    }
}
