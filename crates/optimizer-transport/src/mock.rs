//! Scripted mock agent (feature: mock-agent).
//!
//! Serves the start endpoint and the session channel, replaying a fixed
//! [`Script`] on every connection. Client frames are recorded so tests can
//! assert on exactly what was sent.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use optimizer_core::{AgentEvent, TaskSpec};
use tokio::{sync::mpsc, task::JoinHandle};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::protocol::{ClientFrame, decode_client_frame, encode_event};

/// One step of a mock agent run.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Send an event.
    Send(AgentEvent),
    /// Send a raw text frame, typically malformed.
    Raw(String),
    /// Block until the client sends an answer frame.
    AwaitAnswer,
    Pause(Duration),
    /// Drop the connection without a close frame.
    Drop,
    /// Send a close frame and stop.
    Close,
}

/// Ordered steps replayed on each connection.
///
/// A script that runs out of steps ends with a clean close.
#[derive(Debug, Clone, Default)]
pub struct Script {
    steps: Vec<ScriptStep>,
}

impl Script {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn send(mut self, event: AgentEvent) -> Self {
        self.steps.push(ScriptStep::Send(event));
        self
    }

    #[must_use]
    pub fn raw(mut self, frame: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Raw(frame.into()));
        self
    }

    #[must_use]
    pub fn await_answer(mut self) -> Self {
        self.steps.push(ScriptStep::AwaitAnswer);
        self
    }

    #[must_use]
    pub fn pause(mut self, duration: Duration) -> Self {
        self.steps.push(ScriptStep::Pause(duration));
        self
    }

    #[must_use]
    pub fn drop_connection(mut self) -> Self {
        self.steps.push(ScriptStep::Drop);
        self
    }

    #[must_use]
    pub fn close(mut self) -> Self {
        self.steps.push(ScriptStep::Close);
        self
    }

    #[must_use]
    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }
}

struct MockState {
    script: Script,
    received: Mutex<Vec<ClientFrame>>,
    tasks: Mutex<Vec<TaskSpec>>,
    connections: AtomicUsize,
}

impl MockState {
    fn record_frame(&self, frame: ClientFrame) {
        self.received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame);
    }
}

/// Mock agent server.
pub struct MockAgent {
    state: Arc<MockState>,
}

impl MockAgent {
    #[must_use]
    pub fn new(script: Script) -> Self {
        Self {
            state: Arc::new(MockState {
                script,
                received: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                connections: AtomicUsize::new(0),
            }),
        }
    }

    /// Router serving the start endpoint and the session channel.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/optimize/start", post(start_handler))
            .route("/ws/optimize/{session_id}", get(ws_handler))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            )
            .with_state(Arc::clone(&self.state))
    }

    /// Serve on an ephemeral localhost port.
    ///
    /// # Errors
    /// Returns error if the listener cannot bind.
    pub async fn serve(self) -> std::io::Result<RunningMockAgent> {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;
        let app = self.router();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Mock agent stopped: {e}");
            }
        });
        tracing::info!("Mock agent listening on {addr}");
        Ok(RunningMockAgent {
            addr,
            state: self.state,
            task,
        })
    }
}

/// A mock agent bound to a local port. Stops when dropped.
pub struct RunningMockAgent {
    addr: SocketAddr,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl RunningMockAgent {
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for the start call.
    #[must_use]
    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Base URL for channels.
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Client frames received so far, across all connections.
    #[must_use]
    pub fn received(&self) -> Vec<ClientFrame> {
        self.state
            .received
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Tasks accepted by the start endpoint.
    #[must_use]
    pub fn started_tasks(&self) -> Vec<TaskSpec> {
        self.state
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::Acquire)
    }
}

impl Drop for RunningMockAgent {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn start_handler(
    State(state): State<Arc<MockState>>,
    Json(task): Json<TaskSpec>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    task.validate()
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    let session_id = uuid::Uuid::new_v4().to_string();
    tracing::debug!(%session_id, mode = ?task.mode, "Mock session allocated");
    state
        .tasks
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(task);
    Ok(Json(serde_json::json!({ "session_id": session_id })))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    State(state): State<Arc<MockState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| play(socket, state, session_id))
}

async fn play(socket: WebSocket, state: Arc<MockState>, session_id: String) {
    state.connections.fetch_add(1, Ordering::AcqRel);
    let (mut sender, mut receiver) = socket.split();

    // Record every client frame, whenever it arrives.
    let (answers_tx, mut answers_rx) = mpsc::unbounded_channel();
    let recorder = Arc::clone(&state);
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match decode_client_frame(text.as_str()) {
                    Ok(frame) => {
                        recorder.record_frame(frame.clone());
                        let _ = answers_tx.send(frame);
                    }
                    Err(e) => tracing::warn!("Mock agent got invalid frame: {e}"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    for step in state.script.steps() {
        match step {
            ScriptStep::Send(event) => {
                let json = match encode_event(event) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize event: {e}");
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            ScriptStep::Raw(text) => {
                if sender.send(Message::Text(text.clone().into())).await.is_err() {
                    break;
                }
            }
            ScriptStep::AwaitAnswer => {
                let Some(frame) = answers_rx.recv().await else {
                    break;
                };
                tracing::debug!(%session_id, question_id = frame.question_id(), "Mock agent resumed");
            }
            ScriptStep::Pause(duration) => tokio::time::sleep(*duration).await,
            ScriptStep::Drop => {
                tracing::debug!(%session_id, "Mock agent dropping connection");
                reader.abort();
                return;
            }
            ScriptStep::Close => break,
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    // Let the client finish the close handshake before the socket goes away.
    let _ = tokio::time::timeout(Duration::from_secs(1), reader).await;
}
