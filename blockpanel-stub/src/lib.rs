use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade, ws::Message},
    response::IntoResponse,
    routing::{get, post},
};
use blockpanel_core::{
    BackendStatus, COMMAND_PATH, CONSOLE_HISTORY_LINES, CONSOLE_WS_PATH, CommandRequest,
    ConsoleLine, LogLevel, START_PATH, STATUS_PATH, STATUS_RECENT_LOG_LINES, STOP_PATH,
    ServerPhase,
};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpListener,
    sync::{RwLock, broadcast},
};
use tracing::{info, warn};

#[derive(Debug)]
struct StubBackend {
    phase: ServerPhase,
    history: VecDeque<ConsoleLine>,
}

/// In-memory stand-in for the panel backend.
#[derive(Debug, Clone)]
pub struct StubState {
    inner: Arc<RwLock<StubBackend>>,
    console_tx: broadcast::Sender<ConsoleLine>,
    stop_requests: Arc<AtomicUsize>,
    status_requests: Arc<AtomicUsize>,
    stop_delay: Option<Duration>,
}

impl StubState {
    #[must_use]
    pub fn new() -> Self {
        let (console_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(RwLock::new(StubBackend {
                phase: ServerPhase::Offline,
                history: VecDeque::new(),
            })),
            console_tx,
            stop_requests: Arc::new(AtomicUsize::new(0)),
            status_requests: Arc::new(AtomicUsize::new(0)),
            stop_delay: None,
        }
    }

    /// Hold every `POST /stop` response for `delay`, simulating a backend
    /// that is slow to persist.
    #[must_use]
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = Some(delay);
        self
    }

    pub fn stop_requests(&self) -> usize {
        self.stop_requests.load(Ordering::SeqCst)
    }

    pub fn status_requests(&self) -> usize {
        self.status_requests.load(Ordering::SeqCst)
    }

    pub async fn phase(&self) -> ServerPhase {
        self.inner.read().await.phase
    }

    pub async fn push_log(&self, line: ConsoleLine) {
        let mut backend = self.inner.write().await;
        backend.history.push_back(line.clone());
        while backend.history.len() > CONSOLE_HISTORY_LINES {
            backend.history.pop_front();
        }
        // Broadcast under the lock so a console attaching concurrently sees
        // each line exactly once: in its replay or live. No subscribers is
        // fine; history replays on connect.
        let _ = self.console_tx.send(line);
    }

    /// Snapshot the history and subscribe to new lines atomically with
    /// respect to [`StubState::push_log`].
    async fn attach_console(&self) -> (Vec<ConsoleLine>, broadcast::Receiver<ConsoleLine>) {
        let backend = self.inner.read().await;
        let live = self.console_tx.subscribe();
        (backend.history.iter().cloned().collect(), live)
    }

    async fn set_phase(&self, phase: ServerPhase) {
        self.inner.write().await.phase = phase;
    }
}

impl Default for StubState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn build_router(state: StubState) -> Router {
    Router::new()
        .route(STATUS_PATH, get(status_handler))
        .route(START_PATH, post(start_handler))
        .route(STOP_PATH, post(stop_handler))
        .route(COMMAND_PATH, post(command_handler))
        .route(CONSOLE_WS_PATH, get(console_handler))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: StubState) -> Result<(), String> {
    info!(
        "stub backend listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_owned())
    );
    axum::serve(listener, build_router(state))
        .await
        .map_err(|err| err.to_string())
}

async fn status_handler(State(state): State<StubState>) -> impl IntoResponse {
    state.status_requests.fetch_add(1, Ordering::SeqCst);
    let backend = state.inner.read().await;
    let skip = backend
        .history
        .len()
        .saturating_sub(STATUS_RECENT_LOG_LINES);
    let online = backend.phase == ServerPhase::Online;
    Json(BackendStatus {
        status: backend.phase,
        pid: online.then_some(std::process::id()),
        server_type: Some("vanilla".to_owned()),
        minecraft_version: Some("1.21.1".to_owned()),
        cpu: Some(0.0),
        ram: Some("0.0/4.0 GB".to_owned()),
        uptime: Some("0h 0m".to_owned()),
        recent_logs: backend.history.iter().skip(skip).cloned().collect(),
    })
}

async fn start_handler(State(state): State<StubState>) -> impl IntoResponse {
    state.set_phase(ServerPhase::Online).await;
    state
        .push_log(ConsoleLine::new("Server started", LogLevel::Success))
        .await;
    Json(serde_json::json!({"message": "Start command issued"}))
}

async fn stop_handler(State(state): State<StubState>) -> impl IntoResponse {
    let count = state.stop_requests.fetch_add(1, Ordering::SeqCst) + 1;
    info!(count, "stop requested");
    if let Some(delay) = state.stop_delay {
        tokio::time::sleep(delay).await;
    }
    state.set_phase(ServerPhase::Offline).await;
    state
        .push_log(ConsoleLine::new("Server stopped", LogLevel::Info))
        .await;
    Json(serde_json::json!({"message": "Stop command issued"}))
}

async fn command_handler(
    State(state): State<StubState>,
    Json(request): Json<CommandRequest>,
) -> impl IntoResponse {
    run_command(&state, &request.command).await;
    Json(serde_json::json!({"message": "Command sent"}))
}

async fn run_command(state: &StubState, command: &str) {
    let command = command.trim();
    if command.is_empty() {
        return;
    }
    state
        .push_log(ConsoleLine::new(format!("[stub] ran: {command}"), LogLevel::Info))
        .await;
}

async fn console_handler(
    ws: WebSocketUpgrade,
    State(state): State<StubState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        if let Err(err) = handle_console(state, socket).await {
            warn!("console session ended with error: {}", err);
        }
    })
}

async fn handle_console(
    state: StubState,
    socket: axum::extract::ws::WebSocket,
) -> Result<(), String> {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (replay, mut live) = state.attach_console().await;
    for line in replay {
        send_line(&mut ws_sender, &line).await?;
    }

    loop {
        tokio::select! {
            line = live.recv() => match line {
                Ok(line) => send_line(&mut ws_sender, &line).await?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "console subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => run_command(&state, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(err.to_string()),
            },
        }
    }
    Ok(())
}

async fn send_line<S>(sender: &mut S, line: &ConsoleLine) -> Result<(), String>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let payload = serde_json::to_string(line).map_err(|err| err.to_string())?;
    sender
        .send(Message::Text(payload.into()))
        .await
        .map_err(|err| err.to_string())
}
