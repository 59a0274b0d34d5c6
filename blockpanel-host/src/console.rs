use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use blockpanel_core::{CONSOLE_HISTORY_LINES, ConsoleLine, LogLevel, ShutdownState};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_BASE_MS: u64 = 500;
const RECONNECT_MAX_MS: u64 = 5_000;

type ConsoleSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bounded console history shared between the stream task and the UI.
#[derive(Debug, Clone)]
pub struct ConsoleBuffer {
    lines: Arc<Mutex<VecDeque<ConsoleLine>>>,
    connected: Arc<AtomicBool>,
    capacity: usize,
}

impl ConsoleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            connected: Arc::new(AtomicBool::new(false)),
            capacity,
        }
    }

    pub fn push(&self, line: ConsoleLine) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        lines.push_back(line);
        while lines.len() > self.capacity {
            lines.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<ConsoleLine> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

impl Default for ConsoleBuffer {
    fn default() -> Self {
        Self::new(CONSOLE_HISTORY_LINES)
    }
}

pub fn reconnect_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let ms = RECONNECT_BASE_MS
        .saturating_mul(1_u64 << exponent)
        .min(RECONNECT_MAX_MS);
    Duration::from_millis(ms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Disconnected,
    Shutdown,
}

fn shutdown_began(
    changed: Result<(), watch::error::RecvError>,
    state: &watch::Receiver<ShutdownState>,
) -> bool {
    changed.is_err() || !state.borrow().is_running()
}

/// Keep a console websocket open until shutdown begins, reconnecting with
/// backoff. Commands typed while disconnected are answered locally.
pub async fn run_console_stream(
    url: String,
    buffer: ConsoleBuffer,
    mut commands: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<ShutdownState>,
) {
    let mut commands_open = true;
    let mut attempt: u32 = 0;

    loop {
        if !shutdown.borrow().is_running() {
            break;
        }

        match timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
            Ok(Ok((socket, _))) => {
                info!(%url, "console connected");
                attempt = 0;
                buffer.set_connected(true);
                let end =
                    pump_console(socket, &buffer, &mut commands, &mut commands_open, &mut shutdown)
                        .await;
                buffer.set_connected(false);
                if end == SessionEnd::Shutdown {
                    break;
                }
                info!("console disconnected");
            }
            Ok(Err(err)) => debug!(%url, "console connect failed: {err}"),
            Err(_) => debug!(%url, "console connect timed out after {:?}", CONNECT_TIMEOUT),
        }

        attempt = attempt.saturating_add(1);
        let backoff = tokio::time::sleep(reconnect_delay(attempt));
        tokio::pin!(backoff);
        loop {
            tokio::select! {
                _ = &mut backoff => break,
                command = commands.recv(), if commands_open => match command {
                    Some(_) => buffer.push(ConsoleLine::new(
                        "Error: Not connected to console.",
                        LogLevel::Error,
                    )),
                    None => commands_open = false,
                },
                changed = shutdown.changed() => {
                    if shutdown_began(changed, &shutdown) {
                        debug!("console stream stopped");
                        return;
                    }
                }
            }
        }
    }
    debug!("console stream stopped");
}

async fn pump_console(
    socket: ConsoleSocket,
    buffer: &ConsoleBuffer,
    commands: &mut mpsc::UnboundedReceiver<String>,
    commands_open: &mut bool,
    shutdown: &mut watch::Receiver<ShutdownState>,
) -> SessionEnd {
    let (mut write, mut read) = socket.split();
    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    buffer.push(ConsoleLine::from_frame(text.as_str()));
                }
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Disconnected,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("console receive error: {err}");
                    return SessionEnd::Disconnected;
                }
            },
            command = commands.recv(), if *commands_open => match command {
                Some(command) => {
                    buffer.push(ConsoleLine::new(format!("> {command}"), LogLevel::Input));
                    if let Err(err) = write.send(Message::Text(command.into())).await {
                        warn!("console send error: {err}");
                        return SessionEnd::Disconnected;
                    }
                }
                None => *commands_open = false,
            },
            changed = shutdown.changed() => {
                if shutdown_began(changed, shutdown) {
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            }
        }
    }
}
