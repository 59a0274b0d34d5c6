use std::{collections::VecDeque, fmt, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const API_HOST: &str = "127.0.0.1";
pub const API_PORT: u16 = 8000;
pub const STATUS_PATH: &str = "/status";
pub const STOP_PATH: &str = "/stop";
pub const START_PATH: &str = "/start";
pub const COMMAND_PATH: &str = "/command";
pub const CONSOLE_WS_PATH: &str = "/ws/console";

pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(2);
pub const STOP_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2);

pub const STDERR_TAIL_CHARS: usize = 500;
pub const CONSOLE_HISTORY_LINES: usize = 500;
pub const STATUS_RECENT_LOG_LINES: usize = 15;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid shutdown transition from {from} to {to}")]
    InvalidTransition {
        from: ShutdownState,
        to: ShutdownState,
    },
    #[error("unknown ipc channel {0:?}")]
    UnknownChannel(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub fn api_base_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}

pub fn console_ws_url(host: &str, port: u16) -> String {
    format!("ws://{host}:{port}{CONSOLE_WS_PATH}")
}

/// Lifecycle of the shell's shutdown handshake.
///
/// The variants are declared in transition order, so `Ord` doubles as
/// "how far along the sequence is". A state only ever moves to its direct
/// successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownState {
    Running,
    ShutdownRequested,
    StoppingBackend,
    ForceKilling,
    Exited,
}

impl ShutdownState {
    pub fn next(self) -> Option<Self> {
        match self {
            ShutdownState::Running => Some(ShutdownState::ShutdownRequested),
            ShutdownState::ShutdownRequested => Some(ShutdownState::StoppingBackend),
            ShutdownState::StoppingBackend => Some(ShutdownState::ForceKilling),
            ShutdownState::ForceKilling => Some(ShutdownState::Exited),
            ShutdownState::Exited => None,
        }
    }

    pub fn advance(&mut self, to: ShutdownState) -> Result<(), CoreError> {
        if self.next() != Some(to) {
            return Err(CoreError::InvalidTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }

    pub fn is_running(self) -> bool {
        self == ShutdownState::Running
    }

    /// Once shutdown has been requested, any backend exit is one we caused.
    pub fn backend_exit_expected(self) -> bool {
        self > ShutdownState::Running
    }

    pub fn label(self) -> &'static str {
        match self {
            ShutdownState::Running => "running",
            ShutdownState::ShutdownRequested => "shutdown requested",
            ShutdownState::StoppingBackend => "stopping backend",
            ShutdownState::ForceKilling => "force killing",
            ShutdownState::Exited => "exited",
        }
    }
}

impl fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    Expected,
    Crashed { code: i32 },
}

/// Decide whether a backend exit deserves a crash report.
///
/// `code` is `None` when the process was terminated by a signal.
pub fn classify_exit(code: Option<i32>, state: ShutdownState) -> ExitDisposition {
    match code {
        Some(code) if code != 0 && state.is_running() => ExitDisposition::Crashed { code },
        _ => ExitDisposition::Expected,
    }
}

/// Keeps the last `capacity` characters written to it.
#[derive(Debug, Clone)]
pub struct StderrTail {
    buf: VecDeque<char>,
    capacity: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push_str(&mut self, text: &str) {
        if self.capacity == 0 {
            return;
        }
        for ch in text.chars() {
            if self.buf.len() == self.capacity {
                self.buf.pop_front();
            }
            self.buf.push_back(ch);
        }
    }

    pub fn contents(&self) -> String {
        self.buf.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for StderrTail {
    fn default() -> Self {
        Self::new(STDERR_TAIL_CHARS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerPhase {
    Online,
    Starting,
    #[default]
    Offline,
    NotConfigured,
    #[serde(other)]
    Unknown,
}

impl ServerPhase {
    pub fn label(self) -> &'static str {
        match self {
            ServerPhase::Online => "Online",
            ServerPhase::Starting => "Starting",
            ServerPhase::Offline => "Offline",
            ServerPhase::NotConfigured => "Not configured",
            ServerPhase::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    #[default]
    Normal,
    Info,
    Success,
    Warning,
    Error,
    Input,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub message: String,
    #[serde(default)]
    pub level: LogLevel,
}

impl ConsoleLine {
    pub fn new(message: impl Into<String>, level: LogLevel) -> Self {
        Self {
            message: message.into(),
            level,
        }
    }

    /// Parse a console websocket text frame. Frames that are not JSON
    /// console lines are kept verbatim at `normal` level.
    pub fn from_frame(text: &str) -> Self {
        serde_json::from_str::<ConsoleLine>(text)
            .unwrap_or_else(|_| ConsoleLine::new(text.trim_end(), LogLevel::Normal))
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BackendStatus {
    #[serde(default)]
    pub status: ServerPhase,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub server_type: Option<String>,
    #[serde(default)]
    pub minecraft_version: Option<String>,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub ram: Option<String>,
    #[serde(default)]
    pub uptime: Option<String>,
    #[serde(default)]
    pub recent_logs: Vec<ConsoleLine>,
}

impl BackendStatus {
    pub fn parse(body: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(body).map_err(|err| CoreError::Serialization(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// Requests the UI may send to the host. This is the complete set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "channel")]
pub enum BridgeRequest {
    #[serde(rename = "dialog:openDirectory")]
    OpenDirectory,
    #[serde(rename = "app-close-confirmed")]
    CloseConfirmed,
    #[serde(rename = "window:minimize")]
    Minimize,
    #[serde(rename = "window:maximize")]
    ToggleMaximize,
    #[serde(rename = "window:close")]
    Close,
}

impl BridgeRequest {
    pub const ALL: [BridgeRequest; 5] = [
        BridgeRequest::OpenDirectory,
        BridgeRequest::CloseConfirmed,
        BridgeRequest::Minimize,
        BridgeRequest::ToggleMaximize,
        BridgeRequest::Close,
    ];

    pub fn channel(self) -> &'static str {
        match self {
            BridgeRequest::OpenDirectory => "dialog:openDirectory",
            BridgeRequest::CloseConfirmed => "app-close-confirmed",
            BridgeRequest::Minimize => "window:minimize",
            BridgeRequest::ToggleMaximize => "window:maximize",
            BridgeRequest::Close => "window:close",
        }
    }

    /// Only the directory dialog carries a meaningful reply.
    pub fn expects_reply(self) -> bool {
        matches!(self, BridgeRequest::OpenDirectory)
    }
}

impl FromStr for BridgeRequest {
    type Err = CoreError;

    fn from_str(channel: &str) -> Result<Self, Self::Err> {
        BridgeRequest::ALL
            .into_iter()
            .find(|request| request.channel() == channel)
            .ok_or_else(|| CoreError::UnknownChannel(channel.to_owned()))
    }
}

/// One-way notifications from the host to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "channel")]
pub enum HostEvent {
    #[serde(rename = "app-close-requested")]
    CloseRequested,
}

impl HostEvent {
    pub fn channel(self) -> &'static str {
        match self {
            HostEvent::CloseRequested => "app-close-requested",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum BridgeReply {
    Directory(Option<PathBuf>),
    Attempted,
    Acknowledged,
}
