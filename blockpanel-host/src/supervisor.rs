//! Ownership of the backend child process.
//!
//! The supervisor is the only component that touches the child. Other parts
//! of the shell observe it through [`BackendHandle`] and [`SupervisorEvent`],
//! and the shutdown coordinator asks for termination via
//! [`Supervisor::kill_and_confirm`].

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use blockpanel_core::{
    ExitDisposition, STDERR_TAIL_CHARS, ShutdownState, StderrTail, classify_exit,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::{Notify, mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::HostError;

/// How long the exit watcher waits for the output pumps to drain after the
/// child exits. Grandchildren can inherit the pipes and keep them open.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Upper bound on waiting for the exit watcher to deliver the kill signal.
pub const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn python_script(python: &str, script: &Path) -> Self {
        Self {
            program: python.to_owned(),
            args: vec![script.to_string_lossy().into_owned()],
            working_dir: script.parent().map(Path::to_path_buf),
            envs: vec![("PYTHONUNBUFFERED".to_owned(), "1".to_owned())],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub code: i32,
    pub stderr_tail: String,
}

impl CrashReport {
    pub const TITLE: &'static str = "Backend Crashed";

    pub fn message(&self) -> String {
        format!(
            "The backend exited unexpectedly (code {}).\n\nLog:\n{}",
            self.code, self.stderr_tail
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    Exited { code: Option<i32> },
    Crashed(CrashReport),
}

/// Take every queued event without blocking and return the crash reports
/// among them, oldest first.
pub fn drain_crash_reports(
    events: &mut mpsc::UnboundedReceiver<SupervisorEvent>,
) -> Vec<CrashReport> {
    let mut crashes = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            SupervisorEvent::Crashed(report) => crashes.push(report),
            SupervisorEvent::Exited { code } => debug!(?code, "backend exit observed"),
        }
    }
    crashes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitRecord {
    code: Option<i32>,
}

/// Read-only view of the backend process.
#[derive(Debug, Clone)]
pub struct BackendHandle {
    pid: Option<u32>,
    exit: watch::Receiver<Option<ExitRecord>>,
    /// Set once the child has been sent the kill signal or is already gone.
    settled: watch::Receiver<bool>,
    stderr: Arc<Mutex<StderrTail>>,
    state: watch::Receiver<ShutdownState>,
}

impl BackendHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// `None` until the process exits, and also when a signal ended it.
    pub fn exit_code(&self) -> Option<i32> {
        (*self.exit.borrow()).and_then(|record| record.code)
    }

    /// Whether the child can no longer outlive us: it was signalled or it
    /// has already exited.
    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    pub async fn wait_until_settled(&self) {
        let mut settled = self.settled.clone();
        // A dropped sender means the watcher finished, which settles too.
        let _ = settled.wait_for(|settled| *settled).await;
    }

    pub fn stderr_tail(&self) -> String {
        self.stderr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contents()
    }

    pub fn backend_exit_expected(&self) -> bool {
        self.state.borrow().backend_exit_expected()
    }

    pub async fn wait_for_exit(&self) -> Option<i32> {
        let mut exit = self.exit.clone();
        match exit.wait_for(Option::is_some).await {
            Ok(record) => (*record).and_then(|r| r.code),
            Err(_) => None,
        }
    }
}

struct LiveChild {
    handle: BackendHandle,
    kill: Arc<Notify>,
}

pub struct Supervisor {
    state: watch::Receiver<ShutdownState>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    live: Mutex<Option<LiveChild>>,
}

impl Supervisor {
    pub fn new(
        state: watch::Receiver<ShutdownState>,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        Self {
            state,
            events,
            live: Mutex::new(None),
        }
    }

    /// Spawn the backend. Must be called from within a tokio runtime.
    pub fn start(&self, spec: &LaunchSpec) -> Result<BackendHandle, HostError> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = live.as_ref()
            && !current.handle.has_exited()
        {
            return Err(HostError::BackendAlreadyRunning);
        }

        info!(
            program = %spec.program,
            args = ?spec.args,
            cwd = ?spec.working_dir,
            "starting backend"
        );

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| {
            error!(program = %spec.program, "failed to spawn backend: {source}");
            HostError::Spawn {
                program: spec.program.clone(),
                source,
            }
        })?;

        let pid = child.id();
        let stderr_tail = Arc::new(Mutex::new(StderrTail::new(STDERR_TAIL_CHARS)));
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_output(stdout, OutputStream::Stdout, None)));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_output(
                stderr,
                OutputStream::Stderr,
                Some(Arc::clone(&stderr_tail)),
            )));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (settled_tx, settled_rx) = watch::channel(false);
        let kill = Arc::new(Notify::new());
        let handle = BackendHandle {
            pid,
            exit: exit_rx,
            settled: settled_rx,
            stderr: Arc::clone(&stderr_tail),
            state: self.state.clone(),
        };

        tokio::spawn(watch_exit(ExitWatch {
            child,
            kill: Arc::clone(&kill),
            exit_tx,
            settled_tx,
            stderr_tail,
            state: self.state.clone(),
            events: self.events.clone(),
            pumps,
        }));

        info!(pid = ?pid, "backend started");
        *live = Some(LiveChild {
            handle: handle.clone(),
            kill,
        });
        Ok(handle)
    }

    pub fn current(&self) -> Option<BackendHandle> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|live| live.handle.clone())
    }

    /// Ask the exit watcher to kill the child. Returns whether a live child
    /// was signalled; calling it with nothing running is a no-op.
    pub fn force_kill(&self) -> bool {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        match live.as_ref() {
            Some(current) if !current.handle.has_exited() => {
                info!(pid = ?current.handle.pid(), "killing backend");
                current.kill.notify_one();
                true
            }
            _ => {
                debug!("no live backend to kill");
                false
            }
        }
    }

    /// [`Supervisor::force_kill`], then wait (at most `bound`) until the
    /// signal has actually been delivered. Returns whether a live child was
    /// signalled.
    pub async fn kill_and_confirm(&self, bound: Duration) -> bool {
        let Some(handle) = self.current() else {
            return false;
        };
        if !self.force_kill() {
            return false;
        }
        if tokio::time::timeout(bound, handle.wait_until_settled())
            .await
            .is_err()
        {
            warn!(pid = ?handle.pid(), ?bound, "kill signal not confirmed in time");
        }
        true
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

async fn pump_output<R>(reader: R, stream: OutputStream, tail: Option<Arc<Mutex<StderrTail>>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                if let Some(tail) = &tail {
                    tail.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push_str(&text);
                }
                let line = text.trim_end();
                match stream {
                    OutputStream::Stdout => info!(target: "backend", "{line}"),
                    OutputStream::Stderr => warn!(target: "backend", "{line}"),
                }
            }
            Err(err) => {
                debug!(?stream, "backend output closed: {err}");
                break;
            }
        }
    }
}

struct ExitWatch {
    child: Child,
    kill: Arc<Notify>,
    exit_tx: watch::Sender<Option<ExitRecord>>,
    settled_tx: watch::Sender<bool>,
    stderr_tail: Arc<Mutex<StderrTail>>,
    state: watch::Receiver<ShutdownState>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    pumps: Vec<JoinHandle<()>>,
}

async fn watch_exit(watch: ExitWatch) {
    let ExitWatch {
        mut child,
        kill,
        exit_tx,
        settled_tx,
        stderr_tail,
        state,
        events,
        pumps,
    } = watch;

    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill.notified() => None,
    };
    let status = match waited {
        Some(status) => {
            settled_tx.send_replace(true);
            status
        }
        None => {
            if let Err(err) = child.start_kill() {
                // Already gone; wait() below reaps it either way.
                debug!("kill failed: {err}");
            }
            settled_tx.send_replace(true);
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(err) => {
            warn!("failed to wait for backend: {err}");
            None
        }
    };

    if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, futures::future::join_all(pumps))
        .await
        .is_err()
    {
        debug!("backend output pipes still open after exit");
    }

    let shutdown_state = *state.borrow();
    info!(?code, state = %shutdown_state, "backend exited");
    exit_tx.send_replace(Some(ExitRecord { code }));

    if let ExitDisposition::Crashed { code } = classify_exit(code, shutdown_state) {
        let stderr_tail = stderr_tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contents();
        error!(code, "backend crashed");
        let _ = events.send(SupervisorEvent::Crashed(CrashReport { code, stderr_tail }));
    }
    let _ = events.send(SupervisorEvent::Exited { code });
}
