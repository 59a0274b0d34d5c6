//! Everything one running shell owns, in one place.
//!
//! The UI never reaches for globals: it gets an [`AppSession`] and reads the
//! shutdown state, backend status and console through it.

use std::sync::{Arc, Mutex, PoisonError};

use blockpanel_core::{ConsoleLine, LogLevel, ShutdownState, console_ws_url};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    HostError,
    backend::BackendClient,
    bridge::UiEventReceiver,
    config::HostConfig,
    console::{ConsoleBuffer, run_console_stream},
    monitor::{BackendView, run_status_monitor},
    shutdown::{ShutdownCoordinator, ShutdownReason},
    supervisor::{BackendHandle, Supervisor, SupervisorEvent},
};

pub struct AppSession {
    config: HostConfig,
    coordinator: Arc<ShutdownCoordinator>,
    supervisor: Arc<Supervisor>,
    backend: BackendClient,
    status: watch::Receiver<BackendView>,
    console: ConsoleBuffer,
    console_commands: mpsc::UnboundedSender<String>,
    supervisor_events: Mutex<Option<mpsc::UnboundedReceiver<SupervisorEvent>>>,
    ui_events: Mutex<Option<UiEventReceiver>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AppSession {
    /// Start the backend and the background tasks. A backend that cannot be
    /// spawned is fatal and comes back as the error.
    pub async fn create(config: HostConfig) -> Result<Self, HostError> {
        let (state_tx, state_rx) = watch::channel(ShutdownState::Running);
        let (supervisor_tx, supervisor_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();

        let backend = BackendClient::local(&config.api_host, config.api_port)?;
        let supervisor = Arc::new(Supervisor::new(state_rx, supervisor_tx));
        let coordinator = Arc::new(ShutdownCoordinator::new(
            state_tx,
            Arc::clone(&supervisor),
            backend.clone(),
            ui_tx,
            config.timings,
        ));

        match &config.launch {
            Some(spec) => {
                supervisor.start(spec)?;
            }
            None => info!(
                host = %config.api_host,
                port = config.api_port,
                "attaching to an external backend"
            ),
        }

        let (status_tx, status_rx) = watch::channel(BackendView::default());
        let console = ConsoleBuffer::default();
        let (console_tx, console_rx) = mpsc::unbounded_channel();

        let mut tasks = Vec::with_capacity(3);
        tasks.push(tokio::spawn(run_status_monitor(
            backend.clone(),
            status_tx,
            coordinator.subscribe(),
        )));
        tasks.push(tokio::spawn(run_console_stream(
            console_ws_url(&config.api_host, config.api_port),
            console.clone(),
            console_rx,
            coordinator.subscribe(),
        )));
        tasks.push(tokio::spawn(shutdown_on_ctrl_c(Arc::clone(&coordinator))));

        Ok(Self {
            config,
            coordinator,
            supervisor,
            backend,
            status: status_rx,
            console,
            console_commands: console_tx,
            supervisor_events: Mutex::new(Some(supervisor_rx)),
            ui_events: Mutex::new(Some(ui_rx)),
            tasks: Mutex::new(tasks),
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    pub fn backend_handle(&self) -> Option<BackendHandle> {
        self.supervisor.current()
    }

    pub fn shutdown_state(&self) -> watch::Receiver<ShutdownState> {
        self.coordinator.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<BackendView> {
        self.status.clone()
    }

    pub fn console(&self) -> &ConsoleBuffer {
        &self.console
    }

    pub fn send_console_command(&self, command: &str) {
        let command = command.trim();
        if command.is_empty() {
            return;
        }
        if self.console_commands.send(command.to_owned()).is_err() {
            self.console.push(ConsoleLine::new(
                "Error: Not connected to console.",
                LogLevel::Error,
            ));
        }
    }

    /// The receivers can be taken once; later calls get `None`.
    pub fn take_supervisor_events(&self) -> Option<mpsc::UnboundedReceiver<SupervisorEvent>> {
        self.supervisor_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn take_ui_events(&self) -> Option<UiEventReceiver> {
        self.ui_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Start the shutdown sequence in the background.
    pub fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        self.coordinator.spawn_shutdown(reason).is_some()
    }

    /// Run `on_exit` once the shutdown sequence reports `Exited`.
    pub fn spawn_exit_on_shutdown<F>(&self, on_exit: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let coordinator = Arc::clone(&self.coordinator);
        let task = tokio::spawn(async move {
            coordinator.wait_for_exit().await;
            info!("shutdown finished; exiting");
            on_exit();
        });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    pub fn exit_after_shutdown(&self) {
        self.spawn_exit_on_shutdown(|| std::process::exit(0));
    }

    pub fn teardown(&self) {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if tasks.is_empty() {
            return;
        }
        debug!(count = tasks.len(), "aborting session tasks");
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for AppSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn shutdown_on_ctrl_c(coordinator: Arc<ShutdownCoordinator>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("interrupt received");
            coordinator.spawn_shutdown(ShutdownReason::Signal);
        }
        Err(err) => warn!("failed to listen for ctrl-c: {err}"),
    }
}
