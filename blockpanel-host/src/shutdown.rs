//! The shutdown handshake with the backend.
//!
//! A shutdown runs at most once per process, as one sequential task:
//! notify the UI, ask the backend to stop, wait out the grace period, kill
//! the child, and report `Exited`. None of the steps can fail the sequence;
//! their problems are logged and the next step runs.

use std::{sync::Arc, time::Duration};

use blockpanel_core::{HostEvent, SHUTDOWN_GRACE_PERIOD, STOP_REQUEST_TIMEOUT, ShutdownState};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info};

use crate::{
    backend::BackendClient,
    supervisor::{KILL_CONFIRM_TIMEOUT, Supervisor},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTimings {
    pub stop_timeout: Duration,
    pub grace_period: Duration,
}

impl Default for ShutdownTimings {
    fn default() -> Self {
        Self {
            stop_timeout: STOP_REQUEST_TIMEOUT,
            grace_period: SHUTDOWN_GRACE_PERIOD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    WindowClose,
    UiClose,
    Signal,
    Quit,
}

pub struct ShutdownCoordinator {
    state: watch::Sender<ShutdownState>,
    supervisor: Arc<Supervisor>,
    backend: BackendClient,
    ui_events: mpsc::UnboundedSender<HostEvent>,
    timings: ShutdownTimings,
}

impl ShutdownCoordinator {
    pub fn new(
        state: watch::Sender<ShutdownState>,
        supervisor: Arc<Supervisor>,
        backend: BackendClient,
        ui_events: mpsc::UnboundedSender<HostEvent>,
        timings: ShutdownTimings,
    ) -> Self {
        Self {
            state,
            supervisor,
            backend,
            ui_events,
            timings,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    /// Claim the shutdown. Exactly one caller ever gets `true`; the check
    /// and the transition happen under the channel's lock.
    pub fn begin(&self, reason: ShutdownReason) -> bool {
        let started = self
            .state
            .send_if_modified(|state| state.advance(ShutdownState::ShutdownRequested).is_ok());
        if started {
            info!(?reason, "starting graceful shutdown");
        } else {
            debug!(?reason, state = %self.state(), "shutdown already in progress");
        }
        started
    }

    /// Run the whole shutdown sequence in the caller's task. Returns `false`
    /// without doing anything when a shutdown was already claimed.
    pub async fn shutdown(&self, reason: ShutdownReason) -> bool {
        if !self.begin(reason) {
            return false;
        }
        self.run_sequence().await;
        true
    }

    pub fn spawn_shutdown(self: &Arc<Self>, reason: ShutdownReason) -> Option<JoinHandle<()>> {
        if !self.begin(reason) {
            return None;
        }
        let coordinator = Arc::clone(self);
        Some(tokio::spawn(async move { coordinator.run_sequence().await }))
    }

    pub async fn wait_for_exit(&self) {
        let mut state = self.subscribe();
        // The sender lives in `self`, so this only ends at `Exited`.
        let _ = state.wait_for(|s| *s == ShutdownState::Exited).await;
    }

    async fn run_sequence(&self) {
        // The UI only gets told; nothing waits on it.
        if self.ui_events.send(HostEvent::CloseRequested).is_err() {
            debug!("ui event channel closed; skipping close notification");
        }

        self.transition(ShutdownState::StoppingBackend);
        let outcome = self.backend.request_stop(self.timings.stop_timeout).await;
        debug!(?outcome, "stop request finished");

        info!(grace = ?self.timings.grace_period, "waiting for backend to persist");
        tokio::time::sleep(self.timings.grace_period).await;

        self.transition(ShutdownState::ForceKilling);
        if !self.supervisor.kill_and_confirm(KILL_CONFIRM_TIMEOUT).await {
            debug!("backend already gone");
        }

        self.transition(ShutdownState::Exited);
        info!("shutdown sequence complete");
    }

    fn transition(&self, to: ShutdownState) {
        self.state.send_if_modified(|state| match state.advance(to) {
            Ok(()) => {
                debug!(state = %to, "shutdown state changed");
                true
            }
            Err(err) => {
                error!("{err}");
                false
            }
        });
    }
}
