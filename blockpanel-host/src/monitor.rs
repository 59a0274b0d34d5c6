use std::time::Duration;

use blockpanel_core::{BackendStatus, ShutdownState};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::backend::BackendClient;

const ONLINE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const OFFLINE_BACKOFF_BASE_MS: u64 = 1_000;
const OFFLINE_BACKOFF_MAX_MS: u64 = 8_000;

/// What the UI knows about the backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum BackendView {
    #[default]
    Connecting,
    Online(BackendStatus),
    Offline,
}

impl BackendView {
    pub fn is_online(&self) -> bool {
        matches!(self, BackendView::Online(_))
    }
}

/// Delay before the next poll after `failures` consecutive failed polls.
pub fn offline_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    let ms = OFFLINE_BACKOFF_BASE_MS
        .saturating_mul(1_u64 << exponent)
        .min(OFFLINE_BACKOFF_MAX_MS);
    Duration::from_millis(ms)
}

/// Poll `/status` until shutdown begins, publishing every result.
///
/// An unreachable backend is a normal state here, not an error.
pub async fn run_status_monitor(
    client: BackendClient,
    view: watch::Sender<BackendView>,
    mut shutdown: watch::Receiver<ShutdownState>,
) {
    let mut failures: u32 = 0;
    loop {
        if !shutdown.borrow().is_running() {
            break;
        }

        let delay = match client.fetch_status().await {
            Ok(status) => {
                if failures > 0 {
                    info!("backend is reachable");
                }
                failures = 0;
                view.send_replace(BackendView::Online(status));
                ONLINE_POLL_INTERVAL
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                debug!(failures, "status poll failed: {err}");
                view.send_replace(BackendView::Offline);
                offline_delay(failures)
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    debug!("status monitor stopped");
}
