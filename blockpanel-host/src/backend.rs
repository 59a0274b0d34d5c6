use std::time::Duration;

use blockpanel_core::{
    BackendStatus, COMMAND_PATH, CommandRequest, LIVENESS_TIMEOUT, START_PATH, STATUS_PATH,
    STOP_PATH, api_base_url,
};
use reqwest::StatusCode;
use tracing::{debug, info};
use url::Url;

use crate::HostError;

const ACTION_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The backend answered; the status code is informational only.
    Acknowledged(u16),
    Unreachable,
    TimedOut,
}

/// HTTP client for the backend's loopback API.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    status_url: Url,
    stop_url: Url,
    start_url: Url,
    command_url: Url,
    liveness_timeout: Duration,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Result<Self, HostError> {
        let base = Url::parse(base_url)?;
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            status_url: base.join(STATUS_PATH)?,
            stop_url: base.join(STOP_PATH)?,
            start_url: base.join(START_PATH)?,
            command_url: base.join(COMMAND_PATH)?,
            liveness_timeout: LIVENESS_TIMEOUT,
        })
    }

    pub fn local(host: &str, port: u16) -> Result<Self, HostError> {
        Self::new(&api_base_url(host, port))
    }

    #[must_use]
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    /// Single bounded probe of `GET /status`. True only for HTTP 200.
    ///
    /// Never retries; callers decide the cadence.
    pub async fn check_alive(&self) -> bool {
        match self
            .http
            .get(self.status_url.clone())
            .timeout(self.liveness_timeout)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(err) => {
                debug!("liveness probe failed: {err}");
                false
            }
        }
    }

    pub async fn fetch_status(&self) -> Result<BackendStatus, HostError> {
        let response = self
            .http
            .get(self.status_url.clone())
            .timeout(self.liveness_timeout)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(HostError::BackendStatus(response.status().as_u16()));
        }
        let body = response.bytes().await?;
        Ok(BackendStatus::parse(&body)?)
    }

    /// Best-effort `POST /stop`. Every failure mode maps to an outcome;
    /// nothing here is an error.
    pub async fn request_stop(&self, timeout: Duration) -> StopOutcome {
        info!("sending stop request to backend");
        match self
            .http
            .post(self.stop_url.clone())
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status().as_u16();
                info!(status, "backend stop request answered");
                StopOutcome::Acknowledged(status)
            }
            Err(err) if err.is_timeout() => {
                info!(?timeout, "backend stop request timed out");
                StopOutcome::TimedOut
            }
            Err(err) => {
                info!("backend unreachable or already stopped: {err}");
                StopOutcome::Unreachable
            }
        }
    }

    pub async fn start_server(&self) -> Result<(), HostError> {
        let response = self
            .http
            .post(self.start_url.clone())
            .timeout(ACTION_TIMEOUT)
            .send()
            .await?;
        ensure_success(response.status())
    }

    pub async fn stop_server(&self) -> Result<(), HostError> {
        let response = self
            .http
            .post(self.stop_url.clone())
            .timeout(ACTION_TIMEOUT)
            .send()
            .await?;
        ensure_success(response.status())
    }

    pub async fn send_command(&self, command: &str) -> Result<(), HostError> {
        let response = self
            .http
            .post(self.command_url.clone())
            .timeout(ACTION_TIMEOUT)
            .json(&CommandRequest {
                command: command.to_owned(),
            })
            .send()
            .await?;
        ensure_success(response.status())
    }
}

fn ensure_success(status: StatusCode) -> Result<(), HostError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(HostError::BackendStatus(status.as_u16()))
    }
}
