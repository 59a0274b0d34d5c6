use blockpanel_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to start backend `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("a backend process is already running")]
    BackendAlreadyRunning,
    #[error("invalid backend url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("backend request failed: {0}")]
    Backend(#[from] reqwest::Error),
    #[error("backend answered with HTTP {0}")]
    BackendStatus(u16),
    #[error(transparent)]
    Core(#[from] CoreError),
}
