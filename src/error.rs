use thiserror::Error;

/// Failures that abort a whole `notify` call. Per-subscription delivery
/// failures never surface here; they are reported in the summary.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid user type: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("subscription store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("subscription store responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode subscription store response: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}
