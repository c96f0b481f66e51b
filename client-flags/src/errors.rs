use common_kv_store::StorageError;
use thiserror::Error;

/// Failure talking to the backend. Always recoverable, retried only by the next natural trigger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("unexpected status code {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if let Some(status) = err.status() {
            TransportError::Status(status.as_u16())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// A remote or persisted document that does not have the shape we expect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("failed to parse payload: {0}")]
    Malformed(String),
    #[error("invalid payload: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for PayloadError {
    fn from(err: serde_json::Error) -> Self {
        PayloadError::Malformed(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("persisted cache is corrupted: {0}")]
    Corrupted(#[from] PayloadError),
}

/// Everything that can go wrong during a refresh. Kept as a diagnostic, never returned to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FreshnessError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error("failed to persist cache: {0}")]
    Storage(#[from] StorageError),
}

impl FreshnessError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FreshnessError::Transport(TransportError::Timeout) => "timeout",
            FreshnessError::Transport(_) => "transport",
            FreshnessError::Payload(_) => "shape",
            FreshnessError::Storage(_) => "storage",
        }
    }
}
