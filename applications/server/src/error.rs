/// Daemon error types
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Probe unavailable: {0}")]
    Probe(String),

    #[error("Index error: {0}")]
    Index(#[from] aria_index::IndexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from device command execution. Opaque to callers: the
/// orchestrator logs them and keeps going.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device command failed: {0}")]
    Command(String),

    #[error("device command timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
