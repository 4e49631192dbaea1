/// Index-specific errors
use thiserror::Error;

/// Result type alias using `IndexError`
pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Tag reading error
    #[error("Tag reading error: {0}")]
    Tag(String),

    /// Index (de)serialization error
    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    /// A background worker task failed
    #[error("Background task failed: {0}")]
    Task(String),
}
