//! Error types for the sync queue

use thiserror::Error;

/// Result type for sync queue operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Sync queue error types
#[derive(Error, Debug)]
pub enum SyncError {
    /// Programmer error: unregistered action kind, mismatched payload
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Queue has been unloaded and accepts no more intents
    #[error("Sync queue is closed")]
    QueueClosed,

    /// Persistence collaborator rejected the write
    #[error("Backend rejected write ({status}): {message}")]
    Backend { status: u16, message: String },

    /// Network error talking to the persistence collaborator
    #[error("Network error: {0}")]
    Network(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Config file could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),

    /// Shell input or output failed
    #[error("IO error: {0}")]
    Io(String),
}

impl SyncError {
    /// Transient failures are logged and dropped, never surfaced to the UI.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Backend { .. } | SyncError::Network(_))
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}
