//! Error types for the cache janitor.

use std::path::PathBuf;

/// Result type for janitor operations.
pub type Result<T> = std::result::Result<T, JanitorError>;

/// Errors that can occur while evicting cache sets.
#[derive(Debug, thiserror::Error)]
pub enum JanitorError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache root is missing or not a directory
    #[error("Cache directory unavailable: {path:?} - {reason}")]
    CacheDirUnavailable { path: PathBuf, reason: String },

    /// A chunk directory could not be removed, so its index was kept
    #[error("Failed to remove chunk directory {path:?}: {source}")]
    ChunkDirRemoval {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Source key would escape the cache root
    #[error("Invalid source key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}
