//! Error type definitions for ingestion and caching.

use crate::ingestor::progress::IngestionStage;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Terminal failure of one ingestion.
///
/// Every variant maps to the pipeline stage it occurred in, see [`IngestError::stage`].
#[derive(Error, Debug)]
pub enum IngestError {
    /// Fetching the source failed (status, transport, timeout)
    #[error("Network error while {stage}: {source}")]
    Network {
        stage: IngestionStage,
        source: FetchError,
    },

    /// The compressed stream could not be inflated
    #[error("Decompression failed: {message}")]
    Decompression { message: String },

    /// The document is not well-formed XML
    #[error("XML parse error at byte {position}: {message}")]
    Parse { message: String, position: u64 },

    /// Another ingestion for the same key is running
    #[error("Ingestion already in progress for source {source_key}")]
    AlreadyInProgress { source_key: String },

    /// The descriptor cannot be ingested (bad key, unsupported origin)
    #[error("Invalid source: {message}")]
    InvalidSource { message: String },

    /// Options rejected before starting
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Unexpected failure inside the pipeline itself
    #[error("Internal error while {stage}: {message}")]
    Internal {
        stage: IngestionStage,
        message: String,
    },
}

impl IngestError {
    /// Stage the ingestion was in when it failed.
    pub fn stage(&self) -> IngestionStage {
        match self {
            IngestError::Network { stage, .. } | IngestError::Internal { stage, .. } => *stage,
            IngestError::Decompression { .. } => IngestionStage::Decompressing,
            IngestError::Parse { .. } => IngestionStage::Parsing,
            IngestError::AlreadyInProgress { .. }
            | IngestError::InvalidSource { .. }
            | IngestError::Configuration { .. } => IngestionStage::Idle,
        }
    }

    pub fn network(source: FetchError) -> Self {
        IngestError::Network {
            stage: IngestionStage::Fetching,
            source,
        }
    }

    pub fn decompression<S: Into<String>>(message: S) -> Self {
        IngestError::Decompression {
            message: message.into(),
        }
    }

    pub fn invalid_source<S: Into<String>>(message: S) -> Self {
        IngestError::InvalidSource {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        IngestError::Configuration {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(stage: IngestionStage, message: S) -> Self {
        IngestError::Internal {
            stage,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            IngestError::Network {
                source: FetchError::Timeout { .. },
                ..
            }
        )
    }
}

/// Failures reading the raw source bytes.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Deadline reached before the transfer finished
    #[error("Timed out after {elapsed:?} fetching {origin}")]
    Timeout { origin: String, elapsed: Duration },

    /// Non-success HTTP status
    #[error("HTTP {status} fetching {origin}")]
    Http { origin: String, status: u16 },

    /// Connection or mid-transfer failure
    #[error("Transport error fetching {origin}: {message}")]
    Transport { origin: String, message: String },

    /// Local file could not be read
    #[error("I/O error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failures persisting or reading a chunked cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Filesystem operation failed
    #[error("Cache I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A collection could not be serialized
    #[error("Cache serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Key or layout problem reported by the janitor layer
    #[error("Cache layout error: {0}")]
    Layout(#[from] cache_janitor::JanitorError),

    /// Writer task failed to complete
    #[error("Cache writer failed: {message}")]
    Internal { message: String },
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}
