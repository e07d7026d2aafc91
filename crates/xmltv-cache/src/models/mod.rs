//! Data models shared by the ingestion pipeline, the cache and its consumers.

pub mod cache_index;
pub mod epg;

pub use cache_index::*;
pub use epg::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::url::UrlUtils;

/// One ingestion request: where to read from and which cache slot it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    pub source_key: String,
    /// `http(s)://` URL or filesystem path
    pub origin: String,
    /// Hint only; the fetcher may still detect gzip on its own
    pub is_compressed: bool,
    pub created_at: DateTime<Utc>,
}

impl SourceDescriptor {
    /// Descriptor with a key derived from the origin.
    pub fn from_origin(origin: impl Into<String>) -> Self {
        let origin = origin.into();
        Self {
            source_key: crate::sources::source_key_for(&origin),
            is_compressed: origin.to_ascii_lowercase().ends_with(".gz"),
            origin,
            created_at: Utc::now(),
        }
    }

    pub fn with_key(mut self, source_key: impl Into<String>) -> Self {
        self.source_key = source_key.into();
        self
    }

    pub fn compressed(mut self, is_compressed: bool) -> Self {
        self.is_compressed = is_compressed;
        self
    }

    pub fn is_remote(&self) -> bool {
        UrlUtils::is_http(&self.origin)
    }

    /// Short human label for logs: the last path segment of the origin.
    pub fn display_name(&self) -> String {
        crate::sources::display_name_for(&self.origin)
    }
}
