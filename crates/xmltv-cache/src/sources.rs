//! Source lists and stable source keys.

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::utils::url::UrlUtils;

const SOURCE_KEY_BYTES: usize = 16;

/// Stable cache key for an origin: hex of the first 16 bytes of its SHA-256.
pub fn source_key_for(origin: &str) -> String {
    let digest = Sha256::digest(origin.trim().as_bytes());
    hex::encode(&digest[..SOURCE_KEY_BYTES])
}

/// Short human label for an origin (its last path segment).
pub fn display_name_for(origin: &str) -> String {
    let trimmed = origin.trim();
    if UrlUtils::is_http(trimmed) {
        return UrlUtils::last_path_segment(trimmed).unwrap_or_else(|| trimmed.to_string());
    }
    Path::new(trimmed.strip_prefix("file://").unwrap_or(trimmed))
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| trimmed.to_string())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SourceList {
    Plain(Vec<String>),
    Wrapped {
        #[serde(rename = "EXTERNAL_EPG_URLS")]
        urls: Vec<String>,
    },
}

/// Read origins from a sources file.
///
/// Accepted forms: a JSON array of origins, a JSON object with an
/// `EXTERNAL_EPG_URLS` array, or plain text with one origin per line where
/// blank lines and `#` comments are ignored.
pub fn load_sources_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sources file {}", path.display()))?;
    parse_sources(&content).with_context(|| format!("Invalid sources file {}", path.display()))
}

fn parse_sources(content: &str) -> Result<Vec<String>> {
    let trimmed = content.trim_start();
    let origins = if trimmed.starts_with('[') || trimmed.starts_with('{') {
        match serde_json::from_str::<SourceList>(trimmed)? {
            SourceList::Plain(urls) | SourceList::Wrapped { urls } => urls,
        }
    } else {
        content.lines().map(str::to_string).collect()
    };

    Ok(origins
        .into_iter()
        .map(|origin| origin.trim().to_string())
        .filter(|origin| !origin.is_empty() && !origin.starts_with('#'))
        .collect())
}
