//! On-disk naming for chunked cache sets.
//!
//! A cache set for one source key is an index file plus a companion chunk
//! directory, both directly under the cache root:
//!
//! ```text
//! <cache_dir>/<key>.index.json
//! <cache_dir>/<key>_chunks/<type>_<index>.json
//! ```
//!
//! Writers stage new chunk directories under hidden names (`.<key>_chunks.staging-*`)
//! and park the previous directory under `.<key>_chunks.old-*` while swapping.

use crate::error::{JanitorError, Result};
use std::path::{Path, PathBuf};

pub const INDEX_SUFFIX: &str = ".index.json";
pub const CHUNK_DIR_SUFFIX: &str = "_chunks";

const STAGING_MARKER: &str = ".staging-";
const BACKUP_MARKER: &str = ".old-";

/// Reject keys that could escape the cache root or collide with transient names.
pub fn validate_source_key(key: &str) -> Result<()> {
    let reason = if key.is_empty() {
        Some("source key cannot be empty")
    } else if key.starts_with('.') {
        Some("source key cannot start with '.'")
    } else if key.contains("..") {
        Some("source key cannot contain '..'")
    } else if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        Some("source key may only contain ASCII letters, digits, '-', '_' and '.'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(JanitorError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

pub fn index_file_name(key: &str) -> String {
    format!("{key}{INDEX_SUFFIX}")
}

pub fn chunk_dir_name(key: &str) -> String {
    format!("{key}{CHUNK_DIR_SUFFIX}")
}

pub fn chunk_file_name(chunk_type: &str, index: usize) -> String {
    format!("{chunk_type}_{index}.json")
}

pub fn index_path(cache_dir: &Path, key: &str) -> PathBuf {
    cache_dir.join(index_file_name(key))
}

pub fn chunk_dir_path(cache_dir: &Path, key: &str) -> PathBuf {
    cache_dir.join(chunk_dir_name(key))
}

pub fn staging_dir_name(key: &str, nonce: &str) -> String {
    format!(".{key}{CHUNK_DIR_SUFFIX}{STAGING_MARKER}{nonce}")
}

pub fn backup_dir_name(key: &str, nonce: &str) -> String {
    format!(".{key}{CHUNK_DIR_SUFFIX}{BACKUP_MARKER}{nonce}")
}

/// Source key for an index file name, if the name is one.
pub fn key_from_index_file_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(INDEX_SUFFIX)
        .filter(|key| !key.is_empty() && !key.starts_with('.'))
}

/// True for writer staging or backup directories left behind by an interrupted swap.
pub fn is_transient_dir_name(dir_name: &str) -> bool {
    dir_name.starts_with('.')
        && dir_name.contains(CHUNK_DIR_SUFFIX)
        && (dir_name.contains(STAGING_MARKER) || dir_name.contains(BACKUP_MARKER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        assert_eq!(index_file_name("abc"), "abc.index.json");
        assert_eq!(chunk_dir_name("abc"), "abc_chunks");
        assert_eq!(chunk_file_name("programMap", 3), "programMap_3.json");
        assert_eq!(key_from_index_file_name("abc.index.json"), Some("abc"));
        assert_eq!(key_from_index_file_name("abc.json"), None);
        assert_eq!(key_from_index_file_name(".index.json"), None);
    }

    #[test]
    fn test_validate_source_key() {
        assert!(validate_source_key("3f2a9c").is_ok());
        assert!(validate_source_key("epg_us-1.xml").is_ok());
        assert!(validate_source_key("").is_err());
        assert!(validate_source_key("../etc").is_err());
        assert!(validate_source_key(".hidden").is_err());
        assert!(validate_source_key("a/b").is_err());
    }

    #[test]
    fn test_transient_dirs() {
        assert!(is_transient_dir_name(&staging_dir_name("abc", "1234")));
        assert!(is_transient_dir_name(&backup_dir_name("abc", "1234")));
        assert!(!is_transient_dir_name("abc_chunks"));
    }
}
