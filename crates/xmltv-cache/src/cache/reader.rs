//! Chunked cache reader.
//!
//! Reconstruction is best-effort: an unreadable chunk costs only its own
//! records, and reading never fails upward. No index means no cache.

use crate::cache::writer::write_atomically;
use crate::cache::{ChannelMapEntry, ChunkFile, ProgramMapSegment};
use crate::models::{CacheIndex, ChannelRecord, ChunkType, IndexedSource, ProgramRecord};
use cache_janitor::layout;
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ChunkedCacheReader {
    cache_dir: PathBuf,
}

impl ChunkedCacheReader {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Load the index for `source_key` without touching the chunks.
    pub fn read_index(&self, source_key: &str) -> Option<CacheIndex> {
        if let Err(e) = layout::validate_source_key(source_key) {
            warn!("Refusing to read cache: {}", e);
            return None;
        }

        let path = layout::index_path(&self.cache_dir, source_key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No cache index for '{}'", source_key);
                return None;
            }
            Err(e) => {
                warn!("Failed to read cache index {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(index) => Some(index),
            Err(e) => {
                warn!("Ignoring unparseable cache index {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Rebuild the indexed source for `source_key` from its chunks.
    pub fn read(&self, source_key: &str) -> Option<IndexedSource> {
        let index = self.read_index(source_key)?;

        let channels: Vec<ChannelRecord> = self.read_chunks(&index, ChunkType::Channels);

        let mut source = IndexedSource {
            channels,
            ..IndexedSource::default()
        };

        for entry in self.read_chunks::<ChannelMapEntry>(&index, ChunkType::ChannelMap) {
            source.channel_map.insert(entry.channel_id, entry.channel);
        }

        for segment in self.read_chunks::<ProgramMapSegment>(&index, ChunkType::ProgramMap) {
            source
                .program_map
                .entry(segment.channel_id)
                .or_default()
                .extend(segment.programs);
        }

        source.programs = self.read_chunks::<ProgramRecord>(&index, ChunkType::Programs);

        debug!(
            "Reconstructed '{}' from cache: {} channels, {} programmes",
            source_key,
            source.channel_count(),
            source.program_count()
        );

        self.touch(&index);

        Some(source)
    }

    fn read_chunks<T: DeserializeOwned>(&self, index: &CacheIndex, chunk_type: ChunkType) -> Vec<T> {
        let mut items = Vec::new();
        for chunk in index.chunks_of(chunk_type) {
            let Some(path) = self.resolve(&chunk.path) else {
                warn!(
                    "Skipping {} chunk {} of '{}': path '{}' leaves the cache directory",
                    chunk_type, chunk.index, index.source_key, chunk.path
                );
                continue;
            };

            let parsed = fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<ChunkFile<T>>(&bytes).map_err(|e| e.to_string())
                });

            match parsed {
                Ok(file) => items.extend(file.data),
                Err(e) => warn!(
                    "Skipping unreadable {} chunk {}/{} of '{}': {}",
                    chunk_type, chunk.index, chunk.total_chunks, index.source_key, e
                ),
            }
        }
        items
    }

    /// Chunk paths are relative to the cache directory and may not climb out of it.
    fn resolve(&self, relative: &str) -> Option<PathBuf> {
        let path = Path::new(relative);
        path.components()
            .all(|component| matches!(component, Component::Normal(_)))
            .then(|| self.cache_dir.join(path))
    }

    /// Record the access time, unless a writer replaced the set since `loaded` was read.
    fn touch(&self, loaded: &CacheIndex) {
        let Some(mut current) = self.read_index(&loaded.source_key) else {
            return;
        };
        if current.created_at != loaded.created_at || current.chunks != loaded.chunks {
            debug!(
                "Cache set for '{}' was replaced during the read, leaving its index alone",
                loaded.source_key
            );
            return;
        }

        current.last_accessed = Utc::now();
        let path = layout::index_path(&self.cache_dir, &current.source_key);
        let result = serde_json::to_vec_pretty(&current)
            .map_err(crate::errors::CacheError::from)
            .and_then(|bytes| write_atomically(&self.cache_dir, &path, &bytes));
        if let Err(e) = result {
            debug!("Could not update last access time for '{}': {}", current.source_key, e);
        }
    }
}
