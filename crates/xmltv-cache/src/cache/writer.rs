//! Chunked cache writer.
//!
//! Every collection of an [`IndexedSource`] is packed greedily into chunk
//! files that stay within `max_chunk_bytes`. The new set is staged in a hidden
//! directory and swapped in only once every chunk is on disk, so readers see
//! either the previous set or the complete new one.

use crate::errors::{CacheError, CacheResult};
use crate::models::{CacheChunk, CacheIndex, ChannelRecord, ChunkType, IndexedSource, ProgramRecord};
use crate::utils::format_bytes;
use cache_janitor::layout;
use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CHUNK_OPEN: &[u8] = b"{\"data\":[";
const CHUNK_CLOSE: &[u8] = b"]}";
const SEGMENT_CLOSE: &[u8] = b"]}";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelMapEntryRef<'a> {
    channel_id: &'a str,
    channel: &'a ChannelRecord,
}

#[derive(Debug, Clone)]
pub struct ChunkedCacheWriter {
    cache_dir: PathBuf,
    max_chunk_bytes: usize,
}

impl ChunkedCacheWriter {
    pub fn new(cache_dir: impl Into<PathBuf>, max_chunk_bytes: usize) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_chunk_bytes: max_chunk_bytes.max(1),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn max_chunk_bytes(&self) -> usize {
        self.max_chunk_bytes
    }

    /// Persist `source` as the cache set for `source_key`, replacing any previous set.
    pub fn write(&self, source_key: &str, source: &IndexedSource) -> CacheResult<CacheIndex> {
        layout::validate_source_key(source_key)?;
        let started = Instant::now();

        let encoded = self.encode(source)?;

        fs::create_dir_all(&self.cache_dir).map_err(|e| CacheError::io(&self.cache_dir, e))?;
        let nonce = Uuid::new_v4().simple().to_string();
        let staging = self
            .cache_dir
            .join(layout::staging_dir_name(source_key, &nonce));

        let chunks = match self.stage(&staging, source_key, &encoded) {
            Ok(chunks) => chunks,
            Err(e) => {
                discard_dir(&staging);
                return Err(e);
            }
        };

        let now = Utc::now();
        let index = CacheIndex {
            source_key: source_key.to_string(),
            chunks,
            created_at: now,
            last_accessed: now,
        };
        let index_bytes = match serde_json::to_vec_pretty(&index) {
            Ok(bytes) => bytes,
            Err(e) => {
                discard_dir(&staging);
                return Err(e.into());
            }
        };

        let index_path = layout::index_path(&self.cache_dir, source_key);
        self.swap_in(source_key, &staging, &nonce, || {
            write_atomically(&self.cache_dir, &index_path, &index_bytes)
        })?;

        info!(
            "Cached source '{}': {} chunks, {} in {}ms",
            source_key,
            index.chunks.len(),
            format_bytes(index.total_bytes()),
            started.elapsed().as_millis()
        );
        Ok(index)
    }

    fn encode(&self, source: &IndexedSource) -> CacheResult<Vec<(ChunkType, Vec<Vec<u8>>)>> {
        let mut channels = ChunkPacker::new(ChunkType::Channels, self.max_chunk_bytes);
        for channel in &source.channels {
            channels.push(serde_json::to_vec(channel)?);
        }

        let mut channel_map = ChunkPacker::new(ChunkType::ChannelMap, self.max_chunk_bytes);
        for (channel_id, channel) in &source.channel_map {
            channel_map.push(serde_json::to_vec(&ChannelMapEntryRef {
                channel_id,
                channel,
            })?);
        }

        let segment_budget = self
            .max_chunk_bytes
            .saturating_sub(CHUNK_OPEN.len() + CHUNK_CLOSE.len());
        let mut program_map = ChunkPacker::new(ChunkType::ProgramMap, self.max_chunk_bytes);
        for (channel_id, programs) in &source.program_map {
            for segment in program_map_segments(channel_id, programs, segment_budget)? {
                program_map.push(segment);
            }
        }

        let mut programs = ChunkPacker::new(ChunkType::Programs, self.max_chunk_bytes);
        for program in &source.programs {
            programs.push(serde_json::to_vec(program)?);
        }

        Ok(vec![
            (ChunkType::Channels, channels.finish()),
            (ChunkType::ChannelMap, channel_map.finish()),
            (ChunkType::ProgramMap, program_map.finish()),
            (ChunkType::Programs, programs.finish()),
        ])
    }

    fn stage(
        &self,
        staging: &Path,
        source_key: &str,
        encoded: &[(ChunkType, Vec<Vec<u8>>)],
    ) -> CacheResult<Vec<CacheChunk>> {
        fs::create_dir(staging).map_err(|e| CacheError::io(staging, e))?;
        let dir_name = layout::chunk_dir_name(source_key);

        let mut chunks = Vec::new();
        for (chunk_type, bodies) in encoded {
            for (index, body) in bodies.iter().enumerate() {
                let file_name = layout::chunk_file_name(chunk_type.as_str(), index);
                write_atomically(staging, &staging.join(&file_name), body)?;
                chunks.push(CacheChunk {
                    chunk_type: *chunk_type,
                    index,
                    total_chunks: bodies.len(),
                    path: format!("{dir_name}/{file_name}"),
                    byte_size: body.len() as u64,
                });
            }
            debug!(
                "Staged {} {} chunk(s) for '{}'",
                bodies.len(),
                chunk_type,
                source_key
            );
        }
        Ok(chunks)
    }

    /// Replace the live chunk directory with `staging`, then publish the index.
    ///
    /// If `publish_index` fails the previous chunk directory is put back.
    fn swap_in<F>(
        &self,
        source_key: &str,
        staging: &Path,
        nonce: &str,
        publish_index: F,
    ) -> CacheResult<()>
    where
        F: FnOnce() -> CacheResult<()>,
    {
        let live = layout::chunk_dir_path(&self.cache_dir, source_key);
        let backup = self
            .cache_dir
            .join(layout::backup_dir_name(source_key, nonce));

        let had_previous = match fs::rename(&live, &backup) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                discard_dir(staging);
                return Err(CacheError::io(&live, e));
            }
        };

        if let Err(e) = fs::rename(staging, &live) {
            if had_previous {
                restore_backup(&backup, &live);
            }
            discard_dir(staging);
            return Err(CacheError::io(&live, e));
        }

        if let Err(e) = publish_index() {
            discard_dir(&live);
            if had_previous {
                restore_backup(&backup, &live);
            }
            return Err(e);
        }

        if had_previous {
            if let Err(e) = fs::remove_dir_all(&backup) {
                // Left for the janitor's transient sweep.
                warn!(
                    "Failed to remove previous chunk directory {}: {}",
                    backup.display(),
                    e
                );
            }
        }
        Ok(())
    }
}

/// Greedy packer producing `{"data":[...]}` chunk bodies.
struct ChunkPacker {
    chunk_type: ChunkType,
    max_bytes: usize,
    chunks: Vec<Vec<u8>>,
    current: Vec<u8>,
    items: usize,
}

impl ChunkPacker {
    fn new(chunk_type: ChunkType, max_bytes: usize) -> Self {
        Self {
            chunk_type,
            max_bytes,
            chunks: Vec::new(),
            current: CHUNK_OPEN.to_vec(),
            items: 0,
        }
    }

    fn push(&mut self, item: Vec<u8>) {
        if self.items > 0 && self.current.len() + 1 + item.len() + CHUNK_CLOSE.len() > self.max_bytes {
            self.seal();
        }

        if self.items == 0 {
            if CHUNK_OPEN.len() + item.len() + CHUNK_CLOSE.len() > self.max_bytes {
                warn!(
                    "Single {} item of {} exceeds the chunk budget of {}, writing it alone",
                    self.chunk_type,
                    format_bytes(item.len() as u64),
                    format_bytes(self.max_bytes as u64)
                );
            }
        } else {
            self.current.push(b',');
        }
        self.current.extend_from_slice(&item);
        self.items += 1;
    }

    fn seal(&mut self) {
        let mut chunk = std::mem::replace(&mut self.current, CHUNK_OPEN.to_vec());
        chunk.extend_from_slice(CHUNK_CLOSE);
        self.chunks.push(chunk);
        self.items = 0;
    }

    /// Sealed chunks; an empty collection still yields one empty chunk.
    fn finish(mut self) -> Vec<Vec<u8>> {
        if self.items > 0 || self.chunks.is_empty() {
            self.seal();
        }
        self.chunks
    }
}

/// Split one channel's programmes into `{channelId, programs}` segments of at most `budget` bytes.
fn program_map_segments(
    channel_id: &str,
    programs: &[ProgramRecord],
    budget: usize,
) -> CacheResult<Vec<Vec<u8>>> {
    let head = format!(
        "{{\"channelId\":{},\"programs\":[",
        serde_json::to_string(channel_id)?
    )
    .into_bytes();

    let mut segments = Vec::new();
    let mut current = head.clone();
    let mut count = 0usize;

    for program in programs {
        let item = serde_json::to_vec(program)?;
        if count > 0 && current.len() + 1 + item.len() + SEGMENT_CLOSE.len() > budget {
            current.extend_from_slice(SEGMENT_CLOSE);
            segments.push(std::mem::replace(&mut current, head.clone()));
            count = 0;
        }
        if count > 0 {
            current.push(b',');
        }
        current.extend_from_slice(&item);
        count += 1;
    }

    current.extend_from_slice(SEGMENT_CLOSE);
    segments.push(current);
    Ok(segments)
}

/// Write `bytes` to a temp file in `dir` and rename it over `target`.
pub(crate) fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> CacheResult<()> {
    let mut file = NamedTempFile::new_in(dir).map_err(|e| CacheError::io(dir, e))?;
    file.write_all(bytes)
        .and_then(|()| file.as_file().sync_all())
        .map_err(|e| CacheError::io(file.path(), e))?;
    file.persist(target)
        .map_err(|e| CacheError::io(target, e.error))?;
    Ok(())
}

fn discard_dir(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to discard {}: {}", dir.display(), e),
    }
}

fn restore_backup(backup: &Path, live: &Path) {
    if let Err(e) = fs::rename(backup, live) {
        warn!(
            "Failed to restore previous chunk directory {}: {}",
            backup.display(),
            e
        );
    }
}
