use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Collection stored in a chunk file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChunkType {
    Channels,
    ChannelMap,
    ProgramMap,
    Programs,
}

impl ChunkType {
    pub const ALL: [ChunkType; 4] = [
        ChunkType::Channels,
        ChunkType::ChannelMap,
        ChunkType::ProgramMap,
        ChunkType::Programs,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Channels => "channels",
            ChunkType::ChannelMap => "channelMap",
            ChunkType::ProgramMap => "programMap",
            ChunkType::Programs => "programs",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry in a cache index describing one chunk file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheChunk {
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub index: usize,
    pub total_chunks: usize,
    /// Relative to the cache directory
    pub path: String,
    /// Zero when the index predates size tracking
    #[serde(default)]
    pub byte_size: u64,
}

/// Contents of `<sourceKey>.index.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredCacheIndex")]
pub struct CacheIndex {
    pub source_key: String,
    pub chunks: Vec<CacheChunk>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// On-disk form of [`CacheIndex`]; `lastAccessed` may be absent.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCacheIndex {
    source_key: String,
    chunks: Vec<CacheChunk>,
    created_at: DateTime<Utc>,
    last_accessed: Option<DateTime<Utc>>,
}

impl From<StoredCacheIndex> for CacheIndex {
    fn from(stored: StoredCacheIndex) -> Self {
        Self {
            last_accessed: stored.last_accessed.unwrap_or(stored.created_at),
            source_key: stored.source_key,
            chunks: stored.chunks,
            created_at: stored.created_at,
        }
    }
}

impl CacheIndex {
    /// Chunks of one type in `index` order.
    pub fn chunks_of(&self, chunk_type: ChunkType) -> Vec<&CacheChunk> {
        let mut chunks: Vec<_> = self
            .chunks
            .iter()
            .filter(|chunk| chunk.chunk_type == chunk_type)
            .collect();
        chunks.sort_by_key(|chunk| chunk.index);
        chunks
    }

    pub fn total_bytes(&self) -> u64 {
        self.chunks.iter().map(|chunk| chunk.byte_size).sum()
    }
}

/// Summary of one cached source, as listed by the stats command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSourceSummary {
    pub source_key: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub chunk_count: usize,
    pub byte_size: u64,
}
