//! Chunked on-disk cache of indexed sources.
//!
//! A cache set is a `<key>.index.json` file listing every chunk, plus a
//! `<key>_chunks/` directory holding `{"data":[...]}` chunk files of bounded
//! size. Naming lives in [`cache_janitor::layout`] so the janitor and the
//! writer always agree on what belongs to a set.

pub mod reader;
pub mod writer;

pub use reader::ChunkedCacheReader;
pub use writer::ChunkedCacheWriter;

use crate::models::{ChannelRecord, ProgramRecord};
use serde::{Deserialize, Serialize};

/// Item stored in `channelMap` chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMapEntry {
    pub channel_id: String,
    pub channel: ChannelRecord,
}

/// Item stored in `programMap` chunks.
///
/// A channel's programmes may be split over several consecutive segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramMapSegment {
    pub channel_id: String,
    pub programs: Vec<ProgramRecord>,
}

/// Envelope of every chunk file.
#[derive(Debug, Deserialize)]
pub(crate) struct ChunkFile<T> {
    pub data: Vec<T>,
}
