//! Batch accumulation of parsed elements.
//!
//! Programmes are buffered and merged into the per-channel index in batches so
//! the merge cost is paid once per `batch_size` records. The buffer is reused
//! across flushes.

use crate::ingestor::xmltv_parser::XmltvChannel;
use crate::models::{ChannelProgramIndex, ProgramRecord};
use std::collections::HashMap;
use tracing::debug;

/// Counters reported with progress updates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulatorStats {
    pub flushes: usize,
    pub flushed_records: usize,
    pub duplicate_channels: usize,
}

/// Everything accumulated from one document, ready for post-processing.
#[derive(Debug, Default)]
pub struct AccumulatedSource {
    /// First-seen order; a duplicate id replaces the earlier record in place
    pub channels: Vec<XmltvChannel>,
    pub programs: ChannelProgramIndex,
    pub stats: AccumulatorStats,
}

pub struct BatchAccumulator {
    batch_size: usize,
    pending: Vec<ProgramRecord>,
    programs: ChannelProgramIndex,
    channels: Vec<XmltvChannel>,
    channel_positions: HashMap<String, usize>,
    stats: AccumulatorStats,
}

impl BatchAccumulator {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
            programs: ChannelProgramIndex::new(),
            channels: Vec::new(),
            channel_positions: HashMap::new(),
            stats: AccumulatorStats::default(),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> &AccumulatorStats {
        &self.stats
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Merge a channel; a later record with the same id wins.
    pub fn push_channel(&mut self, channel: XmltvChannel) {
        match self.channel_positions.get(&channel.id) {
            Some(&position) => {
                debug!("Duplicate channel id '{}', keeping the later definition", channel.id);
                self.stats.duplicate_channels += 1;
                self.channels[position] = channel;
            }
            None => {
                self.channel_positions
                    .insert(channel.id.clone(), self.channels.len());
                self.channels.push(channel);
            }
        }
    }

    /// Buffer a programme. Returns true if this push triggered a flush.
    pub fn push_program(&mut self, program: ProgramRecord) -> bool {
        self.pending.push(program);
        if self.pending.len() >= self.batch_size {
            self.flush();
            true
        } else {
            false
        }
    }

    /// Merge the pending batch into the channel index.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let count = self.pending.len();
        for program in self.pending.drain(..) {
            self.programs
                .entry(program.channel_id.clone())
                .or_default()
                .push(program);
        }
        self.stats.flushes += 1;
        self.stats.flushed_records += count;
        debug!(
            "Flushed batch of {} programmes ({} channels indexed)",
            count,
            self.programs.len()
        );
    }

    /// Flush the remainder and hand over the accumulated data.
    pub fn finish(mut self) -> AccumulatedSource {
        self.flush();
        AccumulatedSource {
            channels: self.channels,
            programs: self.programs,
            stats: self.stats,
        }
    }
}
