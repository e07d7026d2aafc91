//! Ingestion stages and progress reporting.

use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

/// Stage of the ingestion state machine.
///
/// `Idle -> Fetching -> [Decompressing] -> Parsing -> Flushing -> PostProcessing
/// -> WritingCache -> Done`; any stage may move to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStage {
    Idle,
    Fetching,
    Decompressing,
    Parsing,
    Flushing,
    PostProcessing,
    WritingCache,
    Done,
    Failed,
}

impl IngestionStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestionStage::Done | IngestionStage::Failed)
    }
}

impl fmt::Display for IngestionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestionStage::Idle => "idle",
            IngestionStage::Fetching => "fetching",
            IngestionStage::Decompressing => "decompressing",
            IngestionStage::Parsing => "parsing",
            IngestionStage::Flushing => "flushing",
            IngestionStage::PostProcessing => "post_processing",
            IngestionStage::WritingCache => "writing_cache",
            IngestionStage::Done => "done",
            IngestionStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot passed to progress callbacks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub source_key: String,
    pub stage: IngestionStage,
    pub bytes_downloaded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    pub channels_parsed: usize,
    pub programs_parsed: usize,
    pub flushes: usize,
    pub message: String,
}

impl ProgressUpdate {
    pub fn new(source_key: &str, stage: IngestionStage, message: impl Into<String>) -> Self {
        Self {
            source_key: source_key.to_string(),
            stage,
            bytes_downloaded: 0,
            total_bytes: None,
            percent: None,
            channels_parsed: 0,
            programs_parsed: 0,
            flushes: 0,
            message: message.into(),
        }
    }
}

/// Callback invoked synchronously on the pipeline path.
pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

/// Callback that discards every update.
pub fn no_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

/// Byte counter that decides when a download progress update is due.
///
/// Reports at most once per MiB, or once per 10% step when the total is known.
#[derive(Debug, Clone)]
pub(crate) struct TransferProgress {
    total: Option<u64>,
    downloaded: u64,
    last_reported: u64,
}

const REPORT_EVERY_BYTES: u64 = 1024 * 1024;

impl TransferProgress {
    pub(crate) fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            downloaded: 0,
            last_reported: 0,
        }
    }

    pub(crate) fn downloaded(&self) -> u64 {
        self.downloaded
    }

    pub(crate) fn total(&self) -> Option<u64> {
        self.total
    }

    pub(crate) fn percent(&self) -> Option<f64> {
        self.total
            .map(|total| (self.downloaded as f64 * 100.0 / total as f64).min(100.0))
    }

    /// Record `len` more bytes; true when an update should be emitted.
    pub(crate) fn advance(&mut self, len: u64) -> bool {
        self.downloaded += len;
        let step = match self.total {
            Some(total) => (total / 10).clamp(1, REPORT_EVERY_BYTES),
            None => REPORT_EVERY_BYTES,
        };
        if self.downloaded - self.last_reported >= step {
            self.last_reported = self.downloaded;
            true
        } else {
            false
        }
    }
}
