use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::errors::IngestError;
use crate::ingestor::progress::IngestionStage;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProcessingInfo {
    pub started_at: DateTime<Utc>,
    pub triggered_by: ProcessingTrigger,
    pub stage: IngestionStage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingTrigger {
    /// Explicit ingest request
    Manual,
    /// Cache found stale by a freshness check
    Refresh,
}

impl std::fmt::Display for ProcessingTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingTrigger::Manual => write!(f, "manual"),
            ProcessingTrigger::Refresh => write!(f, "refresh"),
        }
    }
}

/// Tracks which source keys are being ingested.
///
/// At most one ingestion runs per key; a second request for a busy key is
/// rejected rather than queued. The slot is held by an [`IngestionGuard`] and
/// released when the guard drops, whatever way the ingestion ends.
#[derive(Clone, Default)]
pub struct IngestionStateManager {
    processing_info: Arc<Mutex<HashMap<String, ProcessingInfo>>>,
}

impl IngestionStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProcessingInfo>> {
        self.processing_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the slot for `source_key`.
    pub fn try_start_processing(
        &self,
        source_key: &str,
        trigger: ProcessingTrigger,
    ) -> Result<IngestionGuard, IngestError> {
        let mut processing = self.lock();

        if processing.contains_key(source_key) {
            return Err(IngestError::AlreadyInProgress {
                source_key: source_key.to_string(),
            });
        }

        processing.insert(
            source_key.to_string(),
            ProcessingInfo {
                started_at: Utc::now(),
                triggered_by: trigger,
                stage: IngestionStage::Idle,
            },
        );

        Ok(IngestionGuard {
            manager: self.clone(),
            source_key: source_key.to_string(),
        })
    }

    pub fn is_processing(&self, source_key: &str) -> bool {
        self.lock().contains_key(source_key)
    }

    pub fn get_processing_info(&self, source_key: &str) -> Option<ProcessingInfo> {
        self.lock().get(source_key).cloned()
    }

    pub fn get_all_processing(&self) -> HashMap<String, ProcessingInfo> {
        self.lock().clone()
    }

    pub fn has_active_ingestions(&self) -> bool {
        !self.lock().is_empty()
    }
}

/// Holds one source key's ingestion slot.
pub struct IngestionGuard {
    manager: IngestionStateManager,
    source_key: String,
}

impl IngestionGuard {
    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    pub fn set_stage(&self, stage: IngestionStage) {
        if let Some(info) = self.manager.lock().get_mut(&self.source_key) {
            info.stage = stage;
        }
    }
}

impl Drop for IngestionGuard {
    fn drop(&mut self) {
        self.manager.lock().remove(&self.source_key);
    }
}
