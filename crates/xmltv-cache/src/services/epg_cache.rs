//! EPG cache service
//!
//! Front door for callers: ingest a source and cache it, reload a cached
//! source, reuse a fresh cache instead of re-ingesting, and run cache
//! maintenance through the janitor.

use anyhow::{Context, Result};
use cache_janitor::{CacheJanitor, CleanupReport, RemovedSet};
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::ChunkedCacheReader;
use crate::config::Config;
use crate::errors::IngestResult;
use crate::ingestor::{
    EpgIngestor, IngestOptions, IngestOutcome, IngestionStateManager, ProcessingTrigger,
    ProgressCallback, SourceFetcher,
};
use crate::models::{CachedSourceSummary, IndexedSource, SourceDescriptor};

/// Where a [`LoadedSource`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadedFrom {
    Cache,
    Ingestion,
}

#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub source: IndexedSource,
    pub loaded_from: LoadedFrom,
}

/// Service combining ingestion, cache reconstruction and cache maintenance
pub struct EpgCacheService {
    ingestor: EpgIngestor,
    reader: ChunkedCacheReader,
    janitor: CacheJanitor,
    options: IngestOptions,
    refresh_interval: Duration,
}

impl EpgCacheService {
    /// Build the service from configuration, creating the cache directory if needed
    pub async fn from_config(config: &Config) -> Result<Self> {
        let cache_dir = &config.storage.cache_dir;

        let mut builder = CacheJanitor::builder()
            .cache_dir(cache_dir)
            .policy(config.janitor.retention_policy());
        if let Some(interval) = config.janitor.interval {
            builder = builder.interval(interval);
        }
        let janitor = builder
            .build()
            .await
            .with_context(|| format!("Failed to prepare cache directory {}", cache_dir.display()))?;

        let fetcher = SourceFetcher::with_user_agent(&config.ingestion.user_agent)?;

        Ok(Self::new(
            EpgIngestor::new(fetcher, IngestionStateManager::new()).with_cache_dir(cache_dir),
            ChunkedCacheReader::new(cache_dir),
            janitor,
            config.ingestion.ingest_options(),
            config.ingestion.refresh_interval,
        ))
    }

    pub fn new(
        ingestor: EpgIngestor,
        reader: ChunkedCacheReader,
        janitor: CacheJanitor,
        options: IngestOptions,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            ingestor,
            reader,
            janitor,
            options,
            refresh_interval,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        self.reader.cache_dir()
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn state_manager(&self) -> &IngestionStateManager {
        self.ingestor.state_manager()
    }

    /// Ingest `source` and write its cache. A cache write failure is reported in the stats only.
    pub async fn ingest_and_cache(
        &self,
        source: SourceDescriptor,
        on_progress: ProgressCallback,
    ) -> IngestResult<IngestOutcome> {
        self.ingestor
            .ingest(source, self.options.clone(), on_progress)
            .await
    }

    /// Reconstruct a cached source, `None` if there is no usable cache.
    pub async fn load_cached(&self, source_key: &str) -> Option<IndexedSource> {
        let reader = self.reader.clone();
        let key = source_key.to_string();
        match tokio::task::spawn_blocking(move || reader.read(&key)).await {
            Ok(source) => source,
            Err(e) => {
                warn!("Cache read task for '{}' failed: {}", source_key, e);
                None
            }
        }
    }

    /// Return the cached source while it is younger than `max_age`, otherwise re-ingest.
    pub async fn get_or_ingest(
        &self,
        source: SourceDescriptor,
        max_age: Duration,
        on_progress: ProgressCallback,
    ) -> IngestResult<LoadedSource> {
        if self.is_fresh(&source.source_key, max_age).await
            && let Some(cached) = self.load_cached(&source.source_key).await
        {
            debug!("Serving '{}' from cache", source.source_key);
            return Ok(LoadedSource {
                source: cached,
                loaded_from: LoadedFrom::Cache,
            });
        }

        let outcome = self
            .ingestor
            .ingest_with_trigger(
                source,
                self.options.clone(),
                on_progress,
                ProcessingTrigger::Refresh,
            )
            .await?;
        Ok(LoadedSource {
            source: outcome.source,
            loaded_from: LoadedFrom::Ingestion,
        })
    }

    async fn is_fresh(&self, source_key: &str, max_age: Duration) -> bool {
        let reader = self.reader.clone();
        let key = source_key.to_string();
        let index = tokio::task::spawn_blocking(move || reader.read_index(&key))
            .await
            .ok()
            .flatten();

        let Some(index) = index else {
            return false;
        };
        // A creation time in the future counts as brand new.
        let age = (Utc::now() - index.created_at).to_std().unwrap_or_default();
        age < max_age
    }

    /// Remove the cache set of one source.
    pub async fn clear_cache(&self, source_key: &str) -> Result<RemovedSet> {
        let removed = self
            .janitor
            .remove_cache_set(source_key)
            .await
            .with_context(|| format!("Failed to clear cache for '{source_key}'"))?;
        info!(
            "Cleared cache for '{}': {} files, {} bytes",
            source_key, removed.files_removed, removed.bytes_removed
        );
        Ok(removed)
    }

    /// One janitor pass with a caller-chosen age limit in days.
    pub async fn cleanup_expired_cache(&self, max_age_days: u32) -> Result<CleanupReport> {
        self.janitor
            .cleanup_expired_days(max_age_days)
            .await
            .context("Cache cleanup failed")
    }

    /// Start the scheduled janitor, if enabled.
    pub fn spawn_janitor(&self) -> Option<JoinHandle<()>> {
        self.janitor.spawn()
    }

    /// Summaries of every cached source, sorted by key.
    pub async fn list_cached(&self) -> Result<Vec<CachedSourceSummary>> {
        let reader = self.reader.clone();
        tokio::task::spawn_blocking(move || list_cached_blocking(&reader))
            .await
            .context("Cache listing task failed")?
    }
}

fn list_cached_blocking(reader: &ChunkedCacheReader) -> Result<Vec<CachedSourceSummary>> {
    let dir = reader.cache_dir();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to list cache directory {}", dir.display()));
        }
    };

    let mut summaries = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list cache directory {}", dir.display()))?;
        let file_name = entry.file_name();
        let Some(key) = cache_janitor::layout::key_from_index_file_name(&file_name.to_string_lossy())
            .map(str::to_string)
        else {
            continue;
        };

        if let Some(index) = reader.read_index(&key) {
            summaries.push(CachedSourceSummary {
                chunk_count: index.chunks.len(),
                byte_size: index.total_bytes(),
                source_key: index.source_key,
                created_at: index.created_at,
                last_accessed: index.last_accessed,
            });
        }
    }

    summaries.sort_by(|a, b| a.source_key.cmp(&b.source_key));
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ChunkedCacheWriter;
    use crate::errors::IngestError;
    use crate::ingestor::no_progress;
    use crate::models::ChannelRecord;

    async fn service(cache_dir: &Path) -> EpgCacheService {
        let mut config = Config::default();
        config.storage.cache_dir = cache_dir.to_path_buf();
        EpgCacheService::from_config(&config).await.unwrap()
    }

    fn one_channel() -> IndexedSource {
        let channel = ChannelRecord {
            id: "c1".to_string(),
            primary_name: "Cached".to_string(),
            alternate_names: vec![],
            icon_url: None,
        };
        IndexedSource {
            channels: vec![channel.clone()],
            channel_map: [("c1".to_string(), channel)].into_iter().collect(),
            ..IndexedSource::default()
        }
    }

    #[tokio::test]
    async fn test_get_or_ingest_prefers_fresh_cache() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let service = service(temp_dir.path()).await;

        // The origin does not exist, so only a cache hit can succeed.
        let descriptor = SourceDescriptor::from_origin("/nonexistent/guide.xml");
        ChunkedCacheWriter::new(temp_dir.path(), 1024 * 1024)
            .write(&descriptor.source_key, &one_channel())?;

        let loaded = service
            .get_or_ingest(descriptor.clone(), Duration::from_secs(3600), no_progress())
            .await?;
        assert_eq!(loaded.loaded_from, LoadedFrom::Cache);
        assert_eq!(loaded.source, one_channel());

        let stale = service
            .get_or_ingest(descriptor, Duration::ZERO, no_progress())
            .await;
        assert!(matches!(stale, Err(IngestError::Network { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_list_and_clear_cache() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let service = service(temp_dir.path()).await;
        let writer = ChunkedCacheWriter::new(temp_dir.path(), 1024 * 1024);
        writer.write("bbb", &one_channel())?;
        writer.write("aaa", &IndexedSource::default())?;

        let listed = service.list_cached().await?;
        let keys: Vec<_> = listed.iter().map(|s| s.source_key.as_str()).collect();
        assert_eq!(keys, vec!["aaa", "bbb"]);
        assert!(listed.iter().all(|s| s.chunk_count == 4 && s.byte_size > 0));

        let removed = service.clear_cache("bbb").await?;
        assert_eq!(removed.files_removed, 5);
        assert!(service.load_cached("bbb").await.is_none());
        assert_eq!(service.list_cached().await?.len(), 1);
        Ok(())
    }
}
