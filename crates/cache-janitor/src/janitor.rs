//! Time-based eviction of cache sets.

use crate::{
    error::{JanitorError, Result},
    layout,
    policy::RetentionPolicy,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{fs, sync::Mutex, task::JoinHandle, time::interval};

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub files_removed: u64,
    pub dirs_removed: u64,
    pub bytes_removed: u64,
    #[serde(rename = "cacheSizeBefore")]
    pub size_before: u64,
    #[serde(rename = "cacheSizeAfter")]
    pub size_after: u64,
    /// Per-set failures; a failing set is left on disk for the next pass.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

/// What was deleted for a single cache set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovedSet {
    pub files_removed: u64,
    pub dirs_removed: u64,
    pub bytes_removed: u64,
}

impl CleanupReport {
    fn absorb(&mut self, removed: RemovedSet) {
        self.files_removed += removed.files_removed;
        self.dirs_removed += removed.dirs_removed;
        self.bytes_removed += removed.bytes_removed;
    }
}

/// Evicts expired `<key>.index.json` + `<key>_chunks/` sets from a cache root.
#[derive(Clone, Debug)]
pub struct CacheJanitor {
    cache_dir: PathBuf,
    policy: RetentionPolicy,
    interval: Duration,
    pass_lock: Arc<Mutex<()>>,
}

impl CacheJanitor {
    /// Create a new builder for configuring the janitor.
    #[must_use]
    pub fn builder() -> CacheJanitorBuilder {
        CacheJanitorBuilder::new()
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one pass with the configured policy.
    ///
    /// # Errors
    /// Returns an error only if the cache root cannot be listed. Failures on
    /// individual sets are recorded in [`CleanupReport::failures`].
    pub async fn cleanup_expired(&self) -> Result<CleanupReport> {
        self.cleanup_with_policy(&self.policy).await
    }

    /// Run one pass evicting sets older than `max_age_days`.
    ///
    /// # Errors
    /// See [`CacheJanitor::cleanup_expired`].
    pub async fn cleanup_expired_days(&self, max_age_days: u32) -> Result<CleanupReport> {
        self.cleanup_with_policy(&RetentionPolicy::days(max_age_days))
            .await
    }

    /// # Errors
    /// See [`CacheJanitor::cleanup_expired`].
    pub async fn cleanup_with_policy(&self, policy: &RetentionPolicy) -> Result<CleanupReport> {
        let _pass = self.pass_lock.lock().await;
        let mut report = CleanupReport {
            size_before: dir_size(&self.cache_dir).await?.bytes,
            ..CleanupReport::default()
        };

        if !policy.enabled {
            report.size_after = report.size_before;
            return Ok(report);
        }

        let now = Utc::now();
        let mut index_keys = Vec::new();
        let mut other_dirs = Vec::new();

        let mut entries = fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let file_type = entry.file_type().await?;
            if file_type.is_file() {
                if let Some(key) = layout::key_from_index_file_name(&name) {
                    index_keys.push(key.to_string());
                }
            } else if file_type.is_dir() {
                other_dirs.push(name);
            }
        }

        for key in &index_keys {
            let index_path = layout::index_path(&self.cache_dir, key);
            let Some(modified) = modified_at(&index_path).await else {
                continue;
            };
            if !policy.is_expired(modified, now) {
                continue;
            }

            match self.remove_cache_set(key).await {
                Ok(removed) => {
                    tracing::debug!(
                        "Evicted cache set '{}' (modified {}, {} bytes)",
                        key,
                        modified,
                        removed.bytes_removed
                    );
                    report.absorb(removed);
                }
                Err(e) => {
                    tracing::warn!("Failed to evict cache set '{}': {}", key, e);
                    report.failures.push(format!("{key}: {e}"));
                }
            }
        }

        // Chunk directories whose index is gone, and abandoned writer staging areas.
        for dir_name in other_dirs {
            let orphaned = dir_name
                .strip_suffix(layout::CHUNK_DIR_SUFFIX)
                .is_some_and(|key| !index_keys.iter().any(|k| k == key));
            if !orphaned && !layout::is_transient_dir_name(&dir_name) {
                continue;
            }

            let path = self.cache_dir.join(&dir_name);
            let Some(modified) = modified_at(&path).await else {
                continue;
            };
            if !policy.is_expired(modified, now) {
                continue;
            }

            match remove_dir_counted(&path).await {
                Ok(removed) => {
                    tracing::debug!("Removed stale cache directory '{}'", dir_name);
                    report.absorb(removed);
                }
                Err(e) => {
                    tracing::warn!("Failed to remove stale directory '{}': {}", dir_name, e);
                    report.failures.push(format!("{dir_name}: {e}"));
                }
            }
        }

        report.size_after = dir_size(&self.cache_dir).await?.bytes;

        if report.files_removed > 0 || report.dirs_removed > 0 {
            tracing::info!(
                "Cache cleanup removed {} files and {} directories ({} bytes), cache size {} -> {} bytes",
                report.files_removed,
                report.dirs_removed,
                report.bytes_removed,
                report.size_before,
                report.size_after
            );
        }

        Ok(report)
    }

    /// Delete one cache set: chunk directory first, then the index.
    ///
    /// The index is only removed once its chunk directory is gone, so a
    /// chunk directory never outlives the index that references it.
    ///
    /// # Errors
    /// Returns an error if the key is invalid or either removal fails for a
    /// reason other than the path already being absent.
    pub async fn remove_cache_set(&self, key: &str) -> Result<RemovedSet> {
        layout::validate_source_key(key)?;

        let chunk_dir = layout::chunk_dir_path(&self.cache_dir, key);
        let mut removed = match remove_dir_counted(&chunk_dir).await {
            Ok(removed) => removed,
            Err(JanitorError::Io(e)) if e.kind() == ErrorKind::NotFound => RemovedSet::default(),
            Err(JanitorError::Io(source)) => {
                return Err(JanitorError::ChunkDirRemoval {
                    path: chunk_dir,
                    source,
                });
            }
            Err(e) => return Err(e),
        };

        let index_path = layout::index_path(&self.cache_dir, key);
        match fs::metadata(&index_path).await {
            Ok(meta) => {
                fs::remove_file(&index_path).await?;
                removed.files_removed += 1;
                removed.bytes_removed += meta.len();
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(removed)
    }

    /// Total bytes currently held under the cache root.
    ///
    /// # Errors
    /// Returns an error if the cache root cannot be walked.
    pub async fn cache_size(&self) -> Result<u64> {
        Ok(dir_size(&self.cache_dir).await?.bytes)
    }

    /// Start the background cleanup task.
    ///
    /// The first tick fires immediately, so a pass runs at startup and then
    /// once per interval. Pass failures are logged and never stop the loop.
    pub fn spawn(&self) -> Option<JoinHandle<()>> {
        if !self.policy.enabled || self.interval.is_zero() {
            return None;
        }

        let janitor = self.clone();

        Some(tokio::spawn(async move {
            let mut cleanup_interval = interval(janitor.interval);

            loop {
                cleanup_interval.tick().await;

                if let Err(e) = janitor.cleanup_expired().await {
                    tracing::error!("Error during cache cleanup: {}", e);
                }
            }
        }))
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct DirSize {
    files: u64,
    bytes: u64,
}

async fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let meta = fs::metadata(path).await.ok()?;
    meta.modified().ok().map(DateTime::<Utc>::from)
}

/// Iterative walk; symlinks are counted by their own size and not followed.
async fn dir_size(root: &Path) -> Result<DirSize> {
    let mut size = DirSize::default();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound && dir != root => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let Ok(meta) = fs::symlink_metadata(entry.path()).await else {
                continue;
            };
            if meta.is_dir() {
                pending.push(entry.path());
            } else {
                size.files += 1;
                size.bytes += meta.len();
            }
        }
    }

    Ok(size)
}

async fn remove_dir_counted(path: &Path) -> Result<RemovedSet> {
    let meta = fs::symlink_metadata(path).await?;
    if !meta.is_dir() {
        return Err(JanitorError::Io(std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("{} is not a directory", path.display()),
        )));
    }

    let size = dir_size(path).await?;
    fs::remove_dir_all(path).await?;

    Ok(RemovedSet {
        files_removed: size.files,
        dirs_removed: 1,
        bytes_removed: size.bytes,
    })
}

/// Builder for configuring a `CacheJanitor`.
pub struct CacheJanitorBuilder {
    cache_dir: Option<PathBuf>,
    policy: RetentionPolicy,
    interval: Option<Duration>,
}

impl CacheJanitorBuilder {
    fn new() -> Self {
        Self {
            cache_dir: None,
            policy: RetentionPolicy::default(),
            interval: None,
        }
    }

    /// Set the cache root (required).
    #[must_use]
    pub fn cache_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the retention policy.
    #[must_use]
    pub fn policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Override the scheduling interval. Defaults to the policy's recommended interval.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Build the janitor, creating the cache root if needed.
    ///
    /// # Errors
    /// Returns an error if the cache root is not set or cannot be created.
    pub async fn build(self) -> Result<CacheJanitor> {
        let cache_dir = self
            .cache_dir
            .ok_or_else(|| JanitorError::Configuration {
                message: "Cache directory is required".to_string(),
            })?;

        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| JanitorError::CacheDirUnavailable {
                path: cache_dir.clone(),
                reason: e.to_string(),
            })?;

        let interval = self
            .interval
            .unwrap_or_else(|| self.policy.recommended_interval());

        tracing::debug!(
            "CacheJanitor initialized - cache_dir: {:?}, max_age: {:?}, interval: {:?}, enabled: {}",
            cache_dir,
            self.policy.max_age,
            interval,
            self.policy.enabled
        );

        Ok(CacheJanitor {
            cache_dir,
            policy: self.policy,
            interval,
            pass_lock: Arc::new(Mutex::new(())),
        })
    }
}
