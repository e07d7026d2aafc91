use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use crate::ingestor::ingest_epg::IngestOptions;
use cache_janitor::RetentionPolicy;
use defaults::*;

/// Where cache sets are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

/// Ingestion pipeline tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Programmes buffered before merging into the channel index
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Programmes kept per channel after sorting by start time
    #[serde(default = "default_max_programs_per_channel")]
    pub max_programs_per_channel: usize,
    /// Longest text value kept before truncation
    #[serde(default = "default_max_text_bytes")]
    pub max_text_bytes: usize,
    /// Deadline for connecting to and transferring one source
    #[serde(default = "default_timeout", with = "duration_serde::duration")]
    pub timeout: Duration,
    /// Upper bound on a single chunk file
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
    /// A cache younger than this is reused instead of re-ingesting
    #[serde(default = "default_refresh_interval", with = "duration_serde::duration")]
    pub refresh_interval: Duration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Scheduled eviction of stale cache sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JanitorConfig {
    #[serde(default = "default_janitor_enabled")]
    pub enabled: bool,
    #[serde(default = "default_janitor_max_age", with = "duration_serde::duration")]
    pub max_age: Duration,
    /// Defaults to an interval derived from `max_age`
    #[serde(
        default,
        with = "duration_serde::option_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub interval: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub janitor: JanitorConfig,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_programs_per_channel() -> usize {
    DEFAULT_MAX_PROGRAMS_PER_CHANNEL
}

fn default_max_text_bytes() -> usize {
    DEFAULT_MAX_TEXT_BYTES
}

fn default_timeout() -> Duration {
    humantime::parse_duration(DEFAULT_INGEST_TIMEOUT).unwrap_or(Duration::from_secs(600))
}

fn default_max_chunk_bytes() -> usize {
    DEFAULT_MAX_CHUNK_BYTES
}

fn default_refresh_interval() -> Duration {
    humantime::parse_duration(DEFAULT_REFRESH_INTERVAL).unwrap_or(Duration::from_secs(86400))
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_janitor_enabled() -> bool {
    DEFAULT_JANITOR_ENABLED
}

fn default_janitor_max_age() -> Duration {
    humantime::parse_duration(DEFAULT_JANITOR_MAX_AGE).unwrap_or(Duration::from_secs(7 * 86400))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_programs_per_channel: default_max_programs_per_channel(),
            max_text_bytes: default_max_text_bytes(),
            timeout: default_timeout(),
            max_chunk_bytes: default_max_chunk_bytes(),
            refresh_interval: default_refresh_interval(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_janitor_enabled(),
            max_age: default_janitor_max_age(),
            interval: None,
        }
    }
}

impl IngestionConfig {
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            batch_size: self.batch_size,
            max_programs_per_channel: self.max_programs_per_channel,
            max_text_bytes: self.max_text_bytes,
            timeout: self.timeout,
            max_chunk_bytes: self.max_chunk_bytes,
        }
    }
}

impl JanitorConfig {
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new()
            .max_age(self.max_age)
            .enabled(self.enabled)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".to_string());
        Self::load_from_file(Path::new(&config_file))
    }

    /// Read `config_file`, or write the defaults there if it does not exist yet.
    pub fn load_from_file(config_file: &Path) -> Result<Self> {
        let config = if config_file.exists() {
            let contents = std::fs::read_to_string(config_file)?;
            toml::from_str(&contents)?
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            if let Some(parent) = config_file.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(config_file, contents)?;
            info!("Created default config file: {}", config_file.display());
            default_config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingestion.batch_size == 0 {
            bail!("ingestion.batch_size must be at least 1");
        }
        if self.ingestion.max_chunk_bytes == 0 {
            bail!("ingestion.max_chunk_bytes must be at least 1");
        }
        if self.ingestion.max_programs_per_channel == 0 {
            bail!("ingestion.max_programs_per_channel must be at least 1");
        }
        if self.ingestion.max_text_bytes == 0 {
            bail!("ingestion.max_text_bytes must be at least 1");
        }
        if self.ingestion.timeout.is_zero() {
            bail!("ingestion.timeout must be greater than zero");
        }
        if self.storage.cache_dir.as_os_str().is_empty() {
            bail!("storage.cache_dir must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_writes_defaults() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("nested").join("config.toml");

        let config = Config::load_from_file(&path)?;
        assert_eq!(config, Config::default());
        assert!(path.exists());

        // The written file loads back to the same values.
        assert_eq!(Config::load_from_file(&path)?, config);
        Ok(())
    }

    #[test]
    fn test_partial_file_uses_defaults_and_human_durations() -> Result<()> {
        let config: Config = toml::from_str(
            r#"
            [storage]
            cache_dir = "/tmp/epg"

            [ingestion]
            batch_size = 50
            timeout = "90s"

            [janitor]
            max_age = 172800
            "#,
        )?;

        assert_eq!(config.storage.cache_dir, PathBuf::from("/tmp/epg"));
        assert_eq!(config.ingestion.batch_size, 50);
        assert_eq!(config.ingestion.timeout, Duration::from_secs(90));
        assert_eq!(config.ingestion.max_text_bytes, DEFAULT_MAX_TEXT_BYTES);
        assert_eq!(config.janitor.max_age, Duration::from_secs(2 * 86400));
        assert!(config.janitor.enabled);
        assert_eq!(config.janitor.interval, None);
        Ok(())
    }

    #[test]
    fn test_janitor_interval_and_bad_duration() {
        let config: Config = toml::from_str("[janitor]\ninterval = \"30m\"\n").unwrap();
        assert_eq!(config.janitor.interval, Some(Duration::from_secs(1800)));

        assert!(toml::from_str::<Config>("[ingestion]\ntimeout = \"soon\"\n").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut config = Config::default();
        config.ingestion.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ingestion.max_chunk_bytes = 0;
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }
}
