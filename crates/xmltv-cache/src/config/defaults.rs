/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
// Storage defaults
pub const DEFAULT_CACHE_DIR: &str = "./data/epg-cache";

// Ingestion defaults
pub const DEFAULT_BATCH_SIZE: usize = 2000;
pub const DEFAULT_MAX_PROGRAMS_PER_CHANNEL: usize = 1000;
pub const DEFAULT_MAX_TEXT_BYTES: usize = 512 * 1024;
pub const DEFAULT_INGEST_TIMEOUT: &str = "10m";
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 8 * 1024 * 1024;
pub const DEFAULT_REFRESH_INTERVAL: &str = "24h";
pub const DEFAULT_USER_AGENT: &str = concat!("xmltv-cache/", env!("CARGO_PKG_VERSION"));

// Janitor defaults
pub const DEFAULT_JANITOR_ENABLED: bool = true;
pub const DEFAULT_JANITOR_MAX_AGE: &str = "7days";

// Parser limits
pub const TRUNCATION_MARKER: &str = "…[truncated]";
pub const MAX_TRACKED_DEPTH: usize = 16;
pub const FETCH_CHANNEL_CAPACITY: usize = 8;
pub const READ_BUFFER_BYTES: usize = 1024 * 1024;
