//! Streaming XMLTV ingestion with a chunked on-disk cache.
//!
//! An XMLTV source (HTTP(S) URL or local file, optionally gzip-compressed) is
//! fetched, decompressed and parsed as a stream, indexed per channel and
//! written as a set of size-bounded JSON chunks that can be reloaded without
//! re-fetching. Stale cache sets are evicted by [`cache_janitor`].
//!
//! ```no_run
//! use xmltv_cache::config::Config;
//! use xmltv_cache::ingestor::no_progress;
//! use xmltv_cache::models::SourceDescriptor;
//! use xmltv_cache::services::EpgCacheService;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let service = EpgCacheService::from_config(&Config::default()).await?;
//! let source = SourceDescriptor::from_origin("https://example.com/guide.xml.gz");
//!
//! let outcome = service.ingest_and_cache(source.clone(), no_progress()).await?;
//! println!("{} channels", outcome.source.channel_count());
//!
//! let cached = service.load_cached(&source.source_key).await;
//! assert!(cached.is_some());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod errors;
pub mod ingestor;
pub mod models;
pub mod services;
pub mod sources;
pub mod utils;
