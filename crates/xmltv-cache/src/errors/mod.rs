//! Error handling for ingestion and caching.
//!
//! # Error Categories
//!
//! - **Ingest Errors**: terminal pipeline failures, each tagged with the stage it happened in
//! - **Fetch Errors**: HTTP status, transport, timeout and local file failures
//! - **Cache Errors**: chunk writer failures (reported, never fatal to an ingestion)
//!
//! Recoverable conditions (malformed elements, oversized text, unreadable
//! chunks) never surface here; they are counted and logged where they occur.

pub mod types;

pub use types::*;

/// Convenience type alias for ingestion results
pub type IngestResult<T> = Result<T, IngestError>;

/// Convenience type alias for cache results
pub type CacheResult<T> = Result<T, CacheError>;
