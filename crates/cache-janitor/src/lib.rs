//! # Cache Janitor
//!
//! Time-based eviction for chunked cache sets. A cache set is a
//! `<key>.index.json` file plus its `<key>_chunks/` directory; a set whose
//! index has not been written within the retention window is removed,
//! chunk directory first.
//!
//! ```rust,no_run
//! use cache_janitor::{CacheJanitor, RetentionPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let janitor = CacheJanitor::builder()
//!     .cache_dir("/var/cache/epg")
//!     .policy(RetentionPolicy::days(7))
//!     .build()
//!     .await?;
//!
//! let report = janitor.cleanup_expired().await?;
//! println!("removed {} directories", report.dirs_removed);
//!
//! // Or keep it running in the background.
//! let _handle = janitor.spawn();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod janitor;
pub mod layout;
pub mod policy;

pub use error::{JanitorError, Result};
pub use janitor::{CacheJanitor, CacheJanitorBuilder, CleanupReport, RemovedSet};
pub use policy::RetentionPolicy;
