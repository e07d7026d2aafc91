pub mod epg_cache;

pub use epg_cache::{EpgCacheService, LoadedFrom, LoadedSource};
