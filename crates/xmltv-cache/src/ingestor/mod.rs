pub mod accumulator;
pub mod decompression;
pub mod fetcher;
pub mod ingest_epg;
pub mod post_process;
pub mod progress;
pub mod state_manager;
pub mod text_guard;
pub mod xmltv_parser;

pub use decompression::{CompressionFormat, DecompressionService};
pub use fetcher::SourceFetcher;
pub use ingest_epg::{EpgIngestor, IngestOptions, IngestOutcome, IngestStats};
pub use progress::{IngestionStage, ProgressCallback, ProgressUpdate, no_progress};
pub use state_manager::{IngestionStateManager, ProcessingTrigger};
