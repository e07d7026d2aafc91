//! EPG Ingestor - streaming XMLTV ingestion
//!
//! One ingestion runs as two cooperating halves:
//!
//! - an async transfer that pumps source bytes into a bounded channel under
//!   the ingestion deadline, and
//! - a blocking pipeline (decompress, parse, batch, post-process, write cache)
//!   pulling from that channel on the blocking thread pool.
//!
//! The bounded channel gives backpressure: the transfer only runs as fast as
//! the parser consumes. Whichever half fails first unwinds the other.

use crate::cache::writer::ChunkedCacheWriter;
use crate::config::defaults::*;
use crate::errors::{FetchError, IngestError, IngestResult};
use crate::ingestor::accumulator::{AccumulatorStats, BatchAccumulator};
use crate::ingestor::decompression::{CompressionFormat, CompressionHints, DecompressionService};
use crate::ingestor::fetcher::{ChannelReader, ChunkMessage, SourceFetcher, TransferAborted, pump};
use crate::ingestor::post_process::{PostProcessStats, post_process};
use crate::ingestor::progress::{IngestionStage, ProgressCallback, ProgressUpdate};
use crate::ingestor::state_manager::{IngestionGuard, IngestionStateManager, ProcessingTrigger};
use crate::ingestor::text_guard::TextGuard;
use crate::ingestor::xmltv_parser::{ParseStats, XmltvElement, XmltvParseError, XmltvReader};
use crate::models::{CacheIndex, IndexedSource, SourceDescriptor};
use crate::utils::url::UrlUtils;
use crate::utils::{format_bytes, format_duration};

use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Tuning for one ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub max_programs_per_channel: usize,
    pub max_text_bytes: usize,
    /// Deadline for connecting and transferring the source
    pub timeout: Duration,
    pub max_chunk_bytes: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_programs_per_channel: DEFAULT_MAX_PROGRAMS_PER_CHANNEL,
            max_text_bytes: DEFAULT_MAX_TEXT_BYTES,
            timeout: humantime::parse_duration(DEFAULT_INGEST_TIMEOUT)
                .unwrap_or(Duration::from_secs(600)),
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }
}

impl IngestOptions {
    pub fn validate(&self) -> IngestResult<()> {
        let zero = [
            ("batch_size", self.batch_size),
            ("max_programs_per_channel", self.max_programs_per_channel),
            ("max_text_bytes", self.max_text_bytes),
            ("max_chunk_bytes", self.max_chunk_bytes),
        ]
        .into_iter()
        .find(|(_, value)| *value == 0);

        if let Some((name, _)) = zero {
            return Err(IngestError::configuration(format!("{name} must be at least 1")));
        }
        if self.timeout.is_zero() {
            return Err(IngestError::configuration("timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Counters describing one completed ingestion.
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub bytes_fetched: u64,
    pub compressed: bool,
    pub parse: ParseStats,
    pub batching: AccumulatorStats,
    pub post_process: PostProcessStats,
    pub elapsed: Duration,
    /// Index of the cache written for this run
    pub cache_index: Option<CacheIndex>,
    /// Set when persisting the cache failed; the ingested data is still valid
    pub cache_error: Option<String>,
}

/// Result of a successful ingestion.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub source: IndexedSource,
    pub stats: IngestStats,
}

/// Moves the shared ingestion slot through its stages and reports each one.
#[derive(Clone)]
struct StageTracker {
    guard: Arc<IngestionGuard>,
    on_progress: ProgressCallback,
}

impl StageTracker {
    fn enter(&self, stage: IngestionStage, message: impl Into<String>) {
        self.guard.set_stage(stage);
        let update = ProgressUpdate::new(self.guard.source_key(), stage, message);
        debug!("[{}] {}: {}", update.source_key, stage, update.message);
        (self.on_progress)(&update);
    }

    fn report(&self, update: ProgressUpdate) {
        (self.on_progress)(&update);
    }

    fn source_key(&self) -> &str {
        self.guard.source_key()
    }
}

/// Everything the blocking half hands back.
struct PipelineOutput {
    source: IndexedSource,
    compressed: bool,
    parse: ParseStats,
    batching: AccumulatorStats,
    post_process: PostProcessStats,
    cache: Option<Result<CacheIndex, String>>,
}

#[derive(Clone)]
pub struct EpgIngestor {
    fetcher: SourceFetcher,
    state_manager: IngestionStateManager,
    cache_dir: Option<PathBuf>,
}

impl EpgIngestor {
    pub fn new(fetcher: SourceFetcher, state_manager: IngestionStateManager) -> Self {
        Self {
            fetcher,
            state_manager,
            cache_dir: None,
        }
    }

    /// Persist every successful ingestion as a chunked cache under `cache_dir`.
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    pub fn state_manager(&self) -> &IngestionStateManager {
        &self.state_manager
    }

    pub async fn ingest(
        &self,
        source: SourceDescriptor,
        options: IngestOptions,
        on_progress: ProgressCallback,
    ) -> IngestResult<IngestOutcome> {
        self.ingest_with_trigger(source, options, on_progress, ProcessingTrigger::Manual)
            .await
    }

    pub async fn ingest_with_trigger(
        &self,
        source: SourceDescriptor,
        options: IngestOptions,
        on_progress: ProgressCallback,
        trigger: ProcessingTrigger,
    ) -> IngestResult<IngestOutcome> {
        options.validate()?;
        cache_janitor::layout::validate_source_key(&source.source_key)
            .map_err(|e| IngestError::invalid_source(e.to_string()))?;
        if source.origin.trim().is_empty() {
            return Err(IngestError::invalid_source("origin is empty"));
        }

        let guard = self
            .state_manager
            .try_start_processing(&source.source_key, trigger)
            .inspect_err(|_| {
                warn!(
                    "Skipping ingestion of '{}' - already in progress",
                    source.source_key
                );
            })?;

        let tracker = StageTracker {
            guard: Arc::new(guard),
            on_progress,
        };
        let origin = UrlUtils::obfuscate_credentials(&source.origin);

        info!(
            "Starting EPG ingestion for '{}' ({}) from {} - trigger: {}",
            source.display_name(),
            source.source_key,
            origin,
            trigger
        );

        match self.run(&source, &options, &tracker, &origin).await {
            Ok(outcome) => {
                tracker.enter(
                    IngestionStage::Done,
                    format!(
                        "Ingested {} channels and {} programmes",
                        outcome.source.channel_count(),
                        outcome.source.program_count()
                    ),
                );
                info!(
                    "EPG ingestion completed source={} channels={} programs={} skipped_channels={} skipped_programs={} truncated={} bytes={} duration={}",
                    source.source_key,
                    outcome.source.channel_count(),
                    outcome.source.program_count(),
                    outcome.stats.parse.skipped_channels,
                    outcome.stats.parse.skipped_programmes,
                    outcome.stats.parse.truncated_fields,
                    format_bytes(outcome.stats.bytes_fetched),
                    format_duration(outcome.stats.elapsed.as_millis() as u64)
                );
                Ok(outcome)
            }
            Err(e) => {
                tracker.enter(IngestionStage::Failed, format!("Failed while {}: {}", e.stage(), e));
                error!(
                    "EPG ingestion failed for '{}' while {}: {}",
                    source.source_key,
                    e.stage(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        source: &SourceDescriptor,
        options: &IngestOptions,
        tracker: &StageTracker,
        origin: &str,
    ) -> IngestResult<IngestOutcome> {
        let started = Instant::now();
        let deadline = started + options.timeout;

        tracker.enter(IngestionStage::Fetching, format!("Fetching {origin}"));
        let fetched = self
            .fetcher
            .fetch(source, deadline)
            .await
            .map_err(IngestError::network)?;

        let hints = OwnedHints {
            origin: source.origin.clone(),
            content_type: fetched.content_type.clone(),
            content_encoding: fetched.content_encoding.clone(),
            declared: fetched.is_compressed,
        };
        let writer = self
            .cache_dir
            .as_ref()
            .map(|dir| ChunkedCacheWriter::new(dir, options.max_chunk_bytes));

        let (tx, rx) = mpsc::channel::<ChunkMessage>(FETCH_CHANNEL_CAPACITY);

        let pipeline = {
            let tracker = tracker.clone();
            let options = options.clone();
            let origin = origin.to_string();
            tokio::task::spawn_blocking(move || {
                run_pipeline(rx, hints, &options, &tracker, &origin, writer.as_ref())
            })
        };

        let transfer = pump(
            fetched,
            tx,
            deadline,
            &source.source_key,
            origin,
            &tracker.on_progress,
        )
        .await;

        let pipeline = pipeline.await.map_err(|e| {
            IngestError::internal(IngestionStage::Parsing, format!("pipeline task failed: {e}"))
        })?;

        // A failed transfer explains whatever the parser saw afterwards.
        let transfer = transfer.map_err(IngestError::network)?;
        let output = pipeline?;

        let (cache_index, cache_error) = match output.cache {
            Some(Ok(index)) => (Some(index), None),
            Some(Err(message)) => (None, Some(message)),
            None => (None, None),
        };

        Ok(IngestOutcome {
            source: output.source,
            stats: IngestStats {
                bytes_fetched: transfer.bytes,
                compressed: output.compressed,
                parse: output.parse,
                batching: output.batching,
                post_process: output.post_process,
                elapsed: started.elapsed(),
                cache_index,
                cache_error,
            },
        })
    }
}

struct OwnedHints {
    origin: String,
    content_type: Option<String>,
    content_encoding: Option<String>,
    declared: bool,
}

impl OwnedHints {
    fn borrowed(&self) -> CompressionHints<'_> {
        CompressionHints {
            origin: &self.origin,
            content_type: self.content_type.as_deref(),
            content_encoding: self.content_encoding.as_deref(),
            declared: self.declared,
        }
    }
}

/// Blocking half: decompress, parse, batch, post-process and persist.
fn run_pipeline(
    rx: mpsc::Receiver<ChunkMessage>,
    hints: OwnedHints,
    options: &IngestOptions,
    tracker: &StageTracker,
    origin: &str,
    writer: Option<&ChunkedCacheWriter>,
) -> IngestResult<PipelineOutput> {
    let mut input = ChannelReader::new(rx);
    let format = {
        let first = input.fill_buf().map_err(|e| classify_read_error(&e, origin))?;
        DecompressionService::resolve_format(&hints.borrowed(), first)
    };
    let compressed = format == CompressionFormat::Gzip;
    if compressed {
        tracker.enter(IngestionStage::Decompressing, "Inflating gzip stream");
    }

    let decoded = DecompressionService::wrap_reader(input, format)?;
    let mut reader = XmltvReader::new(
        BufReader::with_capacity(READ_BUFFER_BYTES, decoded),
        TextGuard::new(options.max_text_bytes),
    );
    let mut accumulator = BatchAccumulator::new(options.batch_size);

    tracker.enter(IngestionStage::Parsing, "Parsing XMLTV document");

    while let Some(element) = reader.next() {
        match element.map_err(|e| classify_parse_error(e, origin))? {
            XmltvElement::Channel(channel) => accumulator.push_channel(channel),
            XmltvElement::Programme(programme) => {
                if accumulator.push_program(programme) {
                    let mut update = ProgressUpdate::new(
                        tracker.source_key(),
                        IngestionStage::Parsing,
                        format!(
                            "Parsed {} programmes from {}",
                            reader.stats().programmes,
                            format_bytes(reader.position())
                        ),
                    );
                    update.channels_parsed = accumulator.channel_count();
                    update.programs_parsed = reader.stats().programmes;
                    update.flushes = accumulator.stats().flushes;
                    tracker.report(update);
                }
            }
        }
    }
    let parse = reader.into_stats();

    tracker.enter(
        IngestionStage::Flushing,
        format!("Flushing {} pending programmes", accumulator.pending_len()),
    );
    let accumulated = accumulator.finish();
    let batching = accumulated.stats.clone();

    tracker.enter(IngestionStage::PostProcessing, "Sorting and capping programmes");
    let (source, post_process) = post_process(accumulated, options.max_programs_per_channel);

    let cache = writer.map(|writer| {
        tracker.enter(IngestionStage::WritingCache, "Writing chunked cache");
        writer.write(tracker.source_key(), &source).map_err(|e| {
            warn!(
                "Cache write failed for '{}', keeping in-memory result: {}",
                tracker.source_key(),
                e
            );
            e.to_string()
        })
    });

    Ok(PipelineOutput {
        source,
        compressed,
        parse,
        batching,
        post_process,
        cache,
    })
}

fn classify_parse_error(err: XmltvParseError, origin: &str) -> IngestError {
    match err {
        XmltvParseError::Syntax { message, position } => IngestError::Parse { message, position },
        XmltvParseError::Io(e) => classify_read_error(&e, origin),
    }
}

fn classify_read_error(err: &io::Error, origin: &str) -> IngestError {
    if DecompressionService::is_decompression_failure(err) {
        return IngestError::decompression(err.to_string());
    }
    match err.get_ref().and_then(|inner| inner.downcast_ref::<TransferAborted>()) {
        Some(aborted) => IngestError::network(FetchError::Transport {
            origin: origin.to_string(),
            message: aborted.0.clone(),
        }),
        None => IngestError::internal(IngestionStage::Parsing, format!("read failed: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestor::progress::no_progress;
    use std::sync::Mutex;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<tv>
  <channel id="c1"><display-name>One</display-name></channel>
  <channel id="c2"><display-name>Two</display-name></channel>
  <programme channel="c1" start="20240101130000 +0000" stop="20240101140000 +0000"><title>Later</title></programme>
  <programme channel="c2" start="20240101120000 +0000"><title>Open ended</title></programme>
  <programme channel="c1" start="20240101120000 +0000" stop="20240101130000 +0000"><title>Earlier</title></programme>
</tv>"#;

    fn ingestor() -> EpgIngestor {
        EpgIngestor::new(SourceFetcher::new().unwrap(), IngestionStateManager::new())
    }

    fn write_source(dir: &std::path::Path, name: &str, body: &[u8]) -> SourceDescriptor {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        SourceDescriptor::from_origin(path.display().to_string())
    }

    #[tokio::test]
    async fn test_ingest_file_source() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let descriptor = write_source(temp_dir.path(), "guide.xml", SAMPLE.as_bytes());

        let stages = Arc::new(Mutex::new(Vec::new()));
        let seen = stages.clone();
        let on_progress: ProgressCallback = Arc::new(move |update: &ProgressUpdate| {
            seen.lock().unwrap().push(update.stage);
        });

        let outcome = ingestor()
            .ingest(
                descriptor,
                IngestOptions {
                    batch_size: 1,
                    ..IngestOptions::default()
                },
                on_progress,
            )
            .await?;

        assert_eq!(outcome.source.channels.len(), 2);
        assert_eq!(outcome.source.programs.len(), 3);
        let titles: Vec<_> = outcome
            .source
            .programs_for_channel("c1")
            .iter()
            .map(|p| p.title.as_str())
            .collect();
        assert_eq!(titles, vec!["Earlier", "Later"]);
        assert_eq!(outcome.stats.batching.flushes, 3);
        assert_eq!(outcome.stats.parse.repaired_stops, 1);
        assert!(outcome.stats.cache_index.is_none());

        let stages = stages.lock().unwrap().clone();
        assert_eq!(stages.first(), Some(&IngestionStage::Fetching));
        assert_eq!(stages.last(), Some(&IngestionStage::Done));
        assert!(stages.contains(&IngestionStage::PostProcessing));
        assert!(!stages.contains(&IngestionStage::Decompressing));
        Ok(())
    }

    #[tokio::test]
    async fn test_syntax_error_fails_in_parsing_stage() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let descriptor = write_source(
            temp_dir.path(),
            "broken.xml",
            b"<tv><channel id=\"a\"></programme></tv>",
        );

        let err = ingestor()
            .ingest(descriptor, IngestOptions::default(), no_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Parse { .. }));
        assert_eq!(err.stage(), IngestionStage::Parsing);
        Ok(())
    }

    #[tokio::test]
    async fn test_declared_gzip_with_plain_bytes_is_decompression_error()
    -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let descriptor =
            write_source(temp_dir.path(), "guide.xml", SAMPLE.as_bytes()).compressed(true);

        let err = ingestor()
            .ingest(descriptor, IngestOptions::default(), no_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Decompression { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let descriptor = SourceDescriptor::from_origin("/nonexistent/guide.xml");
        let err = ingestor()
            .ingest(
                descriptor,
                IngestOptions {
                    batch_size: 0,
                    ..IngestOptions::default()
                },
                no_progress(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_missing_file_is_network_error() {
        let descriptor = SourceDescriptor::from_origin("/nonexistent/guide.xml");
        let err = ingestor()
            .ingest(descriptor, IngestOptions::default(), no_progress())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Network {
                source: FetchError::Io { .. },
                ..
            }
        ));
        assert_eq!(err.stage(), IngestionStage::Fetching);
    }
}
