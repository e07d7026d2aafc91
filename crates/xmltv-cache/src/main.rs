use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xmltv_cache::{
    config::Config,
    ingestor::{IngestionStage, ProgressCallback, ProgressUpdate},
    models::SourceDescriptor,
    services::{EpgCacheService, LoadedFrom},
    sources::load_sources_file,
    utils::{format_bytes, format_duration},
};

#[derive(Parser)]
#[command(name = "xmltv-cache")]
#[command(version)]
#[command(about = "Streaming XMLTV ingestion with a chunked on-disk cache")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path (defaults to $CONFIG_FILE or config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Cache directory (overrides config file)
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one or more sources and cache them
    Ingest {
        /// Source URL or file path (repeatable)
        #[arg(long = "source", value_name = "ORIGIN")]
        source: Vec<String>,

        /// File listing sources (JSON array, EXTERNAL_EPG_URLS object or one per line)
        #[arg(long = "sources", value_name = "FILE")]
        sources_file: Option<PathBuf>,

        /// Treat every source as gzip-compressed
        #[arg(long)]
        compressed: bool,

        /// Reuse a cache younger than the configured refresh interval
        #[arg(long)]
        reuse_fresh: bool,
    },
    /// Reconstruct a cached source and print a summary
    Load {
        #[arg(long)]
        key: String,
    },
    /// List cached sources with sizes
    Stats,
    /// Search channel names in a cached source
    Search {
        #[arg(long)]
        key: String,
        term: String,
    },
    /// Remove cache sets older than the given age
    Cleanup {
        #[arg(long, default_value_t = 7)]
        max_age_days: u32,
    },
    /// Remove the cache set of one source
    Clear {
        #[arg(long)]
        key: String,
    },
    /// Run the scheduled cache janitor until interrupted
    Janitor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };
    if let Some(cache_dir) = cli.cache_dir {
        config.storage.cache_dir = cache_dir;
    }
    config.validate()?;

    let service = EpgCacheService::from_config(&config).await?;
    info!("Using cache directory {}", service.cache_dir().display());

    match cli.command {
        Command::Ingest {
            source,
            sources_file,
            compressed,
            reuse_fresh,
        } => run_ingest(&service, source, sources_file.as_deref(), compressed, reuse_fresh).await,
        Command::Load { key } => run_load(&service, &key).await,
        Command::Stats => run_stats(&service).await,
        Command::Search { key, term } => run_search(&service, &key, &term).await,
        Command::Cleanup { max_age_days } => {
            let report = service.cleanup_expired_cache(max_age_days).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Clear { key } => {
            let removed = service.clear_cache(&key).await?;
            println!(
                "Removed {} files ({})",
                removed.files_removed,
                format_bytes(removed.bytes_removed)
            );
            Ok(())
        }
        Command::Janitor => run_janitor(&service).await,
    }
}

fn init_logging(log_level: &str, format: LogFormat) {
    let log_filter = format!("xmltv_cache={log_level},cache_janitor={log_level}");
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()),
    );

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn progress_logger() -> ProgressCallback {
    Arc::new(|update: &ProgressUpdate| match update.stage {
        IngestionStage::Fetching => info!(
            "[{}] {} ({})",
            update.source_key,
            update.message,
            format_bytes(update.bytes_downloaded)
        ),
        IngestionStage::Parsing if update.flushes > 0 => info!(
            "[{}] {} channels, {} programmes parsed",
            update.source_key, update.channels_parsed, update.programs_parsed
        ),
        _ => {}
    })
}

async fn run_ingest(
    service: &EpgCacheService,
    mut origins: Vec<String>,
    sources_file: Option<&Path>,
    compressed: bool,
    reuse_fresh: bool,
) -> Result<()> {
    if let Some(path) = sources_file {
        origins.extend(load_sources_file(path)?);
    }
    if origins.is_empty() {
        bail!("No sources given; use --source or --sources");
    }

    let started = Instant::now();
    let total = origins.len();
    let mut succeeded = 0usize;

    for origin in origins {
        let mut descriptor = SourceDescriptor::from_origin(origin);
        if compressed {
            descriptor = descriptor.compressed(true);
        }
        let label = descriptor.display_name();
        let key = descriptor.source_key.clone();

        if reuse_fresh {
            match service
                .get_or_ingest(descriptor, service.refresh_interval(), progress_logger())
                .await
            {
                Ok(loaded) => {
                    succeeded += 1;
                    let via = match loaded.loaded_from {
                        LoadedFrom::Cache => "cache",
                        LoadedFrom::Ingestion => "ingestion",
                    };
                    println!(
                        "{label} [{key}]: {} channels, {} programmes (from {via})",
                        loaded.source.channel_count(),
                        loaded.source.program_count()
                    );
                }
                Err(e) => error!("{} [{}] failed: {}", label, key, e),
            }
            continue;
        }

        match service.ingest_and_cache(descriptor, progress_logger()).await {
            Ok(outcome) => {
                succeeded += 1;
                if let Some(cache_error) = &outcome.stats.cache_error {
                    warn!("{} [{}] ingested but not cached: {}", label, key, cache_error);
                }
                println!(
                    "{label} [{key}]: {} channels, {} programmes, {} fetched in {}",
                    outcome.source.channel_count(),
                    outcome.source.program_count(),
                    format_bytes(outcome.stats.bytes_fetched),
                    format_duration(outcome.stats.elapsed.as_millis() as u64)
                );
            }
            Err(e) => error!("{} [{}] failed while {}: {}", label, key, e.stage(), e),
        }
    }

    println!(
        "{succeeded}/{total} sources succeeded in {}",
        format_duration(started.elapsed().as_millis() as u64)
    );
    if succeeded < total {
        bail!("{} of {} sources failed", total - succeeded, total);
    }
    Ok(())
}

async fn run_load(service: &EpgCacheService, key: &str) -> Result<()> {
    let source = service
        .load_cached(key)
        .await
        .with_context(|| format!("No usable cache for '{key}'"))?;

    println!(
        "{key}: {} channels, {} programmes",
        source.channel_count(),
        source.program_count()
    );
    for channel in &source.channels {
        println!(
            "  {:<30} {:<30} {} programmes",
            channel.id,
            channel.primary_name,
            source.programs_for_channel(&channel.id).len()
        );
    }
    Ok(())
}

async fn run_stats(service: &EpgCacheService) -> Result<()> {
    let summaries = service.list_cached().await?;
    if summaries.is_empty() {
        println!("Cache is empty");
        return Ok(());
    }

    let mut total_bytes = 0u64;
    let mut total_chunks = 0usize;
    for summary in &summaries {
        total_bytes += summary.byte_size;
        total_chunks += summary.chunk_count;
        println!(
            "{}  created {}  accessed {}  {} chunks  {}",
            summary.source_key,
            summary.created_at.format("%Y-%m-%d %H:%M:%S"),
            summary.last_accessed.format("%Y-%m-%d %H:%M:%S"),
            summary.chunk_count,
            format_bytes(summary.byte_size)
        );
    }
    println!(
        "{} sources, {} chunks, {}",
        summaries.len(),
        total_chunks,
        format_bytes(total_bytes)
    );
    Ok(())
}

async fn run_search(service: &EpgCacheService, key: &str, term: &str) -> Result<()> {
    let source = service
        .load_cached(key)
        .await
        .with_context(|| format!("No usable cache for '{key}'"))?;

    let matches = source.search_channels(term);
    for channel in &matches {
        if channel.alternate_names.is_empty() {
            println!("{}  {}", channel.id, channel.primary_name);
        } else {
            println!(
                "{}  {} ({})",
                channel.id,
                channel.primary_name,
                channel.alternate_names.join(", ")
            );
        }
    }
    println!("{} matching channels", matches.len());
    Ok(())
}

async fn run_janitor(service: &EpgCacheService) -> Result<()> {
    let Some(handle) = service.spawn_janitor() else {
        bail!("Cache janitor is disabled in configuration");
    };
    info!("Cache janitor running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Stopping cache janitor");
    handle.abort();
    Ok(())
}
