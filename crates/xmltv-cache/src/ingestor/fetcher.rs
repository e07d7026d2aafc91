//! Source fetching for HTTP(S) URLs and local files.
//!
//! [`SourceFetcher::fetch`] opens the source and returns a byte stream;
//! [`pump`] drives that stream into a bounded channel under the ingestion
//! deadline, and [`ChannelReader`] exposes the receiving end as a blocking
//! [`BufRead`] for the parser thread.

use crate::config::defaults::DEFAULT_USER_AGENT;
use crate::errors::{FetchError, IngestError};
use crate::ingestor::decompression::CompressionHints;
use crate::ingestor::progress::{IngestionStage, ProgressCallback, ProgressUpdate, TransferProgress};
use crate::models::SourceDescriptor;
use crate::utils::url::UrlUtils;

use bytes::{Buf, Bytes};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::{Client, header};
use std::fmt;
use std::io::{self, BufRead, Read};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout_at};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

const FILE_READ_CHUNK: usize = 64 * 1024;

/// Stream of raw (possibly compressed) source bytes.
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// An opened source, ready to be pumped.
pub struct FetchedSource {
    pub stream: ByteStream,
    /// `Content-Length` or file size
    pub total_size_hint: Option<u64>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    /// Declared or detected from transport metadata
    pub is_compressed: bool,
}

impl fmt::Debug for FetchedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedSource")
            .field("total_size_hint", &self.total_size_hint)
            .field("content_type", &self.content_type)
            .field("content_encoding", &self.content_encoding)
            .field("is_compressed", &self.is_compressed)
            .finish_non_exhaustive()
    }
}

/// Totals of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Marker payload for `io::Error`s that mean the transfer itself failed.
#[derive(Debug, Clone)]
pub struct TransferAborted(pub String);

impl fmt::Display for TransferAborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer aborted: {}", self.0)
    }
}

impl std::error::Error for TransferAborted {}

/// Message type carried from the fetch task to the parser thread.
pub type ChunkMessage = Result<Bytes, TransferAborted>;

/// Opens HTTP(S) and filesystem sources.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    client: Client,
}

impl SourceFetcher {
    pub fn new() -> Result<Self, IngestError> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(user_agent: &str) -> Result<Self, IngestError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| IngestError::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Open the source, waiting for response headers no later than `deadline`.
    pub async fn fetch(
        &self,
        descriptor: &SourceDescriptor,
        deadline: Instant,
    ) -> Result<FetchedSource, FetchError> {
        if descriptor.is_remote() {
            self.fetch_http(descriptor, deadline).await
        } else {
            self.fetch_file(descriptor, deadline).await
        }
    }

    async fn fetch_http(
        &self,
        descriptor: &SourceDescriptor,
        deadline: Instant,
    ) -> Result<FetchedSource, FetchError> {
        let origin = UrlUtils::obfuscate_credentials(&descriptor.origin);
        let started = Instant::now();
        debug!("Requesting {}", origin);

        let response = timeout_at(deadline, self.client.get(&descriptor.origin).send())
            .await
            .map_err(|_| FetchError::Timeout {
                origin: origin.clone(),
                elapsed: started.elapsed(),
            })?
            .map_err(|e| FetchError::Transport {
                origin: origin.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                origin,
                status: status.as_u16(),
            });
        }

        let header_value = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header_value(header::CONTENT_TYPE);
        let content_encoding = header_value(header::CONTENT_ENCODING);
        let total_size_hint = response.content_length();

        let is_compressed = CompressionHints {
            origin: &descriptor.origin,
            content_type: content_type.as_deref(),
            content_encoding: content_encoding.as_deref(),
            declared: descriptor.is_compressed,
        }
        .indicate_gzip();

        debug!(
            "Response {} for {} (length {:?}, type {:?}, encoding {:?})",
            status, origin, total_size_hint, content_type, content_encoding
        );

        let stream_origin = origin.clone();
        let stream = response
            .bytes_stream()
            .map_err(move |e| FetchError::Transport {
                origin: stream_origin.clone(),
                message: e.to_string(),
            })
            .boxed();

        Ok(FetchedSource {
            stream,
            total_size_hint,
            content_type,
            content_encoding,
            is_compressed,
        })
    }

    async fn fetch_file(
        &self,
        descriptor: &SourceDescriptor,
        deadline: Instant,
    ) -> Result<FetchedSource, FetchError> {
        let path = PathBuf::from(
            descriptor
                .origin
                .strip_prefix("file://")
                .unwrap_or(&descriptor.origin),
        );
        let io_error = |source| FetchError::Io {
            path: path.clone(),
            source,
        };

        let file = match timeout_at(deadline, tokio::fs::File::open(&path)).await {
            Ok(opened) => opened.map_err(io_error)?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    origin: path.display().to_string(),
                    elapsed: Duration::ZERO,
                });
            }
        };
        let total_size_hint = file.metadata().await.ok().map(|m| m.len());

        let is_compressed = CompressionHints {
            origin: &descriptor.origin,
            declared: descriptor.is_compressed,
            ..CompressionHints::default()
        }
        .indicate_gzip();

        let stream_path = path.clone();
        let stream = ReaderStream::with_capacity(file, FILE_READ_CHUNK)
            .map_err(move |source| FetchError::Io {
                path: stream_path.clone(),
                source,
            })
            .boxed();

        Ok(FetchedSource {
            stream,
            total_size_hint,
            content_type: None,
            content_encoding: None,
            is_compressed,
        })
    }
}

/// Forward `fetched` into `tx` until the stream ends, fails or the deadline passes.
///
/// On failure the receiver is sent a [`TransferAborted`] marker so the parser
/// unwinds promptly; the returned error is the authoritative cause. If the
/// receiver goes away (the parser stopped early) pumping stops quietly.
pub async fn pump(
    fetched: FetchedSource,
    tx: mpsc::Sender<ChunkMessage>,
    deadline: Instant,
    source_key: &str,
    origin: &str,
    on_progress: &ProgressCallback,
) -> Result<TransferSummary, FetchError> {
    let started = Instant::now();
    let mut progress = TransferProgress::new(fetched.total_size_hint);
    let mut stream = fetched.stream;

    let transfer = async {
        while let Some(next) = stream.next().await {
            let chunk = next?;
            if progress.advance(chunk.len() as u64) {
                let mut update = ProgressUpdate::new(
                    source_key,
                    IngestionStage::Fetching,
                    match progress.percent() {
                        Some(percent) => format!("Downloaded {percent:.0}%"),
                        None => format!(
                            "Downloaded {}",
                            crate::utils::format_bytes(progress.downloaded())
                        ),
                    },
                );
                update.bytes_downloaded = progress.downloaded();
                update.total_bytes = progress.total();
                update.percent = progress.percent();
                on_progress(&update);
            }
            if tx.send(Ok(chunk)).await.is_err() {
                debug!("Parser stopped reading; ending transfer of {}", origin);
                break;
            }
        }
        Ok::<(), FetchError>(())
    };

    let outcome = match timeout_at(deadline, transfer).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            origin: origin.to_string(),
            elapsed: started.elapsed(),
        }),
    };

    match outcome {
        Ok(()) => {
            let summary = TransferSummary {
                bytes: progress.downloaded(),
                elapsed: started.elapsed(),
            };
            info!(
                "Fetched {} from {} in {}",
                crate::utils::format_bytes(summary.bytes),
                origin,
                crate::utils::format_duration(summary.elapsed.as_millis() as u64)
            );
            Ok(summary)
        }
        Err(e) => {
            let _ = tx.send(Err(TransferAborted(e.to_string()))).await;
            Err(e)
        }
    }
}

/// Blocking reader over the chunks sent by [`pump`].
///
/// Must only be used off the async runtime (e.g. in `spawn_blocking`).
pub struct ChannelReader {
    rx: mpsc::Receiver<ChunkMessage>,
    current: Bytes,
    finished: bool,
}

impl ChannelReader {
    pub fn new(rx: mpsc::Receiver<ChunkMessage>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
            finished: false,
        }
    }
}

impl BufRead for ChannelReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        while self.current.is_empty() && !self.finished {
            match self.rx.blocking_recv() {
                Some(Ok(chunk)) => self.current = chunk,
                Some(Err(aborted)) => {
                    self.finished = true;
                    return Err(io::Error::other(aborted));
                }
                None => self.finished = true,
            }
        }
        Ok(&self.current)
    }

    fn consume(&mut self, amt: usize) {
        self.current.advance(amt.min(self.current.len()));
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestor::progress::no_progress;
    use std::io::Write;

    #[tokio::test]
    async fn test_fetch_file_reports_size() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"<tv></tv>")?;

        let descriptor = SourceDescriptor::from_origin(file.path().display().to_string());
        let fetcher = SourceFetcher::new()?;
        let fetched = fetcher
            .fetch(&descriptor, Instant::now() + Duration::from_secs(5))
            .await?;

        assert_eq!(fetched.total_size_hint, Some(9));
        assert!(!fetched.is_compressed);

        let bytes: Vec<Bytes> = fetched.stream.try_collect().await?;
        assert_eq!(bytes.concat(), b"<tv></tv>");
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_missing_file_is_io_error() -> Result<(), Box<dyn std::error::Error>> {
        let temp_dir = tempfile::tempdir()?;
        let descriptor =
            SourceDescriptor::from_origin(temp_dir.path().join("absent.xml").display().to_string());

        let result = SourceFetcher::new()?
            .fetch(&descriptor, Instant::now() + Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(FetchError::Io { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_pump_feeds_channel_reader() -> Result<(), Box<dyn std::error::Error>> {
        let chunks: Vec<Result<Bytes, FetchError>> = vec![
            Ok(Bytes::from_static(b"<tv>")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"</tv>")),
        ];
        let fetched = FetchedSource {
            stream: futures::stream::iter(chunks).boxed(),
            total_size_hint: None,
            content_type: None,
            content_encoding: None,
            is_compressed: false,
        };

        let (tx, rx) = mpsc::channel(2);
        let reader = tokio::task::spawn_blocking(move || {
            let mut out = String::new();
            ChannelReader::new(rx).read_to_string(&mut out).map(|_| out)
        });

        let summary = pump(
            fetched,
            tx,
            Instant::now() + Duration::from_secs(5),
            "k",
            "test",
            &no_progress(),
        )
        .await?;

        assert_eq!(summary.bytes, 9);
        assert_eq!(reader.await??, "<tv></tv>");
        Ok(())
    }

    #[tokio::test]
    async fn test_pump_failure_reaches_reader() -> Result<(), Box<dyn std::error::Error>> {
        let chunks: Vec<Result<Bytes, FetchError>> = vec![
            Ok(Bytes::from_static(b"<tv>")),
            Err(FetchError::Transport {
                origin: "test".to_string(),
                message: "connection reset".to_string(),
            }),
        ];
        let fetched = FetchedSource {
            stream: futures::stream::iter(chunks).boxed(),
            total_size_hint: None,
            content_type: None,
            content_encoding: None,
            is_compressed: false,
        };

        let (tx, rx) = mpsc::channel(4);
        let reader = tokio::task::spawn_blocking(move || {
            ChannelReader::new(rx).read_to_end(&mut Vec::new())
        });

        let result = pump(
            fetched,
            tx,
            Instant::now() + Duration::from_secs(5),
            "k",
            "test",
            &no_progress(),
        )
        .await;

        assert!(matches!(result, Err(FetchError::Transport { .. })));
        let err = reader.await?.unwrap_err();
        assert!(err.get_ref().is_some_and(|e| e.is::<TransferAborted>()));
        Ok(())
    }
}
