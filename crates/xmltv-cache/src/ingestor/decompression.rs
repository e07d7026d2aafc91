//! Streaming decompression of fetched sources.
//!
//! Sources are never buffered whole: a gzip source is inflated chunk by chunk
//! as the parser pulls bytes. Inflate failures are tagged so the pipeline can
//! report them as decompression errors and not confuse them with a transfer
//! that was cut off underneath the decoder.

use crate::errors::IngestError;
use crate::ingestor::fetcher::TransferAborted;
use std::fmt;
use std::io::{self, Read};

/// Supported compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Gzip,
    Uncompressed,
}

/// Transport metadata used to decide whether a source is gzip.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressionHints<'a> {
    pub origin: &'a str,
    pub content_type: Option<&'a str>,
    pub content_encoding: Option<&'a str>,
    /// Caller-declared compression
    pub declared: bool,
}

impl CompressionHints<'_> {
    /// True if any transport heuristic points at gzip.
    pub fn indicate_gzip(&self) -> bool {
        let path = self
            .origin
            .split(['?', '#'])
            .next()
            .unwrap_or(self.origin)
            .to_ascii_lowercase();

        let content_type = self
            .content_type
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase());

        let content_encoding = self.content_encoding.map(|ce| ce.trim().to_ascii_lowercase());

        self.declared
            || path.ends_with(".gz")
            || matches!(
                content_type.as_deref(),
                Some("application/gzip" | "application/x-gzip")
            )
            || content_encoding
                .as_deref()
                .is_some_and(|ce| ce.split(',').any(|enc| matches!(enc.trim(), "gzip" | "x-gzip")))
    }
}

/// Marker payload for `io::Error`s raised by the inflater.
#[derive(Debug)]
pub struct DecompressionFailure(pub String);

impl fmt::Display for DecompressionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gzip stream is corrupt: {}", self.0)
    }
}

impl std::error::Error for DecompressionFailure {}

/// Magic file detection and streaming decompression
pub struct DecompressionService;

impl DecompressionService {
    /// Detect compression format using magic bytes
    pub fn detect_compression_format(data: &[u8]) -> CompressionFormat {
        match infer::get(data).map(|kind| kind.mime_type()) {
            Some("application/gzip") => CompressionFormat::Gzip,
            _ => CompressionFormat::Uncompressed,
        }
    }

    /// Pick a format from transport hints, falling back to sniffing the first bytes.
    pub fn resolve_format(hints: &CompressionHints<'_>, first_chunk: &[u8]) -> CompressionFormat {
        if hints.indicate_gzip() {
            CompressionFormat::Gzip
        } else {
            Self::detect_compression_format(first_chunk)
        }
    }

    /// Wrap `reader` so the caller always reads plain XML.
    pub fn wrap_reader<R>(
        reader: R,
        format: CompressionFormat,
    ) -> Result<Box<dyn Read + Send>, IngestError>
    where
        R: Read + Send + 'static,
    {
        match format {
            CompressionFormat::Uncompressed => Ok(Box::new(reader)),
            CompressionFormat::Gzip => Self::gzip_reader(reader),
        }
    }

    #[cfg(feature = "compression-gzip")]
    fn gzip_reader<R>(reader: R) -> Result<Box<dyn Read + Send>, IngestError>
    where
        R: Read + Send + 'static,
    {
        Ok(Box::new(InflateReader {
            inner: flate2::read::MultiGzDecoder::new(reader),
        }))
    }

    #[cfg(not(feature = "compression-gzip"))]
    fn gzip_reader<R>(_reader: R) -> Result<Box<dyn Read + Send>, IngestError>
    where
        R: Read + Send + 'static,
    {
        Err(IngestError::decompression(
            "gzip source detected but the compression-gzip feature is disabled",
        ))
    }

    /// True if the error was raised by the inflater itself.
    pub fn is_decompression_failure(err: &io::Error) -> bool {
        err.get_ref()
            .is_some_and(|inner| inner.is::<DecompressionFailure>())
    }
}

/// Tags every non-transfer error coming out of the decoder.
#[cfg(feature = "compression-gzip")]
struct InflateReader<R: Read> {
    inner: flate2::read::MultiGzDecoder<R>,
}

#[cfg(feature = "compression-gzip")]
impl<R: Read> Read for InflateReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|e| {
            let from_transfer = e
                .get_ref()
                .is_some_and(|inner| inner.is::<TransferAborted>());
            if from_transfer || e.kind() == io::ErrorKind::Interrupted {
                e
            } else {
                io::Error::new(e.kind(), DecompressionFailure(e.to_string()))
            }
        })
    }
}
