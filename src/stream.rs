//! Live record-stream tailing.
//!
//! Consumes a long-lived chunked HTTP body, reassembles `data:`-prefixed
//! records through a [`ChunkBuffer`], and hands each decoded payload to a
//! [`RecordSink`]. Storage is fire-and-forget: a failed insert is logged and
//! counted, and the stream keeps going.

use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use linebuf::{ChunkBuffer, RecordClassifier, StreamRecord};
use reqwest::{Client, StatusCode};

use crate::debug_log;
use crate::fetcher::CancelToken;

/// Prefix marking payload-carrying lines in the stream.
pub const DEFAULT_STREAM_MARKER: &str = "data:";

/// Durable storage for decoded stream records.
pub trait RecordSink {
    /// Stores one record. Failures are reported to the caller for logging
    /// but must not be treated as fatal.
    fn store(&mut self, record: serde_json::Value) -> Result<(), SinkError>;
}

/// Why a record could not be stored.
#[derive(Debug)]
pub enum SinkError {
    /// Writing to the underlying medium failed.
    Io(io::Error),
    /// The record could not be serialized.
    Serialize(serde_json::Error),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "sink write failed: {err}"),
            Self::Serialize(err) => write!(f, "record serialization failed: {err}"),
        }
    }
}

impl Error for SinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serialize(err) => Some(err),
        }
    }
}

/// Sink that appends one JSON document per line to a file.
pub struct JsonlSink {
    writer: BufWriter<File>,
}

impl JsonlSink {
    /// Creates (or truncates) the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = File::create(path).map_err(SinkError::Io)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Flushes buffered records to disk.
    pub fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().map_err(SinkError::Io)
    }
}

impl RecordSink for JsonlSink {
    fn store(&mut self, record: serde_json::Value) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &record).map_err(SinkError::Serialize)?;
        self.writer.write_all(b"\n").map_err(SinkError::Io)
    }
}

/// Counters for one tailing session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamStats {
    /// Lines that decoded into payload records.
    pub payloads: usize,
    /// Lines without the marker prefix.
    pub ignored: usize,
    /// Marker lines that failed to decode.
    pub malformed: usize,
    /// Records accepted by the sink.
    pub stored: usize,
    /// Records the sink rejected.
    pub store_failed: usize,
}

impl StreamStats {
    /// Prints the session counters.
    pub fn report(&self) {
        println!("--- stream session ---");
        println!("payload records: {}", self.payloads);
        println!("stored: {} (failed {})", self.stored, self.store_failed);
        println!("ignored lines: {}", self.ignored);
        println!("malformed lines: {}", self.malformed);
    }
}

/// Errors that end a tailing session.
#[derive(Debug)]
pub enum StreamError {
    /// The initial request failed.
    Request(reqwest::Error),
    /// The server answered with a non-success status.
    Status(StatusCode),
    /// The body stream failed mid-read.
    Transport(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(err) => write!(f, "stream request failed: {err}"),
            Self::Status(status) => write!(f, "stream request returned {status}"),
            Self::Transport(msg) => write!(f, "stream read failed: {msg}"),
        }
    }
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Request(err) => Some(err),
            _ => None,
        }
    }
}

/// Drives a chunk stream through a [`ChunkBuffer`] into `sink`.
///
/// Returns when the stream ends, the transport fails, or `cancel` triggers;
/// whatever fragment is still pending at that point is flushed through the
/// classifier first.
pub async fn consume_chunks<B, E, S>(
    mut body: B,
    marker: &str,
    sink: &mut S,
    cancel: &CancelToken,
) -> Result<StreamStats, StreamError>
where
    B: Stream<Item = Result<Bytes, E>> + Unpin,
    E: fmt::Display,
    S: RecordSink,
{
    let mut buffer: ChunkBuffer = ChunkBuffer::new(RecordClassifier::new(marker));
    let mut stats = StreamStats::default();

    while let Some(chunk) = body.next().await {
        if cancel.is_triggered() {
            break;
        }
        let chunk = chunk.map_err(|err| StreamError::Transport(err.to_string()))?;
        for record in buffer.feed(&chunk) {
            handle_record(record, sink, &mut stats);
        }
    }
    if let Some(record) = buffer.finish() {
        handle_record(record, sink, &mut stats);
    }

    Ok(stats)
}

/// Tails a URL: one long-lived GET whose body is fed through
/// [`consume_chunks`].
pub async fn tail_url<S: RecordSink>(
    client: &Client,
    url: &str,
    marker: &str,
    sink: &mut S,
    cancel: &CancelToken,
) -> Result<StreamStats, StreamError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(StreamError::Request)?;
    let status = response.status();
    if !status.is_success() {
        return Err(StreamError::Status(status));
    }
    consume_chunks(response.bytes_stream(), marker, sink, cancel).await
}

fn handle_record<S: RecordSink>(
    record: StreamRecord<serde_json::Value>,
    sink: &mut S,
    stats: &mut StreamStats,
) {
    match record {
        StreamRecord::Payload(value) => {
            stats.payloads += 1;
            match sink.store(value) {
                Ok(()) => stats.stored += 1,
                Err(err) => {
                    stats.store_failed += 1;
                    eprintln!("record store failed: {err}");
                }
            }
        }
        StreamRecord::Ignored => stats.ignored += 1,
        StreamRecord::Malformed(_line) => {
            stats.malformed += 1;
            debug_log!("malformed stream line: {_line}");
        }
    }
}
