//! Tab-separated manifest loading and row model.
//!
//! The manifest drives the whole batch pipeline: an ordered list of
//! identifiers plus per-item metadata that is carried through to the output
//! untouched. Rows without an `id` cell are dropped at load time; the drop
//! count is kept so a run can report it instead of silently shrinking.

use std::error::Error;
use std::fmt;

use futures_util::StreamExt;
use linebuf::LineBuffer;
use reqwest::{Client, StatusCode};

/// One manifest row: its identifier plus every original cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    /// Value of the `id` column; never empty.
    pub id: String,
    /// All cells of the row, aligned with [`Manifest::columns`].
    pub fields: Vec<String>,
}

/// An ordered, immutable collection of manifest rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    columns: Vec<String>,
    records: Vec<ManifestRecord>,
    dropped_rows: usize,
}

impl Manifest {
    /// Parses a whole tab-separated body, header row first.
    ///
    /// The body is decoded as Latin-1: source manifests are not guaranteed to
    /// be UTF-8, and Latin-1 maps every byte to a scalar so decoding can
    /// never fault mid-run.
    pub fn parse(body: &[u8]) -> Result<Self, ManifestError> {
        let mut buffer = LineBuffer::new();
        let mut lines = buffer.feed(body);
        if let Some(tail) = buffer.finish() {
            lines.push(tail);
        }
        Self::from_lines(lines)
    }

    /// Builds a manifest from complete, terminator-free lines.
    pub fn from_lines(lines: impl IntoIterator<Item = Vec<u8>>) -> Result<Self, ManifestError> {
        let mut lines = lines.into_iter();
        let header = lines.next().ok_or(ManifestError::Empty)?;
        let columns: Vec<String> = decode_latin1(&header)
            .split('\t')
            .map(str::to_string)
            .collect();
        let id_index = columns
            .iter()
            .position(|name| name == "id")
            .ok_or(ManifestError::MissingIdColumn)?;

        let mut records = Vec::new();
        let mut dropped_rows = 0usize;
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let mut fields: Vec<String> = decode_latin1(&line)
                .split('\t')
                .map(str::to_string)
                .collect();
            fields.resize(columns.len(), String::new());
            let id = fields[id_index].trim().to_string();
            if id.is_empty() {
                dropped_rows += 1;
                continue;
            }
            records.push(ManifestRecord { id, fields });
        }

        Ok(Self {
            columns,
            records,
            dropped_rows,
        })
    }

    /// Downloads and parses a manifest, streaming the body through a
    /// [`LineBuffer`] so chunk boundaries never split a row.
    pub async fn load(client: &Client, url: &str) -> Result<Self, ManifestError> {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(ManifestError::Request)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ManifestError::Status(status));
        }

        let mut buffer = LineBuffer::new();
        let mut lines = Vec::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(ManifestError::Request)?;
            lines.extend(buffer.feed(&chunk));
        }
        if let Some(tail) = buffer.finish() {
            lines.push(tail);
        }
        Self::from_lines(lines)
    }

    /// Column names from the header row, in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The surviving rows, in manifest order.
    pub fn records(&self) -> &[ManifestRecord] {
        &self.records
    }

    /// Number of surviving rows.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no rows survived the load.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows dropped at load time for lacking an `id`.
    pub fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    /// The identifiers of all surviving rows, in manifest order.
    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|record| record.id.clone()).collect()
    }

    /// Keeps only the first `limit` rows.
    pub fn truncate(&mut self, limit: usize) {
        self.records.truncate(limit);
    }
}

/// Errors surfaced while obtaining or parsing a manifest.
#[derive(Debug)]
pub enum ManifestError {
    /// The HTTP request or body read failed.
    Request(reqwest::Error),
    /// The server answered with a non-success status.
    Status(StatusCode),
    /// The body held no header row.
    Empty,
    /// The header row lacks an `id` column.
    MissingIdColumn,
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(err) => write!(f, "manifest request failed: {err}"),
            Self::Status(status) => write!(f, "manifest request returned {status}"),
            Self::Empty => write!(f, "manifest body was empty"),
            Self::MissingIdColumn => write!(f, "manifest header has no `id` column"),
        }
    }
}

impl Error for ManifestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Request(err) => Some(err),
            _ => None,
        }
    }
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
