//! Reassemble newline-delimited records from arbitrarily-sized byte chunks.
//!
//! Network transports hand bodies over in chunks that rarely line up with
//! logical record boundaries. The types here turn such a chunk sequence back
//! into complete lines, classify each line against a literal marker prefix,
//! and decode the payload that follows the marker. A record split across two
//! (or more) chunks is carried as a single pending fragment until its
//! terminator arrives.

#![warn(missing_docs)]

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

mod chunk;
mod lines;

pub use chunk::ChunkBuffer;
pub use lines::LineBuffer;

/// Default cap on how long an unterminated fragment may be and still be held
/// back as a probable record start. Inherited from the reference stream
/// consumers; deliberately loose.
pub const DEFAULT_MAX_HELD_LEN: usize = 100;

/// Default number of leading bytes compared against the marker when deciding
/// whether a fragment looks like the start of a record.
pub const DEFAULT_MARKER_PROBE: usize = 4;

/// Classification of one fully reassembled line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRecord<T> {
    /// The line carried the marker prefix and its payload decoded.
    Payload(T),
    /// The line did not carry the marker prefix (including empty lines).
    Ignored,
    /// The line carried the marker prefix but could not be decoded, or was
    /// not valid UTF-8.
    Malformed(MalformedLine),
}

/// A line that matched the record shape but failed to decode.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedLine {
    /// The raw line bytes as reassembled, without the terminator.
    pub raw: Vec<u8>,
    /// Why decoding failed.
    pub reason: MalformedReason,
}

/// Reason a reassembled line was reported as malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    /// The line bytes were not valid UTF-8.
    InvalidUtf8,
    /// The payload after the marker failed structured decoding.
    Decode(String),
}

impl fmt::Display for MalformedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            MalformedReason::InvalidUtf8 => write!(f, "line is not valid utf-8"),
            MalformedReason::Decode(msg) => write!(f, "payload decode failed: {msg}"),
        }
    }
}

/// Policy deciding whether an unterminated trailing fragment is held back as
/// the probable start of a record, or emitted as-is.
///
/// The defaults reproduce the loose heuristic of the reference consumers: a
/// fragment is held only when it is short (`len < max_held_len`) and its
/// first `marker_probe` bytes are a prefix of the marker. Anything else is
/// classified immediately, even if it later turns out to be truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldPolicy {
    /// Fragments at or above this length are never held on the prefix test.
    pub max_held_len: usize,
    /// How many leading bytes are compared against the marker.
    pub marker_probe: usize,
}

impl HoldPolicy {
    /// Returns true when `fragment` should be held as a pending partial line.
    pub fn should_hold(&self, fragment: &[u8], marker: &str) -> bool {
        if fragment.is_empty() || fragment.len() >= self.max_held_len {
            return false;
        }
        let probe = fragment.len().min(self.marker_probe);
        marker.as_bytes().starts_with(&fragment[..probe])
    }
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            max_held_len: DEFAULT_MAX_HELD_LEN,
            marker_probe: DEFAULT_MARKER_PROBE,
        }
    }
}

/// Classifies complete lines against a literal marker prefix and decodes the
/// payload that follows it.
///
/// Stateless and free of I/O; the payload type is any `serde`-deserializable
/// structure, defaulting to [`serde_json::Value`].
pub struct RecordClassifier<T = serde_json::Value> {
    marker: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> RecordClassifier<T> {
    /// Creates a classifier recognizing lines that start with `marker`.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            _payload: PhantomData,
        }
    }

    /// The literal prefix that marks a payload-carrying line.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Classifies one complete line (without its terminator).
    pub fn classify(&self, line: &[u8]) -> StreamRecord<T> {
        let Ok(text) = std::str::from_utf8(line) else {
            return StreamRecord::Malformed(MalformedLine {
                raw: line.to_vec(),
                reason: MalformedReason::InvalidUtf8,
            });
        };
        let Some(payload) = text.strip_prefix(&self.marker) else {
            return StreamRecord::Ignored;
        };
        match serde_json::from_str(payload) {
            Ok(value) => StreamRecord::Payload(value),
            Err(err) => StreamRecord::Malformed(MalformedLine {
                raw: line.to_vec(),
                reason: MalformedReason::Decode(err.to_string()),
            }),
        }
    }
}

impl<T> Clone for RecordClassifier<T> {
    fn clone(&self) -> Self {
        Self {
            marker: self.marker.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> fmt::Debug for RecordClassifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordClassifier")
            .field("marker", &self.marker)
            .finish()
    }
}
