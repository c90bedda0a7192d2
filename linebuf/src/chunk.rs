//! Stateful chunk-to-record reassembly.

use serde::de::DeserializeOwned;

use crate::{HoldPolicy, RecordClassifier, StreamRecord};

/// Incremental line reassembler for marker-prefixed record streams.
///
/// Feed it body chunks exactly as the transport delivers them; it returns the
/// records completed by each chunk and keeps at most one pending fragment,
/// the tail of the current chunk when the chunk did not end on a line
/// terminator. One `ChunkBuffer` serves one logical stream; it must not be
/// shared across streams.
///
/// Whether an unterminated tail is held back is decided by the configured
/// [`HoldPolicy`]. A tail that starts with the full marker but fails to
/// decode is also held, so a payload split mid-record gets retried once the
/// rest arrives. Everything else is classified immediately, truncated or not.
pub struct ChunkBuffer<T = serde_json::Value> {
    classifier: RecordClassifier<T>,
    policy: HoldPolicy,
    pending: Option<Vec<u8>>,
}

impl<T: DeserializeOwned> ChunkBuffer<T> {
    /// Creates a buffer with the default [`HoldPolicy`].
    pub fn new(classifier: RecordClassifier<T>) -> Self {
        Self::with_policy(classifier, HoldPolicy::default())
    }

    /// Creates a buffer with an explicit hold policy.
    pub fn with_policy(classifier: RecordClassifier<T>, policy: HoldPolicy) -> Self {
        Self {
            classifier,
            policy,
            pending: None,
        }
    }

    /// Whether a partial line is currently held between chunks.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Processes one transport chunk, returning the records it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamRecord<T>> {
        let mut records = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (line, tail) = rest.split_at(pos);
            rest = &tail[1..];
            let line = self.take_joined(trim_cr(line));
            records.push(self.classifier.classify(&line));
        }

        if !rest.is_empty() {
            let fragment = self.take_joined(rest);
            if self.policy.should_hold(&fragment, self.classifier.marker()) {
                self.pending = Some(fragment);
            } else if fragment.starts_with(self.classifier.marker().as_bytes()) {
                // Marker is present but the terminator is not: classify, and
                // on decode failure hold the fragment for a retry once the
                // rest of the record arrives.
                match self.classifier.classify(&fragment) {
                    StreamRecord::Malformed(_) => self.pending = Some(fragment),
                    record => records.push(record),
                }
            } else {
                records.push(self.classifier.classify(&fragment));
            }
        }

        records
    }

    /// Flushes the stream, classifying any fragment still pending.
    pub fn finish(mut self) -> Option<StreamRecord<T>> {
        self.pending
            .take()
            .map(|line| self.classifier.classify(&line))
    }

    fn take_joined(&mut self, piece: &[u8]) -> Vec<u8> {
        match self.pending.take() {
            Some(mut held) => {
                held.extend_from_slice(piece);
                held
            }
            None => piece.to_vec(),
        }
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', body)) => body,
        _ => line,
    }
}
