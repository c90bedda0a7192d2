//! Batch pipeline driver.
//!
//! Wires the stages together: manifest ids into the fetch pool, fetch
//! results into the featurize pool, outcomes into the aggregator, and the
//! joined rows into the output writer. Completion is channel closure all the
//! way down; the driver blocks on the outcome channel and wakes exactly
//! when the last worker is done, with no polling interval to tune.

use std::error::Error;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::aggregate::{AggregateError, Aggregator};
use crate::config::PipelineControls;
use crate::embed::Embedder;
use crate::featurize::{self, Featurizer, ItemError};
use crate::fetcher::{BoundedFetcher, ByteSource, CancelToken};
use crate::manifest::Manifest;
use crate::output;

/// Progress line cadence, in processed items.
const PROGRESS_EVERY: usize = 250;

/// End-of-run accounting, reported to the caller and printed by binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Manifest rows that entered the pipeline.
    pub rows: usize,
    /// Rows dropped at manifest load for lacking an id.
    pub dropped_at_load: usize,
    /// Rows whose fetch failed (invalid ids and cancellations included).
    pub fetch_failed: usize,
    /// Rows fetched but not featurized.
    pub featurize_failed: usize,
    /// Vectors handed to the embedding collaborator.
    pub embedded: usize,
    /// Data rows written to the output.
    pub rows_written: usize,
}

impl RunSummary {
    /// Prints the run counters.
    pub fn report(&self) {
        println!("--- atlas run ---");
        println!(
            "manifest rows: {} ({} dropped at load)",
            self.rows, self.dropped_at_load
        );
        println!(
            "fetched: {} (failed {})",
            self.rows - self.fetch_failed,
            self.fetch_failed
        );
        println!(
            "featurized: {} (failed {})",
            self.embedded, self.featurize_failed
        );
        println!("embedded: {}", self.embedded);
        println!("rows written: {}", self.rows_written);
    }
}

/// Fatal pipeline failures. Per-item errors never land here; they are data
/// in the summary.
#[derive(Debug)]
pub enum PipelineError {
    /// Joining or embedding failed.
    Aggregate(AggregateError),
    /// Writing the output failed.
    Output(io::Error),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aggregate(err) => write!(f, "{err}"),
            Self::Output(err) => write!(f, "output write failed: {err}"),
        }
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Aggregate(err) => Some(err),
            Self::Output(err) => Some(err),
        }
    }
}

/// Runs the whole batch pipeline and writes the atlas to `out`.
///
/// The runtime hosts the fetch pool; the calling thread drains outcomes and
/// performs the join and embedding. One identifier's failure never aborts
/// the run; only an embedding failure or an unwritable output does.
#[allow(clippy::too_many_arguments)]
pub fn run<S, F, E, W>(
    runtime: &Runtime,
    manifest: &Manifest,
    source: S,
    featurizer: F,
    embedder: &E,
    controls: &PipelineControls,
    cancel: CancelToken,
    out: &mut W,
) -> Result<RunSummary, PipelineError>
where
    S: ByteSource,
    F: Featurizer,
    E: Embedder,
    W: Write,
{
    let _guard = runtime.enter();

    let fetcher = BoundedFetcher::new(source, controls.fetch_concurrency());
    let fetch_rx = fetcher.fetch_all(manifest.ids(), cancel);
    let outcome_rx = featurize::run_stage(
        Arc::new(featurizer),
        fetch_rx,
        controls.featurize_threads(),
    );

    let expected = manifest.len();
    let mut outcomes = Vec::with_capacity(expected);
    for outcome in outcome_rx.iter() {
        if let Err(err) = &outcome.features {
            eprintln!("{}: {err}", outcome.id);
        }
        outcomes.push(outcome);
        if outcomes.len() % PROGRESS_EVERY == 0 {
            eprintln!("processed {}/{} images...", outcomes.len(), expected);
        }
    }

    let fetch_failed = outcomes
        .iter()
        .filter(|o| matches!(o.features, Err(ItemError::Fetch(_))))
        .count();

    let aggregation = Aggregator::new(controls.absent_rows())
        .join(manifest, outcomes, embedder)
        .map_err(PipelineError::Aggregate)?;
    let rows_written =
        output::write_atlas(out, manifest, &aggregation).map_err(PipelineError::Output)?;

    Ok(RunSummary {
        rows: expected,
        dropped_at_load: manifest.dropped_rows(),
        fetch_failed,
        featurize_failed: aggregation.featurize_failed,
        embedded: aggregation.embedded,
        rows_written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AbsentRowPolicy;
    use crate::embed::{EmbedError, PlanePoint};
    use crate::featurize::{FeatureVector, FeaturizeError};
    use crate::fetcher::FetchError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Payload is the identifier itself; ids starting with "miss" 404.
    struct StubSource;

    #[async_trait]
    impl ByteSource for StubSource {
        async fn fetch(&self, id: &str) -> Result<Bytes, FetchError> {
            if id.starts_with("miss") {
                return Err(FetchError::Http(reqwest::StatusCode::NOT_FOUND));
            }
            Ok(Bytes::from(id.to_string()))
        }
    }

    /// Vector is the payload's first byte, repeated; "corrupt" payloads fail.
    struct StubFeaturizer;

    impl Featurizer for StubFeaturizer {
        fn feature_len(&self) -> usize {
            2
        }

        fn featurize(&self, bytes: &[u8]) -> Result<FeatureVector, FeaturizeError> {
            if bytes.starts_with(b"corrupt") {
                return Err(FeaturizeError::Decode("not an image".to_string()));
            }
            Ok(vec![bytes[0] as f32; 2])
        }
    }

    /// Records how many vectors it was handed; deterministic output.
    #[derive(Default)]
    struct CountingEmbedder {
        seen: AtomicUsize,
        lengths: Mutex<Vec<usize>>,
    }

    impl Embedder for CountingEmbedder {
        fn embed(&self, vectors: &[FeatureVector]) -> Result<Vec<PlanePoint>, EmbedError> {
            self.seen.store(vectors.len(), Ordering::SeqCst);
            self.lengths
                .lock()
                .unwrap()
                .extend(vectors.iter().map(Vec::len));
            Ok(vectors
                .iter()
                .enumerate()
                .map(|(i, _)| PlanePoint {
                    x: i as f32,
                    y: 0.0,
                })
                .collect())
        }
    }

    fn controls(policy: AbsentRowPolicy) -> PipelineControls {
        PipelineControls::new(3, Duration::from_secs(5), 2, 10, policy)
    }

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn end_to_end_null_fill_keeps_every_manifest_row() {
        let runtime = runtime();
        let manifest = Manifest::parse(b"id\n1\n2\nnan\n3\n").unwrap();
        let embedder = CountingEmbedder::default();
        let mut out = Vec::new();

        let summary = run(
            &runtime,
            &manifest,
            StubSource,
            StubFeaturizer,
            &embedder,
            &controls(AbsentRowPolicy::NullFill),
            CancelToken::new(),
            &mut out,
        )
        .unwrap();

        assert_eq!(summary.rows, 4);
        assert_eq!(summary.fetch_failed, 1);
        assert_eq!(summary.embedded, 3);
        assert_eq!(summary.rows_written, 4);
        assert_eq!(embedder.seen.load(Ordering::SeqCst), 3);
        assert!(embedder.lengths.lock().unwrap().iter().all(|&l| l == 2));

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "id\tx\ty");
        assert_eq!(lines[3], "nan\t\t");
    }

    #[test]
    fn end_to_end_drop_policy_omits_failed_rows() {
        let runtime = runtime();
        let manifest = Manifest::parse(b"id\n1\n2\nnan\n3\n").unwrap();
        let embedder = CountingEmbedder::default();
        let mut out = Vec::new();

        let summary = run(
            &runtime,
            &manifest,
            StubSource,
            StubFeaturizer,
            &embedder,
            &controls(AbsentRowPolicy::Drop),
            CancelToken::new(),
            &mut out,
        )
        .unwrap();

        assert_eq!(summary.rows_written, 3);
        assert_eq!(embedder.seen.load(Ordering::SeqCst), 3);
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("nan"));
    }

    #[test]
    fn featurize_failures_are_counted_separately() {
        let runtime = runtime();
        let manifest = Manifest::parse(b"id\ncorrupt-1\n1\nmiss-2\n2\n3\n4\n5\n6\n7\n8\n").unwrap();
        let embedder = CountingEmbedder::default();
        let mut out = Vec::new();

        let summary = run(
            &runtime,
            &manifest,
            StubSource,
            StubFeaturizer,
            &embedder,
            &controls(AbsentRowPolicy::NullFill),
            CancelToken::new(),
            &mut out,
        )
        .unwrap();

        assert_eq!(summary.rows, 10);
        assert_eq!(summary.fetch_failed, 1);
        assert_eq!(summary.featurize_failed, 1);
        assert_eq!(summary.embedded, 8);
    }

    #[test]
    fn embedding_failure_aborts_the_run() {
        struct FailingEmbedder;
        impl Embedder for FailingEmbedder {
            fn embed(&self, _: &[FeatureVector]) -> Result<Vec<PlanePoint>, EmbedError> {
                Err(EmbedError::TooFewSamples {
                    count: 0,
                    minimum: 8,
                })
            }
        }

        let runtime = runtime();
        let manifest = Manifest::parse(b"id\n1\n2\n").unwrap();
        let mut out = Vec::new();
        let result = run(
            &runtime,
            &manifest,
            StubSource,
            StubFeaturizer,
            &FailingEmbedder,
            &controls(AbsentRowPolicy::NullFill),
            CancelToken::new(),
            &mut out,
        );
        assert!(matches!(
            result,
            Err(PipelineError::Aggregate(AggregateError::Embed(_)))
        ));
        assert!(out.is_empty(), "no output rows on fatal embedding failure");
    }
}
