//! Joining stage outcomes back onto the manifest.
//!
//! Results arrive in completion order; the join is always by identifier so
//! the final output preserves manifest row order no matter how the workers
//! interleaved. Every manifest row ends up either present (embedded) or
//! absent (failed somewhere), and the absent-row policy decides what the
//! output does with the latter.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use clap::ValueEnum;

use crate::embed::{EmbedError, Embedder, PlanePoint};
use crate::featurize::{FeatureOutcome, FeatureVector, ItemError};
use crate::manifest::Manifest;

/// What happens to manifest rows whose fetch or featurize failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum AbsentRowPolicy {
    /// Keep the row, leaving its `x`/`y` cells empty.
    NullFill,
    /// Omit the row from the output.
    Drop,
}

/// One output row: a manifest row index plus its coordinates, if any.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapRow {
    /// Index into [`Manifest::records`].
    pub index: usize,
    /// Embedded coordinates; `None` for failed rows under `NullFill`.
    pub point: Option<PlanePoint>,
}

/// Result of joining, embedding, and applying the absent-row policy.
#[derive(Debug)]
pub struct Aggregation {
    /// Output rows in manifest order, policy already applied.
    pub rows: Vec<MapRow>,
    /// Rows whose fetch failed.
    pub fetch_failed: usize,
    /// Rows fetched but not featurized.
    pub featurize_failed: usize,
    /// Rows with no matching outcome (duplicate or missing identifiers).
    pub unmatched: usize,
    /// Vectors handed to the embedding collaborator.
    pub embedded: usize,
}

/// Joins pipeline outcomes onto the manifest and invokes the embedder.
pub struct Aggregator {
    policy: AbsentRowPolicy,
}

impl Aggregator {
    /// Creates an aggregator with the given absent-row policy.
    pub fn new(policy: AbsentRowPolicy) -> Self {
        Self { policy }
    }

    /// Joins `outcomes` onto `manifest` by identifier, embeds the surviving
    /// vectors in manifest order, and re-attaches coordinates positionally.
    ///
    /// Expects exactly one outcome per manifest row; a count mismatch means
    /// an upstream stage dropped or duplicated work and is an error rather
    /// than something to paper over.
    pub fn join<E: Embedder>(
        &self,
        manifest: &Manifest,
        outcomes: Vec<FeatureOutcome>,
        embedder: &E,
    ) -> Result<Aggregation, AggregateError> {
        if outcomes.len() != manifest.len() {
            return Err(AggregateError::IncompleteResults {
                expected: manifest.len(),
                received: outcomes.len(),
            });
        }

        let mut by_id: HashMap<String, Result<FeatureVector, ItemError>> = outcomes
            .into_iter()
            .map(|outcome| (outcome.id, outcome.features))
            .collect();

        let mut fetch_failed = 0usize;
        let mut featurize_failed = 0usize;
        let mut unmatched = 0usize;
        let mut vectors = Vec::new();
        let mut vector_rows = Vec::new();
        let mut statuses = vec![false; manifest.len()];

        for (index, record) in manifest.records().iter().enumerate() {
            match by_id.remove(&record.id) {
                Some(Ok(vector)) => {
                    vector_rows.push(index);
                    vectors.push(vector);
                    statuses[index] = true;
                }
                Some(Err(ItemError::Fetch(_))) => fetch_failed += 1,
                Some(Err(ItemError::Featurize(_))) => featurize_failed += 1,
                None => unmatched += 1,
            }
        }

        let points = embedder.embed(&vectors).map_err(AggregateError::Embed)?;
        let mut points_by_row: HashMap<usize, PlanePoint> =
            vector_rows.into_iter().zip(points).collect();

        let mut rows = Vec::with_capacity(manifest.len());
        for (index, present) in statuses.into_iter().enumerate() {
            let point = present.then(|| points_by_row.remove(&index)).flatten();
            if point.is_none() && self.policy == AbsentRowPolicy::Drop {
                continue;
            }
            rows.push(MapRow { index, point });
        }

        Ok(Aggregation {
            rows,
            fetch_failed,
            featurize_failed,
            unmatched,
            embedded: vectors.len(),
        })
    }
}

/// Fatal aggregation failures.
#[derive(Debug)]
pub enum AggregateError {
    /// The embedding collaborator failed; there is no partial embedding.
    Embed(EmbedError),
    /// The outcome count does not match the manifest.
    IncompleteResults {
        /// Rows in the manifest.
        expected: usize,
        /// Outcomes received.
        received: usize,
    },
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embed(err) => write!(f, "{err}"),
            Self::IncompleteResults { expected, received } => {
                write!(f, "received {received} outcomes for {expected} manifest rows")
            }
        }
    }
}

impl Error for AggregateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Embed(err) => Some(err),
            Self::IncompleteResults { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchError;
    use pretty_assertions::assert_eq;

    /// Deterministic embedder: x is the input order index, y the vector sum.
    struct IndexEmbedder;

    impl Embedder for IndexEmbedder {
        fn embed(&self, vectors: &[FeatureVector]) -> Result<Vec<PlanePoint>, EmbedError> {
            Ok(vectors
                .iter()
                .enumerate()
                .map(|(i, v)| PlanePoint {
                    x: i as f32,
                    y: v.iter().sum(),
                })
                .collect())
        }
    }

    fn manifest(ids: &[&str]) -> Manifest {
        let mut body = b"id\n".to_vec();
        for id in ids {
            body.extend_from_slice(id.as_bytes());
            body.push(b'\n');
        }
        Manifest::parse(&body).unwrap()
    }

    fn ok(id: &str, value: f32) -> FeatureOutcome {
        FeatureOutcome {
            id: id.to_string(),
            features: Ok(vec![value, value]),
        }
    }

    fn failed(id: &str) -> FeatureOutcome {
        FeatureOutcome {
            id: id.to_string(),
            features: Err(ItemError::Fetch(FetchError::InvalidIdentifier)),
        }
    }

    #[test]
    fn preserves_manifest_order_for_any_arrival_order() {
        let manifest = manifest(&["a", "b", "c", "d"]);
        // Results arrive in a deliberately scrambled order.
        let outcomes = vec![ok("c", 3.0), ok("a", 1.0), ok("d", 4.0), ok("b", 2.0)];
        let aggregation = Aggregator::new(AbsentRowPolicy::NullFill)
            .join(&manifest, outcomes, &IndexEmbedder)
            .unwrap();

        let order: Vec<usize> = aggregation.rows.iter().map(|row| row.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        // Embedding input was manifest-ordered, so x is the manifest position.
        let xs: Vec<f32> = aggregation
            .rows
            .iter()
            .map(|row| row.point.unwrap().x)
            .collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(aggregation.embedded, 4);
    }

    #[test]
    fn null_fill_keeps_failed_rows_without_coordinates() {
        let manifest = manifest(&["1", "2", "nan", "3"]);
        let outcomes = vec![ok("1", 1.0), failed("nan"), ok("3", 3.0), ok("2", 2.0)];
        let aggregation = Aggregator::new(AbsentRowPolicy::NullFill)
            .join(&manifest, outcomes, &IndexEmbedder)
            .unwrap();

        assert_eq!(aggregation.rows.len(), 4);
        assert_eq!(aggregation.embedded, 3);
        assert_eq!(aggregation.fetch_failed, 1);
        assert!(aggregation.rows[2].point.is_none());
    }

    #[test]
    fn drop_policy_omits_failed_rows() {
        let manifest = manifest(&["1", "2", "nan", "3"]);
        let outcomes = vec![ok("1", 1.0), failed("nan"), ok("3", 3.0), ok("2", 2.0)];
        let aggregation = Aggregator::new(AbsentRowPolicy::Drop)
            .join(&manifest, outcomes, &IndexEmbedder)
            .unwrap();

        let kept: Vec<usize> = aggregation.rows.iter().map(|row| row.index).collect();
        assert_eq!(kept, vec![0, 1, 3]);
        assert!(aggregation.rows.iter().all(|row| row.point.is_some()));
    }

    #[test]
    fn outcome_count_mismatch_is_an_error() {
        let manifest = manifest(&["1", "2"]);
        let result = Aggregator::new(AbsentRowPolicy::NullFill).join(
            &manifest,
            vec![ok("1", 1.0)],
            &IndexEmbedder,
        );
        assert!(matches!(
            result,
            Err(AggregateError::IncompleteResults {
                expected: 2,
                received: 1,
            })
        ));
    }

    #[test]
    fn embedding_failure_is_fatal() {
        struct FailingEmbedder;
        impl Embedder for FailingEmbedder {
            fn embed(&self, _: &[FeatureVector]) -> Result<Vec<PlanePoint>, EmbedError> {
                Err(EmbedError::Empty)
            }
        }

        let manifest = manifest(&["1"]);
        let result = Aggregator::new(AbsentRowPolicy::NullFill).join(
            &manifest,
            vec![ok("1", 1.0)],
            &FailingEmbedder,
        );
        assert!(matches!(result, Err(AggregateError::Embed(EmbedError::Empty))));
    }
}
