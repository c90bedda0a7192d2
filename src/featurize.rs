//! Decode-and-featurize stage.
//!
//! Turns fetched bytes into fixed-length pixel vectors on a pool of OS
//! threads sized independently of the fetch pool: decoding and resizing are
//! CPU-bound where fetching is I/O-bound. Fetch failures pass through the
//! stage untouched so the downstream join stays total.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::thread;

use image::imageops::FilterType;

use crate::fetcher::{FetchError, FetchResult};

/// Fixed-length numeric representation of one image.
pub type FeatureVector = Vec<f32>;

/// Converts raw image bytes into a [`FeatureVector`].
///
/// Every vector produced by one featurizer must have length
/// [`Featurizer::feature_len`]; the stage re-checks this so a misbehaving
/// implementation surfaces as a per-item error instead of a ragged matrix at
/// embedding time.
pub trait Featurizer: Send + Sync + 'static {
    /// Length of every vector this featurizer produces.
    fn feature_len(&self) -> usize;

    /// Decodes and featurizes one payload.
    fn featurize(&self, bytes: &[u8]) -> Result<FeatureVector, FeaturizeError>;
}

/// Why a payload could not be featurized.
#[derive(Debug)]
pub enum FeaturizeError {
    /// The bytes did not decode as an image.
    Decode(String),
    /// The featurizer produced a vector of the wrong length.
    WrongLength {
        /// Length the featurizer promised.
        expected: usize,
        /// Length it produced.
        actual: usize,
    },
}

impl fmt::Display for FeaturizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(msg) => write!(f, "image decode failed: {msg}"),
            Self::WrongLength { expected, actual } => {
                write!(f, "feature vector length {actual}, expected {expected}")
            }
        }
    }
}

impl Error for FeaturizeError {}

/// Per-item failure carried through to the join.
#[derive(Debug)]
pub enum ItemError {
    /// The fetch already failed; nothing was featurized.
    Fetch(FetchError),
    /// The fetch succeeded but featurization failed.
    Featurize(FeaturizeError),
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(err) => write!(f, "{err}"),
            Self::Featurize(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ItemError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Fetch(err) => Some(err),
            Self::Featurize(err) => Some(err),
        }
    }
}

/// Outcome of the featurize stage for one identifier.
#[derive(Debug)]
pub struct FeatureOutcome {
    /// The identifier this outcome belongs to.
    pub id: String,
    /// The feature vector, or the first error along the way.
    pub features: Result<FeatureVector, ItemError>,
}

/// Pixel featurizer: decode, resize to a standard shape, flatten to RGB.
///
/// Resizing ignores aspect ratio on purpose: distorting some images is the
/// price of getting every vector into the same shape. Output length is
/// `3 * width * height` (100x100 gives 30000).
pub struct PixelFeaturizer {
    width: u32,
    height: u32,
}

impl PixelFeaturizer {
    /// Creates a featurizer targeting `width`×`height` pixels.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }
}

impl Default for PixelFeaturizer {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_STANDARD_SIZE,
            crate::config::DEFAULT_STANDARD_SIZE,
        )
    }
}

impl Featurizer for PixelFeaturizer {
    fn feature_len(&self) -> usize {
        3 * self.width as usize * self.height as usize
    }

    fn featurize(&self, bytes: &[u8]) -> Result<FeatureVector, FeaturizeError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|err| FeaturizeError::Decode(err.to_string()))?;
        let resized = decoded.resize_exact(self.width, self.height, FilterType::Triangle);
        let pixels = resized.to_rgb8().into_raw();
        Ok(pixels.into_iter().map(f32::from).collect())
    }
}

/// Spawns the featurize pool over a stream of fetch results.
///
/// Workers drain `fetch_rx` as results complete; the returned channel closes
/// once every worker has exited, which happens exactly when the fetch stream
/// is exhausted. Channel capacities bound how far this stage can run ahead of
/// its consumer.
pub fn run_stage<F: Featurizer>(
    featurizer: Arc<F>,
    fetch_rx: flume::Receiver<FetchResult>,
    threads: usize,
) -> crossbeam_channel::Receiver<FeatureOutcome> {
    let threads = threads.max(1);
    let (outcome_tx, outcome_rx) = crossbeam_channel::bounded(threads * 2);

    for _ in 0..threads {
        let featurizer = Arc::clone(&featurizer);
        let fetch_rx = fetch_rx.clone();
        let outcome_tx = outcome_tx.clone();
        thread::spawn(move || worker_loop(featurizer, fetch_rx, outcome_tx));
    }

    outcome_rx
}

fn worker_loop<F: Featurizer>(
    featurizer: Arc<F>,
    fetch_rx: flume::Receiver<FetchResult>,
    outcome_tx: crossbeam_channel::Sender<FeatureOutcome>,
) {
    while let Ok(result) = fetch_rx.recv() {
        let FetchResult { id, payload } = result;
        let features = match payload {
            Err(err) => Err(ItemError::Fetch(err)),
            Ok(bytes) => match featurizer.featurize(&bytes) {
                Ok(vector) if vector.len() == featurizer.feature_len() => Ok(vector),
                Ok(vector) => Err(ItemError::Featurize(FeaturizeError::WrongLength {
                    expected: featurizer.feature_len(),
                    actual: vector.len(),
                })),
                Err(err) => Err(ItemError::Featurize(err)),
            },
        };
        if outcome_tx.send(FeatureOutcome { id, features }).is_err() {
            break;
        }
    }
}
