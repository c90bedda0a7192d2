//! Tunable controls shared by the batch pipeline entry points.

use std::thread;
use std::time::Duration;

use crate::aggregate::AbsentRowPolicy;

/// Default hard ceiling on concurrent fetches.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 10;
/// Default per-fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
/// Default edge length of the standard image shape, in pixels.
pub const DEFAULT_STANDARD_SIZE: u32 = 100;

/// Knobs that bound a batch mapping run.
///
/// The fetch pool and the featurize pool are sized independently: fetching is
/// I/O-bound, decode-and-featurize is CPU-bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineControls {
    fetch_concurrency: usize,
    fetch_timeout: Duration,
    featurize_threads: usize,
    standard_size: u32,
    absent_rows: AbsentRowPolicy,
}

impl PipelineControls {
    /// Constructs a new set of controls.
    ///
    /// `featurize_threads = 0` means "one per available core".
    pub fn new(
        fetch_concurrency: usize,
        fetch_timeout: Duration,
        featurize_threads: usize,
        standard_size: u32,
        absent_rows: AbsentRowPolicy,
    ) -> Self {
        Self {
            fetch_concurrency: fetch_concurrency.max(1),
            fetch_timeout,
            featurize_threads,
            standard_size: standard_size.max(1),
            absent_rows,
        }
    }

    /// Hard ceiling on concurrently in-flight fetches.
    pub fn fetch_concurrency(&self) -> usize {
        self.fetch_concurrency
    }

    /// Per-fetch timeout, applied independently to every request.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Number of featurize workers, resolving 0 to the available parallelism.
    pub fn featurize_threads(&self) -> usize {
        if self.featurize_threads > 0 {
            return self.featurize_threads;
        }
        thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
    }

    /// Edge length every image is resized to before featurization.
    pub fn standard_size(&self) -> u32 {
        self.standard_size
    }

    /// What happens to manifest rows whose fetch or featurize failed.
    pub fn absent_rows(&self) -> AbsentRowPolicy {
        self.absent_rows
    }
}

impl Default for PipelineControls {
    fn default() -> Self {
        Self {
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            featurize_threads: 0,
            standard_size: DEFAULT_STANDARD_SIZE,
            absent_rows: AbsentRowPolicy::NullFill,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_are_clamped_or_resolved() {
        let controls =
            PipelineControls::new(0, Duration::from_secs(1), 0, 0, AbsentRowPolicy::Drop);
        assert_eq!(controls.fetch_concurrency(), 1);
        assert_eq!(controls.standard_size(), 1);
        assert!(controls.featurize_threads() >= 1);
    }
}
