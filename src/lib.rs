#![warn(missing_docs)]
//! Core library entry points for the pixatlas mapping pipelines.

pub mod aggregate;
pub mod config;
pub mod embed;
pub mod featurize;
pub mod fetcher;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod stream;

pub use aggregate::{AbsentRowPolicy, Aggregation, Aggregator, MapRow};
pub use config::PipelineControls;
pub use embed::{EmbedError, Embedder, PlanePoint, TsneEmbedder};
pub use featurize::{FeatureOutcome, FeatureVector, Featurizer, FeaturizeError, PixelFeaturizer};
pub use fetcher::{
    BoundedFetcher, ByteSource, CancelToken, FetchError, FetchResult, HttpByteSource,
};
pub use manifest::{Manifest, ManifestRecord};
pub use pipeline::{run as run_pipeline, RunSummary};
pub use stream::{JsonlSink, RecordSink, StreamStats};

#[cfg(feature = "debug_logs")]
#[macro_export]
// This allows use of the `eprintln!` macro via `debug_log!` macro.
macro_rules! debug_log {
        ($($arg:tt)*) => {
            eprintln!($($arg)*);
        };
    }
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
// This effectively disables the `eprintln!` macro, effectively removing it from the code during
// compilation.
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}
