//! The comparison pipeline: find files missing digests, download and digest
//! them on the worker pool, then find uncompared digest pairs and score
//! them. Both flows run to completion once per refresh interval; failures
//! are caught at the loop so the pipeline never dies.

pub mod config;
pub mod fetch;
pub mod pipeline;

pub use config::FileComparisonConfig;
pub use fetch::{FetchError, FileFetcher};
pub use pipeline::{ComparisonPipeline, CycleStats};
