//! HTTP surface for file-similarity lookups.
//!
//! One endpoint: `GET /filecomp/submission/{submission_id}` with query
//! parameters `minratio` (0..=1, default 0.7), `maxfiles` (1..=10, default
//! 5) and `shownewer` (default false). Invalid queries get a 422 with
//! machine-readable messages; unknown submissions simply produce an empty
//! file map.

pub mod handler;
pub mod queries;

pub use handler::filecomp_router;
pub use queries::SimilarityQueries;
