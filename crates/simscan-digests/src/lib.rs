//! File digests: extraction plugins, the comparison worker pool and the
//! repository that stores digests, warnings and similarity scores.
//!
//! A *digest* is a compact representation of a file's content, produced by a
//! [`DigestExtractor`] and comparable only to digests of the same type by a
//! [`DigestComparer`]. Plugins always see uncompressed digest bytes; the
//! rest of the system only ever sees [`DigestPayload`] values, which are
//! gzip-compressed at the worker-pool boundary. `DigestPayload::Absent`
//! records "we tried and produced nothing", so a file is not retried
//! forever.
//!
//! Extraction and comparison run on a fixed pool of worker threads
//! ([`DigestWorkerPool`]); each worker builds its own plugin instances once
//! and work items carry only the data they need across the boundary.

pub mod error;
pub mod payload;
pub mod plugin;
pub mod plugins;
pub mod registry;
pub mod repository;
pub mod worker;

pub use error::{DigestError, Result};
pub use payload::DigestPayload;
pub use plugin::{DigestComparer, DigestExtractor, Extraction, PluginError, PluginSettings};
pub use registry::PluginRegistry;
pub use repository::{
    DigestPair, DigestStore, FileComparisonRecord, FileDetails, FileDigestRecord, FileId,
    FileToProcess, FileWarningDetails, FileWarningRecord, PgDigestRepository, SimilarFile,
};
pub use worker::{CompareResponse, DigestWorkerPool, ExtractResponse};
