//! Error types for the digest layer.

use thiserror::Error;

/// Errors produced by the digest repository and worker pool.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DigestError {
    /// The database rejected a statement or the connection broke.
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// No session could be acquired from the connection pool.
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// gzip encoding or decoding of a digest payload failed.
    #[error("digest payload compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// The worker pool is shutting down and no longer accepts work.
    #[error("worker pool is closed")]
    PoolClosed,
}

pub type Result<T> = std::result::Result<T, DigestError>;
