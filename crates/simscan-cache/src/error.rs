//! Error types for the cache layer.

use thiserror::Error;

/// Errors produced by the database handle and the mirror repositories.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CacheError {
    /// The database rejected a statement or the connection broke.
    #[error("database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// No session could be acquired from the connection pool.
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// The pool itself could not be built from the configuration.
    #[error("connection pool configuration error: {0}")]
    PoolConfig(#[from] deadpool_postgres::CreatePoolError),

    /// A delete was asked for with no scoping at all, which would wipe the
    /// whole table. The caller must pass at least one bound.
    #[error("refusing an unscoped delete; pass at least one of ids, before or after")]
    UnscopedDelete,
}

pub type Result<T> = std::result::Result<T, CacheError>;
