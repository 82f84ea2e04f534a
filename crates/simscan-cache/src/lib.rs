//! Local relational mirror of the Moodle entities the service watches.
//!
//! The remote server is authoritative; everything here is a cache refreshed
//! by the monitoring loop. Writes are upserts keyed on natural primary keys,
//! and list refreshes that must remove stale children delete by
//! "key not in the provided set", scoped to the refreshed parents so that
//! untouched courses are never affected.
//!
//! Submissions are the exception: they are only ever added or updated, never
//! removed automatically, unless the parent assignment disappears and the
//! foreign keys cascade.

pub mod db;
pub mod error;
pub mod repository;
pub mod schema;

pub use db::Database;
pub use error::{CacheError, Result};
pub use repository::{CacheStore, PgCacheRepository};
