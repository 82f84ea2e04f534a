//! Shared database pool.
//!
//! [`Database`] wraps a `deadpool-postgres` connection pool; repositories
//! acquire a pooled session per operation and return it to the pool when the
//! operation ends. Multi-statement writes take an explicit transaction on
//! their session, so different refresh tiers, the comparison pipeline and
//! the web handlers all progress on their own connections instead of
//! queueing behind one.

use deadpool_postgres::{Client, Config, ManagerConfig, Pool, PoolError, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

use crate::error::Result;

/// The connection pool shared by the repositories.
pub struct Database {
    pool: Pool,
}

impl Database {
    /// Build a pool from a `tokio-postgres` config string, e.g.
    /// `host=localhost user=simscan password=... dbname=simscan`, and check
    /// that a connection can actually be established.
    pub async fn connect(config: &str) -> Result<Self> {
        let parsed = config.parse::<tokio_postgres::Config>()?;
        let mut pool_config = Config::new();
        pool_config.host = parsed.get_hosts().first().map(|host| match host {
            tokio_postgres::config::Host::Tcp(name) => name.clone(),
            #[cfg(unix)]
            tokio_postgres::config::Host::Unix(path) => path.to_string_lossy().to_string(),
        });
        pool_config.port = parsed.get_ports().first().copied();
        pool_config.user = parsed.get_user().map(String::from);
        pool_config.password = parsed
            .get_password()
            .map(|password| String::from_utf8_lossy(password).to_string());
        pool_config.dbname = parsed.get_dbname().map(String::from);
        pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = pool_config.create_pool(Some(Runtime::Tokio1), NoTls)?;

        // Fail at startup, not on the first query, when the server is
        // unreachable or the credentials are wrong.
        drop(pool.get().await?);
        Ok(Self { pool })
    }

    /// Acquire a session for one operation.
    pub async fn session(&self) -> std::result::Result<Client, PoolError> {
        self.pool.get().await
    }

    /// Close the pool; waiting callers get an error instead of a session.
    pub fn close(&self) {
        self.pool.close();
    }
}
