//! The service's components and the capability tags they exchange.
//!
//! Each component is thin glue: it reads its configuration and environment,
//! builds the long-lived object its crate provides, registers it on the bus
//! and, for the two background loops, owns the spawned task.

use std::sync::Arc;

use async_trait::async_trait;
use simscan::{BoxError, CapabilityBus, Component, ConfigManager};
use simscan_cache::{Database, PgCacheRepository};
use simscan_digests::{DigestWorkerPool, PgDigestRepository, PluginRegistry};
use simscan_monitor::{Monitor, MonitorConfig};
use simscan_moodle::{MoodleClient, MoodleCredentials};
use simscan_pipeline::{ComparisonPipeline, FileComparisonConfig};
use simscan_web::filecomp_router;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Capability tags exchanged over the bus.
pub mod tags {
    pub const DATABASE: &str = "db.database";
    pub const MOODLE: &str = "moodle.client";
    pub const CACHE: &str = "cache.repository";
    pub const DIGESTS: &str = "digests.repository";
    pub const WEB_ROUTER: &str = "web.filecomp-router";
    pub const MONITOR_WAKEUP: &str = "monitor.wakeup";
}

fn env_var(name: &str) -> Result<String, BoxError> {
    std::env::var(name).map_err(|_| format!("environment variable {name} is not set").into())
}

/// Cancel a background task and swallow its cancellation error.
async fn stop_task(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        task.abort();
        let _ = task.await;
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Connects the PostgreSQL pool and provides the shared [`Database`]
/// handle. Connection parameters come from `POSTGRES_HOST`,
/// `POSTGRES_USER`, `POSTGRES_PWD` and `POSTGRES_DB`.
#[derive(Default)]
pub struct DatabaseComponent {
    db: Option<Arc<Database>>,
}

#[async_trait]
impl Component for DatabaseComponent {
    fn name(&self) -> &str {
        "db"
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![tags::DATABASE]
    }

    async fn start(&mut self, bus: &CapabilityBus) -> Result<(), BoxError> {
        let host = env_var("POSTGRES_HOST")?;
        let user = env_var("POSTGRES_USER")?;
        let password = env_var("POSTGRES_PWD")?;
        let dbname = env_var("POSTGRES_DB")?;
        tracing::info!(%host, %dbname, "connecting to the database");
        let config = format!("host={host} user={user} password={password} dbname={dbname}");
        let db = Arc::new(Database::connect(&config).await?);
        self.db = Some(Arc::clone(&db));
        bus.register(tags::DATABASE, db)?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BoxError> {
        // Stopped last, after every repository user; closing the pool here
        // makes any straggler session request fail fast instead of hanging.
        if let Some(db) = self.db.take() {
            db.close();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Moodle
// ---------------------------------------------------------------------------

/// Logs in to the LMS and provides the shared [`MoodleClient`]. Credentials
/// come from `MOODLE_URL`, `MOODLE_USER`, `MOODLE_PWD` and the optional
/// `MOODLE_SERVICE`.
#[derive(Default)]
pub struct MoodleComponent;

#[async_trait]
impl Component for MoodleComponent {
    fn name(&self) -> &str {
        "moodle"
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![tags::MOODLE]
    }

    async fn start(&mut self, bus: &CapabilityBus) -> Result<(), BoxError> {
        let base_url = env_var("MOODLE_URL")?.parse()?;
        let client = MoodleClient::new(MoodleCredentials {
            base_url,
            username: env_var("MOODLE_USER")?,
            password: env_var("MOODLE_PWD")?,
            service: std::env::var("MOODLE_SERVICE")
                .unwrap_or_else(|_| "moodle_mobile_app".to_string()),
        })?;
        client.login().await?;
        bus.register(tags::MOODLE, Arc::new(client))?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BoxError> {
        // Moodle has no logout endpoint; the token stays valid server-side.
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Cache repository
// ---------------------------------------------------------------------------

/// Creates the mirror tables and provides the cache repository.
#[derive(Default)]
pub struct CacheComponent;

#[async_trait]
impl Component for CacheComponent {
    fn name(&self) -> &str {
        "cache"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![tags::DATABASE]
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![tags::CACHE]
    }

    async fn start(&mut self, bus: &CapabilityBus) -> Result<(), BoxError> {
        let db: Arc<Database> = bus.get(tags::DATABASE)?;
        let repository = PgCacheRepository::new(db);
        repository.create_tables().await?;
        bus.register(tags::CACHE, Arc::new(repository))?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Digest repository
// ---------------------------------------------------------------------------

/// Creates the digest tables and provides the digest repository. Depends on
/// the cache schema because the digest tables reference the file mirror.
#[derive(Default)]
pub struct DigestsComponent;

#[async_trait]
impl Component for DigestsComponent {
    fn name(&self) -> &str {
        "digests"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![tags::DATABASE, tags::CACHE]
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![tags::DIGESTS]
    }

    async fn start(&mut self, bus: &CapabilityBus) -> Result<(), BoxError> {
        let db: Arc<Database> = bus.get(tags::DATABASE)?;
        let repository = PgDigestRepository::new(db);
        repository.create_tables().await?;
        bus.register(tags::DIGESTS, Arc::new(repository))?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Monitoring loop
// ---------------------------------------------------------------------------

/// Runs the cache refresh loop as a background task and provides its wakeup
/// signal so other parts can force an immediate pass.
pub struct MonitorComponent {
    config: Arc<ConfigManager>,
    task: Option<JoinHandle<()>>,
}

impl MonitorComponent {
    pub fn new(config: Arc<ConfigManager>) -> Self {
        Self { config, task: None }
    }
}

#[async_trait]
impl Component for MonitorComponent {
    fn name(&self) -> &str {
        "monitor"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![tags::CACHE, tags::MOODLE]
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![tags::MONITOR_WAKEUP]
    }

    async fn start(&mut self, bus: &CapabilityBus) -> Result<(), BoxError> {
        let cache: Arc<PgCacheRepository> = bus.get(tags::CACHE)?;
        let moodle: Arc<MoodleClient> = bus.get(tags::MOODLE)?;
        let monitor_config: MonitorConfig = self.config.load("monitor").await?;
        let wakeup = Arc::new(Notify::new());
        bus.register(tags::MONITOR_WAKEUP, Arc::clone(&wakeup))?;

        let monitor = Monitor::new(cache, moodle, monitor_config, wakeup);
        let manager = Arc::clone(&self.config);
        self.task = Some(tokio::spawn(async move {
            monitor
                .run(move || {
                    let manager = Arc::clone(&manager);
                    async move {
                        match manager.load::<MonitorConfig>("monitor").await {
                            Ok(config) => Some(config),
                            Err(err) => {
                                tracing::warn!(error = %err,
                                    "monitor config reload failed, keeping the previous snapshot");
                                None
                            }
                        }
                    }
                })
                .await;
        }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BoxError> {
        stop_task(self.task.take()).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Comparison pipeline
// ---------------------------------------------------------------------------

/// Spawns the digest worker pool and runs the comparison pipeline as a
/// background task.
pub struct PipelineComponent {
    config: Arc<ConfigManager>,
    task: Option<JoinHandle<()>>,
    pool: Option<Arc<DigestWorkerPool>>,
}

impl PipelineComponent {
    pub fn new(config: Arc<ConfigManager>) -> Self {
        Self {
            config,
            task: None,
            pool: None,
        }
    }
}

#[async_trait]
impl Component for PipelineComponent {
    fn name(&self) -> &str {
        "file_comparison"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![tags::DIGESTS, tags::MOODLE]
    }

    async fn start(&mut self, bus: &CapabilityBus) -> Result<(), BoxError> {
        let store: Arc<PgDigestRepository> = bus.get(tags::DIGESTS)?;
        let moodle: Arc<MoodleClient> = bus.get(tags::MOODLE)?;
        let mut config: FileComparisonConfig = self.config.load("file_comparison").await?;

        let registry = PluginRegistry::builtin();
        config.plugin_settings = registry.prune_settings(std::mem::take(&mut config.plugin_settings));
        let available_types = registry.available_digest_types();
        let pool = Arc::new(DigestWorkerPool::spawn(
            config.effective_workers(),
            &registry,
            &config.plugin_settings,
        )?);
        self.pool = Some(Arc::clone(&pool));

        let pipeline =
            ComparisonPipeline::new(store, moodle, pool, available_types, config);
        self.task = Some(tokio::spawn(async move { pipeline.run().await }));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BoxError> {
        stop_task(self.task.take()).await;
        if let Some(pool) = self.pool.take() {
            match Arc::try_unwrap(pool) {
                Ok(pool) => {
                    // Joining the worker threads blocks; keep it off the
                    // async executor.
                    tokio::task::spawn_blocking(move || pool.shutdown()).await?;
                }
                Err(_) => {
                    tracing::warn!("worker pool still referenced at shutdown, leaving it running");
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Web router
// ---------------------------------------------------------------------------

/// Builds the `/filecomp` router over the digest repository and provides it
/// for the HTTP server to mount.
#[derive(Default)]
pub struct WebComponent;

#[async_trait]
impl Component for WebComponent {
    fn name(&self) -> &str {
        "web"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![tags::DIGESTS]
    }

    fn provides(&self) -> Vec<&'static str> {
        vec![tags::WEB_ROUTER]
    }

    async fn start(&mut self, bus: &CapabilityBus) -> Result<(), BoxError> {
        let repository: Arc<PgDigestRepository> = bus.get(tags::DIGESTS)?;
        let router = filecomp_router(repository);
        bus.register(tags::WEB_ROUTER, Arc::new(router))?;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}
