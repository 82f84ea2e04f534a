//! The simscan service binary.
//!
//! Brings the components up in dependency order, serves the HTTP API until
//! interrupted, then tears everything down in reverse.

mod components;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use simscan::{Component, ConfigManager, ModuleHost};
use tracing_subscriber::EnvFilter;

use crate::components::{
    tags, CacheComponent, DatabaseComponent, DigestsComponent, MonitorComponent,
    MoodleComponent, PipelineComponent, WebComponent,
};

/// Mirror a Moodle server and surface near-duplicate submissions.
#[derive(Debug, Parser)]
#[command(name = "simscan", version, about)]
struct Args {
    /// Directory holding the per-section configuration files.
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,
}

/// The `web` configuration section.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct WebConfig {
    host: String,
    port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(ConfigManager::new(&args.config_dir));
    let web_config: WebConfig = config.load("web").await?;

    // Deliberately unordered; the host resolves the dependency order.
    let components: Vec<Box<dyn Component>> = vec![
        Box::new(WebComponent),
        Box::new(PipelineComponent::new(Arc::clone(&config))),
        Box::new(MonitorComponent::new(Arc::clone(&config))),
        Box::new(CacheComponent),
        Box::new(DigestsComponent),
        Box::new(MoodleComponent),
        Box::new(DatabaseComponent::default()),
    ];

    let mut host = match ModuleHost::new(components) {
        Ok(host) => host,
        Err(err) => {
            tracing::error!(error = %err, "cannot order components");
            return Err(err.into());
        }
    };
    if let Err(err) = host.start_all().await {
        tracing::error!(error = %err, "startup failed");
        return Err(err.into());
    }

    let router: Arc<axum::Router> = host
        .bus()
        .get(tags::WEB_ROUTER)
        .context("web router missing from the capability bus")?;
    let addr = format!("{}:{}", web_config.host, web_config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;
    tracing::info!(%addr, "serving");

    let serve_result = axum::serve(listener, (*router).clone())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await;

    host.shutdown_all().await;
    serve_result.context("http server failed")?;
    Ok(())
}
