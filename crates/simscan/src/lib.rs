//! Core runtime for the simscan service.
//!
//! This crate knows nothing about Moodle or file digests. It provides the
//! three pieces every other crate builds on:
//!
//! - [`Component`] and [`ModuleHost`] - discoverable service components with
//!   declared capability dependencies, started in topological order and torn
//!   down in reverse,
//! - [`CapabilityBus`] - a string-tagged registry through which running
//!   components hand shared handles (database client, LMS client,
//!   repositories) to the components started after them,
//! - [`ConfigManager`] - per-section TOML configuration with
//!   write-defaults-on-first-run behavior.
//!
//! # Example
//!
//! ```rust,no_run
//! use simscan::{CapabilityBus, Component, ModuleHost};
//!
//! # async fn example(components: Vec<Box<dyn Component>>) -> Result<(), simscan::LifecycleError> {
//! let mut host = ModuleHost::new(components)?;
//! host.start_all().await?;
//! // ... serve traffic ...
//! host.shutdown_all().await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod component;
pub mod config;
pub mod host;

pub use bus::{CapabilityBus, CapabilityError};
pub use component::{BoxError, Component};
pub use config::{ConfigError, ConfigManager};
pub use host::{LifecycleError, ModuleHost, ShutdownFailure};
