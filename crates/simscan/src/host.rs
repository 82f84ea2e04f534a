//! Component ordering and lifecycle driving.

use std::collections::HashSet;

use thiserror::Error;

use crate::bus::CapabilityBus;
use crate::component::{BoxError, Component};

/// Errors raised while bringing the component graph up.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The component set cannot be ordered: each entry names a component and
    /// the capability tags nothing in the set provides for it.
    #[error("components with unmet dependencies: {}", format_unmet(.0))]
    UnmetDependencies(Vec<(String, Vec<String>)>),

    /// A component's `start` failed. Later components were not started;
    /// already-started ones have been stopped.
    #[error("component {component} failed to start: {source}")]
    Startup {
        component: String,
        #[source]
        source: BoxError,
    },
}

fn format_unmet(unmet: &[(String, Vec<String>)]) -> String {
    unmet
        .iter()
        .map(|(name, missing)| format!("{} ({})", name, missing.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A teardown failure, reported but never raised.
#[derive(Debug)]
pub struct ShutdownFailure {
    pub component: String,
    pub error: BoxError,
}

/// Order components so that every provider precedes its consumers.
///
/// Repeatedly scans the remaining components and appends any whose required
/// tags are all available, making its provided tags available in turn. The
/// relative order of simultaneously satisfiable components follows their
/// input order; callers must not rely on that detail.
///
/// # Errors
///
/// [`LifecycleError::UnmetDependencies`] when a full pass adds nothing while
/// components remain, naming each stuck component with its missing tags.
pub fn sort_components(
    mut unordered: Vec<Box<dyn Component>>,
) -> Result<Vec<Box<dyn Component>>, LifecycleError> {
    let mut available: HashSet<&'static str> = HashSet::new();
    let mut ordered: Vec<Box<dyn Component>> = Vec::with_capacity(unordered.len());

    while !unordered.is_empty() {
        let mut added_any = false;
        let mut i = 0;
        while i < unordered.len() {
            let satisfied = unordered[i]
                .requires()
                .iter()
                .all(|tag| available.contains(tag));
            if satisfied {
                let component = unordered.remove(i);
                available.extend(component.provides());
                ordered.push(component);
                added_any = true;
            } else {
                i += 1;
            }
        }
        if !added_any {
            let unmet = unordered
                .iter()
                .map(|component| {
                    let missing = component
                        .requires()
                        .iter()
                        .filter(|tag| !available.contains(*tag))
                        .map(ToString::to_string)
                        .collect();
                    (component.name().to_string(), missing)
                })
                .collect();
            return Err(LifecycleError::UnmetDependencies(unmet));
        }
    }
    Ok(ordered)
}

/// Owns the ordered component list and the capability bus, and drives both
/// phases of the lifecycle.
pub struct ModuleHost {
    components: Vec<Box<dyn Component>>,
    bus: CapabilityBus,
    started: usize,
}

impl ModuleHost {
    /// Order `components` topologically and wrap them in a host.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::UnmetDependencies`] if the set cannot be ordered.
    pub fn new(components: Vec<Box<dyn Component>>) -> Result<Self, LifecycleError> {
        let components = sort_components(components)?;
        tracing::info!(
            order = ?components.iter().map(|c| c.name()).collect::<Vec<_>>(),
            "component order resolved"
        );
        Ok(Self {
            components,
            bus: CapabilityBus::new(),
            started: 0,
        })
    }

    /// The shared capability bus.
    pub fn bus(&self) -> &CapabilityBus {
        &self.bus
    }

    /// Start every component in dependency order.
    ///
    /// Stops at the first failure: the failing component's error is returned
    /// and no later component is started. Components that did start are
    /// stopped again, in reverse order, before this returns.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::Startup`] naming the failed component.
    pub async fn start_all(&mut self) -> Result<(), LifecycleError> {
        for i in 0..self.components.len() {
            let name = self.components[i].name().to_string();
            tracing::debug!(component = %name, "starting component");
            match self.components[i].start(&self.bus).await {
                Ok(()) => {
                    self.started = i + 1;
                    tracing::debug!(component = %name, "component ready");
                }
                Err(source) => {
                    tracing::error!(component = %name, error = %source, "component failed to start");
                    self.shutdown_all().await;
                    return Err(LifecycleError::Startup {
                        component: name,
                        source,
                    });
                }
            }
        }
        tracing::info!("all components started");
        Ok(())
    }

    /// Stop every started component in reverse order.
    ///
    /// Always runs to completion: a failing `stop` is recorded and logged,
    /// and teardown continues with the remaining components.
    pub async fn shutdown_all(&mut self) -> Vec<ShutdownFailure> {
        let mut failures = Vec::new();
        while self.started > 0 {
            self.started -= 1;
            let component = &mut self.components[self.started];
            let name = component.name().to_string();
            tracing::debug!(component = %name, "stopping component");
            if let Err(error) = component.stop().await {
                tracing::warn!(component = %name, error = %error, "component failed to shut down cleanly");
                failures.push(ShutdownFailure {
                    component: name,
                    error,
                });
            }
        }
        if failures.is_empty() {
            tracing::info!("all components shut down");
        } else {
            tracing::warn!(failed = failures.len(), "some components failed to shut down");
        }
        failures
    }
}
