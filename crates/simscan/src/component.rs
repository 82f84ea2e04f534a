//! The component contract.

use async_trait::async_trait;

use crate::bus::CapabilityBus;

/// Boxed error used at the component boundary; components keep their own
/// error types internally and box them when crossing into the host.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A long-lived piece of the service with an explicit start/stop life cycle.
///
/// `start` performs setup: connect, create tables, spawn background tasks,
/// and register provided capabilities on the bus. Returning `Ok(())` is the
/// component's ready signal; the host will not start dependents before it.
/// `stop` tears down whatever `start` built, in particular cancelling and
/// awaiting background tasks. `stop` is called at most once, only after a
/// successful `start`, and must be safe to call even if the rest of the
/// system is already half torn down.
#[async_trait]
pub trait Component: Send {
    /// Short name used in logs and dependency-failure reports.
    fn name(&self) -> &str;

    /// Capability tags this component needs before it can start.
    fn requires(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Capability tags this component registers during `start`.
    fn provides(&self) -> Vec<&'static str> {
        Vec::new()
    }

    async fn start(&mut self, bus: &CapabilityBus) -> Result<(), BoxError>;

    async fn stop(&mut self) -> Result<(), BoxError>;
}
