//! Capability bus shared between components.
//!
//! A capability is an opaque string tag plus a shared handle. Components
//! declare which tags they provide and which they require; the
//! [`ModuleHost`](crate::host::ModuleHost) orders startup so that a tag is
//! always registered before any component requiring it is started. Because of
//! that ordering, `get` is only ever called for tags whose provider has
//! already passed its ready point.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

/// Errors produced by [`CapabilityBus`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// A second component tried to provide an already-registered tag.
    #[error("capability {0:?} has already been provided")]
    Duplicate(String),

    /// A lookup was made for a tag nobody registered.
    #[error("capability {0:?} is not provided by any component")]
    Unknown(String),

    /// The tag exists but was registered with a different concrete type.
    #[error("capability {0:?} is registered with a different type")]
    WrongType(String),
}

/// String-tagged registry of shared handles.
///
/// Values are stored type-erased; [`CapabilityBus::get`] downcasts back to
/// the concrete type. The tag is the contract: both sides of a capability
/// must agree on the type registered under it.
#[derive(Default)]
pub struct CapabilityBus {
    entries: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl CapabilityBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Duplicate`] if the tag is already present.
    pub fn register<T>(&self, tag: &str, value: Arc<T>) -> Result<(), CapabilityError>
    where
        T: Any + Send + Sync,
    {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.contains_key(tag) {
            return Err(CapabilityError::Duplicate(tag.to_string()));
        }
        tracing::debug!(capability = tag, "capability registered");
        entries.insert(tag.to_string(), value);
        Ok(())
    }

    /// Look up the handle registered under `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Unknown`] if nothing is registered under
    /// the tag, or [`CapabilityError::WrongType`] if the registered value is
    /// not a `T`.
    pub fn get<T>(&self, tag: &str) -> Result<Arc<T>, CapabilityError>
    where
        T: Any + Send + Sync,
    {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let value = entries
            .get(tag)
            .ok_or_else(|| CapabilityError::Unknown(tag.to_string()))?;
        value
            .clone()
            .downcast::<T>()
            .map_err(|_| CapabilityError::WrongType(tag.to_string()))
    }

    /// Whether anything is registered under `tag`.
    pub fn contains(&self, tag: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(tag)
    }
}

impl std::fmt::Debug for CapabilityBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut tags: Vec<&str> = entries.keys().map(String::as_str).collect();
        tags.sort_unstable();
        f.debug_struct("CapabilityBus").field("tags", &tags).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn register_then_get_returns_same_handle() {
        let bus = CapabilityBus::new();
        let value = Arc::new(42u32);
        bus.register("answer", Arc::clone(&value)).unwrap();

        let fetched: Arc<u32> = bus.get("answer").unwrap();
        assert_eq!(*fetched, 42);
        assert!(bus.contains("answer"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let bus = CapabilityBus::new();
        bus.register("db", Arc::new(1u8)).unwrap();
        let err = bus.register("db", Arc::new(2u8)).unwrap_err();
        assert!(matches!(err, CapabilityError::Duplicate(tag) if tag == "db"));
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let bus = CapabilityBus::new();
        let err = bus.get::<u32>("missing").unwrap_err();
        assert!(matches!(err, CapabilityError::Unknown(tag) if tag == "missing"));
    }

    #[test]
    fn mismatched_type_is_an_error() {
        let bus = CapabilityBus::new();
        bus.register("value", Arc::new(7i64)).unwrap();
        let err = bus.get::<String>("value").unwrap_err();
        assert!(matches!(err, CapabilityError::WrongType(tag) if tag == "value"));
    }
}
