//! Explicit plugin registration.
//!
//! Plugins are compiled in; each one registers a factory under its declared
//! name and the registry is a pure lookup from then on. Worker threads call
//! the factories to build their own local instances.

use std::collections::BTreeSet;

use crate::plugin::{DigestComparer, DigestExtractor, PluginSettings};

type ExtractorFactory = fn() -> Box<dyn DigestExtractor>;
type ComparerFactory = fn() -> Box<dyn DigestComparer>;

/// The set of available extractor and comparer factories.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    extractors: Vec<(&'static str, ExtractorFactory)>,
    comparers: Vec<(&'static str, ComparerFactory)>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every plugin this crate ships.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register_extractor("plaintext", || {
            Box::new(crate::plugins::plaintext::PlaintextExtractor::default())
        });
        registry.register_comparer("plaintext", || {
            Box::new(crate::plugins::plaintext::PlaintextComparer::default())
        });
        registry
    }

    pub fn register_extractor(&mut self, name: &'static str, factory: ExtractorFactory) {
        self.extractors.push((name, factory));
    }

    pub fn register_comparer(&mut self, name: &'static str, factory: ComparerFactory) {
        self.comparers.push((name, factory));
    }

    /// Instantiate every registered extractor.
    pub fn build_extractors(&self) -> Vec<Box<dyn DigestExtractor>> {
        self.extractors.iter().map(|(_, factory)| factory()).collect()
    }

    /// Instantiate every registered comparer.
    pub fn build_comparers(&self) -> Vec<Box<dyn DigestComparer>> {
        self.comparers.iter().map(|(_, factory)| factory()).collect()
    }

    /// Union of the digest types the registered extractors can emit.
    pub fn available_digest_types(&self) -> BTreeSet<String> {
        self.extractors
            .iter()
            .flat_map(|(_, factory)| factory().digest_types())
            .collect()
    }

    /// Names of all registered plugins.
    pub fn plugin_names(&self) -> BTreeSet<&'static str> {
        self.extractors
            .iter()
            .map(|(name, _)| *name)
            .chain(self.comparers.iter().map(|(name, _)| *name))
            .collect()
    }

    /// Drop settings entries that no registered plugin claims, warning about
    /// each, so typos in the configuration are visible at startup.
    pub fn prune_settings(
        &self,
        mut settings: serde_json::Map<String, serde_json::Value>,
    ) -> serde_json::Map<String, serde_json::Value> {
        let known = self.plugin_names();
        let unknown: Vec<String> = settings
            .keys()
            .filter(|name| !known.contains(name.as_str()))
            .cloned()
            .collect();
        for name in unknown {
            tracing::warn!(plugin = %name, "no such plugin, ignoring its settings");
            settings.remove(&name);
        }
        settings
    }

    /// The settings slice for one plugin, or an empty map.
    pub fn settings_for(
        all: &serde_json::Map<String, serde_json::Value>,
        name: &str,
    ) -> PluginSettings {
        all.get(name)
            .and_then(|value| value.as_object())
            .cloned()
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("extractors", &self.extractors.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("comparers", &self.comparers.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_registry_announces_plaintext() {
        let registry = PluginRegistry::builtin();
        assert!(registry.available_digest_types().contains("plaintext"));
        assert!(registry.plugin_names().contains("plaintext"));
    }

    #[test]
    fn unknown_settings_entries_are_pruned() {
        let registry = PluginRegistry::builtin();
        let settings = json!({
            "plaintext": {"masks": ["*.rs"]},
            "no_such_plugin": {"x": 1}
        });
        let pruned = registry.prune_settings(settings.as_object().cloned().unwrap());
        assert!(pruned.contains_key("plaintext"));
        assert!(!pruned.contains_key("no_such_plugin"));
    }

    #[test]
    fn unconfigured_plugins_get_an_empty_settings_slice() {
        let all = serde_json::Map::new();
        assert!(PluginRegistry::settings_for(&all, "plaintext").is_empty());
    }
}
