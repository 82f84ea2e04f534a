//! Plugin contracts for digest extraction and comparison.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// Per-plugin settings slice, taken from the `plugin_settings` map of the
/// file-comparison configuration. Plugins with no configured entry receive
/// an empty map.
pub type PluginSettings = serde_json::Map<String, serde_json::Value>;

/// Failure inside a plugin. Captured per file or per pair; never aborts the
/// worker pool.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PluginError(pub String);

impl PluginError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// What an extractor produced for one file.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Raw (uncompressed) digest bytes per digest type. `None` records that
    /// the extractor tried and produced nothing for that type.
    pub digests: BTreeMap<String, Option<Vec<u8>>>,
    /// Human-readable warnings per warning type, stored alongside digests.
    pub warnings: BTreeMap<String, String>,
}

/// Turns file bytes into digests of one or more types.
///
/// Instances live worker-locally: each worker thread builds its own set via
/// the registry factories and initializes them once with their settings, so
/// implementations may hold heavy state without synchronization.
pub trait DigestExtractor: Send {
    /// Unique name; the key for this plugin's settings slice.
    fn name(&self) -> &'static str;

    /// Prepare the instance. Called once per worker before any file.
    fn initialize(&mut self, settings: &PluginSettings) -> Result<(), PluginError>;

    /// Digest types this plugin can emit.
    fn digest_types(&self) -> BTreeSet<String>;

    /// Cheap, pure gatekeeper: is this file worth handing to
    /// [`process`](Self::process)?
    fn can_process(&self, filename: &str, mimetype: &str, filesize: i64) -> bool;

    /// Extract digests from the file content.
    fn process(
        &mut self,
        filename: &str,
        mimetype: &str,
        content: &[u8],
    ) -> Result<Extraction, PluginError>;
}

/// Scores the similarity of two digests of the same type.
pub trait DigestComparer: Send {
    /// Unique name; the key for this plugin's settings slice.
    fn name(&self) -> &'static str;

    /// Prepare the instance. Called once per worker.
    fn initialize(&mut self, settings: &PluginSettings) -> Result<(), PluginError>;

    /// Digest types this plugin can compare.
    fn digest_types(&self) -> BTreeSet<String>;

    /// Similarity of two digests in `[0, 1]`. Pairs for the same newer file
    /// arrive consecutively, so implementations may cache state keyed on
    /// `newer_id` as a batching hint; none is required to.
    fn compare(
        &mut self,
        digest_type: &str,
        older_id: i64,
        older: &[u8],
        newer_id: i64,
        newer: &[u8],
    ) -> Result<f64, PluginError>;
}
