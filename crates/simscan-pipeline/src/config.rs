//! Configuration of the comparison pipeline.

use serde::{Deserialize, Serialize};

/// The `file_comparison` configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileComparisonConfig {
    /// Pause between pipeline cycles.
    pub refresh_interval_seconds: u64,
    /// Skip files above this many bytes. Unset means no limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_files_larger_than: Option<i64>,
    /// Skip files uploaded more than this many days ago. Unset means no
    /// limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_files_older_than_days: Option<i64>,
    /// How many files or pairs are in flight per batch.
    pub batch_size: usize,
    /// Worker threads in the digest pool; 0 means one per CPU.
    pub workers: usize,
    /// Per-plugin settings, keyed by plugin name.
    pub plugin_settings: serde_json::Map<String, serde_json::Value>,
}

impl Default for FileComparisonConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 60,
            ignore_files_larger_than: None,
            ignore_files_older_than_days: None,
            batch_size: 4,
            workers: 0,
            plugin_settings: serde_json::Map::new(),
        }
    }
}

impl FileComparisonConfig {
    /// The worker-thread count to actually spawn.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        }
    }
}
