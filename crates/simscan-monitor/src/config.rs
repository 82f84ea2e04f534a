//! Configuration of the monitoring loop.

use serde::{Deserialize, Serialize};

/// The `monitor` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Upper bound on the pause between wakeups; an external wakeup signal
    /// cuts it short.
    pub wakeup_interval_seconds: u64,
    pub courses: CoursesTierConfig,
    pub assignments: AssignmentsTierConfig,
    pub submissions: SubmissionsTierConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            wakeup_interval_seconds: 60,
            courses: CoursesTierConfig::default(),
            assignments: AssignmentsTierConfig::default(),
            submissions: SubmissionsTierConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoursesTierConfig {
    pub update_interval_seconds: u64,
    /// Fetch only courses currently in progress.
    pub load_inprogress_only: bool,
    /// Page size for the course listing endpoint.
    pub page_size: i64,
    /// How many fetched entities go into one database write.
    pub db_batch_size: usize,
}

impl Default for CoursesTierConfig {
    fn default() -> Self {
        Self {
            update_interval_seconds: 60 * 60 * 12,
            load_inprogress_only: true,
            page_size: 10,
            db_batch_size: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignmentsTierConfig {
    pub update_interval_seconds: u64,
    /// How many courses are refreshed per trigger.
    pub course_batch_size: usize,
    pub db_batch_size: usize,
    /// Window before a due/cutoff time during which an assignment counts as
    /// "ending soon".
    pub deadline_before_seconds: u64,
    /// Window after a due/cutoff time during which it still counts.
    pub deadline_after_seconds: u64,
}

impl Default for AssignmentsTierConfig {
    fn default() -> Self {
        Self {
            update_interval_seconds: 60 * 60 * 12,
            course_batch_size: 1,
            db_batch_size: 5,
            deadline_before_seconds: 60 * 60 * 2,
            deadline_after_seconds: 60 * 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionsTierConfig {
    /// Cadence for assignments without a nearby deadline.
    pub active_interval_seconds: u64,
    pub active_batch_size: usize,
    /// Cadence for assignments whose deadline is inside the window;
    /// typically much shorter than the active cadence.
    pub deadline_interval_seconds: u64,
    pub deadline_batch_size: usize,
    pub db_batch_size: usize,
}

impl Default for SubmissionsTierConfig {
    fn default() -> Self {
        Self {
            active_interval_seconds: 60 * 60 * 3,
            active_batch_size: 1,
            deadline_interval_seconds: 60 * 3,
            deadline_batch_size: 1,
            db_batch_size: 5,
        }
    }
}
