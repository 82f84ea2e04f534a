//! Keeps the local mirror fresh: periodic, per-entity refresh loops over the
//! three cache tiers (courses, assignments, submissions), with submissions
//! split into a slow "active" class and a fast "near deadline" class.

pub mod config;
pub mod feed;
pub mod interval;
pub mod monitor;

pub use config::{
    AssignmentsTierConfig, CoursesTierConfig, MonitorConfig, SubmissionsTierConfig,
};
pub use feed::{FeedError, LmsFeed};
pub use interval::IntervalScheduler;
pub use monitor::Monitor;
