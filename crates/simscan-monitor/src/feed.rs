//! Fetch seam between the monitoring loop and the LMS client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use simscan_moodle::{Assignment, AssignmentId, Course, CourseId, MoodleClient, Submission};
use thiserror::Error;

/// A failed LMS fetch. The affected tier skips this cycle and the loop
/// continues.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct FeedError(pub String);

/// The course / assignment / submission reads the monitoring loop needs.
#[async_trait]
pub trait LmsFeed: Send + Sync {
    async fn fetch_courses(
        &self,
        in_progress_only: bool,
        page_size: i64,
    ) -> Result<Vec<Course>, FeedError>;

    async fn fetch_assignments(
        &self,
        course_ids: &[CourseId],
    ) -> Result<Vec<Assignment>, FeedError>;

    async fn fetch_submissions(
        &self,
        assignment_id: AssignmentId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Submission>, FeedError>;
}

#[async_trait]
impl LmsFeed for MoodleClient {
    async fn fetch_courses(
        &self,
        in_progress_only: bool,
        page_size: i64,
    ) -> Result<Vec<Course>, FeedError> {
        self.stream_enrolled_courses(in_progress_only, page_size)
            .try_collect()
            .await
            .map_err(|err| FeedError(err.to_string()))
    }

    async fn fetch_assignments(
        &self,
        course_ids: &[CourseId],
    ) -> Result<Vec<Assignment>, FeedError> {
        self.stream_assignments(course_ids.to_vec())
            .try_collect()
            .await
            .map_err(|err| FeedError(err.to_string()))
    }

    async fn fetch_submissions(
        &self,
        assignment_id: AssignmentId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Submission>, FeedError> {
        self.stream_submissions(assignment_id, since)
            .try_collect()
            .await
            .map_err(|err| FeedError(err.to_string()))
    }
}
