//! The three-tier refresh loop.
//!
//! Once per wakeup the tiers run in order: courses, assignments, deadline
//! submissions, active submissions. That order lets a freshly discovered
//! course get its assignments fetched within the same wakeup. Each tier
//! re-queries its tracked set only when it has nothing to track; a freshly
//! discovered assignment is picked up the next time the submission tiers
//! seed themselves. Every outward step is guarded: a failure is logged at
//! ERROR, the tier skips the cycle and the loop carries on.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use simscan_cache::CacheStore;
use simscan_moodle::{AssignmentId, CourseId};
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::config::MonitorConfig;
use crate::feed::LmsFeed;
use crate::interval::IntervalScheduler;

fn seconds(value: u64) -> TimeDelta {
    TimeDelta::seconds(value as i64)
}

/// Drives the cache refreshes against an LMS feed and a cache store.
pub struct Monitor<C, L> {
    cache: Arc<C>,
    lms: Arc<L>,
    config: MonitorConfig,
    wakeup: Arc<Notify>,
    courses_tier: IntervalScheduler<()>,
    assignments_tier: IntervalScheduler<CourseId>,
    deadline_tier: IntervalScheduler<AssignmentId>,
    active_tier: IntervalScheduler<AssignmentId>,
}

impl<C: CacheStore, L: LmsFeed> Monitor<C, L> {
    pub fn new(cache: Arc<C>, lms: Arc<L>, config: MonitorConfig, wakeup: Arc<Notify>) -> Self {
        // The courses tier tracks a single sentinel and first fires a full
        // cadence in (offset 0); the per-entity tiers fire as soon as they
        // are seeded (offset 1) and spread from there.
        let courses_tier =
            IntervalScheduler::new(seconds(config.courses.update_interval_seconds), 1, 0.0);
        let assignments_tier = IntervalScheduler::new(
            seconds(config.assignments.update_interval_seconds),
            config.assignments.course_batch_size,
            1.0,
        );
        let deadline_tier = IntervalScheduler::new(
            seconds(config.submissions.deadline_interval_seconds),
            config.submissions.deadline_batch_size,
            1.0,
        );
        let active_tier = IntervalScheduler::new(
            seconds(config.submissions.active_interval_seconds),
            config.submissions.active_batch_size,
            1.0,
        );
        Self {
            cache,
            lms,
            config,
            wakeup,
            courses_tier,
            assignments_tier,
            deadline_tier,
            active_tier,
        }
    }

    /// Swap in a fresh configuration snapshot; tracked timestamps survive.
    pub fn apply_config(&mut self, config: MonitorConfig) {
        if config == self.config {
            return;
        }
        info!("monitor configuration changed, applying the new snapshot");
        self.courses_tier
            .configure(seconds(config.courses.update_interval_seconds), 1);
        self.assignments_tier.configure(
            seconds(config.assignments.update_interval_seconds),
            config.assignments.course_batch_size,
        );
        self.deadline_tier.configure(
            seconds(config.submissions.deadline_interval_seconds),
            config.submissions.deadline_batch_size,
        );
        self.active_tier.configure(
            seconds(config.submissions.active_interval_seconds),
            config.submissions.active_batch_size,
        );
        self.config = config;
    }

    /// Run forever. `reload` is polled at the top of every wakeup and may
    /// hand back a fresh configuration snapshot; in-flight work always uses
    /// the snapshot it started with.
    pub async fn run<R, Fut>(mut self, mut reload: R)
    where
        R: FnMut() -> Fut + Send,
        Fut: Future<Output = Option<MonitorConfig>> + Send,
    {
        loop {
            if let Some(config) = reload().await {
                self.apply_config(config);
            }
            self.run_once(Utc::now()).await;
            let wait = Duration::from_secs(self.config.wakeup_interval_seconds);
            let _ = tokio::time::timeout(wait, self.wakeup.notified()).await;
        }
    }

    /// One wakeup worth of work. Public so tests can drive virtual time.
    pub async fn run_once(&mut self, now: DateTime<Utc>) {
        self.check_courses(now).await;
        self.check_assignments(now).await;
        self.check_submissions_deadline(now).await;
        self.check_submissions_active(now).await;
    }

    async fn check_courses(&mut self, now: DateTime<Utc>) {
        if self.courses_tier.is_empty() {
            self.courses_tier.set_queried_objects(vec![()], now);
        }
        if self.courses_tier.pop_triggered(now).is_empty() {
            return;
        }
        debug!("refreshing the enrolled-course snapshot");
        let tier = &self.config.courses;
        let courses = match self
            .lms
            .fetch_courses(tier.load_inprogress_only, tier.page_size)
            .await
        {
            Ok(courses) => courses,
            Err(err) => {
                error!(error = %err, "failed to fetch courses");
                return;
            }
        };
        for chunk in courses.chunks(tier.db_batch_size.max(1)) {
            if let Err(err) = self.cache.store_courses(chunk, now).await {
                error!(error = %err, "failed to store courses");
                return;
            }
        }
        debug!(courses = courses.len(), "courses refreshed");
    }

    async fn check_assignments(&mut self, now: DateTime<Utc>) {
        if self.assignments_tier.is_empty() {
            match self.cache.get_open_course_ids(now, false).await {
                Ok(course_ids) => {
                    debug!(count = course_ids.len(), "tracking open courses");
                    self.assignments_tier.set_queried_objects(course_ids, now);
                }
                Err(err) => {
                    error!(error = %err, "failed to list open courses");
                }
            }
        }
        let course_ids = self.assignments_tier.pop_triggered(now);
        if course_ids.is_empty() {
            return;
        }
        debug!(?course_ids, "refreshing assignments");
        let assignments = match self.lms.fetch_assignments(&course_ids).await {
            Ok(assignments) => assignments,
            Err(err) => {
                error!(error = %err, "failed to fetch assignments");
                return;
            }
        };
        for chunk in assignments.chunks(self.config.assignments.db_batch_size.max(1)) {
            if let Err(err) = self.cache.store_assignments(chunk).await {
                error!(error = %err, "failed to store assignments");
                return;
            }
        }
        // Full sync for the refreshed courses: assignments the server no
        // longer reports are dropped, scoped to exactly these courses.
        let mut keep: HashMap<CourseId, Vec<AssignmentId>> =
            course_ids.iter().map(|id| (*id, Vec::new())).collect();
        for assignment in &assignments {
            keep.entry(assignment.course_id)
                .or_default()
                .push(assignment.id);
        }
        if let Err(err) = self.cache.drop_assignments_except_for(&keep).await {
            error!(error = %err, "failed to drop stale assignments");
            return;
        }
        info!(
            courses = course_ids.len(),
            assignments = assignments.len(),
            "assignments refreshed"
        );
    }

    async fn check_submissions_deadline(&mut self, now: DateTime<Utc>) {
        if self.deadline_tier.is_empty() {
            let tier = &self.config.assignments;
            match self
                .cache
                .get_active_assignment_ids_ending_soon(
                    now,
                    seconds(tier.deadline_before_seconds),
                    seconds(tier.deadline_after_seconds),
                )
                .await
            {
                Ok(ids) => {
                    if !ids.is_empty() {
                        debug!(count = ids.len(), "tracking deadline assignments");
                    }
                    self.deadline_tier.set_queried_objects(ids, now);
                }
                Err(err) => {
                    error!(error = %err, "failed to list deadline assignments");
                }
            }
        }
        let triggered = self.deadline_tier.pop_triggered(now);
        if !triggered.is_empty() {
            self.update_submissions_for(&triggered).await;
        }
    }

    async fn check_submissions_active(&mut self, now: DateTime<Utc>) {
        if self.active_tier.is_empty() {
            let tier = &self.config.assignments;
            match self
                .cache
                .get_active_assignment_ids_not_ending_soon(
                    now,
                    seconds(tier.deadline_before_seconds),
                    seconds(tier.deadline_after_seconds),
                )
                .await
            {
                Ok(ids) => {
                    if !ids.is_empty() {
                        debug!(count = ids.len(), "tracking active assignments");
                    }
                    self.active_tier.set_queried_objects(ids, now);
                }
                Err(err) => {
                    error!(error = %err, "failed to list active assignments");
                }
            }
        }
        let triggered = self.active_tier.pop_triggered(now);
        if !triggered.is_empty() {
            self.update_submissions_for(&triggered).await;
        }
    }

    /// Fetch and store submissions changed since just after the newest one
    /// we already have, per triggered assignment.
    async fn update_submissions_for(&self, assignment_ids: &[AssignmentId]) {
        let last_times = match self.cache.get_last_submission_times(assignment_ids).await {
            Ok(times) => times,
            Err(err) => {
                error!(error = %err, "failed to read last submission times");
                return;
            }
        };
        for (assignment_id, last) in last_times {
            debug!(assignment = assignment_id, "refreshing submissions");
            let since = last.map(|t| t + TimeDelta::seconds(1));
            let submissions = match self.lms.fetch_submissions(assignment_id, since).await {
                Ok(submissions) => submissions,
                Err(err) => {
                    error!(assignment = assignment_id, error = %err, "failed to fetch submissions");
                    continue;
                }
            };
            let mut stored = 0usize;
            for chunk in submissions.chunks(self.config.submissions.db_batch_size.max(1)) {
                match self.cache.store_submissions(chunk).await {
                    Ok(()) => stored += chunk.len(),
                    Err(err) => {
                        error!(assignment = assignment_id, error = %err,
                            "failed to store submissions");
                        break;
                    }
                }
            }
            if stored > 0 {
                info!(assignment = assignment_id, submissions = stored, "submissions refreshed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::feed::{FeedError, LmsFeed};
    use async_trait::async_trait;
    use simscan_cache::{CacheError, CacheStore};
    use simscan_moodle::{Assignment, Course, Submission, SubmittedFile};
    use std::sync::Mutex;

    fn ts(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    /// In-memory mirror good enough for driving the loop.
    #[derive(Default)]
    struct MemoryCache {
        courses: Mutex<Vec<Course>>,
        assignments: Mutex<Vec<Assignment>>,
        submissions: Mutex<Vec<Submission>>,
        dropped_keeps: Mutex<Vec<HashMap<CourseId, Vec<AssignmentId>>>>,
    }

    #[async_trait]
    impl CacheStore for MemoryCache {
        async fn store_courses(
            &self,
            courses: &[Course],
            _now: DateTime<Utc>,
        ) -> Result<(), CacheError> {
            self.courses.lock().unwrap().extend_from_slice(courses);
            Ok(())
        }

        async fn store_assignments(&self, assignments: &[Assignment]) -> Result<(), CacheError> {
            self.assignments
                .lock()
                .unwrap()
                .extend_from_slice(assignments);
            Ok(())
        }

        async fn drop_assignments_except_for(
            &self,
            keep: &HashMap<CourseId, Vec<AssignmentId>>,
        ) -> Result<(), CacheError> {
            self.dropped_keeps.lock().unwrap().push(keep.clone());
            Ok(())
        }

        async fn store_submissions(&self, submissions: &[Submission]) -> Result<(), CacheError> {
            self.submissions
                .lock()
                .unwrap()
                .extend_from_slice(submissions);
            Ok(())
        }

        async fn get_open_course_ids(
            &self,
            _now: DateTime<Utc>,
            _with_dates_only: bool,
        ) -> Result<Vec<CourseId>, CacheError> {
            Ok(self.courses.lock().unwrap().iter().map(|c| c.id).collect())
        }

        async fn get_active_assignment_ids_ending_soon(
            &self,
            now: DateTime<Utc>,
            before: TimeDelta,
            after: TimeDelta,
        ) -> Result<Vec<AssignmentId>, CacheError> {
            Ok(self
                .assignments
                .lock()
                .unwrap()
                .iter()
                .filter(|a| {
                    a.closing
                        .is_some_and(|due| due >= now - before && due <= now + after)
                })
                .map(|a| a.id)
                .collect())
        }

        async fn get_active_assignment_ids_not_ending_soon(
            &self,
            now: DateTime<Utc>,
            before: TimeDelta,
            after: TimeDelta,
        ) -> Result<Vec<AssignmentId>, CacheError> {
            Ok(self
                .assignments
                .lock()
                .unwrap()
                .iter()
                .filter(|a| {
                    !a.closing
                        .is_some_and(|due| due >= now - before && due <= now + after)
                })
                .map(|a| a.id)
                .collect())
        }

        async fn get_last_submission_times(
            &self,
            assignment_ids: &[AssignmentId],
        ) -> Result<HashMap<AssignmentId, Option<DateTime<Utc>>>, CacheError> {
            let submissions = self.submissions.lock().unwrap();
            Ok(assignment_ids
                .iter()
                .map(|id| {
                    let last = submissions
                        .iter()
                        .filter(|s| s.assignment_id == *id)
                        .map(|s| s.updated)
                        .max();
                    (*id, last)
                })
                .collect())
        }
    }

    /// Canned LMS; records the `since` bounds submissions were asked for.
    #[derive(Default)]
    struct MemoryLms {
        courses: Vec<Course>,
        assignments: Vec<Assignment>,
        submissions: Vec<Submission>,
        submission_queries: Mutex<Vec<(AssignmentId, Option<DateTime<Utc>>)>>,
    }

    #[async_trait]
    impl LmsFeed for MemoryLms {
        async fn fetch_courses(
            &self,
            _in_progress_only: bool,
            _page_size: i64,
        ) -> Result<Vec<Course>, FeedError> {
            Ok(self.courses.clone())
        }

        async fn fetch_assignments(
            &self,
            course_ids: &[CourseId],
        ) -> Result<Vec<Assignment>, FeedError> {
            Ok(self
                .assignments
                .iter()
                .filter(|a| course_ids.contains(&a.course_id))
                .cloned()
                .collect())
        }

        async fn fetch_submissions(
            &self,
            assignment_id: AssignmentId,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<Submission>, FeedError> {
            self.submission_queries
                .lock()
                .unwrap()
                .push((assignment_id, since));
            Ok(self
                .submissions
                .iter()
                .filter(|s| s.assignment_id == assignment_id)
                .filter(|s| since.map_or(true, |bound| s.updated >= bound))
                .cloned()
                .collect())
        }
    }

    fn course(id: CourseId) -> Course {
        Course {
            id,
            shortname: format!("C{id}"),
            fullname: format!("Course {id}"),
            starts: None,
            ends: None,
            participants: Vec::new(),
        }
    }

    fn assignment(id: AssignmentId, course_id: CourseId, due: Option<DateTime<Utc>>) -> Assignment {
        Assignment {
            id,
            course_id,
            name: format!("A{id}"),
            opening: None,
            closing: due,
            cutoff: None,
        }
    }

    fn submission(id: i64, assignment_id: AssignmentId, updated: DateTime<Utc>) -> Submission {
        Submission {
            id,
            assignment_id,
            user_id: 1,
            status: Some("submitted".to_string()),
            updated,
            files: vec![SubmittedFile {
                submission_id: id,
                filename: "report.txt".to_string(),
                mimetype: "text/plain".to_string(),
                filesize: 12,
                url: format!("https://moodle.test/{id}"),
                uploaded: updated,
            }],
        }
    }

    fn config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        // Courses first fire one cadence after seeding; keep that short.
        config.courses.update_interval_seconds = 10;
        config.assignments.deadline_before_seconds = 3600;
        config.assignments.deadline_after_seconds = 1800;
        config.submissions.deadline_interval_seconds = 180;
        config.submissions.active_interval_seconds = 10800;
        config
    }

    #[tokio::test]
    async fn courses_then_assignments_flow_through_one_wakeup() {
        let now = ts(1_748_254_000);
        let cache = Arc::new(MemoryCache::default());
        let lms = Arc::new(MemoryLms {
            courses: vec![course(10)],
            assignments: vec![assignment(100, 10, None)],
            ..MemoryLms::default()
        });
        let mut monitor = Monitor::new(
            Arc::clone(&cache),
            Arc::clone(&lms),
            config(),
            Arc::new(Notify::new()),
        );

        // First wakeup seeds the courses sentinel; the tier fires only after
        // its cadence, so nothing is fetched yet and the assignment tier has
        // no open courses to track either.
        monitor.run_once(now).await;
        assert!(cache.courses.lock().unwrap().is_empty());

        // One cadence later the courses refresh runs, and the assignments
        // tier picks the freshly stored course up within the same wakeup.
        monitor.run_once(now + TimeDelta::seconds(10)).await;
        assert_eq!(cache.courses.lock().unwrap().len(), 1);
        assert_eq!(cache.assignments.lock().unwrap().len(), 1);
        let keeps = cache.dropped_keeps.lock().unwrap();
        assert_eq!(keeps.len(), 1);
        assert_eq!(keeps[0][&10], vec![100]);
    }

    #[tokio::test]
    async fn deadline_tier_fires_and_fetches_since_the_last_submission() {
        let now = ts(1_748_254_000);
        let due_soon = now + TimeDelta::minutes(30);
        let cache = Arc::new(MemoryCache::default());
        cache
            .assignments
            .lock()
            .unwrap()
            .push(assignment(100, 10, Some(due_soon)));
        cache
            .submissions
            .lock()
            .unwrap()
            .push(submission(1000, 100, now - TimeDelta::hours(2)));
        let lms = Arc::new(MemoryLms {
            submissions: vec![
                submission(1000, 100, now - TimeDelta::hours(2)),
                submission(1001, 100, now - TimeDelta::minutes(5)),
            ],
            ..MemoryLms::default()
        });
        let mut monitor = Monitor::new(
            Arc::clone(&cache),
            Arc::clone(&lms),
            config(),
            Arc::new(Notify::new()),
        );

        monitor.run_once(now).await;

        // Only the newer submission came back: the fetch was bounded by the
        // cached last-updated time plus one second.
        let queries = lms.submission_queries.lock().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].0, 100);
        assert_eq!(
            queries[0].1,
            Some(now - TimeDelta::hours(2) + TimeDelta::seconds(1))
        );
        let stored = cache.submissions.lock().unwrap();
        assert!(stored.iter().any(|s| s.id == 1001));
    }

    #[tokio::test]
    async fn deadline_and_active_tiers_do_not_overlap() {
        let now = ts(1_748_254_000);
        let cache = Arc::new(MemoryCache::default());
        cache.assignments.lock().unwrap().extend([
            assignment(100, 10, Some(now + TimeDelta::minutes(30))),
            assignment(101, 10, Some(now + TimeDelta::days(7))),
        ]);
        let lms = Arc::new(MemoryLms::default());
        let mut monitor = Monitor::new(
            Arc::clone(&cache),
            Arc::clone(&lms),
            config(),
            Arc::new(Notify::new()),
        );

        monitor.run_once(now).await;

        // 100 is near its deadline, 101 is not; each tier queried its own.
        let queries = lms.submission_queries.lock().unwrap();
        let queried: Vec<AssignmentId> = queries.iter().map(|(id, _)| *id).collect();
        assert_eq!(queried.len(), 2);
        assert!(queried.contains(&100));
        assert!(queried.contains(&101));

        // Within the deadline cadence nothing new fires for 100.
        drop(queries);
        monitor.run_once(now + TimeDelta::seconds(60)).await;
        assert_eq!(lms.submission_queries.lock().unwrap().len(), 2);

        // After the deadline cadence, 100 fires again; 101 stays quiet until
        // its much longer active cadence elapses.
        monitor.run_once(now + TimeDelta::seconds(180)).await;
        let queries = lms.submission_queries.lock().unwrap();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[2].0, 100);
    }

    #[tokio::test]
    async fn lms_failures_do_not_stop_the_loop() {
        struct FailingLms;

        #[async_trait]
        impl LmsFeed for FailingLms {
            async fn fetch_courses(
                &self,
                _in_progress_only: bool,
                _page_size: i64,
            ) -> Result<Vec<Course>, FeedError> {
                Err(FeedError("connection reset".to_string()))
            }
            async fn fetch_assignments(
                &self,
                _course_ids: &[CourseId],
            ) -> Result<Vec<Assignment>, FeedError> {
                Err(FeedError("connection reset".to_string()))
            }
            async fn fetch_submissions(
                &self,
                _assignment_id: AssignmentId,
                _since: Option<DateTime<Utc>>,
            ) -> Result<Vec<Submission>, FeedError> {
                Err(FeedError("connection reset".to_string()))
            }
        }

        let now = ts(1_748_254_000);
        let cache = Arc::new(MemoryCache::default());
        cache.assignments.lock().unwrap().push(assignment(100, 10, Some(now)));
        let mut monitor = Monitor::new(
            Arc::clone(&cache),
            Arc::new(FailingLms),
            config(),
            Arc::new(Notify::new()),
        );

        // Both wakeups complete despite every fetch failing.
        monitor.run_once(now).await;
        monitor.run_once(now + TimeDelta::seconds(15)).await;
        assert!(cache.courses.lock().unwrap().is_empty());
    }
}
