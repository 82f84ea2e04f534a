//! The mirror repository.
//!
//! Every write is an upsert on the natural key; refreshes that must remove
//! stale children delete by "key not in the provided set", always scoped to
//! the parents being refreshed. Multi-row writes bind parallel `unnest`
//! arrays so a whole batch is one statement.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use simscan_moodle::{
    Assignment, AssignmentId, Course, CourseId, Group, Participant, Role, SubmittedFile,
    Submission, SubmissionId, User, UserId,
};
use tokio_postgres::types::ToSql;
use tokio_postgres::Transaction;

use crate::db::Database;
use crate::error::{CacheError, Result};

/// The cache operations the monitoring loop drives.
///
/// The concrete repository below is the production implementation; the trait
/// exists so the loop can be exercised against an in-memory store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Replace the canonical snapshot of the given courses: course, user,
    /// role and group rows are upserted, and participation (with its role
    /// and group links) is full-sync replaced for exactly these courses.
    /// Other courses are untouched. Users are never deleted.
    async fn store_courses(&self, courses: &[Course], now: DateTime<Utc>) -> Result<()>;

    async fn store_assignments(&self, assignments: &[Assignment]) -> Result<()>;

    /// Delete assignments of the courses in `keep` that are not listed for
    /// their course. Courses absent from `keep` are untouched.
    async fn drop_assignments_except_for(
        &self,
        keep: &HashMap<CourseId, Vec<AssignmentId>>,
    ) -> Result<()>;

    async fn store_submissions(&self, submissions: &[Submission]) -> Result<()>;

    /// Courses open at `now`: start unset or passed, end unset or ahead.
    /// With `with_dates_only`, unset bounds disqualify instead.
    async fn get_open_course_ids(
        &self,
        now: DateTime<Utc>,
        with_dates_only: bool,
    ) -> Result<Vec<CourseId>>;

    /// Assignments of open courses, already opened, whose due or cutoff time
    /// falls within `[now - before, now + after]` (inclusive).
    async fn get_active_assignment_ids_ending_soon(
        &self,
        now: DateTime<Utc>,
        before: TimeDelta,
        after: TimeDelta,
    ) -> Result<Vec<AssignmentId>>;

    /// Assignments of open courses, already opened, with neither due nor
    /// cutoff time inside the window. Deadline-free assignments always land
    /// here.
    async fn get_active_assignment_ids_not_ending_soon(
        &self,
        now: DateTime<Utc>,
        before: TimeDelta,
        after: TimeDelta,
    ) -> Result<Vec<AssignmentId>>;

    /// Latest submission `updated` per requested assignment; `None` when an
    /// assignment has no submissions yet.
    async fn get_last_submission_times(
        &self,
        assignment_ids: &[AssignmentId],
    ) -> Result<HashMap<AssignmentId, Option<DateTime<Utc>>>>;
}

/// Postgres-backed mirror repository.
pub struct PgCacheRepository {
    db: std::sync::Arc<Database>,
}

impl PgCacheRepository {
    pub fn new(db: std::sync::Arc<Database>) -> Self {
        Self { db }
    }

    /// Create the mirror tables if they are missing.
    pub async fn create_tables(&self) -> Result<()> {
        let session = self.db.session().await?;
        crate::schema::create_tables(&session).await
    }

    // -----------------------------------------------------------------------
    // Courses
    // -----------------------------------------------------------------------

    async fn upsert_courses(
        tx: &Transaction<'_>,
        courses: &[Course],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let ids: Vec<CourseId> = courses.iter().map(|c| c.id).collect();
        let shortnames: Vec<&str> = courses.iter().map(|c| c.shortname.as_str()).collect();
        let fullnames: Vec<&str> = courses.iter().map(|c| c.fullname.as_str()).collect();
        let starts: Vec<Option<DateTime<Utc>>> = courses.iter().map(|c| c.starts).collect();
        let ends: Vec<Option<DateTime<Utc>>> = courses.iter().map(|c| c.ends).collect();
        tx.execute(
            "INSERT INTO moodle_courses (id, shortname, fullname, starts, ends, last_seen)
             SELECT c.id, c.shortname, c.fullname, c.starts, c.ends, $6
             FROM unnest($1::bigint[], $2::text[], $3::text[], $4::timestamptz[], $5::timestamptz[])
                  AS c (id, shortname, fullname, starts, ends)
             ON CONFLICT (id) DO UPDATE SET
                 shortname = EXCLUDED.shortname,
                 fullname  = EXCLUDED.fullname,
                 starts    = EXCLUDED.starts,
                 ends      = EXCLUDED.ends,
                 last_seen = EXCLUDED.last_seen",
            &[&ids, &shortnames, &fullnames, &starts, &ends, &now],
        )
        .await?;
        Ok(())
    }

    async fn upsert_users(
        tx: &Transaction<'_>,
        courses: &[Course],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut seen: HashMap<UserId, &User> = HashMap::new();
        for participant in courses.iter().flat_map(|c| &c.participants) {
            seen.insert(participant.user.id, &participant.user);
        }
        if seen.is_empty() {
            return Ok(());
        }
        let ids: Vec<UserId> = seen.keys().copied().collect();
        let names: Vec<&str> = ids.iter().map(|id| seen[id].name.as_str()).collect();
        let emails: Vec<Option<&str>> = ids.iter().map(|id| seen[id].email.as_deref()).collect();
        tx.execute(
            "INSERT INTO moodle_users (id, fullname, email, last_seen)
             SELECT u.id, u.fullname, u.email, $4
             FROM unnest($1::bigint[], $2::text[], $3::text[]) AS u (id, fullname, email)
             ON CONFLICT (id) DO UPDATE SET
                 fullname  = EXCLUDED.fullname,
                 email     = EXCLUDED.email,
                 last_seen = EXCLUDED.last_seen",
            &[&ids, &names, &emails, &now],
        )
        .await?;
        Ok(())
    }

    async fn upsert_roles(tx: &Transaction<'_>, courses: &[Course]) -> Result<()> {
        let mut seen: HashMap<i64, &Role> = HashMap::new();
        for role in courses
            .iter()
            .flat_map(|c| &c.participants)
            .flat_map(|p| &p.roles)
        {
            seen.insert(role.id, role);
        }
        if seen.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = seen.keys().copied().collect();
        let names: Vec<&str> = ids.iter().map(|id| seen[id].name.as_str()).collect();
        tx.execute(
            "INSERT INTO moodle_roles (id, name)
             SELECT * FROM unnest($1::bigint[], $2::text[])
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
            &[&ids, &names],
        )
        .await?;
        Ok(())
    }

    /// Upsert groups seen in these courses and delete groups linked to them
    /// that the snapshot no longer mentions (cascade clears the links).
    async fn sync_groups(
        tx: &Transaction<'_>,
        course_ids: &[CourseId],
        courses: &[Course],
    ) -> Result<()> {
        let mut seen: HashMap<i64, (CourseId, &Group)> = HashMap::new();
        for course in courses {
            for group in course.participants.iter().flat_map(|p| &p.groups) {
                seen.insert(group.id, (course.id, group));
            }
        }
        let ids: Vec<i64> = seen.keys().copied().collect();
        let owners: Vec<CourseId> = ids.iter().map(|id| seen[id].0).collect();
        let names: Vec<&str> = ids.iter().map(|id| seen[id].1.name.as_str()).collect();
        if !ids.is_empty() {
            tx.execute(
                "INSERT INTO moodle_groups (id, course_id, name)
                 SELECT * FROM unnest($1::bigint[], $2::bigint[], $3::text[])
                 ON CONFLICT (id) DO UPDATE SET
                     course_id = EXCLUDED.course_id,
                     name      = EXCLUDED.name",
                &[&ids, &owners, &names],
            )
            .await?;
        }
        tx.execute(
            "DELETE FROM moodle_groups
             WHERE course_id = ANY($1::bigint[])
               AND (course_id, id) NOT IN
                   (SELECT k.course_id, k.id
                    FROM unnest($2::bigint[], $3::bigint[]) AS k (course_id, id))",
            &[&course_ids, &owners, &ids],
        )
        .await?;
        Ok(())
    }

    /// Full-sync participation and its role/group links for these courses.
    async fn sync_participants(
        tx: &Transaction<'_>,
        course_ids: &[CourseId],
        courses: &[Course],
    ) -> Result<()> {
        let pair_set: HashSet<(CourseId, UserId)> = courses
            .iter()
            .flat_map(|c| c.participants.iter().map(move |p| (c.id, p.user.id)))
            .collect();
        let pair_courses: Vec<CourseId> = pair_set.iter().map(|p| p.0).collect();
        let pair_users: Vec<UserId> = pair_set.iter().map(|p| p.1).collect();
        if !pair_set.is_empty() {
            tx.execute(
                "INSERT INTO moodle_participants (course_id, user_id)
                 SELECT * FROM unnest($1::bigint[], $2::bigint[])
                 ON CONFLICT (course_id, user_id) DO NOTHING",
                &[&pair_courses, &pair_users],
            )
            .await?;
        }
        tx.execute(
            "DELETE FROM moodle_participants
             WHERE course_id = ANY($1::bigint[])
               AND (course_id, user_id) NOT IN
                   (SELECT k.course_id, k.user_id
                    FROM unnest($2::bigint[], $3::bigint[]) AS k (course_id, user_id))",
            &[&course_ids, &pair_courses, &pair_users],
        )
        .await?;

        let link_rows = |links: &HashSet<(CourseId, UserId, i64)>| {
            let c: Vec<CourseId> = links.iter().map(|l| l.0).collect();
            let u: Vec<UserId> = links.iter().map(|l| l.1).collect();
            let x: Vec<i64> = links.iter().map(|l| l.2).collect();
            (c, u, x)
        };

        let role_links: HashSet<(CourseId, UserId, i64)> = courses
            .iter()
            .flat_map(|c| {
                c.participants
                    .iter()
                    .flat_map(move |p| p.roles.iter().map(move |r| (c.id, p.user.id, r.id)))
            })
            .collect();
        let (link_courses, link_users, link_roles) = link_rows(&role_links);
        if !role_links.is_empty() {
            tx.execute(
                "INSERT INTO moodle_participant_roles (course_id, user_id, role_id)
                 SELECT * FROM unnest($1::bigint[], $2::bigint[], $3::bigint[])
                 ON CONFLICT (course_id, user_id, role_id) DO NOTHING",
                &[&link_courses, &link_users, &link_roles],
            )
            .await?;
        }
        tx.execute(
            "DELETE FROM moodle_participant_roles
             WHERE course_id = ANY($1::bigint[])
               AND (course_id, user_id, role_id) NOT IN
                   (SELECT k.course_id, k.user_id, k.role_id
                    FROM unnest($2::bigint[], $3::bigint[], $4::bigint[])
                         AS k (course_id, user_id, role_id))",
            &[&course_ids, &link_courses, &link_users, &link_roles],
        )
        .await?;

        let group_links: HashSet<(CourseId, UserId, i64)> = courses
            .iter()
            .flat_map(|c| {
                c.participants
                    .iter()
                    .flat_map(move |p| p.groups.iter().map(move |g| (c.id, p.user.id, g.id)))
            })
            .collect();
        let (link_courses, link_users, link_groups) = link_rows(&group_links);
        if !group_links.is_empty() {
            tx.execute(
                "INSERT INTO moodle_participant_groups (course_id, user_id, group_id)
                 SELECT * FROM unnest($1::bigint[], $2::bigint[], $3::bigint[])
                 ON CONFLICT (course_id, user_id, group_id) DO NOTHING",
                &[&link_courses, &link_users, &link_groups],
            )
            .await?;
        }
        tx.execute(
            "DELETE FROM moodle_participant_groups
             WHERE course_id = ANY($1::bigint[])
               AND (course_id, user_id, group_id) NOT IN
                   (SELECT k.course_id, k.user_id, k.group_id
                    FROM unnest($2::bigint[], $3::bigint[], $4::bigint[])
                         AS k (course_id, user_id, group_id))",
            &[&course_ids, &link_courses, &link_users, &link_groups],
        )
        .await?;
        Ok(())
    }

    /// Delete the given courses; participation, groups, assignments and
    /// everything below them go with the cascade.
    pub async fn drop_courses(&self, course_ids: &[CourseId]) -> Result<()> {
        if course_ids.is_empty() {
            return Ok(());
        }
        let session = self.db.session().await?;
        session
            .execute(
                "DELETE FROM moodle_courses WHERE id = ANY($1::bigint[])",
                &[&course_ids],
            )
            .await?;
        Ok(())
    }

    /// Load back full course values, participants included.
    pub async fn load_courses(&self, course_ids: &[CourseId]) -> Result<Vec<Course>> {
        if course_ids.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.db.session().await?;

        type Assembly = HashMap<CourseId, HashMap<UserId, Participant>>;
        let mut participants: Assembly = HashMap::new();
        let rows = session
            .query(
                "SELECT p.course_id, u.id, u.fullname, u.email
                 FROM moodle_participants p
                 JOIN moodle_users u ON u.id = p.user_id
                 WHERE p.course_id = ANY($1::bigint[])",
                &[&course_ids],
            )
            .await?;
        for row in rows {
            let course_id: CourseId = row.get(0);
            let user = User {
                id: row.get(1),
                name: row.get(2),
                email: row.get(3),
            };
            participants.entry(course_id).or_default().insert(
                user.id,
                Participant {
                    user,
                    roles: Vec::new(),
                    groups: Vec::new(),
                },
            );
        }
        let rows = session
            .query(
                "SELECT l.course_id, l.user_id, r.id, r.name
                 FROM moodle_participant_roles l
                 JOIN moodle_roles r ON r.id = l.role_id
                 WHERE l.course_id = ANY($1::bigint[])",
                &[&course_ids],
            )
            .await?;
        for row in rows {
            let course_id: CourseId = row.get(0);
            let user_id: UserId = row.get(1);
            if let Some(p) = participants
                .get_mut(&course_id)
                .and_then(|m| m.get_mut(&user_id))
            {
                p.roles.push(Role {
                    id: row.get(2),
                    name: row.get(3),
                });
            }
        }
        let rows = session
            .query(
                "SELECT l.course_id, l.user_id, g.id, g.name
                 FROM moodle_participant_groups l
                 JOIN moodle_groups g ON g.id = l.group_id
                 WHERE l.course_id = ANY($1::bigint[])",
                &[&course_ids],
            )
            .await?;
        for row in rows {
            let course_id: CourseId = row.get(0);
            let user_id: UserId = row.get(1);
            if let Some(p) = participants
                .get_mut(&course_id)
                .and_then(|m| m.get_mut(&user_id))
            {
                p.groups.push(Group {
                    id: row.get(2),
                    name: row.get(3),
                });
            }
        }

        let rows = session
            .query(
                "SELECT id, shortname, fullname, starts, ends
                 FROM moodle_courses WHERE id = ANY($1::bigint[])",
                &[&course_ids],
            )
            .await?;
        let mut courses = Vec::with_capacity(rows.len());
        for row in rows {
            let id: CourseId = row.get(0);
            let mut members: Vec<Participant> = participants
                .remove(&id)
                .map(|m| m.into_values().collect())
                .unwrap_or_default();
            members.sort_by_key(|p| p.user.id);
            courses.push(Course {
                id,
                shortname: row.get(1),
                fullname: row.get(2),
                starts: row.get(3),
                ends: row.get(4),
                participants: members,
            });
        }
        Ok(courses)
    }

    // -----------------------------------------------------------------------
    // Assignments
    // -----------------------------------------------------------------------

    /// Load back assignments by id.
    pub async fn load_assignments(
        &self,
        assignment_ids: &[AssignmentId],
    ) -> Result<Vec<Assignment>> {
        if assignment_ids.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.db.session().await?;
        let rows = session
            .query(
                "SELECT id, course_id, name, opening, closing, cutoff
                 FROM moodle_assignments WHERE id = ANY($1::bigint[])",
                &[&assignment_ids],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| Assignment {
                id: row.get(0),
                course_id: row.get(1),
                name: row.get(2),
                opening: row.get(3),
                closing: row.get(4),
                cutoff: row.get(5),
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Submissions
    // -----------------------------------------------------------------------

    /// Load back submissions of one assignment inside the given bounds.
    pub async fn load_submissions(
        &self,
        assignment_id: AssignmentId,
        before: Option<DateTime<Utc>>,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Submission>> {
        let session = self.db.session().await?;
        let rows = session
            .query(
                "SELECT id, user_id, status, updated
                 FROM moodle_submissions
                 WHERE assignment_id = $1
                   AND ($2::timestamptz IS NULL OR updated <= $2)
                   AND ($3::timestamptz IS NULL OR updated >= $3)",
                &[&assignment_id, &before, &after],
            )
            .await?;
        let mut submissions: HashMap<SubmissionId, Submission> = rows
            .into_iter()
            .map(|row| {
                let id: SubmissionId = row.get(0);
                (
                    id,
                    Submission {
                        id,
                        assignment_id,
                        user_id: row.get(1),
                        status: row.get(2),
                        updated: row.get(3),
                        files: Vec::new(),
                    },
                )
            })
            .collect();
        if submissions.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<SubmissionId> = submissions.keys().copied().collect();
        let rows = session
            .query(
                "SELECT submission_id, filename, url, filesize, mimetype, uploaded
                 FROM moodle_submitted_files
                 WHERE assignment_id = $1 AND submission_id = ANY($2::bigint[])",
                &[&assignment_id, &ids],
            )
            .await?;
        for row in rows {
            let submission_id: SubmissionId = row.get(0);
            if let Some(submission) = submissions.get_mut(&submission_id) {
                submission.files.push(SubmittedFile {
                    submission_id,
                    filename: row.get(1),
                    url: row.get(2),
                    filesize: row.get(3),
                    mimetype: row.get(4),
                    uploaded: row.get(5),
                });
            }
        }
        let mut out: Vec<Submission> = submissions.into_values().collect();
        out.sort_by_key(|s| s.id);
        Ok(out)
    }

    /// Delete submissions of the given assignments inside the given bounds.
    ///
    /// # Errors
    ///
    /// [`CacheError::UnscopedDelete`] when called with no assignment ids and
    /// no time bound; that call would delete every submission in the cache.
    pub async fn drop_submissions(
        &self,
        assignment_ids: &[AssignmentId],
        before: Option<DateTime<Utc>>,
        after: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if assignment_ids.is_empty() && before.is_none() && after.is_none() {
            return Err(CacheError::UnscopedDelete);
        }
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if !assignment_ids.is_empty() {
            params.push(&assignment_ids);
            clauses.push(format!("assignment_id = ANY(${}::bigint[])", params.len()));
        }
        if let Some(bound) = &before {
            params.push(bound);
            clauses.push(format!("updated <= ${}", params.len()));
        }
        if let Some(bound) = &after {
            params.push(bound);
            clauses.push(format!("updated >= ${}", params.len()));
        }
        let sql = format!(
            "DELETE FROM moodle_submissions WHERE {}",
            clauses.join(" AND ")
        );
        let session = self.db.session().await?;
        session.execute(sql.as_str(), &params).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for PgCacheRepository {
    async fn store_courses(&self, courses: &[Course], now: DateTime<Utc>) -> Result<()> {
        if courses.is_empty() {
            return Ok(());
        }
        let course_ids: Vec<CourseId> = courses.iter().map(|c| c.id).collect();
        let mut session = self.db.session().await?;
        let tx = session.transaction().await?;
        Self::upsert_courses(&tx, courses, now).await?;
        Self::upsert_users(&tx, courses, now).await?;
        Self::upsert_roles(&tx, courses).await?;
        Self::sync_groups(&tx, &course_ids, courses).await?;
        Self::sync_participants(&tx, &course_ids, courses).await?;
        tx.commit().await?;
        tracing::debug!(courses = courses.len(), "course snapshot stored");
        Ok(())
    }

    async fn store_assignments(&self, assignments: &[Assignment]) -> Result<()> {
        if assignments.is_empty() {
            return Ok(());
        }
        let ids: Vec<AssignmentId> = assignments.iter().map(|a| a.id).collect();
        let course_ids: Vec<CourseId> = assignments.iter().map(|a| a.course_id).collect();
        let names: Vec<&str> = assignments.iter().map(|a| a.name.as_str()).collect();
        let openings: Vec<Option<DateTime<Utc>>> = assignments.iter().map(|a| a.opening).collect();
        let closings: Vec<Option<DateTime<Utc>>> = assignments.iter().map(|a| a.closing).collect();
        let cutoffs: Vec<Option<DateTime<Utc>>> = assignments.iter().map(|a| a.cutoff).collect();
        let session = self.db.session().await?;
        session
            .execute(
                "INSERT INTO moodle_assignments (id, course_id, name, opening, closing, cutoff)
                 SELECT * FROM unnest($1::bigint[], $2::bigint[], $3::text[],
                                      $4::timestamptz[], $5::timestamptz[], $6::timestamptz[])
                 ON CONFLICT (id) DO UPDATE SET
                     course_id = EXCLUDED.course_id,
                     name      = EXCLUDED.name,
                     opening   = EXCLUDED.opening,
                     closing   = EXCLUDED.closing,
                     cutoff    = EXCLUDED.cutoff",
                &[&ids, &course_ids, &names, &openings, &closings, &cutoffs],
            )
            .await?;
        Ok(())
    }

    async fn drop_assignments_except_for(
        &self,
        keep: &HashMap<CourseId, Vec<AssignmentId>>,
    ) -> Result<()> {
        if keep.is_empty() {
            return Ok(());
        }
        let affected: Vec<CourseId> = keep.keys().copied().collect();
        let mut pair_courses: Vec<CourseId> = Vec::new();
        let mut pair_assignments: Vec<AssignmentId> = Vec::new();
        for (course_id, assignment_ids) in keep {
            for assignment_id in assignment_ids {
                pair_courses.push(*course_id);
                pair_assignments.push(*assignment_id);
            }
        }
        let session = self.db.session().await?;
        session
            .execute(
                "DELETE FROM moodle_assignments
                 WHERE course_id = ANY($1::bigint[])
                   AND (course_id, id) NOT IN
                       (SELECT k.course_id, k.id
                        FROM unnest($2::bigint[], $3::bigint[]) AS k (course_id, id))",
                &[&affected, &pair_courses, &pair_assignments],
            )
            .await?;
        Ok(())
    }

    async fn store_submissions(&self, submissions: &[Submission]) -> Result<()> {
        if submissions.is_empty() {
            return Ok(());
        }
        let ids: Vec<SubmissionId> = submissions.iter().map(|s| s.id).collect();
        let assignment_ids: Vec<AssignmentId> =
            submissions.iter().map(|s| s.assignment_id).collect();
        let user_ids: Vec<UserId> = submissions.iter().map(|s| s.user_id).collect();
        let statuses: Vec<Option<&str>> = submissions.iter().map(|s| s.status.as_deref()).collect();
        let updated: Vec<DateTime<Utc>> = submissions.iter().map(|s| s.updated).collect();

        let mut session = self.db.session().await?;
        let tx = session.transaction().await?;
        tx.execute(
            "INSERT INTO moodle_submissions (id, assignment_id, user_id, status, updated)
             SELECT * FROM unnest($1::bigint[], $2::bigint[], $3::bigint[], $4::text[], $5::timestamptz[])
             ON CONFLICT (id) DO UPDATE SET
                 status  = EXCLUDED.status,
                 updated = EXCLUDED.updated",
            &[&ids, &assignment_ids, &user_ids, &statuses, &updated],
        )
        .await?;

        let files: Vec<(&Submission, &SubmittedFile)> = submissions
            .iter()
            .flat_map(|s| s.files.iter().map(move |f| (s, f)))
            .collect();
        if !files.is_empty() {
            let submission_ids: Vec<SubmissionId> = files.iter().map(|(s, _)| s.id).collect();
            let filenames: Vec<&str> = files.iter().map(|(_, f)| f.filename.as_str()).collect();
            let assignment_ids: Vec<AssignmentId> =
                files.iter().map(|(s, _)| s.assignment_id).collect();
            let user_ids: Vec<UserId> = files.iter().map(|(s, _)| s.user_id).collect();
            let sizes: Vec<i64> = files.iter().map(|(_, f)| f.filesize).collect();
            let mimetypes: Vec<&str> = files.iter().map(|(_, f)| f.mimetype.as_str()).collect();
            let urls: Vec<&str> = files.iter().map(|(_, f)| f.url.as_str()).collect();
            let uploaded: Vec<DateTime<Utc>> = files.iter().map(|(_, f)| f.uploaded).collect();
            tx.execute(
                "INSERT INTO moodle_submitted_files
                     (submission_id, filename, assignment_id, user_id, filesize, mimetype, url, uploaded)
                 SELECT * FROM unnest($1::bigint[], $2::text[], $3::bigint[], $4::bigint[],
                                      $5::bigint[], $6::text[], $7::text[], $8::timestamptz[])
                 ON CONFLICT (submission_id, filename) DO UPDATE SET
                     assignment_id = EXCLUDED.assignment_id,
                     user_id       = EXCLUDED.user_id,
                     filesize      = EXCLUDED.filesize,
                     mimetype      = EXCLUDED.mimetype,
                     url           = EXCLUDED.url,
                     uploaded      = EXCLUDED.uploaded",
                &[
                    &submission_ids,
                    &filenames,
                    &assignment_ids,
                    &user_ids,
                    &sizes,
                    &mimetypes,
                    &urls,
                    &uploaded,
                ],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_open_course_ids(
        &self,
        now: DateTime<Utc>,
        with_dates_only: bool,
    ) -> Result<Vec<CourseId>> {
        let sql = if with_dates_only {
            "SELECT id FROM moodle_courses
             WHERE starts IS NOT NULL AND starts <= $1
               AND ends   IS NOT NULL AND ends   >= $1"
        } else {
            "SELECT id FROM moodle_courses
             WHERE (starts IS NULL OR starts <= $1)
               AND (ends   IS NULL OR ends   >= $1)"
        };
        let session = self.db.session().await?;
        let rows = session.query(sql, &[&now]).await?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn get_active_assignment_ids_ending_soon(
        &self,
        now: DateTime<Utc>,
        before: TimeDelta,
        after: TimeDelta,
    ) -> Result<Vec<AssignmentId>> {
        let window_start = now - before;
        let window_end = now + after;
        let session = self.db.session().await?;
        let rows = session
            .query(
                "SELECT a.id
                 FROM moodle_assignments a
                 JOIN moodle_courses c ON c.id = a.course_id
                      AND (c.starts IS NULL OR c.starts <= $1)
                      AND (c.ends   IS NULL OR c.ends   >= $1)
                 WHERE (a.opening IS NULL OR a.opening <= $1)
                   AND ((a.closing IS NOT NULL AND a.closing BETWEEN $2 AND $3)
                     OR (a.cutoff  IS NOT NULL AND a.cutoff  BETWEEN $2 AND $3))",
                &[&now, &window_start, &window_end],
            )
            .await?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn get_active_assignment_ids_not_ending_soon(
        &self,
        now: DateTime<Utc>,
        before: TimeDelta,
        after: TimeDelta,
    ) -> Result<Vec<AssignmentId>> {
        let window_start = now - before;
        let window_end = now + after;
        let session = self.db.session().await?;
        let rows = session
            .query(
                "SELECT a.id
                 FROM moodle_assignments a
                 JOIN moodle_courses c ON c.id = a.course_id
                      AND (c.starts IS NULL OR c.starts <= $1)
                      AND (c.ends   IS NULL OR c.ends   >= $1)
                 WHERE (a.opening IS NULL OR a.opening <= $1)
                   AND (a.closing IS NULL OR a.closing < $2 OR a.closing > $3)
                   AND (a.cutoff  IS NULL OR a.cutoff  < $2 OR a.cutoff  > $3)",
                &[&now, &window_start, &window_end],
            )
            .await?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn get_last_submission_times(
        &self,
        assignment_ids: &[AssignmentId],
    ) -> Result<HashMap<AssignmentId, Option<DateTime<Utc>>>> {
        let mut times: HashMap<AssignmentId, Option<DateTime<Utc>>> =
            assignment_ids.iter().map(|id| (*id, None)).collect();
        if times.is_empty() {
            return Ok(times);
        }
        let session = self.db.session().await?;
        let rows = session
            .query(
                "SELECT assignment_id, MAX(updated)
                 FROM moodle_submissions
                 WHERE assignment_id = ANY($1::bigint[])
                 GROUP BY assignment_id",
                &[&assignment_ids],
            )
            .await?;
        for row in rows {
            times.insert(row.get(0), row.get(1));
        }
        Ok(times)
    }
}
