//! Normalized domain values produced by the client.
//!
//! Raw responses carry deeply optional plugin arrays and unset-as-zero
//! timestamps; those shapes are flattened here, at the client boundary, and
//! never propagate further into the system.

use chrono::{DateTime, Utc};

pub type UserId = i64;
pub type RoleId = i64;
pub type GroupId = i64;
pub type CourseId = i64;
pub type AssignmentId = i64;
pub type SubmissionId = i64;

/// A server-global user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
}

/// A role, referenced through (course, user) links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

/// A group inside one course.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}

/// A user's membership in one course, with the roles and groups scoped to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user: User,
    pub roles: Vec<Role>,
    pub groups: Vec<Group>,
}

/// One course, with the participants observed on the last refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    pub id: CourseId,
    pub shortname: String,
    pub fullname: String,
    pub starts: Option<DateTime<Utc>>,
    pub ends: Option<DateTime<Utc>>,
    pub participants: Vec<Participant>,
}

/// One assignment. When all three deadlines are present they are ordered
/// `opening <= closing <= cutoff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub id: AssignmentId,
    pub course_id: CourseId,
    pub name: String,
    pub opening: Option<DateTime<Utc>>,
    pub closing: Option<DateTime<Utc>>,
    pub cutoff: Option<DateTime<Utc>>,
}

/// One file attached to a submission. Identity is (submission, filename).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedFile {
    pub submission_id: SubmissionId,
    pub filename: String,
    pub mimetype: String,
    pub filesize: i64,
    pub url: String,
    pub uploaded: DateTime<Utc>,
}

/// One answer to an assignment, with its attached files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub id: SubmissionId,
    pub assignment_id: AssignmentId,
    pub user_id: UserId,
    pub status: Option<String>,
    pub updated: DateTime<Utc>,
    pub files: Vec<SubmittedFile>,
}
