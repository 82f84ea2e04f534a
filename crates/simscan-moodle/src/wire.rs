//! Raw response shapes for the web-service functions the client calls.
//!
//! These mirror the server's JSON, trimmed to the fields the service reads.
//! Moodle encodes "no value" timestamps as `0`; [`optional_timestamp`] maps
//! those to `None`.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Convert a Moodle timestamp into an optional instant (`<= 0` means unset).
pub fn optional_timestamp(ts: i64) -> Option<DateTime<Utc>> {
    (ts > 0).then(|| DateTime::from_timestamp(ts, 0)).flatten()
}

/// Warning entry most responses may carry alongside the payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WireWarning {
    #[serde(default)]
    pub warningcode: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// core_webservice_get_site_info
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SiteInfo {
    pub sitename: String,
    pub username: String,
    pub fullname: String,
    pub userid: i64,
    pub siteurl: String,
    #[serde(default)]
    pub release: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub functions: Vec<SiteFunction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteFunction {
    pub name: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// core_user_get_users_by_field
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct UserByField {
    pub id: i64,
    #[serde(default)]
    pub fullname: Option<String>,
    /// Offset from the server zone in hours, or `"99"` for "server default".
    #[serde(default)]
    pub timezone: Option<String>,
}

// ---------------------------------------------------------------------------
// core_course_get_enrolled_courses_by_timeline_classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PaginatedCourses {
    pub courses: Vec<WireCourse>,
    pub nextoffset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireCourse {
    pub id: i64,
    pub shortname: String,
    pub fullname: String,
    #[serde(default)]
    pub startdate: i64,
    #[serde(default)]
    pub enddate: i64,
    #[serde(default)]
    pub visible: Option<bool>,
}

// ---------------------------------------------------------------------------
// core_enrol_get_enrolled_users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct WireEnrolledUser {
    pub id: i64,
    pub fullname: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<WireRole>,
    #[serde(default)]
    pub groups: Vec<WireGroup>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireRole {
    pub roleid: i64,
    pub name: String,
    #[serde(default)]
    pub shortname: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireGroup {
    pub id: i64,
    pub name: String,
}

// ---------------------------------------------------------------------------
// mod_assign_get_assignments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentsResponse {
    pub courses: Vec<AssignmentsPerCourse>,
    #[serde(default)]
    pub warnings: Vec<WireWarning>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentsPerCourse {
    pub id: i64,
    pub shortname: String,
    pub fullname: String,
    #[serde(default)]
    pub assignments: Vec<WireAssignment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireAssignment {
    pub id: i64,
    pub course: i64,
    pub name: String,
    #[serde(default)]
    pub duedate: i64,
    #[serde(default)]
    pub allowsubmissionsfromdate: i64,
    #[serde(default)]
    pub cutoffdate: i64,
    #[serde(default)]
    pub timemodified: i64,
    #[serde(default)]
    pub nosubmissions: Option<bool>,
}

// ---------------------------------------------------------------------------
// mod_assign_get_submissions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionsResponse {
    pub assignments: Vec<AssignmentSubmissions>,
    #[serde(default)]
    pub warnings: Vec<WireWarning>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignmentSubmissions {
    pub assignmentid: i64,
    #[serde(default)]
    pub submissions: Vec<WireSubmission>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireSubmission {
    pub id: i64,
    pub userid: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub timemodified: i64,
    /// Variable-shape plugin payload; only the file plugin's
    /// `submission_files` area is of interest and it is flattened away
    /// before leaving the client.
    #[serde(default)]
    pub plugins: Vec<WireSubmissionPlugin>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireSubmissionPlugin {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub fileareas: Vec<WireFileArea>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireFileArea {
    pub area: String,
    #[serde(default)]
    pub files: Vec<WireFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireFile {
    pub filename: String,
    #[serde(default)]
    pub filesize: i64,
    pub fileurl: String,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub timemodified: i64,
}

// ---------------------------------------------------------------------------
// mod_assign_get_submission_status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionStatus {
    #[serde(default)]
    pub gradingsummary: Option<GradingSummary>,
    #[serde(default)]
    pub lastattempt: Option<LastAttempt>,
    #[serde(default)]
    pub feedback: Option<Feedback>,
    #[serde(default)]
    pub warnings: Vec<WireWarning>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GradingSummary {
    pub participantcount: i64,
    pub submissionssubmittedcount: i64,
    pub submissionsneedgradingcount: i64,
    #[serde(default)]
    pub submissiondraftscount: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastAttempt {
    #[serde(default)]
    pub submission: Option<WireSubmission>,
    #[serde(default)]
    pub graded: Option<bool>,
    #[serde(default)]
    pub cansubmit: Option<bool>,
    #[serde(default)]
    pub locked: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Feedback {
    #[serde(default)]
    pub gradefordisplay: Option<String>,
    #[serde(default)]
    pub gradeddate: i64,
}

// ---------------------------------------------------------------------------
// core_message_*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<WireConversation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireConversation {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: i64,
    #[serde(default)]
    pub unreadcount: Option<i64>,
    #[serde(default)]
    pub members: Vec<WireConversationMember>,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireConversationMember {
    pub id: i64,
    pub fullname: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationMessagesResponse {
    pub id: i64,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub id: i64,
    pub useridfrom: i64,
    pub text: String,
    pub timecreated: i64,
}

/// `core_message_send_instant_messages` returns a bare JSON array.
pub type SentMessages = Vec<SentMessage>;

#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    #[serde(default)]
    pub msgid: i64,
    #[serde(default)]
    pub clientmsgid: Option<String>,
    #[serde(default)]
    pub errormessage: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn zero_timestamp_means_unset() {
        assert!(optional_timestamp(0).is_none());
        assert!(optional_timestamp(-1).is_none());
        let ts = optional_timestamp(1_748_167_200).map(|t| t.timestamp());
        assert_eq!(ts, Some(1_748_167_200));
    }

    #[test]
    fn submission_plugins_tolerate_missing_fields() {
        let raw = serde_json::json!({
            "id": 1000,
            "userid": 1,
            "timemodified": 1748167200,
            "status": "submitted",
            "plugins": [
                {"type": "comments", "name": "Submission comments"},
                {"type": "file", "fileareas": [{"area": "submission_files"}]}
            ]
        });
        let sub: WireSubmission = serde_json::from_value(raw).unwrap();
        assert_eq!(sub.plugins.len(), 2);
        assert!(sub.plugins[0].fileareas.is_empty());
        assert!(sub.plugins[1].fileareas[0].files.is_empty());
    }
}
