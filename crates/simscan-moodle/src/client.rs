//! The Moodle client: login, the REST calling convention, pagination
//! streams and file downloads.

use std::sync::RwLock;

use async_stream::try_stream;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use futures::{Stream, TryStreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::error::{MoodleError, Result};
use crate::model::{
    Assignment, AssignmentId, Course, CourseId, Group, Participant, Role, SubmittedFile,
    Submission, User, UserId,
};
use crate::params::{ParamValue, Params};
use crate::wire;

/// Where and as whom to log in.
#[derive(Debug, Clone)]
pub struct MoodleCredentials {
    /// Base server address, e.g. `https://moodle.example.edu/`.
    pub base_url: Url,
    pub username: String,
    pub password: String,
    /// Web-service name the token is issued for; `moodle_mobile_app` unless
    /// the site defines its own.
    pub service: String,
}

/// Client for one Moodle server.
///
/// Holds a shared HTTP connection pool, the current token, and the server's
/// configured time zone (discovered after login, UTC until then). All methods
/// take `&self`; the client is meant to be shared behind an `Arc`.
pub struct MoodleClient {
    http: reqwest::Client,
    creds: MoodleCredentials,
    token: RwLock<String>,
    timezone: RwLock<FixedOffset>,
}

impl MoodleClient {
    /// Build a client. No network traffic happens until [`login`](Self::login)
    /// or the first call.
    pub fn new(mut creds: MoodleCredentials) -> Result<Self> {
        // Url::join treats a base without a trailing slash as a file path.
        if !creds.base_url.path().ends_with('/') {
            let path = format!("{}/", creds.base_url.path());
            creds.base_url.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            creds,
            token: RwLock::new(String::new()),
            timezone: RwLock::new(Utc.fix()),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.creds
            .base_url
            .join(path)
            .map_err(|err| MoodleError::Protocol {
                url: self.creds.base_url.to_string(),
                message: format!("cannot build endpoint url for {path:?}: {err}"),
            })
    }

    fn current_token(&self) -> String {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The server time zone used for wire timestamps.
    pub fn timezone(&self) -> FixedOffset {
        *self.timezone.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Obtain a token with the configured credentials, then discover the
    /// account's time zone.
    ///
    /// Moodle offers no logout; the token simply stays valid until the
    /// server expires it, at which point calls fail with `invalidtoken` and
    /// the client logs in again transparently.
    pub async fn login(&self) -> Result<()> {
        let url = self.endpoint("login/token.php")?;
        let response = self
            .http
            .get(url.clone())
            .query(&[
                ("username", self.creds.username.as_str()),
                ("password", self.creds.password.as_str()),
                ("service", self.creds.service.as_str()),
            ])
            .send()
            .await?;
        let body = Self::json_body(response).await?;
        if body.get("exception").is_some() {
            return Err(MoodleError::from_error_response(url.as_str(), &body));
        }
        let token = body
            .get("token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| MoodleError::Protocol {
                url: url.to_string(),
                message: "key \"token\" not found in the response".to_string(),
            })?;
        *self.token.write().unwrap_or_else(|e| e.into_inner()) = token.to_string();
        tracing::info!(username = %self.creds.username, "logged in to moodle");
        self.refresh_timezone().await;
        Ok(())
    }

    /// Discover the time zone configured for our account. Best-effort: a
    /// failure leaves the previous zone in place.
    async fn refresh_timezone(&self) {
        let params = Params::new()
            .with("field", "username")
            .with("values", vec![self.creds.username.clone()]);
        let users: Result<Vec<wire::UserByField>> = self
            .call_with_retry("core_user_get_users_by_field", params, false)
            .await
            .and_then(|v| Self::decode("core_user_get_users_by_field", v));
        match users {
            Ok(users) => {
                // "99" means "use the server default", which we model as the
                // zone already in effect.
                if let Some(tz) = users
                    .first()
                    .and_then(|u| u.timezone.as_deref())
                    .filter(|tz| *tz != "99")
                {
                    if let Some(offset) = tz
                        .parse::<f64>()
                        .ok()
                        .and_then(|hours| FixedOffset::east_opt((hours * 3600.0) as i32))
                    {
                        *self.timezone.write().unwrap_or_else(|e| e.into_inner()) = offset;
                        tracing::debug!(%tz, "server time zone updated");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not discover the server time zone");
            }
        }
    }

    async fn json_body(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let url = response.url().to_string();
        if status.as_u16() >= 400 {
            return Err(MoodleError::Http {
                status: status.as_u16(),
                url,
            });
        }
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|_| MoodleError::Protocol {
            url,
            message: format!("response is not JSON: {}", text.chars().take(200).collect::<String>()),
        })
    }

    /// Call a web-service function and return the decoded JSON payload.
    ///
    /// A response carrying errorcode `invalidtoken` triggers one re-login
    /// followed by one retry of the original call; every other error
    /// propagates immediately.
    pub async fn call(&self, wsfunction: &str, params: Params) -> Result<Value> {
        self.call_with_retry(wsfunction, params, true).await
    }

    async fn call_with_retry(
        &self,
        wsfunction: &str,
        params: Params,
        allow_relogin: bool,
    ) -> Result<Value> {
        let url = self.endpoint("webservice/rest/server.php")?;
        let attempts = if allow_relogin { 2 } else { 1 };
        for attempt in 0..attempts {
            let mut query = params.encode(self.timezone());
            query.push(("wstoken".to_string(), self.current_token()));
            query.push(("wsfunction".to_string(), wsfunction.to_string()));
            query.push(("moodlewsrestformat".to_string(), "json".to_string()));
            tracing::debug!(function = wsfunction, attempt, "calling web service");

            let response = self.http.get(url.clone()).query(&query).send().await?;
            let body = Self::json_body(response).await?;
            if body.as_object().is_some_and(|o| o.contains_key("exception")) {
                let err = MoodleError::from_error_response(url.as_str(), &body);
                if err.is_invalid_token() && attempt + 1 < attempts {
                    tracing::info!(function = wsfunction, "token rejected, logging in again");
                    // Boxed: login itself issues a (non-retrying) call while
                    // refreshing the time zone, which would otherwise make
                    // this future infinitely sized.
                    Box::pin(self.login()).await?;
                    continue;
                }
                return Err(err);
            }
            return Ok(body);
        }
        Err(MoodleError::Protocol {
            url: url.to_string(),
            message: "retry attempts exhausted".to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(wsfunction: &str, value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(|source| MoodleError::Decode {
            url: wsfunction.to_string(),
            source,
        })
    }

    /// Call a web-service function and decode the payload into `T`.
    pub async fn call_as<T: DeserializeOwned>(&self, wsfunction: &str, params: Params) -> Result<T> {
        let value = self.call(wsfunction, params).await?;
        Self::decode(wsfunction, value)
    }

    // -----------------------------------------------------------------------
    // Typed endpoints
    // -----------------------------------------------------------------------

    /// `core_webservice_get_site_info`.
    pub async fn site_info(&self) -> Result<wire::SiteInfo> {
        self.call_as("core_webservice_get_site_info", Params::new()).await
    }

    /// One page of `core_course_get_enrolled_courses_by_timeline_classification`.
    pub async fn enrolled_courses_page(
        &self,
        classification: &str,
        offset: i64,
        limit: i64,
    ) -> Result<wire::PaginatedCourses> {
        let params = Params::new()
            .with("classification", classification)
            .with("offset", offset)
            .with("limit", limit);
        self.call_as(
            "core_course_get_enrolled_courses_by_timeline_classification",
            params,
        )
        .await
    }

    /// One page of `core_enrol_get_enrolled_users`.
    pub async fn enrolled_users_page(
        &self,
        course_id: CourseId,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<wire::WireEnrolledUser>> {
        let option = |name: &str, value: ParamValue| {
            ParamValue::Map(vec![
                ("name".to_string(), name.into()),
                ("value".to_string(), value),
            ])
        };
        let params = Params::new().with("courseid", course_id).with(
            "options",
            ParamValue::Seq(vec![
                option("userfields", "id, fullname, email, roles, groups".into()),
                option("limitfrom", offset.into()),
                option("limitnumber", limit.into()),
            ]),
        );
        self.call_as("core_enrol_get_enrolled_users", params).await
    }

    /// `mod_assign_get_assignments` for a set of courses.
    pub async fn assignments(&self, course_ids: &[CourseId]) -> Result<wire::AssignmentsResponse> {
        let params = Params::new()
            .with("courseids", course_ids.to_vec())
            .with("includenotenrolledcourses", false);
        self.call_as("mod_assign_get_assignments", params).await
    }

    /// `mod_assign_get_submissions`, optionally restricted to submissions
    /// changed at or after `since`.
    pub async fn submissions(
        &self,
        assignment_ids: &[AssignmentId],
        since: Option<DateTime<Utc>>,
    ) -> Result<wire::SubmissionsResponse> {
        let params = Params::new()
            .with("assignmentids", assignment_ids.to_vec())
            .with("since", since.map_or(ParamValue::Int(0), ParamValue::Time));
        self.call_as("mod_assign_get_submissions", params).await
    }

    /// `mod_assign_get_submission_status` for one user of one assignment.
    pub async fn submission_status(
        &self,
        assignment_id: AssignmentId,
        user_id: UserId,
    ) -> Result<wire::SubmissionStatus> {
        let params = Params::new()
            .with("assignid", assignment_id)
            .with("userid", user_id);
        self.call_as("mod_assign_get_submission_status", params).await
    }

    // -----------------------------------------------------------------------
    // Streams
    // -----------------------------------------------------------------------

    /// Stream the courses our account is enrolled in, participants included.
    ///
    /// Pagination is driven by the server's `nextoffset`; the stream is lazy,
    /// finite and not restartable.
    pub fn stream_enrolled_courses(
        &self,
        in_progress_only: bool,
        page_size: i64,
    ) -> impl Stream<Item = Result<Course>> + '_ {
        try_stream! {
            let classification = if in_progress_only { "inprogress" } else { "all" };
            let mut offset = 0;
            loop {
                let page = self.enrolled_courses_page(classification, offset, page_size).await?;
                if page.courses.is_empty() {
                    break;
                }
                offset = page.nextoffset;
                for raw in page.courses {
                    let participants: Vec<Participant> = self
                        .stream_participants(raw.id, 50)
                        .try_collect()
                        .await?;
                    yield Course {
                        id: raw.id,
                        shortname: raw.shortname,
                        fullname: raw.fullname,
                        starts: wire::optional_timestamp(raw.startdate),
                        ends: wire::optional_timestamp(raw.enddate),
                        participants,
                    };
                }
            }
        }
    }

    /// Stream the participants of one course with their roles and groups.
    pub fn stream_participants(
        &self,
        course_id: CourseId,
        page_size: i64,
    ) -> impl Stream<Item = Result<Participant>> + '_ {
        try_stream! {
            let mut offset = 0;
            loop {
                let page = self.enrolled_users_page(course_id, offset, page_size).await?;
                if page.is_empty() {
                    break;
                }
                offset += page.len() as i64;
                for raw in page {
                    yield Participant {
                        user: User {
                            id: raw.id,
                            name: raw.fullname,
                            email: raw.email,
                        },
                        roles: raw
                            .roles
                            .into_iter()
                            .map(|r| Role { id: r.roleid, name: r.name })
                            .collect(),
                        groups: raw
                            .groups
                            .into_iter()
                            .map(|g| Group { id: g.id, name: g.name })
                            .collect(),
                    };
                }
            }
        }
    }

    /// Stream the assignments of the given courses.
    pub fn stream_assignments(
        &self,
        course_ids: Vec<CourseId>,
    ) -> impl Stream<Item = Result<Assignment>> + '_ {
        try_stream! {
            let response = self.assignments(&course_ids).await?;
            for warning in &response.warnings {
                tracing::debug!(?warning, "assignments call warning");
            }
            for course in response.courses {
                for raw in course.assignments {
                    yield Assignment {
                        id: raw.id,
                        course_id: raw.course,
                        name: raw.name,
                        opening: wire::optional_timestamp(raw.allowsubmissionsfromdate),
                        closing: wire::optional_timestamp(raw.duedate),
                        cutoff: wire::optional_timestamp(raw.cutoffdate),
                    };
                }
            }
        }
    }

    /// Stream the submissions of one assignment changed at or after `since`,
    /// with the attached files flattened out of the plugin payload.
    pub fn stream_submissions(
        &self,
        assignment_id: AssignmentId,
        since: Option<DateTime<Utc>>,
    ) -> impl Stream<Item = Result<Submission>> + '_ {
        try_stream! {
            let response = self.submissions(&[assignment_id], since).await?;
            for raw_assignment in response.assignments {
                let assignment_id = raw_assignment.assignmentid;
                for raw in raw_assignment.submissions {
                    let updated = wire::optional_timestamp(raw.timemodified)
                        .unwrap_or(DateTime::UNIX_EPOCH);
                    let files = flatten_submission_files(raw.id, updated, &raw.plugins);
                    yield Submission {
                        id: raw.id,
                        assignment_id,
                        user_id: raw.userid,
                        status: raw.status,
                        updated,
                        files,
                    };
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Downloads
    // -----------------------------------------------------------------------

    /// Start downloading a served file. The returned handle borrows nothing
    /// and releases the underlying connection when dropped, read to the end
    /// or not.
    pub async fn download(&self, file_url: &str) -> Result<Download> {
        let response = self
            .http
            .get(file_url)
            .query(&[("token", self.current_token())])
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() != 200 {
            return Err(MoodleError::Http {
                status: status.as_u16(),
                url: file_url.to_string(),
            });
        }
        Ok(Download { response })
    }
}

/// Flatten the file plugin's `submission_files` area into [`SubmittedFile`]s.
fn flatten_submission_files(
    submission_id: i64,
    updated: DateTime<Utc>,
    plugins: &[wire::WireSubmissionPlugin],
) -> Vec<SubmittedFile> {
    let mut files = Vec::new();
    for plugin in plugins {
        if plugin.kind != "file" {
            continue;
        }
        for area in &plugin.fileareas {
            if area.area != "submission_files" {
                continue;
            }
            for raw in &area.files {
                files.push(SubmittedFile {
                    submission_id,
                    filename: raw.filename.clone(),
                    mimetype: raw
                        .mimetype
                        .clone()
                        .unwrap_or_else(|| "application/octet-stream".to_string()),
                    filesize: raw.filesize,
                    url: raw.fileurl.clone(),
                    uploaded: wire::optional_timestamp(raw.timemodified).unwrap_or(updated),
                });
            }
        }
    }
    files
}

/// An in-flight file download.
pub struct Download {
    response: reqwest::Response,
}

impl Download {
    /// Total size, when the server announced one.
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Read the whole body into memory.
    pub async fn bytes(self) -> Result<Bytes> {
        Ok(self.response.bytes().await?)
    }

    /// Consume the download as a byte-chunk stream.
    pub fn into_stream(self) -> impl Stream<Item = reqwest::Result<Bytes>> {
        self.response.bytes_stream()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn plugin(kind: &str, area: &str, filenames: &[&str]) -> wire::WireSubmissionPlugin {
        let raw = serde_json::json!({
            "type": kind,
            "fileareas": [{
                "area": area,
                "files": filenames.iter().map(|name| serde_json::json!({
                    "filename": name,
                    "filesize": 11,
                    "fileurl": format!("https://moodle.test/pluginfile/{name}"),
                    "mimetype": "text/plain",
                    "timemodified": 1748167200,
                })).collect::<Vec<_>>(),
            }]
        });
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn only_the_submission_files_area_of_the_file_plugin_survives() {
        let updated = DateTime::UNIX_EPOCH;
        let plugins = vec![
            plugin("comments", "submission_files", &["ignored.txt"]),
            plugin("file", "attachments", &["also-ignored.txt"]),
            plugin("file", "submission_files", &["report.txt", "data.csv"]),
        ];
        let files = flatten_submission_files(1000, updated, &plugins);
        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["report.txt", "data.csv"]);
        assert!(files.iter().all(|f| f.submission_id == 1000));
        assert_eq!(files[0].uploaded.timestamp(), 1_748_167_200);
    }
}
