//! Wire-level tests for the Moodle client against a local mock server.

#![allow(clippy::unwrap_used)]

use futures::TryStreamExt;
use serde_json::json;
use simscan_moodle::{MoodleClient, MoodleCredentials, MoodleError, RemoteErrorKind};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> MoodleClient {
    MoodleClient::new(MoodleCredentials {
        base_url: format!("{}/", server.uri()).parse().unwrap(),
        username: "monitor".to_string(),
        password: "secret".to_string(),
        service: "moodle_mobile_app".to_string(),
    })
    .unwrap()
}

/// Mount a successful login plus the follow-up time-zone lookup.
async fn mount_login(server: &MockServer, expected_logins: u64) {
    Mock::given(method("GET"))
        .and(path("/login/token.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok-1"})))
        .expect(expected_logins)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webservice/rest/server.php"))
        .and(query_param("wsfunction", "core_user_get_users_by_field"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn login_stores_the_issued_token() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/webservice/rest/server.php"))
        .and(query_param("wsfunction", "core_webservice_get_site_info"))
        .and(query_param("wstoken", "tok-1"))
        .and(query_param("moodlewsrestformat", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sitename": "Test Site",
            "username": "monitor",
            "fullname": "Monitoring Account",
            "userid": 7,
            "siteurl": server.uri(),
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.login().await.unwrap();
    let info = client.site_info().await.unwrap();
    assert_eq!(info.sitename, "Test Site");
    assert_eq!(info.userid, 7);
}

#[tokio::test]
async fn invalid_token_triggers_exactly_one_relogin_and_retry() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;

    // First call is rejected, the retry after re-login succeeds.
    Mock::given(method("GET"))
        .and(path("/webservice/rest/server.php"))
        .and(query_param("wsfunction", "mod_assign_get_assignments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "exception": "moodle_exception",
            "errorcode": "invalidtoken",
            "message": "Invalid token - token expired"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webservice/rest/server.php"))
        .and(query_param("wsfunction", "mod_assign_get_assignments"))
        .and(query_param("wstoken", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "courses": [{
                "id": 10,
                "shortname": "CS101",
                "fullname": "Computer Science 101",
                "assignments": [{
                    "id": 100,
                    "course": 10,
                    "name": "Essay",
                    "duedate": 1748779200,
                    "allowsubmissionsfromdate": 0,
                    "cutoffdate": 0,
                    "timemodified": 1748000000
                }]
            }],
            "warnings": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let assignments: Vec<_> = client
        .stream_assignments(vec![10])
        .try_collect::<Vec<_>>()
        .await
        .unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].id, 100);
    assert_eq!(assignments[0].course_id, 10);
    assert!(assignments[0].opening.is_none());
    assert!(assignments[0].cutoff.is_none());
    assert_eq!(assignments[0].closing.unwrap().timestamp(), 1_748_779_200);
    // mount_login's expect(1) verifies exactly one login happened.
}

#[tokio::test]
async fn access_denied_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/webservice/rest/server.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "exception": "moodle_exception",
            "errorcode": "accessexception",
            "message": "Access control exception"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.site_info().await.unwrap_err();
    match err {
        MoodleError::Remote { kind, errorcode, .. } => {
            assert_eq!(kind, RemoteErrorKind::AccessDenied);
            assert_eq!(errorcode, "accessexception");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn http_error_without_json_body_surfaces_the_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/webservice/rest/server.php"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.site_info().await.unwrap_err();
    assert!(matches!(err, MoodleError::Http { status: 503, .. }));
}

#[tokio::test]
async fn course_stream_follows_nextoffset_and_collects_participants() {
    let server = MockServer::start().await;

    let course = |id: i64, short: &str| {
        json!({
            "id": id,
            "shortname": short,
            "fullname": format!("Course {short}"),
            "startdate": 1746057600,
            "enddate": 0,
        })
    };
    Mock::given(method("GET"))
        .and(path("/webservice/rest/server.php"))
        .and(query_param(
            "wsfunction",
            "core_course_get_enrolled_courses_by_timeline_classification",
        ))
        .and(query_param("offset", "0"))
        .and(query_param("classification", "inprogress"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "courses": [course(10, "CS101"), course(11, "CS102")],
            "nextoffset": 2
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webservice/rest/server.php"))
        .and(query_param(
            "wsfunction",
            "core_course_get_enrolled_courses_by_timeline_classification",
        ))
        .and(query_param("offset", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"courses": [], "nextoffset": 2})),
        )
        .mount(&server)
        .await;
    // Participant pages: one user on the first page, then an empty page.
    Mock::given(method("GET"))
        .and(path("/webservice/rest/server.php"))
        .and(query_param("wsfunction", "core_enrol_get_enrolled_users"))
        .and(query_param("options[1][value]", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 1,
            "fullname": "Alice Adams",
            "email": "alice@example.edu",
            "roles": [{"roleid": 5, "name": "Student"}],
            "groups": [{"id": 301, "name": "Group A"}]
        }])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/webservice/rest/server.php"))
        .and(query_param("wsfunction", "core_enrol_get_enrolled_users"))
        .and(query_param("options[1][value]", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let courses: Vec<_> = client
        .stream_enrolled_courses(true, 10)
        .try_collect::<Vec<_>>()
        .await
        .unwrap();

    assert_eq!(courses.len(), 2);
    assert_eq!(courses[0].id, 10);
    assert!(courses[0].ends.is_none());
    assert_eq!(courses[0].participants.len(), 1);
    let participant = &courses[0].participants[0];
    assert_eq!(participant.user.name, "Alice Adams");
    assert_eq!(participant.roles[0].id, 5);
    assert_eq!(participant.groups[0].id, 301);
}

#[tokio::test]
async fn submissions_are_fetched_since_the_given_instant() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/webservice/rest/server.php"))
        .and(query_param("wsfunction", "mod_assign_get_submissions"))
        .and(query_param("assignmentids[0]", "100"))
        .and(query_param("since", "1748167201"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "assignments": [{
                "assignmentid": 100,
                "submissions": [{
                    "id": 1000,
                    "userid": 1,
                    "status": "submitted",
                    "timemodified": 1748170800,
                    "plugins": [{
                        "type": "file",
                        "fileareas": [{
                            "area": "submission_files",
                            "files": [{
                                "filename": "report.txt",
                                "filesize": 12,
                                "fileurl": "https://moodle.test/pluginfile.php/report.txt",
                                "mimetype": "text/plain",
                                "timemodified": 1748170800
                            }]
                        }]
                    }]
                }]
            }],
            "warnings": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let since = chrono::DateTime::from_timestamp(1_748_167_201, 0);
    let submissions: Vec<_> = client
        .stream_submissions(100, since)
        .try_collect::<Vec<_>>()
        .await
        .unwrap();

    assert_eq!(submissions.len(), 1);
    let submission = &submissions[0];
    assert_eq!(submission.id, 1000);
    assert_eq!(submission.status.as_deref(), Some("submitted"));
    assert_eq!(submission.files.len(), 1);
    assert_eq!(submission.files[0].filename, "report.txt");
    assert_eq!(submission.files[0].filesize, 12);
}

#[tokio::test]
async fn downloads_carry_the_token_and_stream_the_body() {
    let server = MockServer::start().await;
    mount_login(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/pluginfile.php/42/report.txt"))
        .and(query_param("token", "tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello\nworld\n".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.login().await.unwrap();
    let download = client
        .download(&format!("{}/pluginfile.php/42/report.txt", server.uri()))
        .await
        .unwrap();
    let body = download.bytes().await.unwrap();
    assert_eq!(&body[..], b"hello\nworld\n");
}

#[tokio::test]
async fn failed_download_is_an_error_not_a_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pluginfile.php/42/missing.txt"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = match client
        .download(&format!("{}/pluginfile.php/42/missing.txt", server.uri()))
        .await
    {
        Err(e) => e,
        Ok(_) => panic!("expected download to fail"),
    };
    assert!(matches!(err, MoodleError::Http { status: 404, .. }));
}
