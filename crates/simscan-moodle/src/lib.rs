//! Typed client for the Moodle web-service REST API.
//!
//! Moodle exposes one endpoint (`webservice/rest/server.php`) that multiplexes
//! every operation through a `wsfunction` query parameter, with arguments
//! flattened into bracketed query keys (`courseids[0]=4`,
//! `options[0][name]=userfields`). This crate owns that wire dialect:
//!
//! - [`params`] encodes scalar / sequence / map parameter trees bit-exactly,
//! - [`MoodleClient`] handles token login, the retry-once-on-`invalidtoken`
//!   rule, JSON schema decoding and file downloads,
//! - the `stream_*` methods expose paginated endpoints as lazy streams of
//!   normalized domain values ([`model`]); raw response shapes never leave
//!   this crate except through [`wire`] for the few callers that need them.
//!
//! # Example
//!
//! ```rust,no_run
//! use simscan_moodle::{MoodleClient, MoodleCredentials};
//! use futures::TryStreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = MoodleClient::new(MoodleCredentials {
//!     base_url: "https://moodle.example.edu/".parse()?,
//!     username: "monitor".into(),
//!     password: "secret".into(),
//!     service: "moodle_mobile_app".into(),
//! })?;
//! client.login().await?;
//!
//! let mut courses = std::pin::pin!(client.stream_enrolled_courses(true, 10));
//! while let Some(course) = courses.try_next().await? {
//!     println!("{} ({})", course.fullname, course.participants.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod messages;
pub mod model;
pub mod params;
pub mod wire;

pub use client::{Download, MoodleClient, MoodleCredentials};
pub use error::{MoodleError, RemoteErrorKind, Result};
pub use model::{
    Assignment, AssignmentId, Course, CourseId, Group, GroupId, Participant, Role, RoleId,
    SubmittedFile, Submission, SubmissionId, User, UserId,
};
pub use params::{ParamValue, Params};
