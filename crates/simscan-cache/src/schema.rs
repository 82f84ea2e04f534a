//! Mirror schema bootstrap.

use tokio_postgres::Client;

use crate::error::Result;

/// DDL for the Moodle mirror tables. Idempotent; executed at component start.
///
/// `moodle_submitted_files` keys on (submission, filename) like the server
/// does, and additionally carries a generated surrogate `id` that downstream
/// tables (digests, warnings, comparisons) use as their foreign key.
const DDL: &str = "
CREATE TABLE IF NOT EXISTS moodle_courses (
    id        BIGINT PRIMARY KEY,
    shortname TEXT NOT NULL,
    fullname  TEXT NOT NULL,
    starts    TIMESTAMPTZ,
    ends      TIMESTAMPTZ,
    last_seen TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS moodle_courses_open_window ON moodle_courses (starts, ends);

CREATE TABLE IF NOT EXISTS moodle_users (
    id        BIGINT PRIMARY KEY,
    fullname  TEXT NOT NULL,
    email     TEXT,
    last_seen TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS moodle_roles (
    id   BIGINT PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS moodle_groups (
    id        BIGINT PRIMARY KEY,
    course_id BIGINT NOT NULL REFERENCES moodle_courses (id) ON DELETE CASCADE,
    name      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS moodle_participants (
    course_id BIGINT NOT NULL REFERENCES moodle_courses (id) ON DELETE CASCADE,
    user_id   BIGINT NOT NULL REFERENCES moodle_users (id) ON DELETE CASCADE,
    PRIMARY KEY (course_id, user_id)
);

CREATE TABLE IF NOT EXISTS moodle_participant_roles (
    course_id BIGINT NOT NULL,
    user_id   BIGINT NOT NULL,
    role_id   BIGINT NOT NULL REFERENCES moodle_roles (id) ON DELETE CASCADE,
    PRIMARY KEY (course_id, user_id, role_id),
    FOREIGN KEY (course_id, user_id)
        REFERENCES moodle_participants (course_id, user_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS moodle_participant_groups (
    course_id BIGINT NOT NULL,
    user_id   BIGINT NOT NULL,
    group_id  BIGINT NOT NULL REFERENCES moodle_groups (id) ON DELETE CASCADE,
    PRIMARY KEY (course_id, user_id, group_id),
    FOREIGN KEY (course_id, user_id)
        REFERENCES moodle_participants (course_id, user_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS moodle_assignments (
    id        BIGINT PRIMARY KEY,
    course_id BIGINT NOT NULL REFERENCES moodle_courses (id) ON DELETE CASCADE,
    name      TEXT NOT NULL,
    opening   TIMESTAMPTZ,
    closing   TIMESTAMPTZ,
    cutoff    TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS moodle_assignments_opening ON moodle_assignments (opening);
CREATE INDEX IF NOT EXISTS moodle_assignments_closing ON moodle_assignments (closing);
CREATE INDEX IF NOT EXISTS moodle_assignments_cutoff  ON moodle_assignments (cutoff);

CREATE TABLE IF NOT EXISTS moodle_submissions (
    id            BIGINT PRIMARY KEY,
    assignment_id BIGINT NOT NULL REFERENCES moodle_assignments (id) ON DELETE CASCADE,
    user_id       BIGINT NOT NULL REFERENCES moodle_users (id) ON DELETE CASCADE,
    status        TEXT,
    updated       TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS moodle_submissions_assignment ON moodle_submissions (assignment_id);
CREATE INDEX IF NOT EXISTS moodle_submissions_updated    ON moodle_submissions (updated);

CREATE TABLE IF NOT EXISTS moodle_submitted_files (
    id            BIGINT GENERATED ALWAYS AS IDENTITY,
    submission_id BIGINT NOT NULL REFERENCES moodle_submissions (id) ON DELETE CASCADE,
    filename      TEXT NOT NULL,
    assignment_id BIGINT NOT NULL REFERENCES moodle_assignments (id) ON DELETE CASCADE,
    user_id       BIGINT NOT NULL REFERENCES moodle_users (id) ON DELETE CASCADE,
    filesize      BIGINT NOT NULL,
    mimetype      TEXT NOT NULL,
    url           TEXT NOT NULL,
    uploaded      TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (submission_id, filename),
    UNIQUE (id)
);
";

/// Create the mirror tables if they are missing.
pub async fn create_tables(client: &Client) -> Result<()> {
    client.batch_execute(DDL).await?;
    Ok(())
}
