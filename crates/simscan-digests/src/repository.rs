//! Upsert/stream access to digests, warnings and comparisons, plus the
//! "missing work" queries driving the comparison pipeline.
//!
//! Sessions come from the shared pool, one per operation. The missing-work
//! queries materialize their result rows before the session goes back to
//! the pool and hand them out as streams: a live server-side cursor would
//! pin one pooled connection for the whole pipeline cycle. Row ordering
//! from SQL is preserved, so the contiguity guarantees (same file, same
//! newer file) hold.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use simscan_cache::Database;

use crate::error::Result;
use crate::payload::DigestPayload;

/// Surrogate id of a submitted file (`moodle_submitted_files.id`).
pub type FileId = i64;

/// One file that still lacks at least one digest type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileToProcess {
    pub file_id: FileId,
    pub submission_id: i64,
    pub assignment_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub filename: String,
    pub url: String,
    pub filesize: i64,
    pub mimetype: String,
    pub uploaded: DateTime<Utc>,
    /// The subset of the available digest types this file is missing.
    pub missing_types: BTreeSet<String>,
}

/// One digest row. Owner and submission metadata are denormalized so the
/// similarity queries stay one-hop.
#[derive(Debug, Clone)]
pub struct FileDigestRecord {
    pub file_id: FileId,
    pub digest_type: String,
    pub user_id: i64,
    pub user_name: String,
    pub assignment_id: i64,
    pub submission_id: i64,
    pub file_name: String,
    pub file_url: String,
    pub file_uploaded: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub payload: DigestPayload,
}

/// One warning attached to a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWarningRecord {
    pub file_id: FileId,
    pub warning_type: String,
    pub message: String,
}

/// One stored comparison result.
#[derive(Debug, Clone, PartialEq)]
pub struct FileComparisonRecord {
    pub older_file_id: FileId,
    pub older_digest_type: String,
    pub newer_file_id: FileId,
    pub newer_digest_type: String,
    pub similarity_score: f64,
}

/// A pair of same-type digests that has not been compared yet.
#[derive(Debug, Clone)]
pub struct DigestPair {
    pub older_file_id: FileId,
    pub newer_file_id: FileId,
    pub digest_type: String,
    pub older_payload: DigestPayload,
    pub newer_payload: DigestPayload,
}

/// One file similar to a requested one, as served by the HTTP API.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarFile {
    pub submission_id: i64,
    pub user_id: i64,
    pub user_name: String,
    pub file_name: String,
    pub file_url: String,
    pub similarity_score: f64,
}

/// One warning as served by the HTTP API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWarningDetails {
    pub warning_type: String,
    pub message: String,
}

/// Everything known about one requested filename of a submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileDetails {
    pub name: String,
    pub is_known: bool,
    pub earlier_files: Vec<SimilarFile>,
    pub later_files: Vec<SimilarFile>,
    pub warnings: Vec<FileWarningDetails>,
}

/// The digest-side storage operations the comparison pipeline drives.
#[async_trait]
pub trait DigestStore: Send + Sync {
    /// Files that match the filters and lack at least one of the available
    /// digest types. Rows for the same file are contiguous. An empty
    /// `available` set yields nothing (and logs a warning): with no
    /// extractors installed there is no work the pool could do.
    async fn stream_files_with_missing_digests(
        &self,
        available: &BTreeSet<String>,
        max_age: Option<TimeDelta>,
        max_size: Option<i64>,
    ) -> Result<BoxStream<'static, FileToProcess>>;

    /// Upsert digests by (file, type); a re-extraction overwrites `created`
    /// and the payload.
    async fn store_digests(&self, digests: &[FileDigestRecord]) -> Result<()>;

    /// Upsert warnings by (file, warning type).
    async fn store_warnings(&self, warnings: &[FileWarningRecord]) -> Result<()>;

    /// Same-type, same-assignment, different-submission digest pairs with
    /// the newer strictly younger than the older and no comparison row yet.
    /// Pairs with an absent payload on either side are excluded: they could
    /// never produce a score. Rows for the same newer file are contiguous.
    async fn stream_missing_comparisons(&self) -> Result<BoxStream<'static, DigestPair>>;

    /// Upsert comparisons by their four-field key.
    async fn store_comparisons(&self, comparisons: &[FileComparisonRecord]) -> Result<()>;
}

const DDL: &str = "
CREATE TABLE IF NOT EXISTS file_digests (
    file_id       BIGINT NOT NULL REFERENCES moodle_submitted_files (id) ON DELETE CASCADE,
    digest_type   VARCHAR(16) NOT NULL,
    user_id       BIGINT NOT NULL,
    user_name     TEXT NOT NULL,
    assignment_id BIGINT NOT NULL,
    submission_id BIGINT NOT NULL,
    file_name     TEXT NOT NULL,
    file_url      TEXT NOT NULL,
    file_uploaded TIMESTAMPTZ NOT NULL,
    created       TIMESTAMPTZ NOT NULL,
    content       BYTEA,
    PRIMARY KEY (file_id, digest_type)
);
CREATE INDEX IF NOT EXISTS file_digests_assignment ON file_digests (assignment_id, digest_type);

CREATE TABLE IF NOT EXISTS file_warnings (
    file_id      BIGINT NOT NULL REFERENCES moodle_submitted_files (id) ON DELETE CASCADE,
    warning_type VARCHAR(64) NOT NULL,
    message      TEXT NOT NULL,
    PRIMARY KEY (file_id, warning_type)
);

CREATE TABLE IF NOT EXISTS file_comparisons (
    older_file_id     BIGINT NOT NULL,
    older_digest_type VARCHAR(16) NOT NULL,
    newer_file_id     BIGINT NOT NULL,
    newer_digest_type VARCHAR(16) NOT NULL,
    similarity_score  DOUBLE PRECISION NOT NULL,
    PRIMARY KEY (older_file_id, older_digest_type, newer_file_id, newer_digest_type),
    FOREIGN KEY (older_file_id, older_digest_type)
        REFERENCES file_digests (file_id, digest_type) ON DELETE CASCADE,
    FOREIGN KEY (newer_file_id, newer_digest_type)
        REFERENCES file_digests (file_id, digest_type) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS file_comparisons_newer ON file_comparisons (newer_file_id, similarity_score DESC);
CREATE INDEX IF NOT EXISTS file_comparisons_older ON file_comparisons (older_file_id, similarity_score DESC);
";

/// Postgres-backed digest repository.
pub struct PgDigestRepository {
    db: Arc<Database>,
}

impl PgDigestRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create the digest tables if they are missing. The mirror tables must
    /// exist first; `file_digests` references them.
    pub async fn create_tables(&self) -> Result<()> {
        let session = self.db.session().await?;
        session.batch_execute(DDL).await?;
        Ok(())
    }

    /// All filenames attached to one submission; empty when the submission
    /// is unknown.
    pub async fn list_submission_filenames(&self, submission_id: i64) -> Result<Vec<String>> {
        let session = self.db.session().await?;
        let rows = session
            .query(
                "SELECT filename FROM moodle_submitted_files
                 WHERE submission_id = $1 ORDER BY filename",
                &[&submission_id],
            )
            .await?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    /// The user-facing lookup behind `GET /filecomp/submission/{id}`.
    ///
    /// For each requested filename: an unknown file yields a bare
    /// `is_known = false` entry; a known one carries its warnings, the top-K
    /// most similar earlier files with similarity at least `min_score`, and,
    /// when `also_get_later_files` is set, the later similar files
    /// symmetrically. K is enforced with a per-file window rank, so ties
    /// beyond K are dropped.
    pub async fn get_files_by_submission(
        &self,
        submission_id: i64,
        filenames: &[String],
        min_score: f64,
        max_similar: i64,
        also_get_later_files: bool,
    ) -> Result<Vec<FileDetails>> {
        if filenames.is_empty() {
            return Ok(Vec::new());
        }
        let session = self.db.session().await?;

        let rows = session
            .query(
                "SELECT id, filename FROM moodle_submitted_files
                 WHERE submission_id = $1 AND filename = ANY($2::text[])",
                &[&submission_id, &filenames],
            )
            .await?;
        let mut details: Vec<FileDetails> = Vec::new();
        let mut index_by_file: HashMap<FileId, usize> = HashMap::new();
        for row in rows {
            let file_id: FileId = row.get(0);
            index_by_file.insert(file_id, details.len());
            details.push(FileDetails {
                name: row.get(1),
                is_known: true,
                ..FileDetails::default()
            });
        }
        let known_ids: Vec<FileId> = index_by_file.keys().copied().collect();

        if !known_ids.is_empty() {
            let rows = session
                .query(
                    "SELECT file_id, warning_type, message FROM file_warnings
                     WHERE file_id = ANY($1::bigint[])",
                    &[&known_ids],
                )
                .await?;
            for row in rows {
                let file_id: FileId = row.get(0);
                if let Some(entry) = index_by_file.get(&file_id) {
                    details[*entry].warnings.push(FileWarningDetails {
                        warning_type: row.get(1),
                        message: row.get(2),
                    });
                }
            }

            let rows = session
                .query(
                    "WITH ranked AS (
                         SELECT c.newer_file_id AS target_id,
                                c.similarity_score,
                                d.submission_id, d.user_id, d.user_name,
                                d.file_name, d.file_url,
                                row_number() OVER (PARTITION BY c.newer_file_id
                                                   ORDER BY c.similarity_score DESC) AS rank
                         FROM file_comparisons c
                         JOIN file_digests d ON d.file_id = c.older_file_id
                                            AND d.digest_type = c.older_digest_type
                         WHERE c.newer_file_id = ANY($1::bigint[])
                           AND c.similarity_score >= $2
                     )
                     SELECT target_id, similarity_score, submission_id, user_id,
                            user_name, file_name, file_url
                     FROM ranked WHERE rank <= $3
                     ORDER BY similarity_score DESC",
                    &[&known_ids, &min_score, &max_similar],
                )
                .await?;
            for row in rows {
                let target: FileId = row.get(0);
                if let Some(entry) = index_by_file.get(&target) {
                    details[*entry].earlier_files.push(SimilarFile {
                        similarity_score: row.get(1),
                        submission_id: row.get(2),
                        user_id: row.get(3),
                        user_name: row.get(4),
                        file_name: row.get(5),
                        file_url: row.get(6),
                    });
                }
            }

            if also_get_later_files {
                let rows = session
                    .query(
                        "WITH ranked AS (
                             SELECT c.older_file_id AS target_id,
                                    c.similarity_score,
                                    d.submission_id, d.user_id, d.user_name,
                                    d.file_name, d.file_url,
                                    row_number() OVER (PARTITION BY c.older_file_id
                                                       ORDER BY c.similarity_score DESC) AS rank
                             FROM file_comparisons c
                             JOIN file_digests d ON d.file_id = c.newer_file_id
                                                AND d.digest_type = c.newer_digest_type
                             WHERE c.older_file_id = ANY($1::bigint[])
                               AND c.similarity_score >= $2
                         )
                         SELECT target_id, similarity_score, submission_id, user_id,
                                user_name, file_name, file_url
                         FROM ranked WHERE rank <= $3
                         ORDER BY similarity_score DESC",
                        &[&known_ids, &min_score, &max_similar],
                    )
                    .await?;
                for row in rows {
                    let target: FileId = row.get(0);
                    if let Some(entry) = index_by_file.get(&target) {
                        details[*entry].later_files.push(SimilarFile {
                            similarity_score: row.get(1),
                            submission_id: row.get(2),
                            user_id: row.get(3),
                            user_name: row.get(4),
                            file_name: row.get(5),
                            file_url: row.get(6),
                        });
                    }
                }
            }
        }

        let known_names: BTreeSet<String> = details.iter().map(|d| d.name.clone()).collect();
        for name in filenames {
            if !known_names.contains(name.as_str()) {
                details.push(FileDetails {
                    name: name.clone(),
                    is_known: false,
                    ..FileDetails::default()
                });
            }
        }
        Ok(details)
    }
}

#[async_trait]
impl DigestStore for PgDigestRepository {
    async fn stream_files_with_missing_digests(
        &self,
        available: &BTreeSet<String>,
        max_age: Option<TimeDelta>,
        max_size: Option<i64>,
    ) -> Result<BoxStream<'static, FileToProcess>> {
        if available.is_empty() {
            tracing::warn!("missing-digest scan requested with no digest types available");
            return Ok(futures::stream::empty().boxed());
        }
        let available_vec: Vec<&str> = available.iter().map(String::as_str).collect();
        let oldest: Option<DateTime<Utc>> = max_age.map(|age| Utc::now() - age);

        let session = self.db.session().await?;
        let rows = session
            .query(
                "SELECT f.id, f.submission_id, f.assignment_id, f.user_id, u.fullname,
                        f.filename, f.url, f.filesize, f.mimetype, f.uploaded,
                        d.existing
                 FROM moodle_submitted_files f
                 JOIN moodle_users u ON u.id = f.user_id
                 LEFT JOIN (
                     SELECT file_id,
                            array_agg(digest_type ORDER BY digest_type) AS existing
                     FROM file_digests
                     WHERE digest_type = ANY($1::text[])
                     GROUP BY file_id
                 ) d ON d.file_id = f.id
                 WHERE ($2::timestamptz IS NULL OR f.uploaded >= $2)
                   AND ($3::bigint IS NULL OR f.filesize <= $3)
                 ORDER BY f.id",
                &[&available_vec, &oldest, &max_size],
            )
            .await?;

        let available = available.clone();
        let mut files = Vec::new();
        for row in rows {
            let existing: Option<Vec<String>> = row.get(10);
            let existing: BTreeSet<String> = existing.unwrap_or_default().into_iter().collect();
            let missing_types: BTreeSet<String> =
                available.difference(&existing).cloned().collect();
            if missing_types.is_empty() {
                continue;
            }
            files.push(FileToProcess {
                file_id: row.get(0),
                submission_id: row.get(1),
                assignment_id: row.get(2),
                user_id: row.get(3),
                user_name: row.get(4),
                filename: row.get(5),
                url: row.get(6),
                filesize: row.get(7),
                mimetype: row.get(8),
                uploaded: row.get(9),
                missing_types,
            });
        }
        tracing::debug!(files = files.len(), "files with missing digests found");
        Ok(futures::stream::iter(files).boxed())
    }

    async fn store_digests(&self, digests: &[FileDigestRecord]) -> Result<()> {
        if digests.is_empty() {
            return Ok(());
        }
        let file_ids: Vec<FileId> = digests.iter().map(|d| d.file_id).collect();
        let types: Vec<&str> = digests.iter().map(|d| d.digest_type.as_str()).collect();
        let user_ids: Vec<i64> = digests.iter().map(|d| d.user_id).collect();
        let user_names: Vec<&str> = digests.iter().map(|d| d.user_name.as_str()).collect();
        let assignment_ids: Vec<i64> = digests.iter().map(|d| d.assignment_id).collect();
        let submission_ids: Vec<i64> = digests.iter().map(|d| d.submission_id).collect();
        let file_names: Vec<&str> = digests.iter().map(|d| d.file_name.as_str()).collect();
        let file_urls: Vec<&str> = digests.iter().map(|d| d.file_url.as_str()).collect();
        let uploaded: Vec<DateTime<Utc>> = digests.iter().map(|d| d.file_uploaded).collect();
        let created: Vec<DateTime<Utc>> = digests.iter().map(|d| d.created).collect();
        let contents: Vec<Option<&[u8]>> = digests.iter().map(|d| d.payload.as_column()).collect();

        let session = self.db.session().await?;
        session
            .execute(
                "INSERT INTO file_digests
                     (file_id, digest_type, user_id, user_name, assignment_id,
                      submission_id, file_name, file_url, file_uploaded, created, content)
                 SELECT * FROM unnest($1::bigint[], $2::varchar[], $3::bigint[], $4::text[],
                                      $5::bigint[], $6::bigint[], $7::text[], $8::text[],
                                      $9::timestamptz[], $10::timestamptz[], $11::bytea[])
                 ON CONFLICT (file_id, digest_type) DO UPDATE SET
                     created = EXCLUDED.created,
                     content = EXCLUDED.content",
                &[
                    &file_ids,
                    &types,
                    &user_ids,
                    &user_names,
                    &assignment_ids,
                    &submission_ids,
                    &file_names,
                    &file_urls,
                    &uploaded,
                    &created,
                    &contents,
                ],
            )
            .await?;
        Ok(())
    }

    async fn store_warnings(&self, warnings: &[FileWarningRecord]) -> Result<()> {
        if warnings.is_empty() {
            return Ok(());
        }
        let file_ids: Vec<FileId> = warnings.iter().map(|w| w.file_id).collect();
        let types: Vec<&str> = warnings.iter().map(|w| w.warning_type.as_str()).collect();
        let messages: Vec<&str> = warnings.iter().map(|w| w.message.as_str()).collect();
        let session = self.db.session().await?;
        session
            .execute(
                "INSERT INTO file_warnings (file_id, warning_type, message)
                 SELECT * FROM unnest($1::bigint[], $2::varchar[], $3::text[])
                 ON CONFLICT (file_id, warning_type) DO UPDATE SET
                     message = EXCLUDED.message",
                &[&file_ids, &types, &messages],
            )
            .await?;
        Ok(())
    }

    async fn stream_missing_comparisons(&self) -> Result<BoxStream<'static, DigestPair>> {
        let session = self.db.session().await?;
        let rows = session
            .query(
                "SELECT older.file_id, newer.file_id, newer.digest_type,
                        older.content, newer.content
                 FROM file_digests newer
                 JOIN file_digests older
                      ON older.assignment_id = newer.assignment_id
                     AND older.digest_type = newer.digest_type
                     AND older.submission_id <> newer.submission_id
                     AND newer.file_uploaded > older.file_uploaded
                 LEFT JOIN file_comparisons c
                      ON c.newer_file_id = newer.file_id
                     AND c.newer_digest_type = newer.digest_type
                     AND c.older_file_id = older.file_id
                     AND c.older_digest_type = older.digest_type
                 WHERE c.similarity_score IS NULL
                   AND older.content IS NOT NULL
                   AND newer.content IS NOT NULL
                 ORDER BY newer.file_id",
                &[],
            )
            .await?;
        let pairs: Vec<DigestPair> = rows
            .into_iter()
            .map(|row| DigestPair {
                older_file_id: row.get(0),
                newer_file_id: row.get(1),
                digest_type: row.get(2),
                older_payload: DigestPayload::from_column(row.get(3)),
                newer_payload: DigestPayload::from_column(row.get(4)),
            })
            .collect();
        tracing::debug!(pairs = pairs.len(), "missing comparisons found");
        Ok(futures::stream::iter(pairs).boxed())
    }

    async fn store_comparisons(&self, comparisons: &[FileComparisonRecord]) -> Result<()> {
        if comparisons.is_empty() {
            return Ok(());
        }
        let older_ids: Vec<FileId> = comparisons.iter().map(|c| c.older_file_id).collect();
        let older_types: Vec<&str> = comparisons
            .iter()
            .map(|c| c.older_digest_type.as_str())
            .collect();
        let newer_ids: Vec<FileId> = comparisons.iter().map(|c| c.newer_file_id).collect();
        let newer_types: Vec<&str> = comparisons
            .iter()
            .map(|c| c.newer_digest_type.as_str())
            .collect();
        let scores: Vec<f64> = comparisons.iter().map(|c| c.similarity_score).collect();
        let session = self.db.session().await?;
        session
            .execute(
                "INSERT INTO file_comparisons
                     (older_file_id, older_digest_type, newer_file_id, newer_digest_type,
                      similarity_score)
                 SELECT * FROM unnest($1::bigint[], $2::varchar[], $3::bigint[], $4::varchar[],
                                      $5::float8[])
                 ON CONFLICT (older_file_id, older_digest_type, newer_file_id, newer_digest_type)
                 DO UPDATE SET similarity_score = EXCLUDED.similarity_score",
                &[&older_ids, &older_types, &newer_ids, &newer_types, &scores],
            )
            .await?;
        Ok(())
    }
}
