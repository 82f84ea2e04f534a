//! Read seam between the HTTP handlers and the digest repository.

use async_trait::async_trait;
use simscan_digests::{DigestError, FileDetails};

/// The lookups the `/filecomp` endpoint needs.
#[async_trait]
pub trait SimilarityQueries: Send + Sync {
    /// All filenames attached to a submission; empty when the submission is
    /// unknown.
    async fn submission_filenames(&self, submission_id: i64)
        -> Result<Vec<String>, DigestError>;

    /// Details for the given filenames of a submission; see the digest
    /// repository for the exact contract.
    async fn files_by_submission(
        &self,
        submission_id: i64,
        filenames: &[String],
        min_score: f64,
        max_similar: i64,
        also_get_later_files: bool,
    ) -> Result<Vec<FileDetails>, DigestError>;
}

#[async_trait]
impl SimilarityQueries for simscan_digests::PgDigestRepository {
    async fn submission_filenames(
        &self,
        submission_id: i64,
    ) -> Result<Vec<String>, DigestError> {
        self.list_submission_filenames(submission_id).await
    }

    async fn files_by_submission(
        &self,
        submission_id: i64,
        filenames: &[String],
        min_score: f64,
        max_similar: i64,
        also_get_later_files: bool,
    ) -> Result<Vec<FileDetails>, DigestError> {
        self.get_files_by_submission(
            submission_id,
            filenames,
            min_score,
            max_similar,
            also_get_later_files,
        )
        .await
    }
}
