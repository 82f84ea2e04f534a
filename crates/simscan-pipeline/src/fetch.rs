//! Download seam between the pipeline and the LMS client.

use async_trait::async_trait;
use thiserror::Error;

/// A failed file download. Downloads that fail drop the file from the
/// current batch only; the file is retried on a later cycle.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct FetchError(pub String);

/// Fetches submitted-file content by URL.
#[async_trait]
pub trait FileFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[async_trait]
impl FileFetcher for simscan_moodle::MoodleClient {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let download = self
            .download(url)
            .await
            .map_err(|err| FetchError(err.to_string()))?;
        let bytes = download
            .bytes()
            .await
            .map_err(|err| FetchError(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}
