//! The two pipeline flows and their periodic driver.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures::future::join_all;
use futures::StreamExt;
use simscan_digests::{
    DigestError, DigestStore, DigestWorkerPool, FileComparisonRecord, FileDigestRecord,
    FileWarningRecord,
};
use tracing::{debug, error, info, warn};

use crate::config::FileComparisonConfig;
use crate::fetch::FileFetcher;

/// Counters of one pipeline cycle, for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub digests_stored: usize,
    pub warnings_stored: usize,
    pub comparisons_stored: usize,
    pub files_dropped: usize,
    pub pairs_failed: usize,
}

/// Drives extraction and comparison against a digest store, a file fetcher
/// and the worker pool.
pub struct ComparisonPipeline<S, F> {
    store: Arc<S>,
    fetcher: Arc<F>,
    pool: Arc<DigestWorkerPool>,
    available_types: BTreeSet<String>,
    config: FileComparisonConfig,
}

impl<S: DigestStore, F: FileFetcher> ComparisonPipeline<S, F> {
    pub fn new(
        store: Arc<S>,
        fetcher: Arc<F>,
        pool: Arc<DigestWorkerPool>,
        available_types: BTreeSet<String>,
        config: FileComparisonConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            pool,
            available_types,
            config,
        }
    }

    /// Run forever: sleep one refresh interval, then run the extraction flow
    /// and the comparison flow to completion. Any cycle error is logged and
    /// the loop continues; cancellation happens at the awaits when the
    /// owning task is aborted.
    pub async fn run(&self) {
        loop {
            tokio::time::sleep(Duration::from_secs(self.config.refresh_interval_seconds)).await;
            match self.run_cycle().await {
                Ok(stats) => {
                    if stats == CycleStats::default() {
                        debug!("pipeline cycle found nothing to do");
                    } else {
                        info!(
                            digests = stats.digests_stored,
                            warnings = stats.warnings_stored,
                            comparisons = stats.comparisons_stored,
                            dropped = stats.files_dropped,
                            failed_pairs = stats.pairs_failed,
                            "pipeline cycle finished"
                        );
                    }
                }
                Err(err) => {
                    error!(error = %err, "pipeline cycle failed");
                }
            }
        }
    }

    /// One full cycle: extraction flow, then comparison flow.
    pub async fn run_cycle(&self) -> Result<CycleStats, DigestError> {
        let mut stats = CycleStats::default();
        self.run_extraction(&mut stats).await?;
        self.run_comparison(&mut stats).await?;
        Ok(stats)
    }

    async fn run_extraction(&self, stats: &mut CycleStats) -> Result<(), DigestError> {
        debug!("looking for files to digest");
        let max_age = self
            .config
            .ignore_files_older_than_days
            .map(TimeDelta::days);
        let stream = self
            .store
            .stream_files_with_missing_digests(
                &self.available_types,
                max_age,
                self.config.ignore_files_larger_than,
            )
            .await?;
        let mut batches = stream.chunks(self.config.batch_size.max(1));

        while let Some(batch) = batches.next().await {
            // Download sequentially, then let the whole batch digest in
            // parallel on the pool. A failed download only drops the file
            // from this batch; it is picked up again next cycle.
            let mut pending = Vec::new();
            for file in batch {
                match self.fetcher.fetch(&file.url).await {
                    Ok(content) => {
                        debug!(file = %file.filename, url = %file.url, "downloaded");
                        pending.push(self.pool.extract(file, content));
                    }
                    Err(err) => {
                        warn!(file = %file.filename, url = %file.url, error = %err,
                            "download failed, skipping the file this cycle");
                        stats.files_dropped += 1;
                    }
                }
            }

            let mut digest_records = Vec::new();
            let mut warning_records = Vec::new();
            for response in join_all(pending).await {
                let response = response?;
                for err in &response.errors {
                    warn!(file = %response.file.filename, url = %response.file.url,
                        error = %err, "digest extraction failed");
                }
                let created = Utc::now();
                for (digest_type, payload) in response.digests {
                    digest_records.push(FileDigestRecord {
                        file_id: response.file.file_id,
                        digest_type,
                        user_id: response.file.user_id,
                        user_name: response.file.user_name.clone(),
                        assignment_id: response.file.assignment_id,
                        submission_id: response.file.submission_id,
                        file_name: response.file.filename.clone(),
                        file_url: response.file.url.clone(),
                        file_uploaded: response.file.uploaded,
                        created,
                        payload,
                    });
                }
                for (warning_type, message) in response.warnings {
                    warning_records.push(FileWarningRecord {
                        file_id: response.file.file_id,
                        warning_type,
                        message,
                    });
                }
            }
            self.store.store_digests(&digest_records).await?;
            self.store.store_warnings(&warning_records).await?;
            stats.digests_stored += digest_records.len();
            stats.warnings_stored += warning_records.len();
        }
        Ok(())
    }

    async fn run_comparison(&self, stats: &mut CycleStats) -> Result<(), DigestError> {
        debug!("looking for digest pairs to compare");
        let stream = self.store.stream_missing_comparisons().await?;
        let mut batches = stream.chunks(self.config.batch_size.max(1));

        while let Some(batch) = batches.next().await {
            let pending: Vec<_> = batch
                .into_iter()
                .map(|pair| self.pool.compare(pair))
                .collect();
            let mut records = Vec::new();
            for response in join_all(pending).await {
                let response = response?;
                match response.similarity {
                    Ok(score) => records.push(FileComparisonRecord {
                        older_file_id: response.older_file_id,
                        older_digest_type: response.digest_type.clone(),
                        newer_file_id: response.newer_file_id,
                        newer_digest_type: response.digest_type,
                        similarity_score: score,
                    }),
                    Err(err) => {
                        // Not persisted: the pair shows up again next cycle.
                        warn!(older = response.older_file_id, newer = response.newer_file_id,
                            digest_type = %response.digest_type, error = %err,
                            "comparison failed");
                        stats.pairs_failed += 1;
                    }
                }
            }
            self.store.store_comparisons(&records).await?;
            stats.comparisons_stored += records.len();
        }
        Ok(())
    }
}
