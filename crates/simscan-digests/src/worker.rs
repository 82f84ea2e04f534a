//! The digest worker pool.
//!
//! A fixed number of worker threads take jobs from a bounded channel and
//! answer on per-job reply channels. Each worker builds its own plugin
//! instances from the registry factories and initializes them once with the
//! settings map; after that, work items carry only the file or pair data.
//! Extractors and comparers see raw digest bytes; compression to and from
//! [`DigestPayload`] happens here, on the worker thread.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{DigestError, Result};
use crate::payload::DigestPayload;
use crate::plugin::{DigestComparer, DigestExtractor};
use crate::registry::PluginRegistry;
use crate::repository::{DigestPair, FileToProcess};

/// Result of digesting one file.
#[derive(Debug)]
pub struct ExtractResponse {
    pub file: FileToProcess,
    /// One entry per requested digest type; `Absent` where nothing was
    /// produced, compressed bytes otherwise.
    pub digests: BTreeMap<String, DigestPayload>,
    pub warnings: BTreeMap<String, String>,
    /// Extractor failures for this file; they never abort the pool.
    pub errors: Vec<String>,
}

/// Result of comparing one digest pair.
#[derive(Debug)]
pub struct CompareResponse {
    pub older_file_id: i64,
    pub newer_file_id: i64,
    pub digest_type: String,
    pub similarity: std::result::Result<f64, String>,
}

enum Job {
    Extract {
        file: FileToProcess,
        content: Vec<u8>,
        reply: oneshot::Sender<ExtractResponse>,
    },
    Compare {
        pair: DigestPair,
        reply: oneshot::Sender<CompareResponse>,
    },
}

/// Fixed-size pool of digesting worker threads.
pub struct DigestWorkerPool {
    jobs: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl DigestWorkerPool {
    /// Spawn `workers` threads, each with its own plugin instances built
    /// from `registry` and initialized with its slice of `settings`.
    pub fn spawn(
        workers: usize,
        registry: &PluginRegistry,
        settings: &serde_json::Map<String, serde_json::Value>,
    ) -> std::io::Result<Self> {
        let workers = workers.max(1);
        let (jobs, rx) = mpsc::channel::<Job>(workers * 2);
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let rx = Arc::clone(&rx);
            let registry = registry.clone();
            let settings = settings.clone();
            let handle = std::thread::Builder::new()
                .name(format!("digest-worker-{index}"))
                .spawn(move || worker_main(index, &rx, &registry, &settings))?;
            handles.push(handle);
        }
        Ok(Self {
            jobs,
            workers: handles,
        })
    }

    /// Digest one file off the async path.
    pub async fn extract(&self, file: FileToProcess, content: Vec<u8>) -> Result<ExtractResponse> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(Job::Extract {
                file,
                content,
                reply,
            })
            .await
            .map_err(|_| DigestError::PoolClosed)?;
        response.await.map_err(|_| DigestError::PoolClosed)
    }

    /// Compare one digest pair off the async path.
    pub async fn compare(&self, pair: DigestPair) -> Result<CompareResponse> {
        let (reply, response) = oneshot::channel();
        self.jobs
            .send(Job::Compare { pair, reply })
            .await
            .map_err(|_| DigestError::PoolClosed)?;
        response.await.map_err(|_| DigestError::PoolClosed)
    }

    /// Stop accepting work, let running jobs finish and join the threads.
    pub fn shutdown(self) {
        drop(self.jobs);
        for handle in self.workers {
            if handle.join().is_err() {
                tracing::error!("a digest worker panicked during shutdown");
            }
        }
    }
}

fn worker_main(
    index: usize,
    jobs: &Mutex<mpsc::Receiver<Job>>,
    registry: &PluginRegistry,
    settings: &serde_json::Map<String, serde_json::Value>,
) {
    let mut extractors: Vec<Box<dyn DigestExtractor>> = Vec::new();
    for mut extractor in registry.build_extractors() {
        let slice = PluginRegistry::settings_for(settings, extractor.name());
        match extractor.initialize(&slice) {
            Ok(()) => extractors.push(extractor),
            Err(err) => {
                tracing::error!(worker = index, plugin = extractor.name(), error = %err,
                    "extractor failed to initialize, skipping it");
            }
        }
    }
    let mut comparers: Vec<Box<dyn DigestComparer>> = Vec::new();
    for mut comparer in registry.build_comparers() {
        let slice = PluginRegistry::settings_for(settings, comparer.name());
        match comparer.initialize(&slice) {
            Ok(()) => comparers.push(comparer),
            Err(err) => {
                tracing::error!(worker = index, plugin = comparer.name(), error = %err,
                    "comparer failed to initialize, skipping it");
            }
        }
    }
    tracing::debug!(
        worker = index,
        extractors = extractors.len(),
        comparers = comparers.len(),
        "digest worker ready"
    );

    loop {
        let job = {
            let mut rx = jobs.blocking_lock();
            rx.blocking_recv()
        };
        match job {
            Some(Job::Extract {
                file,
                content,
                reply,
            }) => {
                let response = run_extract(&mut extractors, file, &content);
                let _ = reply.send(response);
            }
            Some(Job::Compare { pair, reply }) => {
                let response = run_compare(&mut comparers, &pair);
                let _ = reply.send(response);
            }
            None => break,
        }
    }
    tracing::debug!(worker = index, "digest worker stopped");
}

fn run_extract(
    extractors: &mut [Box<dyn DigestExtractor>],
    file: FileToProcess,
    content: &[u8],
) -> ExtractResponse {
    // Every requested type starts out absent so that a type nobody produces
    // still gets a row and is not re-requested forever.
    let mut digests: BTreeMap<String, DigestPayload> = file
        .missing_types
        .iter()
        .map(|t| (t.clone(), DigestPayload::Absent))
        .collect();
    let mut warnings = BTreeMap::new();
    let mut errors = Vec::new();

    for extractor in extractors {
        let wanted = extractor
            .digest_types()
            .intersection(&file.missing_types)
            .count()
            > 0;
        if !wanted {
            continue;
        }
        if !extractor.can_process(&file.filename, &file.mimetype, file.filesize) {
            tracing::debug!(plugin = extractor.name(), file = %file.filename,
                "extractor declined the file");
            continue;
        }
        match extractor.process(&file.filename, &file.mimetype, content) {
            Ok(extraction) => {
                for (digest_type, raw) in extraction.digests {
                    if !file.missing_types.contains(&digest_type) {
                        continue;
                    }
                    let payload = match raw {
                        Some(bytes) => match DigestPayload::compress(&bytes) {
                            Ok(payload) => payload,
                            Err(err) => {
                                errors.push(format!(
                                    "compressing {digest_type} digest failed: {err}"
                                ));
                                continue;
                            }
                        },
                        None => {
                            tracing::warn!(plugin = extractor.name(), %digest_type,
                                file = %file.filename, "extractor produced no digest");
                            DigestPayload::Absent
                        }
                    };
                    digests.insert(digest_type, payload);
                }
                warnings.extend(extraction.warnings);
            }
            Err(err) => {
                tracing::error!(plugin = extractor.name(), file = %file.filename, error = %err,
                    "extractor failed");
                errors.push(format!("{}: {err}", extractor.name()));
            }
        }
    }
    ExtractResponse {
        file,
        digests,
        warnings,
        errors,
    }
}

fn run_compare(comparers: &mut [Box<dyn DigestComparer>], pair: &DigestPair) -> CompareResponse {
    let respond = |similarity| CompareResponse {
        older_file_id: pair.older_file_id,
        newer_file_id: pair.newer_file_id,
        digest_type: pair.digest_type.clone(),
        similarity,
    };
    for comparer in comparers {
        if !comparer.digest_types().contains(&pair.digest_type) {
            continue;
        }
        let decompressed = pair
            .older_payload
            .decompress()
            .and_then(|older| Ok((older, pair.newer_payload.decompress()?)));
        let (older, newer) = match decompressed {
            Ok(bytes) => bytes,
            Err(err) => return respond(Err(format!("payload decompression failed: {err}"))),
        };
        return match comparer.compare(
            &pair.digest_type,
            pair.older_file_id,
            &older,
            pair.newer_file_id,
            &newer,
        ) {
            // Scores are clamped so a sloppy plugin cannot break the stored
            // [0, 1] invariant.
            Ok(score) => respond(Ok(score.clamp(0.0, 1.0))),
            Err(err) => respond(Err(err.to_string())),
        };
    }
    respond(Err(format!(
        "no comparer handles digest type {:?}",
        pair.digest_type
    )))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::plugin::{Extraction, PluginError, PluginSettings};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn file(missing: &[&str]) -> FileToProcess {
        FileToProcess {
            file_id: 1,
            submission_id: 1000,
            assignment_id: 100,
            user_id: 1,
            user_name: "Alice Adams".to_string(),
            filename: "report.txt".to_string(),
            url: "https://moodle.test/report.txt".to_string(),
            filesize: 12,
            mimetype: "text/plain".to_string(),
            uploaded: Utc::now(),
            missing_types: missing.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// An extractor that always fails.
    #[derive(Default)]
    struct Exploding;

    impl DigestExtractor for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }
        fn initialize(&mut self, _settings: &PluginSettings) -> std::result::Result<(), PluginError> {
            Ok(())
        }
        fn digest_types(&self) -> BTreeSet<String> {
            BTreeSet::from(["plaintext".to_string()])
        }
        fn can_process(&self, _f: &str, _m: &str, _s: i64) -> bool {
            true
        }
        fn process(
            &mut self,
            _f: &str,
            _m: &str,
            _c: &[u8],
        ) -> std::result::Result<Extraction, PluginError> {
            Err(PluginError::new("this plugin always fails"))
        }
    }

    #[tokio::test]
    async fn pool_extracts_and_compresses_digests() {
        let pool = DigestWorkerPool::spawn(2, &PluginRegistry::builtin(), &serde_json::Map::new()).unwrap();
        let response = pool
            .extract(file(&["plaintext"]), b"hello\nworld\n".to_vec())
            .await
            .unwrap();
        assert!(response.errors.is_empty());
        let payload = &response.digests["plaintext"];
        assert_eq!(payload.decompress().unwrap(), b"hello\nworld");
        pool.shutdown();
    }

    #[tokio::test]
    async fn failing_extractor_reports_errors_and_absent_digest() {
        let mut registry = PluginRegistry::new();
        registry.register_extractor("exploding", || Box::new(Exploding));
        let pool = DigestWorkerPool::spawn(1, &registry, &serde_json::Map::new()).unwrap();

        let response = pool
            .extract(file(&["plaintext"]), b"hello".to_vec())
            .await
            .unwrap();
        assert!(!response.errors.is_empty());
        assert_eq!(response.digests["plaintext"], DigestPayload::Absent);
        pool.shutdown();
    }

    #[tokio::test]
    async fn comparing_equal_payloads_scores_one() {
        let pool = DigestWorkerPool::spawn(2, &PluginRegistry::builtin(), &serde_json::Map::new()).unwrap();
        let payload = DigestPayload::compress(b"hello\nworld").unwrap();
        let pair = DigestPair {
            older_file_id: 1,
            newer_file_id: 2,
            digest_type: "plaintext".to_string(),
            older_payload: payload.clone(),
            newer_payload: payload,
        };
        let response = pool.compare(pair).await.unwrap();
        let score = response.similarity.unwrap();
        assert!((score - 1.0).abs() < f64::EPSILON);
        pool.shutdown();
    }

    #[tokio::test]
    async fn unknown_digest_type_yields_an_error_response() {
        let pool = DigestWorkerPool::spawn(1, &PluginRegistry::builtin(), &serde_json::Map::new()).unwrap();
        let payload = DigestPayload::compress(b"x").unwrap();
        let pair = DigestPair {
            older_file_id: 1,
            newer_file_id: 2,
            digest_type: "no-such-type".to_string(),
            older_payload: payload.clone(),
            newer_payload: payload,
        };
        let response = pool.compare(pair).await.unwrap();
        assert!(response.similarity.is_err());
        pool.shutdown();
    }
}
