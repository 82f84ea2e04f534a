//! The `/filecomp` router and its handler.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::queries::SimilarityQueries;

/// Raw query parameters; validated by hand so that every problem can be
/// reported at once instead of failing on the first.
#[derive(Debug, Default, Deserialize)]
struct RawSubmissionQuery {
    minratio: Option<String>,
    maxfiles: Option<String>,
    shownewer: Option<String>,
}

#[derive(Debug, PartialEq)]
struct SubmissionQuery {
    min_ratio: f64,
    max_files: i64,
    show_newer: bool,
}

impl RawSubmissionQuery {
    fn validate(self) -> Result<SubmissionQuery, Vec<String>> {
        let mut errors = Vec::new();

        let min_ratio = match self.minratio.as_deref() {
            None => 0.7,
            Some(raw) => match raw.parse::<f64>() {
                Ok(value) if (0.0..=1.0).contains(&value) => value,
                Ok(_) => {
                    errors.push("minratio must be between 0 and 1".to_string());
                    0.7
                }
                Err(_) => {
                    errors.push("minratio must be a number".to_string());
                    0.7
                }
            },
        };
        let max_files = match self.maxfiles.as_deref() {
            None => 5,
            Some(raw) => match raw.parse::<i64>() {
                Ok(value) if (1..=10).contains(&value) => value,
                Ok(_) => {
                    errors.push("maxfiles must be between 1 and 10".to_string());
                    5
                }
                Err(_) => {
                    errors.push("maxfiles must be an integer".to_string());
                    5
                }
            },
        };
        let show_newer = match self.shownewer.as_deref() {
            None => false,
            Some("true" | "1") => true,
            Some("false" | "0") => false,
            Some(_) => {
                errors.push("shownewer must be a boolean".to_string());
                false
            }
        };

        if errors.is_empty() {
            Ok(SubmissionQuery {
                min_ratio,
                max_files,
                show_newer,
            })
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Serialize)]
struct SimilarEntry {
    name: String,
    url: String,
    author: String,
    author_id: i64,
    similarity: f64,
}

#[derive(Debug, Serialize)]
struct WarningEntry {
    #[serde(rename = "type")]
    warning_type: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct FileEntry {
    known: bool,
    older: Vec<SimilarEntry>,
    newer: Vec<SimilarEntry>,
    warnings: Vec<WarningEntry>,
}

#[derive(Debug, Serialize)]
struct SubmissionResponse {
    files: BTreeMap<String, FileEntry>,
    errors: Vec<String>,
}

fn similar_entries(records: Vec<simscan_digests::SimilarFile>) -> Vec<SimilarEntry> {
    records
        .into_iter()
        .map(|record| SimilarEntry {
            name: record.file_name,
            url: record.file_url,
            author: record.user_name,
            author_id: record.user_id,
            similarity: record.similarity_score,
        })
        .collect()
}

async fn submission_info<S: SimilarityQueries>(
    State(queries): State<Arc<S>>,
    Path(submission_id): Path<i64>,
    Query(raw): Query<RawSubmissionQuery>,
) -> (StatusCode, Json<SubmissionResponse>) {
    let query = match raw.validate() {
        Ok(query) => query,
        Err(errors) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(SubmissionResponse {
                    files: BTreeMap::new(),
                    errors,
                }),
            );
        }
    };

    let result = async {
        let filenames = queries.submission_filenames(submission_id).await?;
        queries
            .files_by_submission(
                submission_id,
                &filenames,
                query.min_ratio,
                query.max_files,
                query.show_newer,
            )
            .await
    }
    .await;

    match result {
        Ok(details) => {
            let files = details
                .into_iter()
                .map(|d| {
                    (
                        d.name,
                        FileEntry {
                            known: d.is_known,
                            older: similar_entries(d.earlier_files),
                            newer: similar_entries(d.later_files),
                            warnings: d
                                .warnings
                                .into_iter()
                                .map(|w| WarningEntry {
                                    warning_type: w.warning_type,
                                    message: w.message,
                                })
                                .collect(),
                        },
                    )
                })
                .collect();
            (
                StatusCode::OK,
                Json(SubmissionResponse {
                    files,
                    errors: Vec::new(),
                }),
            )
        }
        Err(err) => {
            tracing::error!(submission = submission_id, error = %err,
                "similarity lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SubmissionResponse {
                    files: BTreeMap::new(),
                    errors: vec!["internal error".to_string()],
                }),
            )
        }
    }
}

/// Build the `/filecomp` router over any [`SimilarityQueries`] backend.
pub fn filecomp_router<S: SimilarityQueries + 'static>(queries: Arc<S>) -> Router {
    Router::new()
        .route("/filecomp/submission/:submission_id", get(submission_info::<S>))
        .with_state(queries)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use simscan_digests::{DigestError, FileDetails, FileWarningDetails, SimilarFile};
    use tower::ServiceExt;

    /// One submission (1001) with one file that has one older match.
    struct CannedQueries;

    #[async_trait]
    impl SimilarityQueries for CannedQueries {
        async fn submission_filenames(
            &self,
            submission_id: i64,
        ) -> Result<Vec<String>, DigestError> {
            Ok(if submission_id == 1001 {
                vec!["report.txt".to_string()]
            } else {
                Vec::new()
            })
        }

        async fn files_by_submission(
            &self,
            submission_id: i64,
            filenames: &[String],
            min_score: f64,
            _max_similar: i64,
            also_get_later_files: bool,
        ) -> Result<Vec<FileDetails>, DigestError> {
            assert_eq!(submission_id, 1001);
            assert_eq!(filenames, ["report.txt".to_string()]);
            let earlier = if min_score <= 0.86 {
                vec![SimilarFile {
                    submission_id: 1000,
                    user_id: 1,
                    user_name: "Alice Adams".to_string(),
                    file_name: "report.txt".to_string(),
                    file_url: "https://moodle.test/pluginfile.php/1000/report.txt".to_string(),
                    similarity_score: 0.86,
                }]
            } else {
                Vec::new()
            };
            assert!(!also_get_later_files);
            Ok(vec![FileDetails {
                name: "report.txt".to_string(),
                is_known: true,
                earlier_files: earlier,
                later_files: Vec::new(),
                warnings: vec![FileWarningDetails {
                    warning_type: "encoding".to_string(),
                    message: "file is not valid utf-8".to_string(),
                }],
            }])
        }
    }

    async fn call(uri: &str) -> (StatusCode, serde_json::Value) {
        let app = filecomp_router(Arc::new(CannedQueries));
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn valid_query_serves_the_file_map() {
        let (status, body) =
            call("/filecomp/submission/1001?minratio=0.5&maxfiles=5&shownewer=false").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["errors"], serde_json::json!([]));
        let entry = &body["files"]["report.txt"];
        assert_eq!(entry["known"], true);
        assert_eq!(entry["older"][0]["author"], "Alice Adams");
        assert_eq!(entry["older"][0]["author_id"], 1);
        assert_eq!(entry["older"][0]["similarity"], 0.86);
        assert_eq!(entry["newer"], serde_json::json!([]));
        assert_eq!(entry["warnings"][0]["type"], "encoding");
    }

    #[tokio::test]
    async fn defaults_apply_when_no_query_is_given() {
        let (status, body) = call("/filecomp/submission/1001").await;
        assert_eq!(status, StatusCode::OK);
        // Default minratio 0.7 still admits the 0.86 match.
        assert_eq!(body["files"]["report.txt"]["older"][0]["similarity"], 0.86);
    }

    #[tokio::test]
    async fn high_minratio_filters_matches_out() {
        let (status, body) = call("/filecomp/submission/1001?minratio=0.95").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["files"]["report.txt"]["older"],
            serde_json::json!([])
        );
    }

    #[tokio::test]
    async fn invalid_parameters_get_a_422_with_all_messages() {
        let (status, body) =
            call("/filecomp/submission/1001?minratio=1.5&maxfiles=0&shownewer=maybe").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["files"], serde_json::json!({}));
        let errors = body["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].as_str().unwrap().contains("minratio"));
        assert!(errors[1].as_str().unwrap().contains("maxfiles"));
        assert!(errors[2].as_str().unwrap().contains("shownewer"));
    }

    #[tokio::test]
    async fn unknown_submission_serves_an_empty_map() {
        let (status, body) = call("/filecomp/submission/424242").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"], serde_json::json!({}));
        assert_eq!(body["errors"], serde_json::json!([]));
    }
}
