//! Error types for the Moodle client.

use thiserror::Error;

/// Classification of an application-level error reported by the server.
///
/// Moodle signals errors inside an HTTP 200 response, as a JSON object with
/// an `exception` field and a machine-readable `errorcode`. Only a handful of
/// codes need individual handling; everything else is [`RemoteErrorKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The token has expired or was revoked; a fresh login usually fixes it.
    InvalidToken,
    /// Missing permission or capability for the operation.
    AccessDenied,
    /// A malformed parameter. Moodle never says which one.
    InvalidParameter,
    /// Any other errorcode.
    Other,
}

impl RemoteErrorKind {
    /// Classify a raw `errorcode` string.
    pub fn from_errorcode(errorcode: &str) -> Self {
        match errorcode {
            "invalidtoken" => Self::InvalidToken,
            "accessexception" => Self::AccessDenied,
            "invalidparameter" => Self::InvalidParameter,
            _ => Self::Other,
        }
    }
}

/// Errors produced by [`MoodleClient`](crate::MoodleClient).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MoodleError {
    /// The server reported an application-level error.
    #[error("moodle error [{errorcode}] {message} (url: {url})")]
    Remote {
        kind: RemoteErrorKind,
        errorcode: String,
        message: String,
        url: String,
    },

    /// The server answered with an HTTP error status and no JSON error body.
    #[error("server responded with status {status} (url: {url})")]
    Http { status: u16, url: String },

    /// Network- or protocol-level failure below the Moodle dialect.
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response was syntactically valid JSON but did not match the
    /// expected schema for the called function.
    #[error("unexpected response shape from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The response was structurally missing something the protocol
    /// requires, e.g. no `token` key in a login response.
    #[error("protocol violation from {url}: {message}")]
    Protocol { url: String, message: String },
}

impl MoodleError {
    /// Build a [`MoodleError::Remote`] from an error-response JSON object.
    pub(crate) fn from_error_response(url: &str, body: &serde_json::Value) -> Self {
        let errorcode = body
            .get("errorcode")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let message = body
            .get("message")
            .or_else(|| body.get("error"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Self::Remote {
            kind: RemoteErrorKind::from_errorcode(&errorcode),
            errorcode,
            message,
            url: url.to_string(),
        }
    }

    /// Whether this is the token-expired error that warrants a re-login.
    pub fn is_invalid_token(&self) -> bool {
        matches!(
            self,
            Self::Remote {
                kind: RemoteErrorKind::InvalidToken,
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, MoodleError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn errorcode_classification() {
        assert_eq!(
            RemoteErrorKind::from_errorcode("invalidtoken"),
            RemoteErrorKind::InvalidToken
        );
        assert_eq!(
            RemoteErrorKind::from_errorcode("accessexception"),
            RemoteErrorKind::AccessDenied
        );
        assert_eq!(
            RemoteErrorKind::from_errorcode("invalidparameter"),
            RemoteErrorKind::InvalidParameter
        );
        assert_eq!(
            RemoteErrorKind::from_errorcode("generalexceptionmessage"),
            RemoteErrorKind::Other
        );
    }

    #[test]
    fn error_response_carries_code_message_and_url() {
        let body = json!({
            "exception": "moodle_exception",
            "errorcode": "invalidtoken",
            "message": "Invalid token - token expired"
        });
        let err = MoodleError::from_error_response("https://moodle.test/ws", &body);
        assert!(err.is_invalid_token());
        let text = err.to_string();
        assert!(text.contains("invalidtoken"));
        assert!(text.contains("token expired"));
        assert!(text.contains("https://moodle.test/ws"));
    }
}
