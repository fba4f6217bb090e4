//! Airgapperd's error taxonomy (spec §7).
//!
//! Internal errors are logged with full detail via `tracing::error!` and
//! rendered to HTTP clients as a sanitized, generic message — never the raw
//! `Display` text, which may contain filesystem paths or other internals.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// An error surfaced by the core engine or its HTTP adapter.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// The server has not been started (or has been shut down).
    #[error("server is not available")]
    Unavailable,

    /// A malformed request: bad naming, hash mismatch, and the like.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The authorizer denied an operation, or a write-once resource exists.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The requested resource does not exist.
    #[error("not found")]
    NotFound,

    /// A quota or disk-space admission check failed.
    #[error("insufficient capacity: {0}")]
    Capacity(String),

    /// An unexpected I/O or internal failure. The inner string is for logs
    /// only; it is never sent to the client verbatim.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DaemonError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Capacity(_) => StatusCode::INSUFFICIENT_STORAGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message that may safely reach an HTTP client.
    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_string(),
            other => sanitize(&other.to_string()),
        }
    }
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        (self.status(), self.client_message()).into_response()
    }
}

impl From<std::io::Error> for DaemonError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err)
    }
}

/// Strip path-shaped and secret-shaped substrings from an error message
/// before it is allowed to reach a client.
fn sanitize(message: &str) -> String {
    message
        .split_whitespace()
        .map(|word| {
            if looks_like_path(word) || looks_like_secret(word) {
                "[redacted]"
            } else {
                word
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn looks_like_path(word: &str) -> bool {
    word.starts_with('/') || word.starts_with("./") || word.contains("..")
}

fn looks_like_secret(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    lower.contains("key=") || lower.contains("token=") || lower.contains("secret=")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_message_never_leaks_detail() {
        let err = DaemonError::internal("failed to open /etc/airgapper/secret-key.pem");
        assert_eq!(err.client_message(), "internal error");
    }

    #[test]
    fn bad_request_sanitizes_paths() {
        let err = DaemonError::BadRequest("invalid name /etc/passwd".to_string());
        assert!(!err.client_message().contains("/etc/passwd"));
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(DaemonError::Unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(DaemonError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            DaemonError::Capacity("full".into()).status(),
            StatusCode::INSUFFICIENT_STORAGE
        );
    }
}
