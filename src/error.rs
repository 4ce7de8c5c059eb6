use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum IpatoolWebError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plist error: {0}")]
    Plist(#[from] plist::Error),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("ipatool is not installed or not in PATH ({0})")]
    ToolNotFound(PathBuf),

    #[error("ipatool command timed out after {0}s")]
    ToolTimeout(u64),

    #[error("ipatool failed with {}: {}", exit_label(.status), .stderr)]
    ToolFailed { status: Option<i32>, stderr: String },

    #[error("No .ipa file found after download in {0}")]
    NoArtifactProduced(PathBuf),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}

impl IpatoolWebError {
    /// Stderr captured from a failed tool run, already redacted.
    pub fn tool_stderr(&self) -> Option<&str> {
        match self {
            IpatoolWebError::ToolFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, IpatoolWebError>;

/// Failure of one HTTP operation.
///
/// The same tool failure means different things depending on the
/// operation: a rejected login is a 401, a failed search is a 500. The
/// orchestrator picks the variant, this type picks the status and body.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Authentication failed")]
    AuthenticationFailed(#[source] IpatoolWebError),

    #[error("Search failed")]
    SearchFailed(#[source] IpatoolWebError),

    #[error("Download failed")]
    DownloadFailed(#[source] IpatoolWebError),

    #[error("{0}")]
    NotFound(&'static str),

    #[error("Internal server error")]
    Internal(#[source] IpatoolWebError),
}

impl ApiError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SearchFailed(_) | Self::DownloadFailed(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable tag for the `code` field of the error body.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::AuthenticationFailed(_) => "auth_failed",
            Self::SearchFailed(_) => "search_failed",
            Self::DownloadFailed(_) => "download_failed",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal",
        }
    }

    /// Human-readable cause. Tool stderr inside it is already redacted.
    pub fn details(&self) -> Option<String> {
        match self {
            Self::AuthenticationFailed(e) | Self::SearchFailed(e) | Self::DownloadFailed(e) => {
                Some(e.to_string())
            }
            // Internal causes may hold local paths
            Self::InvalidInput(_) | Self::NotFound(_) | Self::Internal(_) => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::Internal(cause) => error!(error = %cause, "internal error"),
            Self::AuthenticationFailed(cause)
            | Self::SearchFailed(cause)
            | Self::DownloadFailed(cause) => error!(error = %cause, "{}", self),
            Self::InvalidInput(_) | Self::NotFound(_) => warn!(status = status.as_u16(), "{}", self),
        }

        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        if let Some(details) = self.details() {
            body["details"] = serde_json::Value::String(details);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failed_message_includes_status_and_stderr() {
        let err = IpatoolWebError::ToolFailed {
            status: Some(1),
            stderr: "bad credentials".to_string(),
        };
        assert_eq!(err.to_string(), "ipatool failed with exit code 1: bad credentials");
        assert_eq!(err.tool_stderr(), Some("bad credentials"));
    }

    #[test]
    fn signal_termination_is_labelled() {
        let err = IpatoolWebError::ToolFailed {
            status: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("killed by signal"));
    }

    #[test]
    fn api_error_status_codes() {
        assert_eq!(
            ApiError::InvalidInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::AuthenticationFailed(IpatoolWebError::ToolTimeout(1)).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::SearchFailed(IpatoolWebError::ToolNotFound("ipatool".into()))
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::DownloadFailed(IpatoolWebError::NoArtifactProduced("/tmp/x".into()))
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::NotFound("gone").status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn details_come_from_tool_failures_only() {
        let err = ApiError::SearchFailed(IpatoolWebError::ToolFailed {
            status: Some(1),
            stderr: "token expired".into(),
        });
        assert_eq!(err.code(), "search_failed");
        assert_eq!(
            err.details().as_deref(),
            Some("ipatool failed with exit code 1: token expired")
        );

        let err =
            ApiError::Internal(IpatoolWebError::NoArtifactProduced("/secret/path".into()));
        assert_eq!(err.details(), None);
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn timeout_reports_seconds() {
        let err = IpatoolWebError::ToolTimeout(300);
        assert_eq!(err.to_string(), "ipatool command timed out after 300s");
        assert_eq!(err.tool_stderr(), None);
    }
}
