//! Error types for the agent deployer

use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the agent deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{service} returned {status}: {message}")]
    Api {
        service: &'static str,
        status: u16,
        /// Canonical status from the error body, e.g. `FAILED_PRECONDITION`
        reason: Option<String>,
        message: String,
    },

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Agent {0} already has a deployment in progress")]
    AlreadyDeploying(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Build failed: {status}")]
    BuildFailure { build_id: String, status: String },

    #[error("Submission error: {0}")]
    Submission(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Rollout failed: {0}")]
    Readiness(String),

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployerError {
    /// Whether this is a remote precondition/contention failure
    pub fn is_conflict(&self) -> bool {
        match self {
            DeployerError::Api { status, reason, .. } => {
                matches!(status, 409 | 412)
                    || matches!(reason.as_deref(), Some("FAILED_PRECONDITION" | "ABORTED"))
            }
            _ => false,
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            DeployerError::HttpError(_) | DeployerError::TokenError(_) => true,
            DeployerError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether the remote resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, DeployerError::Api { status: 404, .. } | DeployerError::NotFound(_))
    }
}

/// Error kinds exposed at the callable boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Unauthenticated,
    PermissionDenied,
    InvalidArgument,
    FailedPrecondition,
    Internal,
}

impl ErrorKind {
    /// Canonical status string used in the error envelope
    pub fn canonical_status(&self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::InvalidArgument | ErrorKind::FailedPrecondition => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::FailedPrecondition => "failed-precondition",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The error a caller of the deploy operation sees
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct CallableError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CallableError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    /// Wrap a failure that happened after authorization succeeded
    pub fn deployment_failed(err: &DeployerError) -> Self {
        Self::new(ErrorKind::Internal, format!("Deployment failed: {}", err))
    }
}

/// Classify errors raised before any record was mutated
impl From<DeployerError> for CallableError {
    fn from(err: DeployerError) -> Self {
        match err {
            DeployerError::Unauthenticated(msg) => CallableError::unauthenticated(msg),
            DeployerError::PermissionDenied(msg) => CallableError::permission_denied(msg),
            DeployerError::InvalidArgument(msg) => CallableError::invalid_argument(msg),
            err @ DeployerError::AlreadyDeploying(_) => {
                CallableError::new(ErrorKind::FailedPrecondition, err.to_string())
            }
            other => CallableError::deployment_failed(&other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_errors_keep_their_kind() {
        let err: CallableError = DeployerError::PermissionDenied("nope".to_string()).into();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert_eq!(err.message, "nope");

        let err: CallableError = DeployerError::Unauthenticated("who".to_string()).into();
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
    }

    #[test]
    fn test_everything_else_is_internal() {
        let err: CallableError = DeployerError::BuildFailure {
            build_id: "b-1".to_string(),
            status: "FAILURE".to_string(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "Deployment failed: Build failed: FAILURE");
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(ErrorKind::PermissionDenied.to_string(), "permission-denied");
        assert_eq!(
            serde_json::to_string(&ErrorKind::FailedPrecondition).unwrap(),
            "\"failed-precondition\""
        );
        assert_eq!(ErrorKind::Unauthenticated.http_status(), StatusCode::UNAUTHORIZED);
    }
}
