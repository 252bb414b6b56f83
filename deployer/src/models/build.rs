//! Build job models

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Location of an uploaded source archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSource {
    pub bucket: String,
    pub object: String,
}

/// One step of a build job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    /// Builder image that runs the step
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// `KEY=value` pairs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

/// A build job to submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub source: Option<StorageSource>,
    pub steps: Vec<BuildStep>,

    /// Images pushed when the job succeeds
    pub images: Vec<String>,

    /// Limit enforced by the build service itself
    pub timeout: Duration,
}

/// Reference to a submitted build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildHandle {
    pub id: String,
    pub log_url: Option<String>,
}

/// Status of a build job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildStatus {
    Pending,
    Queued,
    Working,
    Success,
    Failure,
    InternalError,
    Timeout,
    Cancelled,
    Expired,
    /// A value this client does not know; treated as still running
    Other(String),
}

impl BuildStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "PENDING" => BuildStatus::Pending,
            "QUEUED" => BuildStatus::Queued,
            "WORKING" => BuildStatus::Working,
            "SUCCESS" => BuildStatus::Success,
            "FAILURE" => BuildStatus::Failure,
            "INTERNAL_ERROR" => BuildStatus::InternalError,
            "TIMEOUT" => BuildStatus::Timeout,
            "CANCELLED" => BuildStatus::Cancelled,
            "EXPIRED" => BuildStatus::Expired,
            other => BuildStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BuildStatus::Pending => "PENDING",
            BuildStatus::Queued => "QUEUED",
            BuildStatus::Working => "WORKING",
            BuildStatus::Success => "SUCCESS",
            BuildStatus::Failure => "FAILURE",
            BuildStatus::InternalError => "INTERNAL_ERROR",
            BuildStatus::Timeout => "TIMEOUT",
            BuildStatus::Cancelled => "CANCELLED",
            BuildStatus::Expired => "EXPIRED",
            BuildStatus::Other(value) => value,
        }
    }

    /// No further state change will happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success
                | BuildStatus::Failure
                | BuildStatus::InternalError
                | BuildStatus::Timeout
                | BuildStatus::Cancelled
                | BuildStatus::Expired
        )
    }

    pub fn is_success(&self) -> bool {
        *self == BuildStatus::Success
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed state of a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub id: String,
    pub status: BuildStatus,
    pub status_detail: Option<String>,
    pub log_url: Option<String>,
}
