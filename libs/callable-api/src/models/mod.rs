//! Callable endpoint models

use serde::{Deserialize, Serialize};

/// Request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallableRequest<T> {
    pub data: T,
}

/// Success envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallableResponse<T> {
    pub result: T,
}

/// Failure envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallableErrorResponse {
    pub error: CallableErrorBody,
}

/// Failure details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallableErrorBody {
    /// Canonical status, e.g. `PERMISSION_DENIED`
    pub status: String,
    pub message: String,
}

/// Deploy request payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub agent_id: String,
}

/// Deploy result payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResponse {
    pub success: bool,
    pub agent_id: String,
    pub deployment_name: String,
}

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}
