//! Deployment record models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an agent's deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Registered, never deployed
    Created,

    /// A deploy attempt is in flight
    Deploying,

    /// Last attempt finished successfully
    Deployed,

    /// Last attempt failed
    DeploymentFailed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Created => "created",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::DeploymentFailed => "deployment_failed",
        }
    }

    /// Parse a stored status. Unknown values are treated as `Created`.
    pub fn from_stored(value: &str) -> Self {
        match value {
            "deploying" => DeploymentStatus::Deploying,
            "deployed" => DeploymentStatus::Deployed,
            "deployment_failed" => DeploymentStatus::DeploymentFailed,
            _ => DeploymentStatus::Created,
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted deployment state of one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub agent_id: String,

    /// User that owns the agent
    pub owner_id: String,

    pub status: DeploymentStatus,

    pub deployment_started: Option<DateTime<Utc>>,

    pub deployment_completed: Option<DateTime<Utc>>,

    /// Workload name, set when a deploy succeeds
    pub kubernetes_deployment: Option<String>,

    /// Message of the last failed attempt
    pub error: Option<String>,

    /// Opaque version token assigned by the store
    pub revision: String,
}

impl DeploymentRecord {
    /// A freshly registered record
    pub fn new(agent_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            owner_id: owner_id.into(),
            status: DeploymentStatus::Created,
            deployment_started: None,
            deployment_completed: None,
            kubernetes_deployment: None,
            error: None,
            revision: String::new(),
        }
    }

    pub fn is_owned_by(&self, uid: &str) -> bool {
        !self.owner_id.is_empty() && self.owner_id == uid
    }
}

/// A timestamp to write: the store's clock or an explicit value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTimestamp {
    ServerTimestamp,
    Value(DateTime<Utc>),
}

/// Partial update of a deployment record; `None` fields are left untouched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub status: DeploymentStatus,
    pub deployment_started: Option<FieldTimestamp>,
    pub deployment_completed: Option<FieldTimestamp>,
    pub kubernetes_deployment: Option<String>,
    pub error: Option<String>,
}

impl RecordUpdate {
    /// Start of an attempt
    pub fn deploying() -> Self {
        Self {
            status: DeploymentStatus::Deploying,
            deployment_started: Some(FieldTimestamp::ServerTimestamp),
            deployment_completed: None,
            kubernetes_deployment: None,
            error: None,
        }
    }

    /// Successful end of an attempt
    pub fn deployed(deployment_name: impl Into<String>) -> Self {
        Self {
            status: DeploymentStatus::Deployed,
            deployment_started: None,
            deployment_completed: Some(FieldTimestamp::ServerTimestamp),
            kubernetes_deployment: Some(deployment_name.into()),
            error: None,
        }
    }

    /// Failed end of an attempt
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: DeploymentStatus::DeploymentFailed,
            deployment_started: None,
            deployment_completed: None,
            kubernetes_deployment: None,
            error: Some(message.into()),
        }
    }

    /// Names of the fields this update writes
    pub fn field_paths(&self) -> Vec<&'static str> {
        let mut paths = vec!["status"];
        if self.deployment_started.is_some() {
            paths.push("deploymentStarted");
        }
        if self.deployment_completed.is_some() {
            paths.push("deploymentCompleted");
        }
        if self.kubernetes_deployment.is_some() {
            paths.push("kubernetesDeployment");
        }
        if self.error.is_some() {
            paths.push("error");
        }
        paths
    }
}
