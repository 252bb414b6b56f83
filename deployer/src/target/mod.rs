//! Orchestration targets: where workload descriptors are applied

pub mod build_job;
pub mod cluster;
pub mod kubernetes;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::settings::ReadinessSettings;
use crate::errors::DeployerError;
use crate::models::{DeploymentDescriptor, RolloutStatus};

pub use build_job::BuildJobTarget;
pub use cluster::{ClusterConnection, ClusterResolver};
pub use kubernetes::KubernetesTarget;

/// How descriptors reach the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyMode {
    /// Server-side apply against the cluster API
    #[default]
    Direct,

    /// A build job running kubectl
    BuildJob,
}

/// A workload orchestrator accepting deployment descriptors
#[async_trait]
pub trait OrchestrationTarget: Send + Sync {
    /// Create or update the workload described by `descriptor`
    async fn apply(&self, descriptor: &DeploymentDescriptor) -> Result<(), DeployerError>;

    /// Rollout progress of a workload; `None` when it does not exist
    async fn rollout_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RolloutStatus>, DeployerError>;

    /// Whether `rollout_status` is available on this target
    fn supports_rollout_status(&self) -> bool;
}

/// Bounds of a rollout wait
#[derive(Debug, Clone)]
pub struct RolloutOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for RolloutOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

impl From<&ReadinessSettings> for RolloutOptions {
    fn from(settings: &ReadinessSettings) -> Self {
        Self {
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

/// Wait until a workload's rollout completes
pub async fn wait_for_rollout(
    target: &dyn OrchestrationTarget,
    namespace: &str,
    name: &str,
    options: &RolloutOptions,
    cancel: &CancellationToken,
) -> Result<RolloutStatus, DeployerError> {
    let deadline = Instant::now() + options.timeout;

    loop {
        match target.rollout_status(namespace, name).await {
            Ok(Some(status)) => {
                if let Some(failure) = &status.failure {
                    return Err(DeployerError::Readiness(failure.clone()));
                }
                if status.is_complete() {
                    info!(
                        "Rollout of {}/{} complete ({} available)",
                        namespace, name, status.available_replicas
                    );
                    return Ok(status);
                }
                debug!(
                    "Rollout of {}/{}: {}/{} updated, {}/{} available",
                    namespace,
                    name,
                    status.updated_replicas,
                    status.replicas,
                    status.available_replicas,
                    status.replicas
                );
            }
            Ok(None) => debug!("Workload {}/{} not visible yet", namespace, name),
            Err(e) if e.is_transient() => warn!("Failed to read rollout of {}/{}: {}", namespace, name, e),
            Err(e) => return Err(e),
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                return Err(DeployerError::Readiness(format!(
                    "{} did not become available within {}s",
                    name,
                    options.timeout.as_secs()
                )));
            }
            _ = cancel.cancelled() => {
                return Err(DeployerError::Cancelled(format!("rollout of {}", name)));
            }
            _ = tokio::time::sleep(options.poll_interval) => {}
        }
    }
}
