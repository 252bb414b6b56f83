//! Apply through a kubectl build job

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::build::{await_completion, require_success, ImageBuilder, WaitOptions};
use crate::config::settings::ClusterSettings;
use crate::errors::DeployerError;
use crate::models::{BuildSpec, BuildStep, DeploymentDescriptor, RolloutStatus};
use crate::target::OrchestrationTarget;

/// Entry point of the kubectl builder; it fetches cluster credentials from
/// the `CLOUDSDK_*` environment before running kubectl
const KUBECTL_WRAPPER: &str = "/builder/kubectl.bash";

/// Applies descriptors by running kubectl inside a build job
pub struct BuildJobTarget {
    builder: Arc<dyn ImageBuilder>,
    kubectl_image: String,
    zone: String,
    cluster: String,
    wait: WaitOptions,
    cancel: CancellationToken,
}

impl BuildJobTarget {
    pub fn new(
        builder: Arc<dyn ImageBuilder>,
        settings: &ClusterSettings,
        wait: WaitOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            builder,
            kubectl_image: settings.kubectl_image.clone(),
            zone: settings.location.clone(),
            cluster: settings.name.clone(),
            wait,
            cancel,
        }
    }

    fn apply_spec(&self, descriptor: &DeploymentDescriptor) -> Result<BuildSpec, DeployerError> {
        let manifest = serde_json::to_string(descriptor)?;
        let script = format!(
            "#!/usr/bin/env bash\nset -euo pipefail\n{} apply -f - <<'MANIFEST'\n{}\nMANIFEST\n",
            KUBECTL_WRAPPER, manifest
        );

        Ok(BuildSpec {
            source: None,
            steps: vec![BuildStep {
                name: self.kubectl_image.clone(),
                args: vec![],
                env: vec![
                    format!("CLOUDSDK_COMPUTE_ZONE={}", self.zone),
                    format!("CLOUDSDK_CONTAINER_CLUSTER={}", self.cluster),
                ],
                script: Some(script),
            }],
            images: vec![],
            timeout: self.wait.timeout,
        })
    }
}

#[async_trait]
impl OrchestrationTarget for BuildJobTarget {
    async fn apply(&self, descriptor: &DeploymentDescriptor) -> Result<(), DeployerError> {
        let spec = self.apply_spec(descriptor)?;
        let handle = self.builder.submit(&spec).await?;
        info!(
            "Submitted apply job {} for {}/{}",
            handle.id,
            descriptor.namespace(),
            descriptor.name()
        );

        let result = await_completion(self.builder.as_ref(), &handle, &self.wait, &self.cancel).await?;
        require_success(result)?;
        Ok(())
    }

    async fn rollout_status(
        &self,
        _namespace: &str,
        _name: &str,
    ) -> Result<Option<RolloutStatus>, DeployerError> {
        Err(DeployerError::Internal(
            "rollout status is not available through build jobs".to_string(),
        ))
    }

    fn supports_rollout_status(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::deploy::descriptor::agent_descriptor;
    use crate::config::settings::WorkloadSettings;
    use crate::models::{BuildHandle, BuildResult, BuildStatus};

    struct RecordingBuilder {
        submitted: Mutex<Vec<BuildSpec>>,
        status: BuildStatus,
    }

    #[async_trait]
    impl ImageBuilder for RecordingBuilder {
        async fn submit(&self, spec: &BuildSpec) -> Result<BuildHandle, DeployerError> {
            self.submitted.lock().unwrap().push(spec.clone());
            Ok(BuildHandle {
                id: "apply-1".to_string(),
                log_url: None,
            })
        }

        async fn status(&self, handle: &BuildHandle) -> Result<BuildResult, DeployerError> {
            Ok(BuildResult {
                id: handle.id.clone(),
                status: self.status.clone(),
                status_detail: None,
                log_url: None,
            })
        }

        async fn cancel(&self, _handle: &BuildHandle) -> Result<(), DeployerError> {
            Ok(())
        }
    }

    fn setup(status: BuildStatus) -> (Arc<RecordingBuilder>, BuildJobTarget) {
        let builder = Arc::new(RecordingBuilder {
            submitted: Mutex::new(vec![]),
            status,
        });
        let target = BuildJobTarget::new(
            builder.clone(),
            &ClusterSettings::default(),
            WaitOptions::default(),
            CancellationToken::new(),
        );
        (builder, target)
    }

    fn descriptor() -> DeploymentDescriptor {
        agent_descriptor(
            &WorkloadSettings::default(),
            "trading-agents",
            "trading-agent-a1",
            "gcr.io/proj/trading-agent-a1",
            "a1",
        )
    }

    #[tokio::test]
    async fn test_apply_runs_kubectl_job() {
        let (builder, target) = setup(BuildStatus::Success);
        target.apply(&descriptor()).await.unwrap();

        let submitted = builder.submitted.lock().unwrap();
        let step = &submitted[0].steps[0];
        assert_eq!(step.name, "gcr.io/cloud-builders/kubectl");
        assert_eq!(
            step.env,
            vec![
                "CLOUDSDK_COMPUTE_ZONE=us-central1",
                "CLOUDSDK_CONTAINER_CLUSTER=trading-cluster"
            ]
        );
        let script = step.script.as_deref().unwrap();
        assert!(script.contains("/builder/kubectl.bash apply -f -"));
        assert!(script.contains(r#""name":"trading-agent-a1""#));
        assert!(submitted[0].source.is_none());
        assert!(!target.supports_rollout_status());
    }

    #[tokio::test]
    async fn test_failed_apply_job() {
        let (_, target) = setup(BuildStatus::Failure);
        let err = target.apply(&descriptor()).await.unwrap_err();
        assert_eq!(err.to_string(), "Build failed: FAILURE");
    }
}
