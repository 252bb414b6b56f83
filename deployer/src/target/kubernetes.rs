//! Direct apply against the Kubernetes API

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::info;

use crate::authn::AccessTokenProvider;
use crate::errors::DeployerError;
use crate::http::ApiClient;
use crate::models::{DeploymentDescriptor, RolloutStatus};
use crate::target::{ClusterResolver, OrchestrationTarget};

const APPLY_PATCH_CONTENT_TYPE: &str = "application/apply-patch+yaml";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Deployment {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    spec: Spec,
    #[serde(default)]
    status: Status,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    generation: i64,
}

#[derive(Debug, Deserialize)]
struct Spec {
    #[serde(default = "one")]
    replicas: i64,
}

impl Default for Spec {
    fn default() -> Self {
        Self { replicas: one() }
    }
}

fn one() -> i64 {
    1
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    #[serde(default)]
    observed_generation: i64,
    #[serde(default)]
    updated_replicas: i64,
    #[serde(default)]
    available_replicas: i64,
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl From<Deployment> for RolloutStatus {
    fn from(deployment: Deployment) -> Self {
        let failure = deployment
            .status
            .conditions
            .iter()
            .find(|c| {
                c.kind == "Progressing"
                    && c.status == "False"
                    && c.reason.as_deref() == Some("ProgressDeadlineExceeded")
            })
            .map(|c| {
                c.message
                    .clone()
                    .unwrap_or_else(|| "ProgressDeadlineExceeded".to_string())
            });

        RolloutStatus {
            generation: deployment.metadata.generation,
            observed_generation: deployment.status.observed_generation,
            replicas: deployment.spec.replicas,
            updated_replicas: deployment.status.updated_replicas,
            available_replicas: deployment.status.available_replicas,
            failure,
        }
    }
}

/// Applies descriptors with server-side apply
pub struct KubernetesTarget {
    resolver: ClusterResolver,
    tokens: Arc<dyn AccessTokenProvider>,
    field_manager: String,

    /// Client for the API server, created on first use
    api: OnceCell<ApiClient>,
}

impl KubernetesTarget {
    pub fn new(
        resolver: ClusterResolver,
        tokens: Arc<dyn AccessTokenProvider>,
        field_manager: &str,
    ) -> Self {
        Self {
            resolver,
            tokens,
            field_manager: field_manager.to_string(),
            api: OnceCell::new(),
        }
    }

    async fn api(&self) -> Result<&ApiClient, DeployerError> {
        self.api
            .get_or_try_init(|| async {
                let connection = self.resolver.resolve().await?;
                let client = connection.http_client()?;
                Ok(ApiClient::with_client(
                    "Kubernetes",
                    &connection.endpoint,
                    self.tokens.clone(),
                    client,
                ))
            })
            .await
    }

    fn deployment_path(namespace: &str, name: &str) -> String {
        format!("/apis/apps/v1/namespaces/{}/deployments/{}", namespace, name)
    }
}

#[async_trait]
impl OrchestrationTarget for KubernetesTarget {
    async fn apply(&self, descriptor: &DeploymentDescriptor) -> Result<(), DeployerError> {
        let body = serde_json::to_vec(descriptor)?;
        let path = Self::deployment_path(descriptor.namespace(), descriptor.name());

        let _: serde_json::Value = self
            .api()
            .await?
            .patch_with_content_type(
                &path,
                &[("fieldManager", self.field_manager.as_str()), ("force", "true")],
                APPLY_PATCH_CONTENT_TYPE,
                body,
            )
            .await?;

        info!(
            "Applied deployment {}/{}",
            descriptor.namespace(),
            descriptor.name()
        );
        Ok(())
    }

    async fn rollout_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RolloutStatus>, DeployerError> {
        let deployment: Option<Deployment> = self
            .api()
            .await?
            .get_optional(&Self::deployment_path(namespace, name))
            .await?;
        Ok(deployment.map(RolloutStatus::from))
    }

    fn supports_rollout_status(&self) -> bool {
        true
    }
}
