//! Cloud Build REST v1 client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::build::ImageBuilder;
use crate::errors::DeployerError;
use crate::http::ApiClient;
use crate::models::{BuildHandle, BuildResult, BuildSpec, BuildStatus, BuildStep, StorageSource};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<Source<'a>>,
    steps: &'a [BuildStep],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    images: &'a [String],
    timeout: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Source<'a> {
    storage_source: &'a StorageSource,
}

/// Long-running operation returned by a build submission
#[derive(Debug, Deserialize)]
struct Operation {
    #[serde(default)]
    metadata: Option<OperationMetadata>,
}

#[derive(Debug, Deserialize)]
struct OperationMetadata {
    build: Option<Build>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Build {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    status_detail: Option<String>,
    #[serde(default)]
    log_url: Option<String>,
}

/// Image builder backed by Cloud Build
pub struct CloudBuildClient {
    client: ApiClient,
    project_id: String,
}

impl CloudBuildClient {
    pub fn new(client: ApiClient, project_id: &str) -> Self {
        Self {
            client,
            project_id: project_id.to_string(),
        }
    }

    fn builds_path(&self) -> String {
        format!("/projects/{}/builds", self.project_id)
    }
}

#[async_trait]
impl ImageBuilder for CloudBuildClient {
    async fn submit(&self, spec: &BuildSpec) -> Result<BuildHandle, DeployerError> {
        let request = BuildRequest {
            source: spec.source.as_ref().map(|s| Source { storage_source: s }),
            steps: &spec.steps,
            images: &spec.images,
            timeout: format!("{}s", spec.timeout.as_secs()),
        };

        let operation: Operation = self.client.post(&self.builds_path(), &request).await?;
        let build = operation
            .metadata
            .and_then(|m| m.build)
            .ok_or_else(|| {
                DeployerError::Submission("build operation carries no build metadata".to_string())
            })?;

        info!("Submitted build {}", build.id);
        Ok(BuildHandle {
            id: build.id,
            log_url: build.log_url,
        })
    }

    async fn status(&self, handle: &BuildHandle) -> Result<BuildResult, DeployerError> {
        let path = format!("{}/{}", self.builds_path(), handle.id);
        let build: Build = self.client.get(&path).await?;
        Ok(BuildResult {
            id: build.id,
            status: BuildStatus::parse(build.status.as_deref().unwrap_or("STATUS_UNKNOWN")),
            status_detail: build.status_detail,
            log_url: build.log_url.or_else(|| handle.log_url.clone()),
        })
    }

    async fn cancel(&self, handle: &BuildHandle) -> Result<(), DeployerError> {
        let path = format!("{}/{}:cancel", self.builds_path(), handle.id);
        let _: serde_json::Value = self.client.post(&path, &serde_json::json!({})).await?;
        Ok(())
    }
}
