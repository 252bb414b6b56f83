//! Typed workload manifest
//!
//! The descriptor is built programmatically and serialized only when it is
//! handed to the cluster, so agent-supplied values can never alter its
//! structure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;

pub const DEPLOYMENT_API_VERSION: &str = "apps/v1";
pub const DEPLOYMENT_KIND: &str = "Deployment";

/// A `apps/v1` Deployment manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentDescriptor {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: DeploymentSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    pub replicas: u32,
    pub selector: LabelSelector,
    pub template: PodTemplateSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTemplateSpec {
    pub metadata: ObjectMeta,
    pub spec: PodSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    pub resources: ResourceRequirements,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

impl EnvVar {
    /// An environment variable read from a key of a cluster secret
    pub fn from_secret(name: &str, secret: &str, key: &str) -> Self {
        Self {
            name: name.to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: SecretKeySelector {
                    name: secret.to_string(),
                    key: key.to_string(),
                },
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    pub secret_key_ref: SecretKeySelector,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

impl DeploymentDescriptor {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// Image of the first container
    pub fn image(&self) -> Option<&str> {
        self.spec
            .template
            .spec
            .containers
            .first()
            .map(|c| c.image.as_str())
    }

    /// Structural checks run before the descriptor is submitted
    pub fn validate(&self) -> Result<(), DeployerError> {
        let invalid = |msg: String| Err(DeployerError::Internal(format!("Invalid manifest: {}", msg)));

        if self.api_version != DEPLOYMENT_API_VERSION || self.kind != DEPLOYMENT_KIND {
            return invalid(format!("unexpected type {}/{}", self.api_version, self.kind));
        }
        if !is_dns1123_label(&self.metadata.name) {
            return invalid(format!("name '{}' is not a DNS-1123 label", self.metadata.name));
        }
        if let Some(ns) = &self.metadata.namespace {
            if !is_dns1123_label(ns) {
                return invalid(format!("namespace '{}' is not a DNS-1123 label", ns));
            }
        }
        if self.spec.replicas == 0 {
            return invalid("replicas must be at least 1".to_string());
        }
        if self.spec.selector.match_labels.is_empty() {
            return invalid("selector has no labels".to_string());
        }
        for (key, value) in &self.spec.selector.match_labels {
            if self.spec.template.metadata.labels.get(key) != Some(value) {
                return invalid(format!("selector label {}={} missing from template", key, value));
            }
        }
        if self.spec.template.spec.containers.is_empty() {
            return invalid("no containers".to_string());
        }
        for container in &self.spec.template.spec.containers {
            if container.image.trim().is_empty() {
                return invalid(format!("container '{}' has no image", container.name));
            }
            for env in &container.env {
                if env.value.is_some() == env.value_from.is_some() {
                    return invalid(format!(
                        "env var {} must have exactly one of value or valueFrom",
                        env.name
                    ));
                }
            }
        }
        Ok(())
    }
}

/// RFC 1123 label: lowercase alphanumerics and '-', at most 63 chars
pub fn is_dns1123_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}

/// Progress of a workload rollout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloutStatus {
    pub generation: i64,
    pub observed_generation: i64,

    /// Desired replicas
    pub replicas: i64,
    pub updated_replicas: i64,
    pub available_replicas: i64,

    /// Set when the cluster reports the rollout cannot progress
    pub failure: Option<String>,
}

impl RolloutStatus {
    pub fn is_complete(&self) -> bool {
        self.observed_generation >= self.generation
            && self.updated_replicas >= self.replicas
            && self.available_replicas >= self.replicas
    }
}
