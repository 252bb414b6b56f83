//! Deployer settings
//!
//! Settings come from an optional JSON file and are then overridden by the
//! process environment. Every field has a default except the project id and
//! the token-signing secret, which must be supplied.

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::deploy::orchestrator::{ConcurrencyPolicy, ReadinessMode};
use crate::errors::DeployerError;
use crate::logs::LogLevel;
use crate::target::ApplyMode;

/// Deployer settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Cloud project that owns the registry, builds, and cluster
    #[serde(default)]
    pub project_id: String,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub records: RecordSettings,

    #[serde(default)]
    pub build: BuildSettings,

    #[serde(default)]
    pub cluster: ClusterSettings,

    #[serde(default)]
    pub workload: WorkloadSettings,

    #[serde(default)]
    pub readiness: ReadinessSettings,

    #[serde(default)]
    pub concurrency: ConcurrencySettings,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub gcp: GcpSettings,
}

impl Settings {
    /// Load settings from an optional JSON file plus the process environment
    pub async fn load(path: Option<&Path>) -> Result<Self, DeployerError> {
        let mut settings = match path {
            Some(path) => {
                let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
                    DeployerError::ConfigError(format!(
                        "Unable to read settings file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                serde_json::from_str(&contents)?
            }
            None => Settings::default(),
        };

        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply environment overrides using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), DeployerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(project) = get("GCP_PROJECT").or_else(|| get("GOOGLE_CLOUD_PROJECT")) {
            self.project_id = project;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = level.parse().map_err(DeployerError::ConfigError)?;
        }
        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PORT") {
            self.server.port = parse_env("PORT", &port)?;
        }
        if let Some(bucket) = get("SOURCE_BUCKET") {
            self.build.source_bucket = bucket;
        }
        if let Some(timeout) = get("BUILD_TIMEOUT_SECS") {
            self.build.timeout_secs = parse_env("BUILD_TIMEOUT_SECS", &timeout)?;
        }
        if let Some(name) = get("CLUSTER_NAME") {
            self.cluster.name = name;
        }
        if let Some(location) = get("CLUSTER_LOCATION") {
            self.cluster.location = location;
        }
        if let Some(endpoint) = get("CLUSTER_ENDPOINT") {
            self.cluster.endpoint = Some(endpoint);
        }
        if let Some(mode) = get("DEPLOY_APPLY_MODE") {
            self.cluster.apply_mode = parse_enum("DEPLOY_APPLY_MODE", &mode)?;
        }
        if let Some(mode) = get("DEPLOY_READINESS_MODE") {
            self.readiness.mode = parse_enum("DEPLOY_READINESS_MODE", &mode)?;
        }
        if let Some(policy) = get("DEPLOY_CONCURRENCY_POLICY") {
            self.concurrency.policy = parse_enum("DEPLOY_CONCURRENCY_POLICY", &policy)?;
        }
        if let Some(secret) = get("AUTH_JWT_SECRET") {
            self.auth.jwt_secret = Some(SecretString::from(secret));
        }
        if let Some(issuer) = get("AUTH_ISSUER") {
            self.auth.issuer = Some(issuer);
        }
        if let Some(audience) = get("AUTH_AUDIENCE") {
            self.auth.audience = Some(audience);
        }
        if let Some(token) = get("GOOGLE_OAUTH_ACCESS_TOKEN") {
            self.gcp.access_token = Some(SecretString::from(token));
        }

        Ok(())
    }

    /// Check that required settings are present and sane
    pub fn validate(&self) -> Result<(), DeployerError> {
        if self.project_id.trim().is_empty() {
            return Err(DeployerError::ConfigError(
                "project id is not set (GCP_PROJECT)".to_string(),
            ));
        }
        if self.auth.jwt_secret.is_none() {
            return Err(DeployerError::ConfigError(
                "token signing secret is not set (AUTH_JWT_SECRET)".to_string(),
            ));
        }
        if self.build.timeout_secs == 0 || self.build.poll_interval_secs == 0 {
            return Err(DeployerError::ConfigError(
                "build timeout and poll interval must be positive".to_string(),
            ));
        }
        if self.readiness.timeout_secs == 0 || self.readiness.poll_interval_secs == 0 {
            return Err(DeployerError::ConfigError(
                "readiness timeout and poll interval must be positive".to_string(),
            ));
        }
        if self.workload.replicas == 0 {
            return Err(DeployerError::ConfigError(
                "workload replicas must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// How long a `deploying` record may sit before another attempt may take it over.
    ///
    /// Defaults to the sum of every wait a deployment can make, plus a margin.
    pub fn stale_after(&self) -> Duration {
        if let Some(secs) = self.concurrency.stale_after_secs {
            return Duration::from_secs(secs);
        }
        let mut secs = self.build.timeout_secs;
        // The apply job waits with the build bound
        if self.cluster.apply_mode == ApplyMode::BuildJob {
            secs = secs.saturating_add(self.build.timeout_secs);
        }
        if self.readiness.mode == ReadinessMode::Healthy {
            secs = secs.saturating_add(self.readiness.timeout_secs);
        }
        Duration::from_secs(secs.saturating_add(STALE_MARGIN_SECS))
    }
}

const STALE_MARGIN_SECS: u64 = 300;

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, DeployerError> {
    value
        .trim()
        .parse()
        .map_err(|_| DeployerError::ConfigError(format!("Invalid value for {}: {}", key, value)))
}

fn parse_enum<T: serde::de::DeserializeOwned>(key: &str, value: &str) -> Result<T, DeployerError> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_lowercase()))
        .map_err(|_| DeployerError::ConfigError(format!("Invalid value for {}: {}", key, value)))
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty()).map(SecretString::from))
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Record store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSettings {
    /// Collection holding one record per agent
    #[serde(default = "default_collection")]
    pub collection: String,

    #[serde(default = "default_database")]
    pub database: String,
}

fn default_collection() -> String {
    "agents".to_string()
}

fn default_database() -> String {
    "(default)".to_string()
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            database: default_database(),
        }
    }
}

/// Image build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Bucket holding uploaded source archives
    #[serde(default = "default_source_bucket")]
    pub source_bucket: String,

    /// Archive file name under `<owner>/<agent>/`
    #[serde(default = "default_source_archive")]
    pub source_archive: String,

    #[serde(default = "default_builder_image")]
    pub builder_image: String,

    #[serde(default = "default_registry_host")]
    pub registry_host: String,

    /// Prefix shared by image and workload names
    #[serde(default = "default_image_prefix")]
    pub image_prefix: String,

    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_build_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_build_max_poll_interval")]
    pub max_poll_interval_secs: u64,
}

fn default_source_bucket() -> String {
    "agent-source-code".to_string()
}

fn default_source_archive() -> String {
    "agent-source.zip".to_string()
}

fn default_builder_image() -> String {
    "gcr.io/cloud-builders/docker".to_string()
}

fn default_registry_host() -> String {
    "gcr.io".to_string()
}

fn default_image_prefix() -> String {
    "trading-agent".to_string()
}

fn default_build_timeout() -> u64 {
    1200
}

fn default_build_poll_interval() -> u64 {
    5
}

fn default_build_max_poll_interval() -> u64 {
    30
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            source_bucket: default_source_bucket(),
            source_archive: default_source_archive(),
            builder_image: default_builder_image(),
            registry_host: default_registry_host(),
            image_prefix: default_image_prefix(),
            timeout_secs: default_build_timeout(),
            poll_interval_secs: default_build_poll_interval(),
            max_poll_interval_secs: default_build_max_poll_interval(),
        }
    }
}

/// Target cluster settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSettings {
    #[serde(default = "default_cluster_name")]
    pub name: String,

    /// Zone or region of the cluster
    #[serde(default = "default_cluster_location")]
    pub location: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// API server URL; resolved from the cluster API when absent
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Base64-encoded PEM CA bundle for `endpoint`
    #[serde(default)]
    pub ca_certificate: Option<String>,

    #[serde(default)]
    pub apply_mode: ApplyMode,

    #[serde(default = "default_kubectl_image")]
    pub kubectl_image: String,

    #[serde(default = "default_field_manager")]
    pub field_manager: String,
}

fn default_cluster_name() -> String {
    "trading-cluster".to_string()
}

fn default_cluster_location() -> String {
    "us-central1".to_string()
}

fn default_namespace() -> String {
    "trading-agents".to_string()
}

fn default_kubectl_image() -> String {
    "gcr.io/cloud-builders/kubectl".to_string()
}

fn default_field_manager() -> String {
    "agent-deployer".to_string()
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            name: default_cluster_name(),
            location: default_cluster_location(),
            namespace: default_namespace(),
            endpoint: None,
            ca_certificate: None,
            apply_mode: ApplyMode::default(),
            kubectl_image: default_kubectl_image(),
            field_manager: default_field_manager(),
        }
    }
}

/// Shape of the deployed workload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSettings {
    #[serde(default = "default_replicas")]
    pub replicas: u32,

    #[serde(default = "default_container_name")]
    pub container_name: String,

    /// Value of the `app` label shared by all agent workloads
    #[serde(default = "default_app_label")]
    pub app_label: String,

    #[serde(default)]
    pub resources: ResourceSettings,

    /// Secret holding broker credentials
    #[serde(default = "default_secret_name")]
    pub secret_name: String,

    /// Environment variables sourced from keys of `secret_name`
    #[serde(default = "default_secret_env")]
    pub secret_env: Vec<SecretEnvVar>,
}

/// One environment variable backed by a secret key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEnvVar {
    pub env: String,
    pub key: String,
}

fn default_replicas() -> u32 {
    1
}

fn default_container_name() -> String {
    "agent".to_string()
}

fn default_app_label() -> String {
    "trading-agent".to_string()
}

fn default_secret_name() -> String {
    "alpaca-credentials".to_string()
}

fn default_secret_env() -> Vec<SecretEnvVar> {
    [
        ("ALPACA_API_KEY", "api-key"),
        ("ALPACA_SECRET_KEY", "secret-key"),
        ("ALPACA_ACCOUNT_ID", "account-id"),
    ]
    .into_iter()
    .map(|(env, key)| SecretEnvVar {
        env: env.to_string(),
        key: key.to_string(),
    })
    .collect()
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            container_name: default_container_name(),
            app_label: default_app_label(),
            resources: ResourceSettings::default(),
            secret_name: default_secret_name(),
            secret_env: default_secret_env(),
        }
    }
}

/// Container resource requests and limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSettings {
    #[serde(default = "default_requests")]
    pub requests: ResourceQuantities,

    #[serde(default = "default_limits")]
    pub limits: ResourceQuantities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantities {
    pub memory: String,
    pub cpu: String,
}

fn default_requests() -> ResourceQuantities {
    ResourceQuantities {
        memory: "256Mi".to_string(),
        cpu: "100m".to_string(),
    }
}

fn default_limits() -> ResourceQuantities {
    ResourceQuantities {
        memory: "512Mi".to_string(),
        cpu: "200m".to_string(),
    }
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            limits: default_limits(),
        }
    }
}

/// When a deployment counts as done
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessSettings {
    #[serde(default)]
    pub mode: ReadinessMode,

    #[serde(default = "default_readiness_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_readiness_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_readiness_timeout() -> u64 {
    300
}

fn default_readiness_poll_interval() -> u64 {
    5
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            mode: ReadinessMode::default(),
            timeout_secs: default_readiness_timeout(),
            poll_interval_secs: default_readiness_poll_interval(),
        }
    }
}

/// Handling of overlapping deploys for one agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    #[serde(default)]
    pub policy: ConcurrencyPolicy,

    /// Age after which an unfinished `deploying` record is considered abandoned
    #[serde(default)]
    pub stale_after_secs: Option<u64>,
}

/// Caller token verification
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default, skip_serializing, deserialize_with = "deserialize_secret")]
    pub jwt_secret: Option<SecretString>,

    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default)]
    pub audience: Option<String>,
}

/// Google API access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpSettings {
    /// Fixed OAuth access token; the metadata server is used when absent
    #[serde(default, skip_serializing, deserialize_with = "deserialize_secret")]
    pub access_token: Option<SecretString>,

    #[serde(default = "default_firestore_url")]
    pub firestore_base_url: String,

    #[serde(default = "default_cloud_build_url")]
    pub cloud_build_base_url: String,

    #[serde(default = "default_container_url")]
    pub container_base_url: String,

    #[serde(default = "default_metadata_url")]
    pub metadata_base_url: String,
}

fn default_firestore_url() -> String {
    "https://firestore.googleapis.com/v1".to_string()
}

fn default_cloud_build_url() -> String {
    "https://cloudbuild.googleapis.com/v1".to_string()
}

fn default_container_url() -> String {
    "https://container.googleapis.com/v1".to_string()
}

fn default_metadata_url() -> String {
    "http://metadata.google.internal/computeMetadata/v1".to_string()
}

impl Default for GcpSettings {
    fn default() -> Self {
        Self {
            access_token: None,
            firestore_base_url: default_firestore_url(),
            cloud_build_base_url: default_cloud_build_url(),
            container_base_url: default_container_url(),
            metadata_base_url: default_metadata_url(),
        }
    }
}
