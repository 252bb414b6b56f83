//! Cluster endpoint discovery

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Certificate, Client};
use serde::Deserialize;
use tracing::info;

use crate::config::settings::ClusterSettings;
use crate::errors::DeployerError;
use crate::http::ApiClient;

/// Address and trust root of a cluster API server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConnection {
    /// Base URL of the API server
    pub endpoint: String,

    /// PEM-encoded cluster CA; the system roots are used when absent
    pub ca_certificate: Option<Vec<u8>>,
}

impl ClusterConnection {
    /// Build from a host or URL and an optional base64 PEM bundle
    pub fn new(endpoint: &str, ca_certificate_b64: Option<&str>) -> Result<Self, DeployerError> {
        let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", endpoint.trim_end_matches('/'))
        };
        let ca_certificate = ca_certificate_b64
            .filter(|ca| !ca.is_empty())
            .map(|ca| {
                STANDARD
                    .decode(ca.trim())
                    .map_err(|e| DeployerError::ConfigError(format!("Invalid cluster CA: {}", e)))
            })
            .transpose()?;
        Ok(Self {
            endpoint,
            ca_certificate,
        })
    }

    /// HTTP client trusting this cluster's CA
    pub fn http_client(&self) -> Result<Client, DeployerError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(30));
        if let Some(pem) = &self.ca_certificate {
            let cert = Certificate::from_pem(pem)
                .map_err(|e| DeployerError::ConfigError(format!("Invalid cluster CA: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }
        Ok(builder.build()?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Cluster {
    endpoint: String,
    #[serde(default)]
    master_auth: Option<MasterAuth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterAuth {
    #[serde(default)]
    cluster_ca_certificate: Option<String>,
}

/// Finds the API server of the target cluster
pub enum ClusterResolver {
    /// Endpoint given in configuration
    Fixed(ClusterConnection),

    /// Looked up through the GKE API
    Gke {
        client: ApiClient,
        /// `projects/<p>/locations/<l>/clusters/<n>`
        cluster_path: String,
    },
}

impl ClusterResolver {
    pub fn from_settings(
        settings: &ClusterSettings,
        project_id: &str,
        container: ApiClient,
    ) -> Result<Self, DeployerError> {
        match &settings.endpoint {
            Some(endpoint) => Ok(ClusterResolver::Fixed(ClusterConnection::new(
                endpoint,
                settings.ca_certificate.as_deref(),
            )?)),
            None => Ok(ClusterResolver::Gke {
                client: container,
                cluster_path: format!(
                    "projects/{}/locations/{}/clusters/{}",
                    project_id, settings.location, settings.name
                ),
            }),
        }
    }

    pub async fn resolve(&self) -> Result<ClusterConnection, DeployerError> {
        match self {
            ClusterResolver::Fixed(connection) => Ok(connection.clone()),
            ClusterResolver::Gke {
                client,
                cluster_path,
            } => {
                let cluster: Cluster = client.get(&format!("/{}", cluster_path)).await?;
                info!("Resolved {} to {}", cluster_path, cluster.endpoint);
                let ca = cluster
                    .master_auth
                    .and_then(|auth| auth.cluster_ca_certificate);
                ClusterConnection::new(&cluster.endpoint, ca.as_deref())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use secrecy::SecretString;

    use super::*;
    use crate::authn::StaticTokenProvider;

    #[test]
    fn test_connection_normalizes_endpoint() {
        let conn = ClusterConnection::new("34.1.2.3", None).unwrap();
        assert_eq!(conn.endpoint, "https://34.1.2.3");
        assert!(conn.ca_certificate.is_none());

        let conn = ClusterConnection::new("http://localhost:8001/", Some("")).unwrap();
        assert_eq!(conn.endpoint, "http://localhost:8001");
        assert!(conn.ca_certificate.is_none());
    }

    #[test]
    fn test_connection_rejects_bad_ca() {
        let result = ClusterConnection::new("34.1.2.3", Some("%%% not base64"));
        assert!(matches!(result, Err(DeployerError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_gke_lookup() {
        let mut server = mockito::Server::new_async().await;
        let ca = STANDARD.encode("-----BEGIN CERTIFICATE-----\n");
        let mock = server
            .mock(
                "GET",
                "/projects/proj/locations/us-central1/clusters/trading-cluster",
            )
            .with_status(200)
            .with_body(format!(
                r#"{{"endpoint":"34.1.2.3","masterAuth":{{"clusterCaCertificate":"{}"}}}}"#,
                ca
            ))
            .create_async()
            .await;

        let tokens = Arc::new(StaticTokenProvider::new(SecretString::from("tok")));
        let client = ApiClient::new("GKE", &server.url(), tokens).unwrap();
        let resolver =
            ClusterResolver::from_settings(&ClusterSettings::default(), "proj", client).unwrap();

        let conn = resolver.resolve().await.unwrap();
        assert_eq!(conn.endpoint, "https://34.1.2.3");
        assert_eq!(
            conn.ca_certificate.as_deref(),
            Some(b"-----BEGIN CERTIFICATE-----\n".as_slice())
        );
        mock.assert_async().await;
    }
}
