//! HTTP client implementation

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method, RequestBuilder, Response};
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::authn::AccessTokenProvider;
use crate::errors::DeployerError;

/// Authenticated JSON client for one remote service
pub struct ApiClient {
    client: Client,
    base_url: String,
    service: &'static str,
    tokens: Arc<dyn AccessTokenProvider>,
}

impl ApiClient {
    /// Create a new client for `service` rooted at `base_url`
    pub fn new(
        service: &'static str,
        base_url: &str,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self, DeployerError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self::with_client(service, base_url, tokens, client))
    }

    /// Create a client around a preconfigured `reqwest::Client`
    pub fn with_client(
        service: &'static str,
        base_url: &str,
        tokens: Arc<dyn AccessTokenProvider>,
        client: Client,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service,
            tokens,
        }
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, DeployerError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| DeployerError::ConfigError(format!("Invalid URL for {}: {}", path, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<RequestBuilder, DeployerError> {
        let url = self.url(path, query)?;
        debug!("{} {}", method, url);

        let token = self.tokens.access_token().await?;
        Ok(self
            .client
            .request(method, url)
            .header(header::AUTHORIZATION, format!("Bearer {}", token.expose_secret())))
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, DeployerError> {
        let response = self.request(Method::GET, path, &[]).await?.send().await?;
        self.read_json(response).await
    }

    /// Make a GET request, mapping 404 to `None`
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, DeployerError> {
        let response = self.request(Method::GET, path, &[]).await?.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.read_json(response).await.map(Some)
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DeployerError> {
        let response = self
            .request(Method::POST, path, &[])
            .await?
            .json(body)
            .send()
            .await?;
        self.read_json(response).await
    }

    /// Make a PATCH request with an explicit content type
    pub async fn patch_with_content_type<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<T, DeployerError> {
        let response = self
            .request(Method::PATCH, path, query)
            .await?
            .header(header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        self.read_json(response).await
    }

    async fn read_json<T: DeserializeOwned>(&self, response: Response) -> Result<T, DeployerError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("{} request failed: {} - {}", self.service, status, body);
            let (reason, message) = error_details(&body);
            return Err(DeployerError::Api {
                service: self.service,
                status: status.as_u16(),
                reason,
                message: message.unwrap_or_else(|| status.to_string()),
            });
        }

        let body = response.json().await?;
        Ok(body)
    }
}

/// Pull the status and message out of a Google or Kubernetes error body
fn error_details(body: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return (None, None);
    };
    let text = |pointer: &str| {
        value
            .pointer(pointer)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    let reason = text("/error/status").or_else(|| text("/reason"));
    let message = text("/error/message").or_else(|| text("/message"));
    (reason, message)
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use secrecy::SecretString;

    use super::*;
    use crate::authn::StaticTokenProvider;

    fn client(base_url: &str) -> ApiClient {
        let tokens = Arc::new(StaticTokenProvider::new(SecretString::from("tok")));
        ApiClient::new("Test API", base_url, tokens).unwrap()
    }

    #[test]
    fn test_error_details_extraction() {
        assert_eq!(
            error_details(r#"{"error":{"code":400,"status":"FAILED_PRECONDITION","message":"stale"}}"#),
            (Some("FAILED_PRECONDITION".to_string()), Some("stale".to_string()))
        );
        assert_eq!(
            error_details(r#"{"kind":"Status","reason":"Conflict","message":"conflict"}"#),
            (Some("Conflict".to_string()), Some("conflict".to_string()))
        );
        assert_eq!(error_details("not json"), (None, None));
    }

    #[tokio::test]
    async fn test_get_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/things/1")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"id":"1"}"#)
            .create_async()
            .await;

        let value: serde_json::Value = client(&server.url()).get("/things/1").await.unwrap();
        assert_eq!(value["id"], "1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_optional_maps_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/things/2")
            .with_status(404)
            .create_async()
            .await;

        let value: Option<serde_json::Value> =
            client(&server.url()).get_optional("/things/2").await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_non_success_becomes_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/things")
            .with_status(409)
            .with_body(r#"{"error":{"message":"already exists"}}"#)
            .create_async()
            .await;

        let result: Result<serde_json::Value, _> = client(&server.url())
            .post("/things", &serde_json::json!({}))
            .await;
        match result {
            Err(err @ DeployerError::Api { status: 409, .. }) => {
                assert!(err.is_conflict());
                assert!(err.to_string().contains("already exists"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_patch_sets_content_type_and_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/things/3")
            .match_query(Matcher::UrlEncoded("force".into(), "true".into()))
            .match_header("content-type", "application/apply-patch+yaml")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let _: serde_json::Value = client(&server.url())
            .patch_with_content_type(
                "/things/3",
                &[("force", "true")],
                "application/apply-patch+yaml",
                b"{}".to_vec(),
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
