//! Firestore-backed record store (REST v1)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::errors::DeployerError;
use crate::http::ApiClient;
use crate::models::{DeploymentRecord, DeploymentStatus, FieldTimestamp, RecordUpdate};
use crate::store::value::{get_string, get_timestamp, null_value, string_value, timestamp_value};
use crate::store::RecordStore;

/// Field holding the owning user's ID on an agent document
const OWNER_FIELD: &str = "userId";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    fields: Map<String, Value>,

    #[serde(default)]
    update_time: Option<String>,
}

/// Precondition attached to a commit write
enum Precondition<'a> {
    Exists,
    UpdateTime(&'a str),
}

/// Record store reading and writing agent documents in Firestore
pub struct FirestoreRecordStore {
    client: ApiClient,

    /// `projects/<p>/databases/<db>/documents`
    documents_root: String,
    collection: String,
}

impl FirestoreRecordStore {
    pub fn new(client: ApiClient, project_id: &str, database: &str, collection: &str) -> Self {
        Self {
            client,
            documents_root: format!("projects/{}/databases/{}/documents", project_id, database),
            collection: collection.to_string(),
        }
    }

    fn document_name(&self, agent_id: &str) -> String {
        format!("{}/{}/{}", self.documents_root, self.collection, agent_id)
    }

    /// Document URL path with the id escaped as a single segment
    fn document_path(&self, agent_id: &str) -> String {
        let segment: String = url::form_urlencoded::byte_serialize(agent_id.as_bytes()).collect();
        format!(
            "/{}/{}/{}",
            self.documents_root,
            self.collection,
            segment.replace('+', "%20")
        )
    }

    /// Ids that cannot name a document in the collection
    fn is_document_id(agent_id: &str) -> bool {
        !(agent_id.is_empty() || agent_id == "." || agent_id == ".." || agent_id.contains('/'))
    }

    fn decode(agent_id: &str, doc: Document) -> DeploymentRecord {
        let fields = &doc.fields;
        let status = get_string(fields, "status")
            .map(|s| DeploymentStatus::from_stored(&s))
            .unwrap_or(DeploymentStatus::Created);

        DeploymentRecord {
            agent_id: agent_id.to_string(),
            owner_id: get_string(fields, OWNER_FIELD).unwrap_or_default(),
            status,
            deployment_started: get_timestamp(fields, "deploymentStarted"),
            deployment_completed: get_timestamp(fields, "deploymentCompleted"),
            kubernetes_deployment: get_string(fields, "kubernetesDeployment"),
            error: get_string(fields, "error"),
            revision: doc.update_time.unwrap_or_default(),
        }
    }

    /// Build the single write of a commit request
    fn encode_write(&self, agent_id: &str, update: &RecordUpdate, precondition: Precondition) -> Value {
        let mut fields = Map::new();
        let mut mask = Vec::new();
        let mut transforms = Vec::new();

        fields.insert("status".to_string(), string_value(update.status.as_str()));
        mask.push("status");

        for (path, ts) in [
            ("deploymentStarted", &update.deployment_started),
            ("deploymentCompleted", &update.deployment_completed),
        ] {
            match ts {
                Some(FieldTimestamp::ServerTimestamp) => {
                    transforms.push(json!({
                        "fieldPath": path,
                        "setToServerValue": "REQUEST_TIME",
                    }));
                }
                Some(FieldTimestamp::Value(value)) => {
                    fields.insert(path.to_string(), timestamp_value(value));
                    mask.push(path);
                }
                None => {}
            }
        }

        if let Some(name) = &update.kubernetes_deployment {
            fields.insert("kubernetesDeployment".to_string(), string_value(name));
            mask.push("kubernetesDeployment");
        }
        match &update.error {
            Some(error) => {
                fields.insert("error".to_string(), string_value(error));
                mask.push("error");
            }
            // A successful attempt clears the previous failure
            None if update.status == DeploymentStatus::Deployed => {
                fields.insert("error".to_string(), null_value());
                mask.push("error");
            }
            None => {}
        }

        let current_document = match precondition {
            Precondition::Exists => json!({ "exists": true }),
            Precondition::UpdateTime(revision) => json!({ "updateTime": revision }),
        };

        let mut write = json!({
            "update": {
                "name": self.document_name(agent_id),
                "fields": fields,
            },
            "updateMask": { "fieldPaths": mask },
            "currentDocument": current_document,
        });
        if !transforms.is_empty() {
            write["updateTransforms"] = Value::Array(transforms);
        }
        write
    }

    async fn commit(
        &self,
        agent_id: &str,
        update: &RecordUpdate,
        precondition: Precondition<'_>,
    ) -> Result<(), DeployerError> {
        let body = json!({ "writes": [self.encode_write(agent_id, update, precondition)] });
        let path = format!("/{}:commit", self.documents_root);
        debug!("Writing status {} for agent {}", update.status, agent_id);

        let _: Value = self.client.post(&path, &body).await.map_err(|e| {
            if e.is_not_found() {
                DeployerError::NotFound(format!("agent {}", agent_id))
            } else {
                e
            }
        })?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FirestoreRecordStore {
    async fn get(&self, agent_id: &str) -> Result<Option<DeploymentRecord>, DeployerError> {
        if !Self::is_document_id(agent_id) {
            debug!("Agent id {:?} does not name a document", agent_id);
            return Ok(None);
        }
        let doc: Option<Document> = self.client.get_optional(&self.document_path(agent_id)).await?;
        Ok(doc.map(|doc| Self::decode(agent_id, doc)))
    }

    async fn update(&self, agent_id: &str, update: RecordUpdate) -> Result<(), DeployerError> {
        self.commit(agent_id, &update, Precondition::Exists).await
    }

    async fn update_if_revision(
        &self,
        agent_id: &str,
        expected_revision: &str,
        update: RecordUpdate,
    ) -> Result<bool, DeployerError> {
        match self
            .commit(agent_id, &update, Precondition::UpdateTime(expected_revision))
            .await
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_conflict() => {
                warn!("Record for agent {} changed concurrently: {}", agent_id, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mockito::Matcher;
    use secrecy::SecretString;

    use super::*;
    use crate::authn::StaticTokenProvider;

    const DOC_PATH: &str = "/projects/proj/databases/(default)/documents/agents/a1";
    const COMMIT_PATH: &str = "/projects/proj/databases/(default)/documents:commit";

    fn store(base_url: &str) -> FirestoreRecordStore {
        let tokens = Arc::new(StaticTokenProvider::new(SecretString::from("tok")));
        let client = ApiClient::new("Firestore", base_url, tokens).unwrap();
        FirestoreRecordStore::new(client, "proj", "(default)", "agents")
    }

    #[tokio::test]
    async fn test_get_decodes_document() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", DOC_PATH)
            .with_status(200)
            .with_body(
                json!({
                    "name": "projects/proj/databases/(default)/documents/agents/a1",
                    "fields": {
                        "userId": { "stringValue": "u1" },
                        "status": { "stringValue": "deployed" },
                        "name": { "stringValue": "Momentum bot" },
                        "deploymentCompleted": { "timestampValue": "2024-05-01T12:30:00.123456Z" },
                        "kubernetesDeployment": { "stringValue": "trading-agent-a1" },
                        "error": { "nullValue": null },
                    },
                    "updateTime": "2024-05-01T12:30:00.200000Z",
                })
                .to_string(),
            )
            .create_async()
            .await;

        let record = store(&server.url()).get("a1").await.unwrap().unwrap();
        assert_eq!(record.owner_id, "u1");
        assert_eq!(record.status, DeploymentStatus::Deployed);
        assert_eq!(record.kubernetes_deployment.as_deref(), Some("trading-agent-a1"));
        assert!(record.deployment_completed.is_some());
        assert!(record.deployment_started.is_none());
        assert_eq!(record.error, None);
        assert_eq!(record.revision, "2024-05-01T12:30:00.200000Z");
    }

    #[tokio::test]
    async fn test_get_missing_document() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", DOC_PATH)
            .with_status(404)
            .with_body(r#"{"error":{"code":404,"status":"NOT_FOUND","message":"missing"}}"#)
            .create_async()
            .await;

        assert!(store(&server.url()).get("a1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_never_leaves_the_collection() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", Matcher::Any)
            .with_status(200)
            .with_body("{}")
            .expect(0)
            .create_async()
            .await;

        let store = store(&server.url());
        for agent_id in ["", ".", "..", "../a1", "a1/sub/doc"] {
            assert!(store.get(agent_id).await.unwrap().is_none());
        }
        mock.assert_async().await;
    }

    #[test]
    fn test_document_path_escapes_the_id() {
        let store = store("http://localhost");
        assert_eq!(store.document_path("a1"), DOC_PATH);
        assert_eq!(
            store.document_path("a b?c#d"),
            "/projects/proj/databases/(default)/documents/agents/a%20b%3Fc%23d"
        );
    }

    #[tokio::test]
    async fn test_update_requires_existing_document() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", COMMIT_PATH)
            .match_body(Matcher::PartialJson(json!({
                "writes": [{
                    "updateMask": { "fieldPaths": ["status"] },
                    "updateTransforms": [{
                        "fieldPath": "deploymentStarted",
                        "setToServerValue": "REQUEST_TIME",
                    }],
                    "currentDocument": { "exists": true },
                }]
            })))
            .with_status(200)
            .with_body(r#"{"commitTime":"2024-05-01T12:30:00Z"}"#)
            .create_async()
            .await;

        store(&server.url())
            .update("a1", RecordUpdate::deploying())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_of_missing_document_is_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", COMMIT_PATH)
            .with_status(404)
            .with_body(r#"{"error":{"code":404,"status":"NOT_FOUND","message":"No document to update"}}"#)
            .create_async()
            .await;

        let result = store(&server.url()).update("a1", RecordUpdate::failed("boom")).await;
        assert!(matches!(result, Err(DeployerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_compare_and_swap_conflict() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", COMMIT_PATH)
            .match_body(Matcher::PartialJson(json!({
                "writes": [{ "currentDocument": { "updateTime": "rev-1" } }]
            })))
            .with_status(400)
            .with_body(r#"{"error":{"code":400,"status":"FAILED_PRECONDITION","message":"stale"}}"#)
            .create_async()
            .await;

        let swapped = store(&server.url())
            .update_if_revision("a1", "rev-1", RecordUpdate::deploying())
            .await
            .unwrap();
        assert!(!swapped);
        mock.assert_async().await;
    }

    #[test]
    fn test_successful_write_clears_error() {
        let store = store("http://localhost");
        let write = store.encode_write(
            "a1",
            &RecordUpdate::deployed("trading-agent-a1"),
            Precondition::Exists,
        );
        assert_eq!(
            write["updateMask"]["fieldPaths"],
            json!(["status", "kubernetesDeployment", "error"])
        );
        assert_eq!(write["update"]["fields"]["error"], json!({ "nullValue": null }));
        assert_eq!(
            write["updateTransforms"][0]["fieldPath"],
            "deploymentCompleted"
        );
    }
}
