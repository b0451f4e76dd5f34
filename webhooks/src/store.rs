use crate::metrics_defs::STORE_OPERATIONS;
use crate::storage::{StorageBackend, StoreError};
use crate::types::{Document, ID_FIELD, LogEntry, RecordError, SECRET_FIELD, WebhookRecord};
use serde_json::Value;
use shared::counter;
use std::sync::Arc;
use ulid::Ulid;

// Fresh identifiers to try before giving up on an insert.
const MAX_ID_ATTEMPTS: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum WebhookError {
    #[error("webhook not found")]
    NotFound,

    #[error("invalid webhook: {0}")]
    Invalid(#[from] RecordError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// CRUD over webhook records plus the audit log.
///
/// Every write validates the full document against the action its `type`
/// names, so a stored record always parses into a `WebhookRecord` unless the
/// storage was edited behind the service's back.
#[derive(Clone)]
pub struct WebhookStore {
    backend: Arc<dyn StorageBackend>,
}

impl WebhookStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        WebhookStore { backend }
    }

    /// Persists a new record under a freshly generated identifier and returns
    /// the stored document.
    pub async fn create(&self, mut payload: Document) -> Result<Document, WebhookError> {
        payload.remove(SECRET_FIELD);

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = Ulid::new().to_string().to_lowercase();
            payload.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            WebhookRecord::from_document(&payload)?;

            match observe("insert", self.backend.insert(&id, &payload).await) {
                Ok(()) => {
                    tracing::info!(webhook_id = %id, "Webhook created");
                    return Ok(payload);
                }
                Err(StoreError::AlreadyExists(_)) => {
                    tracing::warn!(webhook_id = %id, "Identifier collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StoreError::IdsExhausted.into())
    }

    pub async fn read(&self, id: &str) -> Result<Document, WebhookError> {
        observe("get", self.backend.get(id).await)?.ok_or(WebhookError::NotFound)
    }

    /// Shallow-merges `patch` into the stored record. The identifier and the
    /// shared secret are never taken from the patch.
    pub async fn update(&self, id: &str, patch: Document) -> Result<Document, WebhookError> {
        let mut document = self.read(id).await?;
        for (key, value) in patch {
            if key == ID_FIELD || key == SECRET_FIELD {
                continue;
            }
            document.insert(key, value);
        }
        WebhookRecord::from_document(&document)?;

        if !observe("replace", self.backend.replace(id, &document).await)? {
            // Deleted between the read and the write.
            return Err(WebhookError::NotFound);
        }
        tracing::info!(webhook_id = %id, "Webhook updated");
        Ok(document)
    }

    pub async fn delete(&self, id: &str) -> Result<(), WebhookError> {
        if !observe("remove", self.backend.remove(id).await)? {
            return Err(WebhookError::NotFound);
        }
        tracing::info!(webhook_id = %id, "Webhook deleted");
        Ok(())
    }

    pub async fn append_log(&self, entry: &LogEntry) -> Result<(), WebhookError> {
        observe("append_log", self.backend.append_log(entry).await)?;
        Ok(())
    }
}

fn observe<T>(operation: &'static str, result: Result<T, StoreError>) -> Result<T, StoreError> {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(StoreError::AlreadyExists(_)) => "conflict",
        Err(e) => {
            tracing::error!(operation, error = %e, "Storage operation failed");
            "error"
        }
    };
    counter!(STORE_OPERATIONS, "operation" => operation, "outcome" => outcome).increment(1);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FilesystemBackend, MemoryBackend};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn deploy_payload() -> Document {
        doc(json!({
            "secretKey": "s3cret",
            "type": "deploy",
            "serverId": "s1",
            "appId": "a1",
            "email": "ops@example.com",
            "apiKey": {
                "ciphertext": "Y3Q=",
                "nonce": "bm9uY2U=",
                "tag": "dGFn",
                "salt": "c2FsdA==",
            },
            "branchName": "main",
            "deployPath": "/p",
            "team": "web",
        }))
    }

    fn memory_store() -> WebhookStore {
        WebhookStore::new(Arc::new(MemoryBackend::new()))
    }

    fn id_of(document: &Document) -> String {
        document[ID_FIELD].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_create_assigns_unique_ids() {
        let store = memory_store();
        let mut ids = HashSet::new();
        for _ in 0..20 {
            let created = store.create(deploy_payload()).await.unwrap();
            assert!(!created.contains_key(SECRET_FIELD));
            assert_eq!(created["team"], "web");
            assert!(ids.insert(id_of(&created)));
        }

        // Deleted identifiers are not handed out again.
        let first = ids.iter().next().unwrap().clone();
        store.delete(&first).await.unwrap();
        let created = store.create(deploy_payload()).await.unwrap();
        assert!(!ids.contains(&id_of(&created)));
    }

    #[tokio::test]
    async fn test_create_ignores_client_supplied_id() {
        let store = memory_store();
        let mut payload = deploy_payload();
        payload.insert(ID_FIELD.into(), json!("chosen-by-client"));

        let created = store.create(payload).await.unwrap();
        assert_ne!(created[ID_FIELD], "chosen-by-client");
    }

    #[tokio::test]
    async fn test_create_rejects_mismatched_fields() {
        let store = memory_store();
        let mut payload = deploy_payload();
        payload.remove("branchName");
        assert!(matches!(
            store.create(payload).await,
            Err(WebhookError::Invalid(RecordError::Invalid(_)))
        ));

        let mut payload = deploy_payload();
        payload.insert("type".into(), json!("restart"));
        assert!(matches!(
            store.create(payload).await,
            Err(WebhookError::Invalid(RecordError::UnknownType(_)))
        ));
    }

    #[tokio::test]
    async fn test_create_accepts_numeric_platform_ids() {
        let store = memory_store();
        let mut payload = deploy_payload();
        payload.insert("serverId".into(), json!(123456));
        payload.insert("appId".into(), json!(654321));

        let created = store.create(payload).await.unwrap();
        // Stored as sent.
        assert_eq!(created["serverId"], 123456);

        let id = id_of(&created);
        let patch = doc(json!({
            "type": "copy-to-staging",
            "stagingServerId": 42,
            "stagingAppId": 43,
        }));
        store.update(&id, patch).await.unwrap();

        let record = WebhookRecord::from_document(&store.read(&id).await.unwrap()).unwrap();
        assert_eq!(record.server_id, "123456");
        assert_eq!(record.action.name(), "copy-to-staging");
    }

    #[tokio::test]
    async fn test_read_after_delete() {
        let store = memory_store();
        let id = id_of(&store.create(deploy_payload()).await.unwrap());

        assert!(store.read(&id).await.is_ok());
        store.delete(&id).await.unwrap();
        assert!(matches!(store.read(&id).await, Err(WebhookError::NotFound)));
        assert!(matches!(store.delete(&id).await, Err(WebhookError::NotFound)));
    }

    #[tokio::test]
    async fn test_update_merges_provided_fields() {
        let store = memory_store();
        let id = id_of(&store.create(deploy_payload()).await.unwrap());

        let patch = doc(json!({
            "branchName": "release",
            "backup": true,
            "webhookId": "hijacked",
            "secretKey": "s3cret",
        }));
        store.update(&id, patch).await.unwrap();

        let stored = store.read(&id).await.unwrap();
        assert_eq!(stored["branchName"], "release");
        assert_eq!(stored["backup"], true);
        assert_eq!(stored["deployPath"], "/p");
        assert_eq!(stored["team"], "web");
        assert_eq!(id_of(&stored), id);
        assert!(!stored.contains_key(SECRET_FIELD));
    }

    #[tokio::test]
    async fn test_update_validates_merged_document() {
        let store = memory_store();
        let id = id_of(&store.create(deploy_payload()).await.unwrap());

        // Switching to a sync type without staging ids is rejected.
        let patch = doc(json!({"type": "copy-to-live"}));
        assert!(matches!(
            store.update(&id, patch).await,
            Err(WebhookError::Invalid(_))
        ));
        assert_eq!(store.read(&id).await.unwrap()["type"], "deploy");

        let patch = doc(json!({
            "type": "copy-to-live",
            "stagingServerId": "s2",
            "stagingAppId": "a2",
        }));
        store.update(&id, patch).await.unwrap();

        assert!(matches!(
            store.update("unknown", Document::new()).await,
            Err(WebhookError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_filesystem_store() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::open(dir.path()).await.unwrap();
        let store = WebhookStore::new(Arc::new(backend));

        let id = id_of(&store.create(deploy_payload()).await.unwrap());
        store
            .update(&id, doc(json!({"deployPath": "/srv/app"})))
            .await
            .unwrap();
        assert_eq!(store.read(&id).await.unwrap()["deployPath"], "/srv/app");
        store.delete(&id).await.unwrap();
        assert!(matches!(store.read(&id).await, Err(WebhookError::NotFound)));
    }

    /// Claims every identifier is taken.
    struct AlwaysTaken;

    #[async_trait]
    impl StorageBackend for AlwaysTaken {
        async fn get(&self, _id: &str) -> Result<Option<Document>, StoreError> {
            Ok(None)
        }
        async fn insert(&self, id: &str, _document: &Document) -> Result<(), StoreError> {
            Err(StoreError::AlreadyExists(id.to_string()))
        }
        async fn replace(&self, _id: &str, _document: &Document) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn remove(&self, _id: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn append_log(&self, _entry: &LogEntry) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_create_gives_up_on_repeated_collisions() {
        let store = WebhookStore::new(Arc::new(AlwaysTaken));
        assert!(matches!(
            store.create(deploy_payload()).await,
            Err(WebhookError::Storage(StoreError::IdsExhausted))
        ));
    }
}
