//! Storage backends for webhook records and the audit log. The backend is
//! selected from config at startup and shared through the application state.

use crate::types::{Document, LogEntry};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("record {0} already exists")]
    AlreadyExists(String),

    #[error("stored record {0} is not a JSON object")]
    NotAnObject(String),

    #[error("could not allocate a free identifier")]
    IdsExhausted,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Stores a new record. Fails with `AlreadyExists` rather than
    /// overwriting.
    async fn insert(&self, id: &str, document: &Document) -> Result<(), StoreError>;

    /// Overwrites an existing record. Returns false if there was none.
    async fn replace(&self, id: &str, document: &Document) -> Result<bool, StoreError>;

    /// Returns false if there was no record to remove.
    async fn remove(&self, id: &str) -> Result<bool, StoreError>;

    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError>;
}

/// Process-local storage. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, Document>>,
    logs: Mutex<Vec<LogEntry>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.logs.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.records.lock().get(id).cloned())
    }

    async fn insert(&self, id: &str, document: &Document) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        if records.contains_key(id) {
            return Err(StoreError::AlreadyExists(id.to_string()));
        }
        records.insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn replace(&self, id: &str, document: &Document) -> Result<bool, StoreError> {
        let mut records = self.records.lock();
        match records.get_mut(id) {
            Some(existing) => {
                *existing = document.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.lock().remove(id).is_some())
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        self.logs.lock().push(entry.clone());
        Ok(())
    }
}

const RECORDS_DIR: &str = "webhooks";
const LOG_FILE: &str = "logs.jsonl";

/// One JSON file per record under `<dir>/webhooks/`, audit log as JSON lines
/// in `<dir>/logs.jsonl`.
pub struct FilesystemBackend {
    records_dir: PathBuf,
    log_path: PathBuf,
    // Serializes appends so concurrent entries never interleave.
    log_lock: tokio::sync::Mutex<()>,
}

impl FilesystemBackend {
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref();
        let records_dir = base_dir.join(RECORDS_DIR);
        fs::create_dir_all(&records_dir).await?;

        Ok(FilesystemBackend {
            records_dir,
            log_path: base_dir.join(LOG_FILE),
            log_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Identifiers are generated lowercase ULIDs. Anything else cannot name a
    /// stored record, and is never turned into a path.
    fn record_path(&self, id: &str) -> Option<PathBuf> {
        let valid = !id.is_empty()
            && id.len() <= 64
            && id
                .bytes()
                .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase());
        valid.then(|| self.records_dir.join(format!("{id}.json")))
    }

    fn temp_path(&self, id: &str) -> PathBuf {
        let nonce = ulid::Ulid::new().to_string().to_lowercase();
        self.records_dir.join(format!(".{id}.{nonce}.tmp"))
    }

    async fn write_temp(&self, id: &str, document: &Document) -> Result<PathBuf, StoreError> {
        let bytes = serde_json::to_vec_pretty(document)?;
        let temp = self.temp_path(id);
        let mut file = fs::File::create(&temp).await?;
        let written = async {
            file.write_all(&bytes).await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        if let Err(e) = written {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(temp)
    }
}

fn invalid_id(id: &str) -> StoreError {
    StoreError::Io(io::Error::new(
        ErrorKind::InvalidInput,
        format!("invalid record id: {id:?}"),
    ))
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn get(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let Some(path) = self.record_path(id) else {
            return Ok(None);
        };

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&bytes)? {
            serde_json::Value::Object(document) => Ok(Some(document)),
            _ => Err(StoreError::NotAnObject(id.to_string())),
        }
    }

    async fn insert(&self, id: &str, document: &Document) -> Result<(), StoreError> {
        let path = self.record_path(id).ok_or_else(|| invalid_id(id))?;
        let temp = self.write_temp(id, document).await?;

        // Linking fails if the target exists, so two inserts under the same id
        // cannot both succeed.
        let linked = fs::hard_link(&temp, &path).await;
        let _ = fs::remove_file(&temp).await;

        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, id: &str, document: &Document) -> Result<bool, StoreError> {
        let Some(path) = self.record_path(id) else {
            return Ok(false);
        };
        if !fs::try_exists(&path).await? {
            return Ok(false);
        }

        let temp = self.write_temp(id, document).await?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(true)
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let Some(path) = self.record_path(id) else {
            return Ok(false);
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.log_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestInfo;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    async fn exercise_backend(backend: &dyn StorageBackend) {
        let record = doc(json!({"webhookId": "abc123", "type": "deploy"}));

        assert_eq!(backend.get("abc123").await.unwrap(), None);
        backend.insert("abc123", &record).await.unwrap();
        assert_eq!(backend.get("abc123").await.unwrap(), Some(record.clone()));

        let err = backend.insert("abc123", &record).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == "abc123"));

        let updated = doc(json!({"webhookId": "abc123", "type": "deploy", "backup": true}));
        assert!(backend.replace("abc123", &updated).await.unwrap());
        assert_eq!(backend.get("abc123").await.unwrap(), Some(updated));
        assert!(!backend.replace("missing", &record).await.unwrap());

        assert!(backend.remove("abc123").await.unwrap());
        assert!(!backend.remove("abc123").await.unwrap());
        assert_eq!(backend.get("abc123").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let backend = MemoryBackend::new();
        exercise_backend(&backend).await;
        assert!(backend.is_empty());

        let entry = LogEntry::new(RequestInfo::default(), "visit");
        backend.append_log(&entry).await.unwrap();
        assert_eq!(backend.logs(), vec![entry]);
    }

    #[tokio::test]
    async fn test_filesystem_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::open(dir.path()).await.unwrap();
        exercise_backend(&backend).await;

        // No temp files are left behind.
        let mut entries = fs::read_dir(dir.path().join(RECORDS_DIR)).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_filesystem_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let record = doc(json!({"webhookId": "01abc", "extra": {"nested": [1, 2]}}));

        FilesystemBackend::open(dir.path())
            .await
            .unwrap()
            .insert("01abc", &record)
            .await
            .unwrap();

        let reopened = FilesystemBackend::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get("01abc").await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_filesystem_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::open(dir.path()).await.unwrap();

        for id in ["../logs", "ABC", "a/b", ""] {
            assert_eq!(backend.get(id).await.unwrap(), None);
            assert!(!backend.remove(id).await.unwrap());
        }
        assert!(backend.insert("../x", &Document::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_filesystem_log_is_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::open(dir.path()).await.unwrap();

        let visit = LogEntry::new(RequestInfo::default(), "visit");
        let trigger = LogEntry::new(RequestInfo::default(), "trigger deploy action")
            .with_field("outcome", "success");
        backend.append_log(&visit).await.unwrap();
        backend.append_log(&trigger).await.unwrap();

        let contents = fs::read_to_string(dir.path().join(LOG_FILE)).await.unwrap();
        let lines: Vec<LogEntry> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines, vec![visit, trigger]);
    }

    #[tokio::test]
    async fn test_filesystem_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::open(dir.path()).await.unwrap();
        fs::write(dir.path().join(RECORDS_DIR).join("bad.json"), "[1, 2]")
            .await
            .unwrap();

        assert!(matches!(
            backend.get("bad").await,
            Err(StoreError::NotAnObject(_))
        ));
    }
}
