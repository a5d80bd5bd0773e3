//! One pretty-printed JSON array per collection, `<dir>/<collection>.json`.

use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use super::{CollectionStatus, CollectionStore, ALL_COLLECTIONS};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open a store rooted at `dir`, creating the directory and an empty
    /// file for every known collection.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            error!("Failed to create data directory {}: {}", dir.display(), e);
            StoreError::io("*", e)
        })?;

        let store = Self { dir };
        for collection in ALL_COLLECTIONS {
            store.ensure_collection(collection).await?;
        }
        info!("JsonFileStore initialized at {}", store.dir.display());
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.json"))
    }

    async fn ensure_collection(&self, collection: &str) -> Result<(), StoreError> {
        let path = self.path_for(collection);
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Creating empty collection file {}", path.display());
                self.write(collection, &[]).await
            }
            Err(e) => Err(StoreError::io(collection, e)),
        }
    }

    /// Write through a temporary file so readers never see a half-written array.
    async fn write(&self, collection: &str, records: &[Value]) -> Result<(), StoreError> {
        let path = self.path_for(collection);
        let tmp = self.dir.join(format!(".{collection}.json.tmp"));
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| StoreError::serialization(collection, e))?;

        tokio::fs::write(&tmp, bytes).await.map_err(|e| {
            error!("Failed to write {}: {}", tmp.display(), e);
            StoreError::io(collection, e)
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            error!("Failed to move {} into place: {}", path.display(), e);
            StoreError::io(collection, e)
        })
    }
}

#[async_trait]
impl CollectionStore for JsonFileStore {
    async fn read_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let path = self.path_for(collection);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                return Err(StoreError::io(collection, e));
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| {
            error!("Collection file {} is not a JSON array: {}", path.display(), e);
            StoreError::serialization(collection, e)
        })
    }

    async fn append(&self, collection: &str, record: Value) -> Result<(), StoreError> {
        let mut records = self.read_all(collection).await?;
        records.push(record);
        self.write(collection, &records).await
    }

    async fn replace_all(&self, collection: &str, records: Vec<Value>) -> Result<(), StoreError> {
        self.write(collection, &records).await
    }

    async fn status(&self, collection: &str) -> CollectionStatus {
        let path = self.path_for(collection);
        let metadata = tokio::fs::metadata(&path).await.ok();
        CollectionStatus {
            collection: collection.to_string(),
            location: Some(path.display().to_string()),
            exists: metadata.is_some(),
            size_bytes: metadata.map(|m| m.len()).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_every_collection() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("db")).await.unwrap();

        for collection in ALL_COLLECTIONS {
            let status = store.status(collection).await;
            assert!(status.exists, "{collection} missing");
            assert!(store.read_all(collection).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonFileStore::open(dir.path()).await.unwrap();
            store.append("requests", json!({"id": "a"})).await.unwrap();
            store.append("requests", json!({"id": "b"})).await.unwrap();
        }

        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let records = store.read_all("requests").await.unwrap();
        assert_eq!(records, vec![json!({"id": "a"}), json!({"id": "b"})]);
    }

    #[tokio::test]
    async fn test_missing_and_blank_files_read_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        assert!(store.read_all("never_written").await.unwrap().is_empty());

        tokio::fs::write(dir.path().join("responses.json"), "  \n").await.unwrap();
        assert!(store.read_all("responses").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        tokio::fs::write(dir.path().join("requests.json"), "{not json").await.unwrap();

        let err = store.read_all("requests").await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }
}
