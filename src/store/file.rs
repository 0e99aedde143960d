//! File-backed cache metadata store
//!
//! One JSON document per cache key, replaced atomically on upsert.

use crate::error::{RescacheError, RescacheResult};
use crate::resource::{CacheKey, Metadata};
use crate::store::CacheMetadataStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Stored metadata entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataEntry {
    key: CacheKey,
    metadata: Metadata,
    updated_at: DateTime<Utc>,
}

/// Metadata store keeping one file per resource cache
pub struct FileMetadataStore {
    dir: PathBuf,
}

impl FileMetadataStore {
    /// Open a store rooted at `dir`, creating it if needed
    pub async fn new(dir: impl Into<PathBuf>) -> RescacheResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| RescacheError::io(format!("creating metadata store {}", dir.display()), e))?;
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[async_trait]
impl CacheMetadataStore for FileMetadataStore {
    async fn read(&self, key: &CacheKey) -> RescacheResult<Metadata> {
        let path = self.entry_path(key);

        if !path.exists() {
            debug!(cache_key = %key, "no metadata recorded");
            return Ok(Metadata::default());
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| RescacheError::store(key.as_str(), e))?;
        let entry: MetadataEntry =
            serde_json::from_str(&content).map_err(|e| RescacheError::store(key.as_str(), e))?;

        Ok(entry.metadata)
    }

    async fn upsert(&self, key: &CacheKey, metadata: &Metadata) -> RescacheResult<()> {
        let entry = MetadataEntry {
            key: key.clone(),
            metadata: metadata.clone(),
            updated_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&entry)?;

        // Concurrent upserts for one key each write their own temp file
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));
        let path = self.entry_path(key);

        fs::write(&tmp, content)
            .await
            .map_err(|e| RescacheError::store(key.as_str(), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| RescacheError::store(key.as_str(), e))?;

        debug!(cache_key = %key, fields = metadata.fields().len(), "stored metadata");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MetadataField;
    use tempfile::TempDir;

    async fn test_store() -> (FileMetadataStore, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = FileMetadataStore::new(temp.path().join("metadata"))
            .await
            .unwrap();
        (store, temp)
    }

    fn key() -> CacheKey {
        CacheKey::from_hex("d".repeat(64))
    }

    #[tokio::test]
    async fn missing_key_reads_empty() {
        let (store, _temp) = test_store().await;
        assert!(store.read(&key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_then_read() {
        let (store, _temp) = test_store().await;
        let metadata = Metadata::new(vec![MetadataField::new("commit", "abc123")]);

        store.upsert(&key(), &metadata).await.unwrap();
        assert_eq!(store.read(&key()).await.unwrap(), metadata);
    }

    #[tokio::test]
    async fn upsert_overwrites() {
        let (store, _temp) = test_store().await;
        let first = Metadata::new(vec![MetadataField::new("commit", "abc123")]);
        let second = Metadata::new(vec![
            MetadataField::new("commit", "abc123"),
            MetadataField::new("author", "ci"),
        ]);

        store.upsert(&key(), &first).await.unwrap();
        store.upsert(&key(), &second).await.unwrap();
        store.upsert(&key(), &second).await.unwrap();

        assert_eq!(store.read(&key()).await.unwrap(), second);
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_store_error() {
        let (store, _temp) = test_store().await;
        std::fs::write(store.entry_path(&key()), "not json").unwrap();

        let err = store.read(&key()).await.unwrap_err();
        assert!(matches!(err, RescacheError::MetadataStore { .. }));
    }
}
