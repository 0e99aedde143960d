//! In-process cache metadata store

use crate::error::RescacheResult;
use crate::resource::{CacheKey, Metadata};
use crate::store::CacheMetadataStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Metadata store held in memory, for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    entries: RwLock<HashMap<CacheKey, Metadata>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with recorded metadata
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheMetadataStore for MemoryMetadataStore {
    async fn read(&self, key: &CacheKey) -> RescacheResult<Metadata> {
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert(&self, key: &CacheKey, metadata: &Metadata) -> RescacheResult<()> {
        self.entries
            .write()
            .await
            .insert(key.clone(), metadata.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MetadataField;

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = MemoryMetadataStore::new();
        let key = CacheKey::from_hex("e".repeat(64));
        let metadata = Metadata::new(vec![MetadataField::new("commit", "abc123")]);

        store.upsert(&key, &metadata).await.unwrap();
        store.upsert(&key, &metadata).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.read(&key).await.unwrap(), metadata);
    }
}
