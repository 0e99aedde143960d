//! Cache metadata store
//!
//! Durable mapping from a resource cache key to the provenance metadata its
//! get produced. Upserts of equivalent metadata are idempotent.

mod file;
mod memory;

pub use file::FileMetadataStore;
pub use memory::MemoryMetadataStore;

use crate::error::RescacheResult;
use crate::resource::{CacheKey, Metadata};
use async_trait::async_trait;

#[async_trait]
pub trait CacheMetadataStore: Send + Sync {
    /// Metadata recorded for `key`; empty when none has been persisted
    async fn read(&self, key: &CacheKey) -> RescacheResult<Metadata>;

    /// Record `metadata` for `key`, replacing any previous value
    async fn upsert(&self, key: &CacheKey, metadata: &Metadata) -> RescacheResult<()>;
}
