//! Resource identity and content-addressed cache keys
//!
//! A resource instance is the (type, source, version, params) tuple that
//! a get step asks for. Its cache key and lock names are SHA256 digests over
//! a canonical JSON encoding, so the same tuple always produces the same
//! names regardless of map ordering, process, or host.

use crate::error::{RescacheError, RescacheResult};
use crate::resource::versioned::{Config, Version};
use crate::worker::{Volume, Worker};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Digest identifying a resource cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an existing hex digest
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for volume and container names
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A specific version of an external resource to materialize
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstance {
    #[serde(rename = "type")]
    resource_type: String,
    source: Config,
    version: Version,
    #[serde(default)]
    params: Config,
}

impl ResourceInstance {
    pub fn new(
        resource_type: impl Into<String>,
        source: Config,
        version: Version,
        params: Config,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            source,
            version,
            params,
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn source(&self) -> &Config {
        &self.source
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn params(&self) -> &Config {
        &self.params
    }

    /// Key of the resource cache this instance populates
    pub fn cache_key(&self) -> RescacheResult<CacheKey> {
        self.validate()?;
        let doc = serde_json::json!({
            "type": self.resource_type,
            "source": self.source,
            "version": self.version,
            "params": self.params,
        });
        Ok(CacheKey(digest(&doc)?))
    }

    /// Name of the lock guarding fetches of this instance on `worker_name`
    pub fn lock_name(&self, worker_name: &str) -> RescacheResult<String> {
        self.validate()?;
        if worker_name.is_empty() {
            return Err(RescacheError::InvalidIdentity(
                "worker name is empty".to_string(),
            ));
        }
        let doc = serde_json::json!({
            "type": self.resource_type,
            "source": self.source,
            "version": self.version,
            "params": self.params,
            "worker_name": worker_name,
        });
        digest(&doc)
    }

    /// Find a volume on `worker` already initialized with this instance
    pub async fn find_on(&self, worker: &dyn Worker) -> RescacheResult<Option<Arc<dyn Volume>>> {
        let key = self.cache_key()?;
        let volume = worker.find_volume_for_resource_cache(&key).await?;
        debug!(
            worker = worker.name(),
            cache_key = %key,
            found = volume.is_some(),
            "looked up resource cache volume"
        );
        Ok(volume)
    }

    fn validate(&self) -> RescacheResult<()> {
        if self.resource_type.trim().is_empty() {
            return Err(RescacheError::InvalidIdentity(
                "resource type is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Rebuild `value` with every object's keys in sorted order
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn digest(doc: &Value) -> RescacheResult<String> {
    let bytes = serde_json::to_vec(&canonicalize(doc))
        .map_err(|e| RescacheError::InvalidIdentity(e.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}
