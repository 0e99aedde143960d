//! Volume state persistence for local workers
//!
//! Podman volumes cannot have their labels changed after creation, so the
//! privilege flag and cache association live in one JSON record per volume.

use crate::error::{RescacheError, RescacheResult};
use crate::resource::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::warn;

/// State of one volume on a local worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    /// Volume handle (also the podman volume name)
    pub handle: String,

    /// Whether the volume is still owned by the privileged namespace
    pub privileged: bool,

    /// Resource cache this volume was initialized for
    pub resource_cache: Option<CacheKey>,

    /// When the volume was created
    pub created_at: DateTime<Utc>,
}

impl VolumeRecord {
    /// A freshly created, privileged, uninitialized volume
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            privileged: true,
            resource_cache: None,
            created_at: Utc::now(),
        }
    }

    /// Whether this volume may be handed out as cache `key`
    pub fn serves(&self, key: &CacheKey) -> bool {
        !self.privileged && self.resource_cache.as_ref() == Some(key)
    }
}

/// Directory of volume records for one worker
#[derive(Debug, Clone)]
pub struct VolumeRegistry {
    dir: PathBuf,
}

impl VolumeRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, handle: &str) -> PathBuf {
        self.dir.join(format!("{}.json", handle))
    }

    /// Load a record by handle
    pub async fn get(&self, handle: &str) -> RescacheResult<Option<VolumeRecord>> {
        let path = self.record_path(handle);

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await.map_err(|e| {
            RescacheError::io(format!("reading volume record {}", path.display()), e)
        })?;

        let record: VolumeRecord = serde_json::from_str(&content)?;
        Ok(Some(record))
    }

    /// Write a record, replacing any existing one atomically
    pub async fn save(&self, record: &VolumeRecord) -> RescacheResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| RescacheError::io("creating volume registry directory", e))?;

        let path = self.record_path(&record.handle);
        let tmp = self.dir.join(format!(".{}.json.tmp", record.handle));
        let content = serde_json::to_string_pretty(record)?;

        fs::write(&tmp, content)
            .await
            .map_err(|e| RescacheError::io(format!("writing volume record {}", tmp.display()), e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| RescacheError::io(format!("replacing volume record {}", path.display()), e))?;

        Ok(())
    }

    /// Load, modify and save a record
    pub async fn update<F>(&self, handle: &str, change: F) -> RescacheResult<VolumeRecord>
    where
        F: FnOnce(&mut VolumeRecord) -> Result<(), String>,
    {
        let mut record = self
            .get(handle)
            .await?
            .ok_or_else(|| RescacheError::User(format!("Volume not found: {}", handle)))?;

        change(&mut record).map_err(RescacheError::User)?;
        self.save(&record).await?;
        Ok(record)
    }

    /// Delete a record
    pub async fn remove(&self, handle: &str) -> RescacheResult<()> {
        let path = self.record_path(handle);
        if path.exists() {
            fs::remove_file(&path).await.map_err(|e| {
                RescacheError::io(format!("deleting volume record {}", path.display()), e)
            })?;
        }
        Ok(())
    }

    /// List all records, oldest first
    pub async fn list(&self) -> RescacheResult<Vec<VolumeRecord>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut records = vec![];
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| RescacheError::io("reading volume registry", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RescacheError::io("reading volume registry entry", e))?
        {
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if hidden || !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), "skipping unreadable volume record: {}", e);
                    continue;
                }
            };
            match serde_json::from_str::<VolumeRecord>(&content) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %path.display(), "skipping corrupt volume record: {}", e),
            }
        }

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    /// Oldest volume serving as cache `key`
    pub async fn find_initialized(&self, key: &CacheKey) -> RescacheResult<Option<VolumeRecord>> {
        Ok(self.list().await?.into_iter().find(|r| r.serves(key)))
    }
}
