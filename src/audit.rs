//! Audit trail of fetches
//!
//! Appends JSON lines to `<state dir>/rescache/audit.log`. On by default;
//! disable with `general.audit_log = false`.

use crate::config::{schema::Config, ConfigManager};
use crate::resource::{CacheKey, Version};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Events recorded in the audit log
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum AuditEvent {
    #[serde(rename = "resource.fetched")]
    Fetched {
        worker: String,
        resource_type: String,
        cache_key: CacheKey,
        version: Version,
    },

    #[serde(rename = "resource.cache_hit")]
    CacheHit {
        worker: String,
        resource_type: String,
        cache_key: CacheKey,
    },

    #[serde(rename = "resource.metadata_persist_failed")]
    MetadataPersistFailed {
        worker: String,
        cache_key: CacheKey,
        reason: String,
    },
}

#[derive(Serialize)]
struct AuditEntry<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// File-based audit logger that appends JSON lines
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
}

impl AuditLog {
    /// Create a new audit logger from config
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.audit_log,
            path: ConfigManager::audit_log_path(),
        }
    }

    /// Append an event
    ///
    /// IO failures are logged and dropped; they never fail the fetch.
    pub async fn record(&self, event: &AuditEvent) {
        if !self.enabled {
            return;
        }

        let entry = AuditEntry {
            timestamp: Utc::now(),
            event,
        };

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!(path = %self.path.display(), "Failed to write audit log: {}", e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
