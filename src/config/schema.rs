//! Configuration schema for rescache
//!
//! Configuration is stored at `~/.config/rescache/config.toml`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Fetch behaviour
    pub fetch: FetchConfig,

    /// Fetch lock settings
    pub locks: LocksConfig,

    /// Cache metadata store
    pub store: StoreConfig,

    /// Local worker
    pub worker: WorkerConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Where the fetched resource is mounted in the get container
    pub mount_path: String,

    /// Get script inside resource images
    pub script_path: String,

    /// Delay between attempts at a contended lock, in milliseconds
    pub lock_retry_interval_ms: u64,

    /// Attempts at a contended lock before giving up (0 = unlimited)
    pub lock_attempts: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mount_path: "/tmp/build/get".to_string(),
            script_path: "/opt/resource/in".to_string(),
            lock_retry_interval_ms: 1000,
            lock_attempts: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocksConfig {
    /// Reclaim lock files older than this many seconds (0 = never)
    pub stale_after_secs: u64,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Metadata directory (default: state dir)
    pub dir: Option<PathBuf>,
}

/// Local worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker name, part of every lock name
    pub name: String,

    /// Placement tags
    pub tags: Vec<String>,

    /// Owning team; unset for a shared worker
    pub team_id: Option<i32>,

    /// Podman binary
    pub podman: String,

    /// Base resource type name to image
    pub resource_types: BTreeMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let resource_types = [
            ("git", "docker.io/concourse/git-resource:latest"),
            ("registry-image", "docker.io/concourse/registry-image-resource:latest"),
            ("time", "docker.io/concourse/time-resource:latest"),
            ("s3", "docker.io/concourse/s3-resource:latest"),
        ]
        .into_iter()
        .map(|(name, image)| (name.to_string(), image.to_string()))
        .collect();

        Self {
            name: "local".to_string(),
            tags: vec![],
            team_id: None,
            podman: "podman".to_string(),
            resource_types,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[worker.resource_types]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.worker.name, "local");
        assert_eq!(config.fetch.lock_attempts, 600);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [worker]
            name = "w1"
            tags = ["linux"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.worker.name, "w1");
        assert_eq!(config.worker.tags, vec!["linux".to_string()]);
        assert!(config.worker.resource_types.contains_key("git")); // default preserved
        assert_eq!(config.fetch.mount_path, "/tmp/build/get");
    }
}
