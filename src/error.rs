//! Error types for rescache
//!
//! All modules use `RescacheResult<T>` as their return type. Every error
//! reports the [`Phase`] of the fetch protocol it came from so callers can
//! decide whether to retry the whole lock-then-create cycle.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for rescache operations
pub type RescacheResult<T> = Result<T, RescacheError>;

/// Protocol phase an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Deriving the cache key or lock name
    Identity,
    /// Looking up an initialized volume on the worker
    Lookup,
    /// Reading or writing the cache metadata store
    Store,
    /// Acquiring or validating the fetch lock
    Lock,
    /// Resolving the worker or instantiating the container
    Provisioning,
    /// Running the resource type's get
    Execution,
    /// Downgrading the fetched volume to unprivileged
    Downgrade,
    /// Marking the volume as an initialized resource cache
    Association,
    /// Persisting metadata after a successful fetch
    Persist,
    /// Configuration and local environment
    Config,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Identity => "identity",
            Self::Lookup => "lookup",
            Self::Store => "store",
            Self::Lock => "lock",
            Self::Provisioning => "provisioning",
            Self::Execution => "execution",
            Self::Downgrade => "downgrade",
            Self::Association => "association",
            Self::Persist => "persist",
            Self::Config => "config",
        };
        write!(f, "{}", name)
    }
}

/// All errors that can occur in rescache
#[derive(Error, Debug)]
pub enum RescacheError {
    // Identity errors
    #[error("Invalid resource identity: {0}")]
    InvalidIdentity(String),

    // Lookup and store errors
    #[error("Volume lookup failed on worker {worker}: {reason}")]
    VolumeLookup { worker: String, reason: String },

    #[error("Cache metadata store error for {key}: {reason}")]
    MetadataStore { key: String, reason: String },

    #[error("Failed to persist metadata for {key}: {reason}")]
    MetadataPersist { key: String, reason: String },

    // Lock errors
    #[error("Lock {expected} is not held by the caller")]
    LockNotHeld { expected: String },

    #[error("Timed out acquiring lock {name} after {attempts} attempts")]
    LockTimeout { name: String, attempts: u32 },

    #[error("Lock manager error for {name}: {reason}")]
    Lock { name: String, reason: String },

    // Provisioning errors
    #[error("Worker {worker} does not satisfy spec: {reason}")]
    WorkerMismatch { worker: String, reason: String },

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("Container failed to start: {0}")]
    ContainerCreate(String),

    #[error("Container {container} has no volume mounted at {path}")]
    MountMissing { container: String, path: String },

    // Execution errors
    #[error("Resource get failed with exit code {code}: {stderr}")]
    ScriptFailed { code: i32, stderr: String },

    #[error("Malformed resource output: {0}")]
    MalformedOutput(String),

    #[error("Get in container {container} failed: {reason}")]
    GetExecution { container: String, reason: String },

    #[error("Fetch cancelled")]
    Cancelled,

    // Post-fetch errors
    #[error("Failed to set volume {volume} unprivileged: {reason}")]
    Downgrade { volume: String, reason: String },

    #[error("Failed to initialize volume {volume} as cache {key}: {reason}")]
    Association {
        volume: String,
        key: String,
        reason: String,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("{0}")]
    User(String),
}

impl RescacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Create a metadata store error
    pub fn store(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::MetadataStore {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Attribute a runtime or I/O failure to the get running in `container`
    ///
    /// Protocol errors keep their own phase.
    pub fn during_get(self, container: &str) -> Self {
        match self {
            Self::Io { .. }
            | Self::Json(_)
            | Self::CommandFailed { .. }
            | Self::CommandExecution { .. } => {
                let reason = match std::error::Error::source(&self) {
                    Some(source) => format!("{}: {}", self, source),
                    None => self.to_string(),
                };
                Self::GetExecution {
                    container: container.to_string(),
                    reason,
                }
            }
            other => other,
        }
    }

    /// Protocol phase this error belongs to
    pub fn phase(&self) -> Phase {
        match self {
            Self::InvalidIdentity(_) => Phase::Identity,
            Self::VolumeLookup { .. } => Phase::Lookup,
            Self::MetadataStore { .. } | Self::Json(_) => Phase::Store,
            Self::MetadataPersist { .. } => Phase::Persist,
            Self::LockNotHeld { .. } | Self::LockTimeout { .. } | Self::Lock { .. } => Phase::Lock,
            Self::WorkerMismatch { .. }
            | Self::UnknownResourceType(_)
            | Self::ContainerCreate(_)
            | Self::MountMissing { .. }
            | Self::CommandFailed { .. }
            | Self::CommandExecution { .. } => Phase::Provisioning,
            Self::ScriptFailed { .. }
            | Self::GetExecution { .. }
            | Self::MalformedOutput(_)
            | Self::Cancelled => Phase::Execution,
            Self::Downgrade { .. } => Phase::Downgrade,
            Self::Association { .. } => Phase::Association,
            Self::ConfigInvalid { .. }
            | Self::ConfigDirCreate { .. }
            | Self::Io { .. }
            | Self::TomlSerialize(_)
            | Self::User(_) => Phase::Config,
        }
    }

    /// Check if the lock-then-create cycle is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::VolumeLookup { .. }
                | Self::MetadataStore { .. }
                | Self::LockTimeout { .. }
                | Self::ContainerCreate(_)
                | Self::ScriptFailed { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::MountMissing { .. } => Some("The worker runtime did not mount the output volume"),
            Self::LockTimeout { .. } => {
                Some("Another fetch holds the lock; retry later or raise fetch.lock_attempts")
            }
            Self::UnknownResourceType(_) => Some("Add the type to [worker.resource_types]"),
            Self::CommandFailed { .. } => Some("Is podman installed and on PATH?"),
            _ => None,
        }
    }
}
