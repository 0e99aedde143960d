//! Worker, container and volume abstractions
//!
//! The fetch protocol only talks to workers through these traits. A worker
//! owns its volumes and knows which of them are initialized resource caches;
//! containers are created per fetch with an output volume mounted.
//!
//! - `podman`: rootless Podman worker on the local host

mod output;
mod podman;
mod registry;
mod spec;

pub use output::{OutputDelegate, TracingDelegate};
pub use podman::{PodmanContainer, PodmanVolume, PodmanWorker};
pub use registry::{VolumeRecord, VolumeRegistry};
pub use spec::{ContainerSpec, ImageSpec, WorkerSpec};

use crate::error::RescacheResult;
use crate::resource::{CacheKey, ResourceTypes};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A unit of storage on a worker
#[async_trait]
pub trait Volume: Send + Sync {
    /// Worker-unique volume handle
    fn handle(&self) -> &str;

    /// Set whether the volume is owned by the privileged namespace
    async fn set_privileged(&self, privileged: bool) -> RescacheResult<()>;

    /// Mark the volume as holding the resource cache `key`, making it
    /// discoverable through [`Worker::find_volume_for_resource_cache`]
    async fn initialize_resource_cache(&self, key: &CacheKey) -> RescacheResult<()>;
}

impl fmt::Debug for dyn Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("handle", &self.handle())
            .finish()
    }
}

/// A volume mounted into a container
#[derive(Clone)]
pub struct VolumeMount {
    pub mount_path: String,
    pub volume: Arc<dyn Volume>,
}

/// A process to run inside a container
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub path: String,
    pub args: Vec<String>,
    pub stdin: Vec<u8>,
}

/// Captured outcome of a container process
#[derive(Debug, Clone, Default)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A sandbox created for a single fetch
#[async_trait]
pub trait Container: Send + Sync {
    fn handle(&self) -> &str;

    /// Volumes mounted into this container
    fn volume_mounts(&self) -> Vec<VolumeMount>;

    /// Run a process, forwarding output lines to `io` as they arrive.
    /// Cancelling `cancel` kills the process and yields
    /// [`RescacheError::Cancelled`](crate::error::RescacheError::Cancelled).
    async fn run(
        &self,
        process: ProcessSpec,
        io: &dyn OutputDelegate,
        cancel: &CancellationToken,
    ) -> RescacheResult<ProcessResult>;
}

/// A host able to run fetch containers and hold cache volumes
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    /// Placement tags; tagged workers only accept steps with matching tags
    fn tags(&self) -> &[String];

    /// Owning team, or `None` for a worker shared by all teams
    fn team_id(&self) -> Option<i32>;

    /// Resource types this worker ships images for
    fn base_resource_types(&self) -> Vec<String>;

    /// Check this worker can run a container for `spec`
    fn satisfies(&self, spec: &WorkerSpec) -> Result<(), String> {
        spec.check(self.tags(), self.team_id(), &self.base_resource_types())
    }

    /// Find an unprivileged volume initialized as resource cache `key`
    async fn find_volume_for_resource_cache(
        &self,
        key: &CacheKey,
    ) -> RescacheResult<Option<Arc<dyn Volume>>>;

    /// Create a container for `spec`, allocating fresh privileged volumes
    /// for each of its outputs
    async fn create_container(
        &self,
        owner: &CacheKey,
        spec: &ContainerSpec,
        resource_types: &ResourceTypes,
    ) -> RescacheResult<Arc<dyn Container>>;
}
