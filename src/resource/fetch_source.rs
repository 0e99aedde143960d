//! Fetch-and-cache of a resource instance on one worker
//!
//! The protocol is a two-phase check around a caller-held lock:
//!
//! 1. [`FetchSource::find`] before taking the lock, to skip locking on a hit.
//! 2. Caller acquires the lock named by [`FetchSource::lock_name`].
//! 3. [`FetchSource::create`] calls `find` again, since another holder may
//!    have fetched between step 1 and acquiring the lock, and only on a miss
//!    runs the get.
//!
//! A fetched volume is downgraded to unprivileged before it is initialized
//! as a resource cache, so it is never discoverable while privileged.

use crate::error::{RescacheError, RescacheResult};
use crate::lock::Lock;
use crate::resource::get::{GetExecutor, GetRequest};
use crate::resource::identity::ResourceInstance;
use crate::resource::step::StepMetadata;
use crate::resource::types::ResourceTypes;
use crate::resource::versioned::VersionedSource;
use crate::store::CacheMetadataStore;
use crate::worker::{
    ContainerSpec, ImageSpec, OutputDelegate, TracingDelegate, Worker, WorkerSpec,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Where the fetched resource is mounted in the get container
pub const RESOURCE_MOUNT_PATH: &str = "/tmp/build/get";

/// Container output name of the fetched resource
const RESOURCE_OUTPUT: &str = "resource";

/// Result of [`FetchSource::create`]
#[derive(Debug)]
pub struct FetchOutcome {
    source: VersionedSource,
    from_cache: bool,
    persist_warning: Option<RescacheError>,
}

impl FetchOutcome {
    pub(crate) fn cached(source: VersionedSource) -> Self {
        Self {
            source,
            from_cache: true,
            persist_warning: None,
        }
    }

    pub fn source(&self) -> &VersionedSource {
        &self.source
    }

    /// Whether an existing cache volume was reused
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// Set when the fetch succeeded but its metadata could not be persisted.
    /// The cache volume is initialized; only the stored metadata is missing.
    pub fn persist_warning(&self) -> Option<&RescacheError> {
        self.persist_warning.as_ref()
    }
}

/// Fetches one resource instance onto one worker
///
/// Holds only configuration captured at construction; every call is
/// independent, so one instance may be shared between tasks.
pub struct FetchSource {
    instance: ResourceInstance,
    worker: Arc<dyn Worker>,
    store: Arc<dyn CacheMetadataStore>,
    executor: Arc<dyn GetExecutor>,
    delegate: Arc<dyn OutputDelegate>,
    resource_types: ResourceTypes,
    tags: Vec<String>,
    team_id: Option<i32>,
    metadata: StepMetadata,
    mount_path: String,
}

impl FetchSource {
    pub fn new(
        instance: ResourceInstance,
        worker: Arc<dyn Worker>,
        store: Arc<dyn CacheMetadataStore>,
        executor: Arc<dyn GetExecutor>,
    ) -> Self {
        Self {
            instance,
            worker,
            store,
            executor,
            delegate: Arc::new(TracingDelegate),
            resource_types: ResourceTypes::default(),
            tags: Vec::new(),
            team_id: None,
            metadata: StepMetadata::default(),
            mount_path: RESOURCE_MOUNT_PATH.to_string(),
        }
    }

    /// Placement tags the worker must carry
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_team(mut self, team_id: Option<i32>) -> Self {
        self.team_id = team_id;
        self
    }

    /// Custom resource types visible to the step
    pub fn with_resource_types(mut self, resource_types: ResourceTypes) -> Self {
        self.resource_types = resource_types;
        self
    }

    /// Build metadata exported to the get container
    pub fn with_metadata(mut self, metadata: StepMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Receiver for the get's output
    pub fn with_delegate(mut self, delegate: Arc<dyn OutputDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn with_mount_path(mut self, mount_path: impl Into<String>) -> Self {
        self.mount_path = mount_path.into();
        self
    }

    pub fn instance(&self) -> &ResourceInstance {
        &self.instance
    }

    pub fn worker_name(&self) -> &str {
        self.worker.name()
    }

    /// Name of the lock the caller must hold around [`create`](Self::create)
    pub fn lock_name(&self) -> RescacheResult<String> {
        self.instance.lock_name(self.worker.name())
    }

    /// Look for an initialized cache of this instance on the worker
    ///
    /// Takes no lock and changes nothing.
    pub async fn find(&self) -> RescacheResult<Option<VersionedSource>> {
        let worker = self.worker.name();

        let volume = self
            .instance
            .find_on(self.worker.as_ref())
            .await
            .map_err(|e| {
                error!(worker, "failed to find initialized volume: {}", e);
                match e {
                    RescacheError::InvalidIdentity(_) | RescacheError::VolumeLookup { .. } => e,
                    other => RescacheError::VolumeLookup {
                        worker: worker.to_string(),
                        reason: other.to_string(),
                    },
                }
            })?;

        let Some(volume) = volume else {
            return Ok(None);
        };

        let key = self.instance.cache_key()?;
        let metadata = self.store.read(&key).await.map_err(|e| {
            error!(cache_key = %key, "failed to get resource cache metadata: {}", e);
            match e {
                RescacheError::MetadataStore { .. } => e,
                other => RescacheError::store(key.as_str(), other),
            }
        })?;

        debug!(
            worker,
            volume = volume.handle(),
            cache_key = %key,
            "found initialized versioned source"
        );

        Ok(Some(VersionedSource::new(
            self.instance.version().clone(),
            metadata,
        )))
    }

    /// Fetch the instance unless it is already cached
    ///
    /// `lock` must be the caller's held lock named by
    /// [`lock_name`](Self::lock_name); anything else is rejected with
    /// [`RescacheError::LockNotHeld`] before any work is done.
    pub async fn create(
        &self,
        cancel: &CancellationToken,
        lock: &Lock,
    ) -> RescacheResult<FetchOutcome> {
        let expected = self.lock_name()?;
        if lock.name() != expected || !lock.is_held() {
            return Err(RescacheError::LockNotHeld { expected });
        }

        if let Some(found) = self.find().await? {
            debug!(lock_name = %expected, "cache appeared while acquiring lock");
            return Ok(FetchOutcome::cached(found));
        }

        let key = self.instance.cache_key()?;
        let worker = self.worker.name();

        let worker_spec = self.worker_spec();
        self.worker
            .satisfies(&worker_spec)
            .map_err(|reason| RescacheError::WorkerMismatch {
                worker: worker.to_string(),
                reason,
            })?;

        let container_spec = self.container_spec();
        let container = self
            .worker
            .create_container(&key, &container_spec, &self.resource_types)
            .await
            .map_err(|e| {
                error!(worker, cache_key = %key, "failed to construct resource: {}", e);
                e
            })?;

        let output = container
            .volume_mounts()
            .into_iter()
            .find(|m| m.mount_path == self.mount_path)
            .ok_or_else(|| {
                error!(container = container.handle(), "output volume not mounted");
                RescacheError::MountMissing {
                    container: container.handle().to_string(),
                    path: self.mount_path.clone(),
                }
            })?;
        let volume = output.volume.clone();

        if cancel.is_cancelled() {
            return Err(RescacheError::Cancelled);
        }

        info!(
            worker,
            resource_type = self.instance.resource_type(),
            cache_key = %key,
            volume = volume.handle(),
            "fetching resource"
        );

        let request = GetRequest {
            source: self.instance.source().clone(),
            params: self.instance.params().clone(),
            version: self.instance.version().clone(),
        };
        let fetched = self
            .executor
            .get(
                cancel,
                container.as_ref(),
                &output,
                self.delegate.as_ref(),
                &request,
            )
            .await
            .map_err(|e| {
                error!(worker, cache_key = %key, "failed to fetch resource: {}", e);
                e
            })?;

        volume.set_privileged(false).await.map_err(|e| {
            error!(volume = volume.handle(), "failed to set volume unprivileged: {}", e);
            match e {
                RescacheError::Downgrade { .. } => e,
                other => RescacheError::Downgrade {
                    volume: volume.handle().to_string(),
                    reason: other.to_string(),
                },
            }
        })?;

        volume
            .initialize_resource_cache(&key)
            .await
            .map_err(|e| {
                error!(volume = volume.handle(), cache_key = %key, "failed to initialize cache: {}", e);
                match e {
                    RescacheError::Association { .. } => e,
                    other => RescacheError::Association {
                        volume: volume.handle().to_string(),
                        key: key.to_string(),
                        reason: other.to_string(),
                    },
                }
            })?;

        let persist_warning = match self.store.upsert(&key, fetched.metadata()).await {
            Ok(()) => None,
            Err(e) => {
                warn!(
                    cache_key = %key,
                    "failed to update resource cache metadata: {}", e
                );
                Some(RescacheError::MetadataPersist {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        info!(worker, cache_key = %key, volume = volume.handle(), "fetched resource");

        Ok(FetchOutcome {
            source: fetched,
            from_cache: false,
            persist_warning,
        })
    }

    fn container_spec(&self) -> ContainerSpec {
        let mut outputs = BTreeMap::new();
        outputs.insert(RESOURCE_OUTPUT.to_string(), self.mount_path.clone());

        ContainerSpec {
            image: ImageSpec {
                resource_type: self.instance.resource_type().to_string(),
            },
            tags: self.tags.clone(),
            team_id: self.team_id,
            env: self.metadata.env(),
            outputs,
        }
    }

    fn worker_spec(&self) -> WorkerSpec {
        WorkerSpec {
            resource_type: self.instance.resource_type().to_string(),
            tags: self.tags.clone(),
            team_id: self.team_id,
            resource_types: self.resource_types.clone(),
        }
    }
}
