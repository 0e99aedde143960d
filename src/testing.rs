//! In-memory workers, volumes and executors for unit tests
//!
//! Fakes that share an event log record each side effect as a short
//! string, so tests can assert the order of operations.

use crate::error::{RescacheError, RescacheResult};
use crate::resource::{CacheKey, GetExecutor, GetRequest, Metadata, ResourceTypes, VersionedSource};
use crate::store::{CacheMetadataStore, MemoryMetadataStore};
use crate::worker::{
    Container, ContainerSpec, OutputDelegate, ProcessResult, ProcessSpec, Volume, VolumeMount,
    Worker,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type Events = Arc<Mutex<Vec<String>>>;

fn record(events: &Events, event: impl Into<String>) {
    events.lock().unwrap().push(event.into());
}

/// Discards all output
pub struct NullDelegate;

impl OutputDelegate for NullDelegate {
    fn stdout(&self, _line: &str) {}
    fn stderr(&self, _line: &str) {}
}

pub struct FakeVolume {
    handle: String,
    privileged: Mutex<bool>,
    cache: Mutex<Option<CacheKey>>,
    events: Events,
    fail_downgrade: bool,
}

impl FakeVolume {
    /// Fresh privileged volume
    pub fn new(handle: &str) -> Self {
        Self::with_events(handle, Events::default(), false)
    }

    fn with_events(handle: &str, events: Events, fail_downgrade: bool) -> Self {
        Self {
            handle: handle.to_string(),
            privileged: Mutex::new(true),
            cache: Mutex::new(None),
            events,
            fail_downgrade,
        }
    }

    /// Unprivileged volume already initialized as cache `key`
    fn cached(handle: &str, key: &CacheKey) -> Self {
        let volume = Self::new(handle);
        *volume.privileged.lock().unwrap() = false;
        *volume.cache.lock().unwrap() = Some(key.clone());
        volume
    }

    pub fn is_privileged(&self) -> bool {
        *self.privileged.lock().unwrap()
    }

    pub fn cache(&self) -> Option<CacheKey> {
        self.cache.lock().unwrap().clone()
    }
}

#[async_trait]
impl Volume for FakeVolume {
    fn handle(&self) -> &str {
        &self.handle
    }

    async fn set_privileged(&self, privileged: bool) -> RescacheResult<()> {
        if self.fail_downgrade && !privileged {
            return Err(RescacheError::Downgrade {
                volume: self.handle.clone(),
                reason: "chown failed".to_string(),
            });
        }
        record(&self.events, format!("set_privileged:{}", privileged));
        *self.privileged.lock().unwrap() = privileged;
        Ok(())
    }

    async fn initialize_resource_cache(&self, key: &CacheKey) -> RescacheResult<()> {
        record(
            &self.events,
            format!("initialize:privileged={}", self.is_privileged()),
        );
        *self.cache.lock().unwrap() = Some(key.clone());
        Ok(())
    }
}

/// Container that returns a canned result for every process
pub struct FakeContainer {
    handle: String,
    mounts: Vec<VolumeMount>,
    result: ProcessResult,
    processes: Mutex<Vec<ProcessSpec>>,
    events: Events,
}

impl FakeContainer {
    pub fn new(mounts: Vec<VolumeMount>, result: ProcessResult) -> Self {
        Self::with_events(mounts, result, Events::default())
    }

    fn with_events(mounts: Vec<VolumeMount>, result: ProcessResult, events: Events) -> Self {
        Self {
            handle: "container-1".to_string(),
            mounts,
            result,
            processes: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn last_process(&self) -> Option<ProcessSpec> {
        self.processes.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Container for FakeContainer {
    fn handle(&self) -> &str {
        &self.handle
    }

    fn volume_mounts(&self) -> Vec<VolumeMount> {
        self.mounts.clone()
    }

    async fn run(
        &self,
        process: ProcessSpec,
        io: &dyn OutputDelegate,
        cancel: &CancellationToken,
    ) -> RescacheResult<ProcessResult> {
        if cancel.is_cancelled() {
            return Err(RescacheError::Cancelled);
        }
        record(&self.events, process.path.clone());
        self.processes.lock().unwrap().push(process);

        for line in self.result.stdout.lines() {
            io.stdout(line);
        }
        for line in self.result.stderr.lines() {
            io.stderr(line);
        }
        Ok(self.result.clone())
    }
}

/// Worker keeping its volumes in memory
pub struct FakeWorker {
    name: String,
    tags: Vec<String>,
    volumes: Mutex<Vec<Arc<FakeVolume>>>,
    events: Events,
    containers: AtomicUsize,
    mount_output: bool,
    fail_downgrade: bool,
}

impl FakeWorker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tags: Vec::new(),
            volumes: Mutex::new(Vec::new()),
            events: Events::default(),
            containers: AtomicUsize::new(0),
            mount_output: true,
            fail_downgrade: false,
        }
    }

    /// Containers come up without the requested output mount
    pub fn without_output_mount(mut self) -> Self {
        self.mount_output = false;
        self
    }

    /// Volumes refuse to become unprivileged
    pub fn failing_downgrade(mut self) -> Self {
        self.fail_downgrade = true;
        self
    }

    pub fn add_cached_volume(&self, key: &CacheKey) {
        let handle = format!("{}-cached-{}", self.name, key.short());
        self.volumes
            .lock()
            .unwrap()
            .push(Arc::new(FakeVolume::cached(&handle, key)));
    }

    pub fn volumes(&self) -> Vec<Arc<FakeVolume>> {
        self.volumes.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn containers_created(&self) -> usize {
        self.containers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for FakeWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn team_id(&self) -> Option<i32> {
        None
    }

    fn base_resource_types(&self) -> Vec<String> {
        vec!["git".to_string(), "registry-image".to_string()]
    }

    async fn find_volume_for_resource_cache(
        &self,
        key: &CacheKey,
    ) -> RescacheResult<Option<Arc<dyn Volume>>> {
        let found = self
            .volumes
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.cache().as_ref() == Some(key))
            .cloned();
        Ok(found.map(|v| v as Arc<dyn Volume>))
    }

    async fn create_container(
        &self,
        _owner: &CacheKey,
        spec: &ContainerSpec,
        _resource_types: &ResourceTypes,
    ) -> RescacheResult<Arc<dyn Container>> {
        let n = self.containers.fetch_add(1, Ordering::SeqCst);
        record(&self.events, "create_container");

        let mut mounts = Vec::new();
        for (i, path) in spec.outputs.values().enumerate() {
            let handle = format!("{}-vol-{}-{}", self.name, n, i);
            let volume = Arc::new(FakeVolume::with_events(
                &handle,
                self.events.clone(),
                self.fail_downgrade,
            ));
            self.volumes.lock().unwrap().push(volume.clone());

            let mount_path = if self.mount_output {
                path.clone()
            } else {
                format!("/elsewhere/{}", i)
            };
            mounts.push(VolumeMount { mount_path, volume });
        }

        Ok(Arc::new(FakeContainer::with_events(
            mounts,
            ProcessResult::default(),
            self.events.clone(),
        )))
    }
}

enum Behavior {
    Succeed(VersionedSource),
    Fail,
    Forbidden,
    BlockUntilCancelled,
}

/// Get executor with a scripted outcome
///
/// Runs a process named `get` in the container first, so the container's
/// event log shows when the get happened.
pub struct StubExecutor {
    behavior: Behavior,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubExecutor {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(source: VersionedSource) -> Self {
        Self::with_behavior(Behavior::Succeed(source))
    }

    /// Every get exits non-zero
    pub fn failing() -> Self {
        Self::with_behavior(Behavior::Fail)
    }

    /// Panics if a get is attempted
    pub fn forbidden() -> Self {
        Self::with_behavior(Behavior::Forbidden)
    }

    pub fn blocking_until_cancelled() -> Self {
        Self::with_behavior(Behavior::BlockUntilCancelled)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GetExecutor for StubExecutor {
    async fn get(
        &self,
        cancel: &CancellationToken,
        container: &dyn Container,
        output: &VolumeMount,
        io: &dyn OutputDelegate,
        _request: &GetRequest,
    ) -> RescacheResult<VersionedSource> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if matches!(self.behavior, Behavior::Forbidden) {
            panic!("get must not run");
        }

        let process = ProcessSpec {
            path: "get".to_string(),
            args: vec![output.mount_path.clone()],
            stdin: Vec::new(),
        };
        container.run(process, io, cancel).await?;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behavior {
            Behavior::Succeed(source) => Ok(source.clone()),
            Behavior::Fail => Err(RescacheError::ScriptFailed {
                code: 1,
                stderr: "boom".to_string(),
            }),
            Behavior::BlockUntilCancelled => {
                cancel.cancelled().await;
                Err(RescacheError::Cancelled)
            }
            Behavior::Forbidden => unreachable!(),
        }
    }
}

/// Metadata store whose reads or upserts always fail
pub struct FailingStore {
    inner: MemoryMetadataStore,
    fail_reads: bool,
    fail_upserts: bool,
}

impl FailingStore {
    pub fn reads() -> Self {
        Self {
            inner: MemoryMetadataStore::new(),
            fail_reads: true,
            fail_upserts: false,
        }
    }

    pub fn upserts() -> Self {
        Self {
            inner: MemoryMetadataStore::new(),
            fail_reads: false,
            fail_upserts: true,
        }
    }
}

#[async_trait]
impl CacheMetadataStore for FailingStore {
    async fn read(&self, key: &CacheKey) -> RescacheResult<Metadata> {
        if self.fail_reads {
            return Err(RescacheError::store(key.as_str(), "connection refused"));
        }
        self.inner.read(key).await
    }

    async fn upsert(&self, key: &CacheKey, metadata: &Metadata) -> RescacheResult<()> {
        if self.fail_upserts {
            return Err(RescacheError::store(key.as_str(), "connection refused"));
        }
        self.inner.upsert(key, metadata).await
    }
}
