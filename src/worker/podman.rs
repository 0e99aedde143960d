//! Rootless Podman worker for the local host
//!
//! Output volumes are podman named volumes whose protocol state is kept in
//! a [`VolumeRegistry`]. Fetch containers are started on demand with
//! `podman run --rm` and the output volume mounted.

use crate::config::schema::WorkerConfig;
use crate::error::{RescacheError, RescacheResult};
use crate::resource::{CacheKey, ResourceTypes};
use crate::worker::output::stream_output;
use crate::worker::registry::{VolumeRecord, VolumeRegistry};
use crate::worker::{
    Container, ContainerSpec, OutputDelegate, ProcessResult, ProcessSpec, Volume, VolumeMount,
    Worker,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Volume label keys
pub mod labels {
    /// Marks a volume as created by rescache
    pub const VOLUME: &str = "io.rescache.volume";
    /// Worker that owns the volume
    pub const WORKER: &str = "io.rescache.worker";
    /// Container output the volume was created for
    pub const OUTPUT: &str = "io.rescache.output";
}

/// Execute a podman command and capture its output
async fn exec(podman: &str, args: &[&str]) -> RescacheResult<std::process::Output> {
    debug!("Executing: {} {:?}", podman, args);

    Command::new(podman)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| RescacheError::command_failed(format!("{} {:?}", podman, args), e))
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Worker backed by the local rootless Podman
pub struct PodmanWorker {
    name: String,
    tags: Vec<String>,
    team_id: Option<i32>,
    podman: String,
    images: BTreeMap<String, String>,
    registry: VolumeRegistry,
}

impl PodmanWorker {
    pub fn new(config: &WorkerConfig, registry: VolumeRegistry) -> Self {
        Self {
            name: config.name.clone(),
            tags: config.tags.clone(),
            team_id: config.team_id,
            podman: config.podman.clone(),
            images: config.resource_types.clone(),
            registry,
        }
    }

    /// Image for `resource_type`, from the pipeline's custom types first and
    /// the worker's base types second
    pub fn resolve_image(
        &self,
        resource_type: &str,
        resource_types: &ResourceTypes,
    ) -> RescacheResult<String> {
        if let Some(custom) = resource_types.lookup(resource_type) {
            let repository = custom
                .source
                .get("repository")
                .and_then(|v| v.as_str())
                .ok_or_else(|| RescacheError::UnknownResourceType(resource_type.to_string()))?;

            if let Some(digest) = custom.version.as_ref().and_then(|v| v.get("digest")) {
                return Ok(format!("{}@{}", repository, digest));
            }

            let tag = custom
                .source
                .get("tag")
                .and_then(|v| v.as_str())
                .unwrap_or("latest");
            return Ok(format!("{}:{}", repository, tag));
        }

        self.images
            .get(resource_type)
            .cloned()
            .ok_or_else(|| RescacheError::UnknownResourceType(resource_type.to_string()))
    }

    async fn volume_exists(&self, name: &str) -> RescacheResult<bool> {
        let output = exec(&self.podman, &["volume", "exists", name]).await?;
        Ok(output.status.success())
    }

    async fn volume_create(&self, name: &str, output_name: &str) -> RescacheResult<()> {
        let label_args = [
            format!("{}=true", labels::VOLUME),
            format!("{}={}", labels::WORKER, self.name),
            format!("{}={}", labels::OUTPUT, output_name),
        ];

        let mut args = vec!["volume", "create"];
        for label in &label_args {
            args.push("--label");
            args.push(label.as_str());
        }
        args.push(name);

        let output = exec(&self.podman, &args).await?;
        if output.status.success() {
            debug!("Volume created: {}", name);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(RescacheError::command_exec(
                format!("{} volume create {}", self.podman, name),
                stderr.trim(),
            ))
        }
    }
}

#[async_trait]
impl Worker for PodmanWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn team_id(&self) -> Option<i32> {
        self.team_id
    }

    fn base_resource_types(&self) -> Vec<String> {
        self.images.keys().cloned().collect()
    }

    async fn find_volume_for_resource_cache(
        &self,
        key: &CacheKey,
    ) -> RescacheResult<Option<Arc<dyn Volume>>> {
        let record = self
            .registry
            .find_initialized(key)
            .await
            .map_err(|e| RescacheError::VolumeLookup {
                worker: self.name.clone(),
                reason: e.to_string(),
            })?;

        let Some(record) = record else {
            return Ok(None);
        };

        if !self.volume_exists(&record.handle).await? {
            warn!(
                volume = %record.handle,
                "registered cache volume is gone from podman, forgetting it"
            );
            self.registry.remove(&record.handle).await?;
            return Ok(None);
        }

        Ok(Some(Arc::new(PodmanVolume {
            handle: record.handle,
            registry: self.registry.clone(),
        })))
    }

    async fn create_container(
        &self,
        owner: &CacheKey,
        spec: &ContainerSpec,
        resource_types: &ResourceTypes,
    ) -> RescacheResult<Arc<dyn Container>> {
        let image = self.resolve_image(&spec.image.resource_type, resource_types)?;
        let privileged = resource_types
            .lookup(&spec.image.resource_type)
            .is_some_and(|t| t.privileged);

        let mut mounts = Vec::with_capacity(spec.outputs.len());
        for (output, path) in &spec.outputs {
            let handle = format!("rescache-{}-{}", owner.short(), short_id());
            self.volume_create(&handle, output).await?;
            self.registry.save(&VolumeRecord::new(&handle)).await?;

            mounts.push(VolumeMount {
                mount_path: path.clone(),
                volume: Arc::new(PodmanVolume {
                    handle,
                    registry: self.registry.clone(),
                }),
            });
        }

        let handle = format!("rescache-get-{}-{}", owner.short(), short_id());
        info!(container = %handle, image = %image, "prepared fetch container");

        Ok(Arc::new(PodmanContainer {
            handle,
            podman: self.podman.clone(),
            image,
            env: spec.env.clone(),
            privileged,
            mounts,
        }))
    }
}

/// Podman named volume tracked in the registry
pub struct PodmanVolume {
    handle: String,
    registry: VolumeRegistry,
}

#[async_trait]
impl Volume for PodmanVolume {
    fn handle(&self) -> &str {
        &self.handle
    }

    async fn set_privileged(&self, privileged: bool) -> RescacheResult<()> {
        self.registry
            .update(&self.handle, |record| {
                record.privileged = privileged;
                Ok(())
            })
            .await
            .map_err(|e| RescacheError::Downgrade {
                volume: self.handle.clone(),
                reason: e.to_string(),
            })?;

        debug!(volume = %self.handle, privileged, "updated volume privilege");
        Ok(())
    }

    async fn initialize_resource_cache(&self, key: &CacheKey) -> RescacheResult<()> {
        self.registry
            .update(&self.handle, |record| {
                if record.privileged {
                    return Err("volume is still privileged".to_string());
                }
                record.resource_cache = Some(key.clone());
                Ok(())
            })
            .await
            .map_err(|e| RescacheError::Association {
                volume: self.handle.clone(),
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        debug!(volume = %self.handle, cache_key = %key, "initialized resource cache");
        Ok(())
    }
}

/// A fetch container started on demand by [`Container::run`]
pub struct PodmanContainer {
    handle: String,
    podman: String,
    image: String,
    env: Vec<(String, String)>,
    privileged: bool,
    mounts: Vec<VolumeMount>,
}

impl PodmanContainer {
    /// Build `podman run` arguments for `process`
    fn run_args(&self, process: &ProcessSpec) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "-i".to_string(),
            "--name".to_string(),
            self.handle.clone(),
        ];

        if self.privileged {
            args.push("--privileged".to_string());
        } else {
            args.push("--security-opt".to_string());
            args.push("no-new-privileges".to_string());
        }

        for mount in &self.mounts {
            args.push("-v".to_string());
            args.push(format!("{}:{}", mount.volume.handle(), mount.mount_path));
        }

        for (k, v) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", k, v));
        }

        args.push("--entrypoint".to_string());
        args.push(process.path.clone());
        args.push(self.image.clone());
        args.extend(process.args.iter().cloned());
        args
    }

    async fn force_remove(&self) {
        match exec(&self.podman, &["rm", "-f", &self.handle]).await {
            Ok(output) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.contains("no such container") {
                    warn!(container = %self.handle, "failed to remove container: {}", stderr.trim());
                }
            }
            Err(e) => warn!(container = %self.handle, "failed to remove container: {}", e),
            Ok(_) => {}
        }
    }
}

#[async_trait]
impl Container for PodmanContainer {
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
        let args = self.run_args(&process);
        debug!("Running container: {} {:?}", self.podman, args);

        let mut child = Command::new(&self.podman)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RescacheError::command_failed(format!("{} run", self.podman), e))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(&process.stdin).await {
                if e.kind() != ErrorKind::BrokenPipe {
                    return Err(RescacheError::GetExecution {
                        container: self.handle.clone(),
                        reason: format!("writing request: {}", e),
                    });
                }
            }
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RescacheError::ContainerCreate("stdout not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RescacheError::ContainerCreate("stderr not piped".to_string()))?;

        tokio::select! {
            (stdout, stderr) = stream_output(stdout, stderr, io) => {
                let status = child
                    .wait()
                    .await
                    .map_err(|e| RescacheError::GetExecution {
                        container: self.handle.clone(),
                        reason: format!("waiting for podman: {}", e),
                    })?;
                Ok(ProcessResult {
                    exit_code: status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                })
            }
            _ = cancel.cancelled() => {
                warn!(container = %self.handle, "fetch cancelled, killing container");
                if let Err(e) = child.kill().await {
                    warn!(container = %self.handle, "failed to kill podman: {}", e);
                }
                self.force_remove().await;
                Err(RescacheError::Cancelled)
            }
        }
    }
}
