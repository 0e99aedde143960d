//! Wiring from CLI arguments and configuration to fetch components

use crate::cli::args::{GetArgs, ResourceArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{RescacheError, RescacheResult};
use crate::lock::FileLockManager;
use crate::resource::{
    self, FetchSource, Fetcher, ResourceInstance, ResourceTypes, ScriptGetExecutor, StepMetadata,
    Version,
};
use crate::store::FileMetadataStore;
use crate::worker::{PodmanWorker, VolumeRegistry};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;

/// Build a JSON object from `--x KEY=VALUE` pairs or a `--x-json` document
fn object(
    flag: &str,
    pairs: &[(String, String)],
    json: Option<&str>,
) -> RescacheResult<resource::Config> {
    match json {
        Some(json) => match serde_json::from_str::<Value>(json) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(RescacheError::User(format!(
                "--{}-json must be a JSON object",
                flag
            ))),
            Err(e) => Err(RescacheError::User(format!(
                "invalid --{}-json: {}",
                flag, e
            ))),
        },
        None => Ok(pairs
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<Map<String, Value>>()),
    }
}

fn version(pairs: &[(String, String)], json: Option<&str>) -> RescacheResult<Version> {
    match json {
        Some(json) => serde_json::from_str(json).map_err(|e| {
            RescacheError::User(format!(
                "--version-json must be an object of strings: {}",
                e
            ))
        }),
        None => Ok(pairs.iter().cloned().collect()),
    }
}

/// Resource instance described by the arguments
pub fn instance(args: &ResourceArgs) -> RescacheResult<ResourceInstance> {
    let source = object("source", &args.source, args.source_json.as_deref())?;
    let params = object("params", &args.param, args.params_json.as_deref())?;
    let version = version(&args.resource_version, args.version_json.as_deref())?;

    Ok(ResourceInstance::new(
        args.resource_type.clone(),
        source,
        version,
        params,
    ))
}

/// Worker name from the arguments, else from config
pub fn worker_name<'a>(args: &'a ResourceArgs, config: &'a Config) -> &'a str {
    args.worker.as_deref().unwrap_or(&config.worker.name)
}

/// Load custom resource types from a JSON file
pub async fn resource_types(path: Option<&Path>) -> RescacheResult<ResourceTypes> {
    let Some(path) = path else {
        return Ok(ResourceTypes::default());
    };

    let content = fs::read_to_string(path)
        .await
        .map_err(|e| RescacheError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_str(&content).map_err(|e| {
        RescacheError::User(format!(
            "invalid resource types in {}: {}",
            path.display(),
            e
        ))
    })
}

/// Fetch source for `args` on the configured local worker
pub async fn fetch_source(args: &ResourceArgs, config: &Config) -> RescacheResult<FetchSource> {
    let mut worker_config = config.worker.clone();
    worker_config.name = worker_name(args, config).to_string();

    let registry = VolumeRegistry::new(ConfigManager::volumes_dir(&worker_config.name));
    let worker = PodmanWorker::new(&worker_config, registry);

    let store_dir = config
        .store
        .dir
        .clone()
        .unwrap_or_else(ConfigManager::metadata_dir);
    let store = FileMetadataStore::new(store_dir).await?;

    let executor = ScriptGetExecutor::new(config.fetch.script_path.clone());

    Ok(FetchSource::new(
        instance(args)?,
        Arc::new(worker),
        Arc::new(store),
        Arc::new(executor),
    )
    .with_team(config.worker.team_id)
    .with_mount_path(config.fetch.mount_path.clone()))
}

/// Step placement and metadata from the get arguments
pub async fn configure_step(source: FetchSource, args: &GetArgs) -> RescacheResult<FetchSource> {
    let resource_types = resource_types(args.resource_types.as_deref()).await?;
    let metadata = StepMetadata {
        pipeline_name: args.pipeline.clone().unwrap_or_default(),
        job_name: args.job.clone().unwrap_or_default(),
        build_name: args.build.clone().unwrap_or_default(),
        ..Default::default()
    };

    let source = source
        .with_tags(args.tags.clone())
        .with_resource_types(resource_types)
        .with_metadata(metadata);

    Ok(match args.team_id {
        Some(team) => source.with_team(Some(team)),
        None => source,
    })
}

/// Fetcher over the host's lock directory
pub fn fetcher(config: &Config) -> Fetcher {
    let stale_after = match config.locks.stale_after_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };

    Fetcher::new(Arc::new(FileLockManager::new(
        ConfigManager::locks_dir(),
        stale_after,
    )))
    .with_retry_interval(Duration::from_millis(config.fetch.lock_retry_interval_ms))
    .with_max_attempts(config.fetch.lock_attempts)
}
