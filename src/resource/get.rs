//! The resource type's get capability
//!
//! A get streams one version of a resource into a mounted volume and
//! reports the version it actually fetched plus provenance metadata.

use crate::error::{RescacheError, RescacheResult};
use crate::resource::versioned::{Config, Metadata, Version, VersionedSource};
use crate::worker::{Container, OutputDelegate, ProcessSpec, VolumeMount};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Default location of the get script inside resource images
pub const GET_SCRIPT_PATH: &str = "/opt/resource/in";

/// Max number of stderr lines kept in a failure message
const ERROR_TAIL_LINES: usize = 20;

/// Input to a get
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    pub source: Config,
    pub params: Config,
    pub version: Version,
}

/// Output of a get script
#[derive(Debug, Deserialize)]
struct GetResponse {
    version: Version,
    #[serde(default)]
    metadata: Metadata,
}

/// Runs a resource type's get inside a prepared container
///
/// Implementations block for the whole fetch and do not retry.
#[async_trait]
pub trait GetExecutor: Send + Sync {
    async fn get(
        &self,
        cancel: &CancellationToken,
        container: &dyn Container,
        output: &VolumeMount,
        io: &dyn OutputDelegate,
        request: &GetRequest,
    ) -> RescacheResult<VersionedSource>;
}

/// Get executor for images following the `/opt/resource/in` convention:
/// the request is JSON on stdin, the destination directory is the only
/// argument, and the response is JSON on stdout.
#[derive(Debug, Clone)]
pub struct ScriptGetExecutor {
    script_path: String,
}

impl ScriptGetExecutor {
    pub fn new(script_path: impl Into<String>) -> Self {
        Self {
            script_path: script_path.into(),
        }
    }
}

impl Default for ScriptGetExecutor {
    fn default() -> Self {
        Self::new(GET_SCRIPT_PATH)
    }
}

/// Last `ERROR_TAIL_LINES` lines of `text`
fn tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(ERROR_TAIL_LINES);
    lines[start..].join("\n")
}

#[async_trait]
impl GetExecutor for ScriptGetExecutor {
    async fn get(
        &self,
        cancel: &CancellationToken,
        container: &dyn Container,
        output: &VolumeMount,
        io: &dyn OutputDelegate,
        request: &GetRequest,
    ) -> RescacheResult<VersionedSource> {
        let process = ProcessSpec {
            path: self.script_path.clone(),
            args: vec![output.mount_path.clone()],
            stdin: serde_json::to_vec(request)
                .map_err(|e| RescacheError::from(e).during_get(container.handle()))?,
        };

        debug!(
            container = container.handle(),
            volume = output.volume.handle(),
            "running get script"
        );
        let result = container
            .run(process, io, cancel)
            .await
            .map_err(|e| e.during_get(container.handle()))?;

        if result.exit_code != 0 {
            error!(
                container = container.handle(),
                exit_code = result.exit_code,
                "get script failed"
            );
            return Err(RescacheError::ScriptFailed {
                code: result.exit_code,
                stderr: tail(&result.stderr),
            });
        }

        let response: GetResponse = serde_json::from_str(&result.stdout)
            .map_err(|e| RescacheError::MalformedOutput(format!("{}: {}", e, tail(&result.stdout))))?;

        Ok(VersionedSource::new(response.version, response.metadata))
    }
}
