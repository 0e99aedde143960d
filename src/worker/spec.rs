//! Container and worker specifications built per fetch

use crate::resource::ResourceTypes;
use std::collections::BTreeMap;

/// Image a container runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    /// Resource type whose image backs the container
    pub resource_type: String,
}

/// Description of the sandbox a fetch runs in
///
/// Built fresh for each fetch and never mutated after being handed to a
/// worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: ImageSpec,
    pub tags: Vec<String>,
    pub team_id: Option<i32>,
    pub env: Vec<(String, String)>,
    /// Output name to mount path
    pub outputs: BTreeMap<String, String>,
}

/// Requirements a worker must meet to run a fetch
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSpec {
    pub resource_type: String,
    pub tags: Vec<String>,
    pub team_id: Option<i32>,
    pub resource_types: ResourceTypes,
}

impl WorkerSpec {
    /// Check the spec against a worker's tags, team and base types
    pub fn check(
        &self,
        worker_tags: &[String],
        worker_team: Option<i32>,
        base_types: &[String],
    ) -> Result<(), String> {
        if let Some(team) = worker_team {
            if self.team_id != Some(team) {
                return Err(format!("worker belongs to team {}", team));
            }
        }

        if self.tags.is_empty() && !worker_tags.is_empty() {
            return Err("worker is tagged and the step has no tags".to_string());
        }
        if let Some(missing) = self.tags.iter().find(|t| !worker_tags.contains(*t)) {
            return Err(format!("worker is missing tag {}", missing));
        }

        let base = self
            .resource_types
            .base_type(&self.resource_type)
            .ok_or_else(|| format!("resource type {} is cyclic", self.resource_type))?;
        if !base_types.iter().any(|t| t == base) {
            return Err(format!("worker does not provide resource type {}", base));
        }

        Ok(())
    }
}
