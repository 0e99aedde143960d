//! Build metadata exposed to resource containers

use serde::{Deserialize, Serialize};

/// Identifies the build step a fetch runs on behalf of
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepMetadata {
    pub team_name: String,
    pub pipeline_name: String,
    pub job_name: String,
    pub build_name: String,
    pub build_id: Option<i64>,
    pub external_url: String,
}

impl StepMetadata {
    /// Environment variables for the get container; empty fields are omitted
    pub fn env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();

        if let Some(id) = self.build_id {
            env.push(("BUILD_ID".to_string(), id.to_string()));
        }

        let fields = [
            ("BUILD_NAME", &self.build_name),
            ("BUILD_JOB_NAME", &self.job_name),
            ("BUILD_PIPELINE_NAME", &self.pipeline_name),
            ("BUILD_TEAM_NAME", &self.team_name),
            ("ATC_EXTERNAL_URL", &self.external_url),
        ];
        for (name, value) in fields {
            if !value.is_empty() {
                env.push((name.to_string(), value.clone()));
            }
        }

        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_skips_empty_fields() {
        let metadata = StepMetadata {
            team_name: "main".to_string(),
            build_id: Some(42),
            ..Default::default()
        };

        let env = metadata.env();
        assert_eq!(
            env,
            vec![
                ("BUILD_ID".to_string(), "42".to_string()),
                ("BUILD_TEAM_NAME".to_string(), "main".to_string()),
            ]
        );
    }

    #[test]
    fn env_empty_by_default() {
        assert!(StepMetadata::default().env().is_empty());
    }
}
