//! engine settings
//!
//! Everything has a default, a config file only needs to name what it changes:
//! ```yaml
//! log_groups:
//!   prefixes:
//!     AWS::Lambda::Function: /aws/lambda/
//!     AWS::StepFunctions::StateMachine: /aws/vendedlogs/states/
//! pipeline:
//!   artifact_bucket_parameter: PipelineBucket
//! ```
use indexmap::IndexMap;
use std::path::Path;

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub log_groups: LogGroupConfig,
    pub pipeline: PipelineConfig,
}

/// Settings of [crate::log_groups::LogGroupProcessor]
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogGroupConfig {
    /// Property that marks a resource as owner of a synthesized log group
    pub retention_property: String,
    /// Log group name prefix by resource type
    pub prefixes: IndexMap<String, String>,
}

impl Default for LogGroupConfig {
    fn default() -> Self {
        let prefixes = [
            ("AWS::Lambda::Function", "/aws/lambda/"),
            ("AWS::Serverless::Function", "/aws/lambda/"),
            ("AWS::CodeBuild::Project", "/aws/codebuild/"),
        ]
        .into_iter()
        .map(|(kind, prefix)| (kind.to_string(), prefix.to_string()))
        .collect();

        Self {
            retention_property: "LogRetentionInDays".to_string(),
            prefixes,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Template parameter holding the bucket of the default artifact store
    pub artifact_bucket_parameter: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifact_bucket_parameter: "ArtifactBucket".to_string(),
        }
    }
}

impl Config {
    /// Load a yaml (or json) config file
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        tracing::info!(path=%path.display(), "loading config");
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Unable to parse config file")]
    ParseFailed(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "pipeline:\n  artifact_bucket_parameter: PipelineBucket\n",
        )
        .unwrap();
        assert_eq!(config.pipeline.artifact_bucket_parameter, "PipelineBucket");
        assert_eq!(config.log_groups.retention_property, "LogRetentionInDays");
        assert_eq!(
            config.log_groups.prefixes.get("AWS::CodeBuild::Project").map(String::as_str),
            Some("/aws/codebuild/")
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_yaml::from_str::<Config>("logs: {}").is_err());
    }
}
