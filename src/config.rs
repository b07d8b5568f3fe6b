use anyhow::{Result, Context as AnyhowContext};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use crate::error::FlowResult;

/// Engine configuration.
///
/// Every field has a default, so an empty YAML document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Reject a second action by the same user on one task.
    pub reject_repeat_actors: bool,
    /// Send a rejected task back to the node it came from.
    /// When disabled the rejected task finishes and the instance stays where it is.
    pub return_on_reject: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reject_repeat_actors: true,
            return_on_reject: true,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> FlowResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file from {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }
}
