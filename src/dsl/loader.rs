use anyhow::{Result, Context as AnyhowContext};
use std::fs;
use crate::dsl::DefinitionFile;
use crate::runtime::blueprint::Graph;

pub fn load_definition_from_yaml(file_path: &str) -> Result<DefinitionFile> {
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read YAML file from {}", file_path))?;

    let definition: DefinitionFile = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize definition from {}", file_path))?;

    Ok(definition)
}

/// Loads a bare graph, without the name/company envelope.
pub fn load_graph_from_yaml(file_path: &str) -> Result<Graph> {
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read YAML file from {}", file_path))?;

    serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize graph from {}", file_path))
}
