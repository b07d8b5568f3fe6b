pub mod builder;
pub mod loader;

use serde::{Serialize, Deserialize};
use crate::runtime::blueprint::Graph;
use crate::runtime::definition::NewDefinition;

/// A definition as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefinitionFile {
    pub name: String,
    pub company: String,
    #[serde(default)]
    pub user_id: String,
    pub graph: Graph,
}

impl From<DefinitionFile> for NewDefinition {
    fn from(file: DefinitionFile) -> Self {
        NewDefinition {
            name: file.name,
            company: file.company,
            user_id: file.user_id,
            resource: Some(file.graph),
        }
    }
}
