use serde::{Serialize, Deserialize};
use std::collections::HashSet;
use crate::error::{FlowError, FlowResult};
use crate::runtime::routing;

pub type NodeIndex = usize;

/// Quorum rule of a node.
///
/// `All` requires `branch_count` approvals and fans out to every successor.
/// `Any` finishes on the first approval and picks exactly one successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Gateway {
    All,
    #[default]
    Any,
}

/// Opaque eligibility descriptor. Membership is resolved outside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum Candidate {
    Group(String),
    User(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Successor {
    pub target: String,
    /// Boolean expression over instance variables. `None` is the default route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub gateway: Gateway,
    /// Approvals required by an `All` node.
    #[serde(default)]
    pub branch_count: u32,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub successors: Vec<Successor>,
    /// Merge node of an `All` split.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<String>,
}

impl GraphNode {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            gateway: Gateway::Any,
            branch_count: 0,
            candidates: Vec::new(),
            successors: Vec::new(),
            join: None,
        }
    }

    pub fn is_split(&self) -> bool {
        self.gateway == Gateway::All && self.successors.len() > 1
    }

    /// Number of approvals a task on this node needs.
    pub fn quorum(&self) -> u32 {
        match self.gateway {
            Gateway::All => self.branch_count,
            Gateway::Any => 1,
        }
    }

    /// The single user allowed to act, if the node names exactly one.
    pub fn single_user(&self) -> Option<&str> {
        match self.candidates.as_slice() {
            [Candidate::User(id)] => Some(id.as_str()),
            _ => None,
        }
    }
}

/// Immutable process graph: an arena of nodes addressed by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub root: String,
    pub nodes: Vec<GraphNode>,
}

impl Graph {
    pub fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.nodes.iter().position(|n| n.id == id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index_of(id).map(|idx| &self.nodes[idx])
    }

    pub fn resolve(&self, id: &str) -> FlowResult<&GraphNode> {
        self.node(id)
            .ok_or_else(|| FlowError::not_found(format!("node '{}' is not part of the graph", id)))
    }

    pub fn root_node(&self) -> FlowResult<&GraphNode> {
        self.resolve(&self.root)
    }

    pub fn encode(&self) -> FlowResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> FlowResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Structural checks run on deployment.
    pub fn validate(&self) -> FlowResult<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.is_empty() {
                return Err(FlowError::validation("node id can not be empty"));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(FlowError::validation(format!("duplicate node id: {}", node.id)));
            }
        }
        if !seen.contains(self.root.as_str()) {
            return Err(FlowError::validation(format!("root node '{}' not found", self.root)));
        }

        for node in &self.nodes {
            for s in &node.successors {
                if !seen.contains(s.target.as_str()) {
                    return Err(FlowError::validation(format!(
                        "node '{}' points to unknown node '{}'", node.id, s.target
                    )));
                }
                if let Some(cond) = &s.condition {
                    routing::check_condition(cond).map_err(|e| FlowError::validation(format!(
                        "edge {} -> {} has an invalid condition: {}", node.id, s.target, e
                    )))?;
                }
            }

            if let Some(join) = &node.join {
                if !seen.contains(join.as_str()) {
                    return Err(FlowError::validation(format!(
                        "split '{}' joins at unknown node '{}'", node.id, join
                    )));
                }
            } else if node.is_split() {
                return Err(FlowError::validation(format!(
                    "parallel split '{}' must declare its join node", node.id
                )));
            }

            if node.id == self.root {
                if !node.candidates.is_empty() {
                    return Err(FlowError::validation("the root node can not carry candidates"));
                }
                continue;
            }

            if node.candidates.is_empty() {
                return Err(FlowError::validation(format!("node '{}' has no candidates", node.id)));
            }
            let groups = node.candidates.iter().any(|c| matches!(c, Candidate::Group(_)));
            let users = node.candidates.iter().any(|c| matches!(c, Candidate::User(_)));
            if groups && users {
                return Err(FlowError::validation(format!(
                    "node '{}' mixes group and user candidates", node.id
                )));
            }
            if node.gateway == Gateway::All && node.branch_count == 0 {
                return Err(FlowError::validation(format!(
                    "ALL node '{}' needs a branch count", node.id
                )));
            }
        }

        for split in self.nodes.iter().filter(|n| n.is_split()) {
            if let Some(join) = &split.join {
                self.check_region(split, join)?;
            }
        }
        Ok(())
    }

    /// Every branch of `split` must reach `join`. A branch may pass through
    /// nested regions, but never through the join of a split outside its own region.
    fn check_region(&self, split: &GraphNode, join: &str) -> FlowResult<()> {
        let mut region: HashSet<&str> = HashSet::new();
        let mut dead_end = None;
        let mut stack: Vec<&str> = split.successors.iter().map(|s| s.target.as_str()).collect();
        while let Some(id) = stack.pop() {
            if id == join || !region.insert(id) {
                continue;
            }
            let node = self.resolve(id)?;
            if node.successors.is_empty() && dead_end.is_none() {
                dead_end = Some(id);
            }
            stack.extend(node.successors.iter().map(|s| s.target.as_str()));
        }

        for owner in self.nodes.iter().filter(|n| n.id != split.id) {
            let Some(other_join) = owner.join.as_deref() else { continue };
            if region.contains(other_join) && !region.contains(owner.id.as_str()) {
                return Err(FlowError::validation(format!(
                    "a branch of split '{}' leaves through '{}', the join of split '{}'",
                    split.id, other_join, owner.id
                )));
            }
        }
        if let Some(id) = dead_end {
            return Err(FlowError::validation(format!(
                "a branch of split '{}' ends at '{}' without reaching join '{}'",
                split.id, id, join
            )));
        }
        Ok(())
    }
}
