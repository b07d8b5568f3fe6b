use serde::{Serialize, Deserialize};
use uuid::Uuid;
use crate::error::FlowResult;
use crate::runtime::blueprint::Gateway;

/// A parallel region the entry is running inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkContext {
    /// Distinguishes two passes through the same split.
    pub token: Uuid,
    pub split: String,
    pub join: String,
    /// Number of branches activated by the split.
    pub branches: u32,
    /// Path up to and including the split.
    pub path: Vec<String>,
}

/// One active position of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub task_id: Option<Uuid>,
    pub step: u32,
    pub gateway: Gateway,
    /// Sibling branch count inside a fork, 1 otherwise.
    pub branch_count: u32,
    /// Branch arrived at its merge node and waits for its siblings.
    #[serde(default)]
    pub waiting: bool,
    /// Nodes that led here, oldest first.
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub forks: Vec<ForkContext>,
}

impl NodeInfo {
    pub fn root(node_id: &str, task_id: Uuid) -> Self {
        Self {
            node_id: node_id.to_string(),
            task_id: Some(task_id),
            step: 0,
            gateway: Gateway::Any,
            branch_count: 1,
            waiting: false,
            path: Vec::new(),
            forks: Vec::new(),
        }
    }

    pub fn innermost_fork(&self) -> Option<&ForkContext> {
        self.forks.last()
    }

    pub fn in_fork(&self, token: Uuid) -> bool {
        self.forks.iter().any(|f| f.token == token)
    }

    fn same_position(&self, other: &NodeInfo) -> bool {
        self.node_id == other.node_id && self.task_id == other.task_id
    }
}

/// Durable "current position" of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub active: Vec<NodeInfo>,
}

impl ExecutionSnapshot {
    pub fn new(active: Vec<NodeInfo>) -> Self {
        Self { active }
    }

    pub fn encode(&self) -> FlowResult<String> {
        Ok(serde_json::to_string(&self.active)?)
    }

    pub fn decode(text: &str) -> FlowResult<Self> {
        let active = serde_json::from_str(text)?;
        Ok(Self { active })
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn find_by_task(&self, task_id: Uuid) -> Option<&NodeInfo> {
        self.active.iter().find(|n| !n.waiting && n.task_id == Some(task_id))
    }

    /// Removes the entry and reports whether it was present.
    pub fn remove(&mut self, info: &NodeInfo) -> bool {
        let before = self.active.len();
        self.active.retain(|n| !n.same_position(info));
        self.active.len() != before
    }

    pub fn push(&mut self, info: NodeInfo) {
        self.active.push(info);
    }

    /// Branches of a fork already waiting at its merge node.
    pub fn waiting_at(&self, token: Uuid, join: &str) -> Vec<&NodeInfo> {
        self.active
            .iter()
            .filter(|n| n.waiting && n.node_id == join)
            .filter(|n| n.innermost_fork().map(|f| f.token) == Some(token))
            .collect()
    }

    /// Drops every entry that belongs to the fork, returning them.
    pub fn drain_fork(&mut self, token: Uuid) -> Vec<NodeInfo> {
        let (gone, kept): (Vec<NodeInfo>, Vec<NodeInfo>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|n| n.in_fork(token));
        self.active = kept;
        gone
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}
