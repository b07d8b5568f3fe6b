use crate::runtime::blueprint::{Candidate, Gateway, Graph, GraphNode, Successor};

/// Fluent construction of a `Graph`. Validation happens on deployment.
pub struct GraphBuilder {
    root: String,
    pub nodes: Vec<GraphNode>, // public for tests that need malformed graphs
    edges: Vec<(String, Successor)>,
    joins: Vec<(String, String)>,
}

impl GraphBuilder {
    /// Starts a graph whose synthetic start node is `root`.
    pub fn new(root: &str) -> Self {
        let mut start = GraphNode::new(root);
        start.name = root.to_string();
        Self {
            root: root.to_string(),
            nodes: vec![start],
            edges: Vec::new(),
            joins: Vec::new(),
        }
    }

    pub fn node(self, id: &str) -> NodeBuilder {
        NodeBuilder {
            graph_builder: self,
            node: GraphNode::new(id),
        }
    }

    pub fn connect(mut self, source: &str, target: &str) -> Self {
        self.edges.push((source.to_string(), Successor {
            target: target.to_string(),
            condition: None,
        }));
        self
    }

    pub fn connect_if(mut self, source: &str, target: &str, condition: &str) -> Self {
        self.edges.push((source.to_string(), Successor {
            target: target.to_string(),
            condition: Some(condition.to_string()),
        }));
        self
    }

    /// Default route taken when no conditional edge of `source` holds.
    pub fn connect_else(self, source: &str, target: &str) -> Self {
        self.connect(source, target)
    }

    /// Marks `split` as a parallel split whose branches merge at `join`.
    pub fn parallel(mut self, split: &str, join: &str) -> Self {
        self.joins.push((split.to_string(), join.to_string()));
        self
    }

    pub fn build(mut self) -> Graph {
        for (source, successor) in self.edges {
            let idx = match self.nodes.iter().position(|n| n.id == source) {
                Some(idx) => idx,
                None => {
                    // kept so validation reports the dangling source
                    self.nodes.push(GraphNode::new(&source));
                    self.nodes.len() - 1
                }
            };
            self.nodes[idx].successors.push(successor);
        }

        for (split, join) in self.joins {
            if let Some(node) = self.nodes.iter_mut().find(|n| n.id == split) {
                node.gateway = Gateway::All;
                node.branch_count = node.branch_count.max(1);
                node.join = Some(join);
            }
        }

        Graph {
            root: self.root,
            nodes: self.nodes,
        }
    }
}

pub struct NodeBuilder {
    graph_builder: GraphBuilder,
    node: GraphNode,
}

impl NodeBuilder {
    pub fn name(mut self, name: &str) -> Self {
        self.node.name = name.to_string();
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.node.candidates.push(Candidate::Group(group.to_string()));
        self
    }

    pub fn user(mut self, user_id: &str) -> Self {
        self.node.candidates.push(Candidate::User(user_id.to_string()));
        self
    }

    pub fn users(mut self, user_ids: &[&str]) -> Self {
        self.node.candidates.extend(user_ids.iter().map(|u| Candidate::User(u.to_string())));
        self
    }

    /// Every one of `count` approvers must approve.
    pub fn all(mut self, count: u32) -> Self {
        self.node.gateway = Gateway::All;
        self.node.branch_count = count;
        self
    }

    /// First approval wins.
    pub fn any(mut self) -> Self {
        self.node.gateway = Gateway::Any;
        self.node.branch_count = 0;
        self
    }

    pub fn build(mut self) -> GraphBuilder {
        self.graph_builder.nodes.push(self.node);
        self.graph_builder
    }
}
