//! The minimal graph shape the queue state machine needs to reason about
//! readiness. Deliberately decoupled from `engine`'s richer `Node`/`Edge`
//! types — `engine::builder` projects a `BuiltWorkflow` down into this shape
//! when it calls [`crate::QueueState::initialize`].

use std::collections::{HashMap, HashSet};

/// A node as the queue sees it: just enough to compute readiness.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: String,
    pub depth: u32,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
}

/// An edge as the queue sees it. Whether it "fires" is decided by the
/// caller (the Edge Router, in `engine`) and passed into
/// [`crate::QueueState::resolve_node`].
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub id: String,
    pub source: String,
    pub target: String,
}

/// Read-only view of a workflow's execution graph.
#[derive(Debug, Clone)]
pub struct Graph {
    pub nodes: HashMap<String, GraphNode>,
    pub edges: HashMap<String, GraphEdge>,
    pub trigger_node_id: String,
}

impl Graph {
    pub fn outgoing(&self, node_id: &str) -> impl Iterator<Item = &GraphEdge> {
        self.edges.values().filter(move |e| e.source == node_id)
    }

    pub fn incoming(&self, node_id: &str) -> impl Iterator<Item = &GraphEdge> {
        self.edges.values().filter(move |e| e.target == node_id)
    }

    pub fn node_ids(&self) -> HashSet<&str> {
        self.nodes.keys().map(String::as_str).collect()
    }
}
