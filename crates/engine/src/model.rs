//! Core domain models — the raw definition a caller submits, and the
//! execution-ready graph the [`crate::builder`] produces from it (spec §3).

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type NodeId = String;

/// The closed set of node kinds the engine knows how to schedule. Every
/// variant is dispatched through the same [`crate::executor::ExecuteNode`]
/// contract — the engine has no type-specific execution logic beyond what
/// the Edge Router (§4.5) needs to read back out of a node's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Input,
    Output,
    Llm,
    Http,
    Transform,
    Conditional,
    Switch,
    Loop,
    WaitForUser,
    Database,
    Vision,
    FileOperations,
    Agent,
}

/// An edge's handle — decides whether the Edge Router fires it (§4.5).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleType {
    Default,
    True,
    False,
    Case(String),
    Fallback,
}

impl fmt::Display for HandleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleType::Default => write!(f, "default"),
            HandleType::True => write!(f, "true"),
            HandleType::False => write!(f, "false"),
            HandleType::Case(v) => write!(f, "case-{v}"),
            HandleType::Fallback => write!(f, "fallback"),
        }
    }
}

impl std::str::FromStr for HandleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(HandleType::Default),
            "true" => Ok(HandleType::True),
            "false" => Ok(HandleType::False),
            "fallback" => Ok(HandleType::Fallback),
            other => other
                .strip_prefix("case-")
                .map(|v| HandleType::Case(v.to_string()))
                .ok_or_else(|| format!("unrecognized handle type: '{other}'")),
        }
    }
}

/// A raw node as submitted by the caller, before the builder computes
/// `depth`/`dependencies`/`dependents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A raw edge as submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEdge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
    #[serde(with = "handle_type_serde")]
    pub handle_type: HandleType,
}

mod handle_type_serde {
    use super::HandleType;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(v: &HandleType, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<HandleType, D::Error> {
        let raw = String::deserialize(d)?;
        HandleType::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// How a workflow is started. Orthogonal to the dependency graph's own
/// `triggerNodeId` (always the single `input` node, §3) — this just tells
/// an external caller (the `api`/`cli` crates) *when* to start a new
/// execution. The engine itself never reads this field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    /// Started manually via the REST API or CLI.
    Manual,
    /// Started by an incoming HTTP request to `/webhook/{path}`.
    Webhook { path: String },
    /// Started on a cron schedule (external scheduler owns firing it).
    Cron { expression: String },
}

impl Default for TriggerKind {
    fn default() -> Self {
        TriggerKind::Manual
    }
}

/// A declared loop body, named by the raw definition. Bodies run as
/// successive dispatches rather than joining the main dependency graph —
/// see §9 "Bounded loops".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLoopConfig {
    pub loop_node_id: NodeId,
    pub body_node_ids: Vec<NodeId>,
    pub max_iterations: u32,
    pub iteration_variable: String,
}

fn default_max_concurrent_nodes() -> usize {
    10
}

/// The raw workflow definition a caller hands to [`crate::builder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWorkflowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub nodes: Vec<RawNode>,
    pub edges: Vec<RawEdge>,
    #[serde(default)]
    pub loops: Vec<RawLoopConfig>,
    #[serde(default = "default_max_concurrent_nodes")]
    pub max_concurrent_nodes: usize,
    #[serde(default)]
    pub trigger: TriggerKind,
}

/// A node as it exists inside a [`BuiltWorkflow`] — immutable for the
/// lifetime of an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,
    pub name: String,
    pub config: serde_json::Value,
    pub depth: u32,
    pub dependencies: Vec<NodeId>,
    pub dependents: Vec<NodeId>,
}

/// An edge as it exists inside a [`BuiltWorkflow`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
    pub handle_type: HandleType,
}

/// Per-loop bookkeeping computed by the builder (§3, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopContext {
    pub loop_node_id: NodeId,
    pub body_node_ids: Vec<NodeId>,
    pub max_iterations: u32,
    pub iteration_variable: String,
}

/// The execution-ready graph produced by [`crate::builder::build`].
#[derive(Debug, Clone)]
pub struct BuiltWorkflow {
    pub id: Uuid,
    pub name: String,
    pub nodes: HashMap<NodeId, Node>,
    pub edges: HashMap<String, Edge>,
    pub execution_levels: Vec<Vec<NodeId>>,
    pub trigger_node_id: NodeId,
    pub output_node_ids: HashSet<NodeId>,
    pub loop_contexts: HashMap<NodeId, LoopContext>,
    pub max_concurrent_nodes: usize,
    pub trigger: TriggerKind,
}

impl BuiltWorkflow {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn outgoing_edges(&self, node_id: &str) -> impl Iterator<Item = &Edge> {
        self.edges.values().filter(move |e| e.source == node_id)
    }

    /// Every node id that is some loop's body. Body nodes are driven
    /// directly by [`crate::scheduler`] as successive dispatches (§9) and
    /// never enter `queue::QueueState` at all — only the `loop` node
    /// itself participates in the ordinary dependency graph.
    pub fn loop_body_node_ids(&self) -> HashSet<&str> {
        self.loop_contexts
            .values()
            .flat_map(|lc| lc.body_node_ids.iter().map(String::as_str))
            .collect()
    }

    /// Project this graph down to the minimal shape `queue::QueueState`
    /// needs — excludes every loop body node and every edge touching one,
    /// so the queue never has to reason about loop iteration at all.
    pub fn to_queue_graph(&self) -> queue::Graph {
        let body_nodes = self.loop_body_node_ids();

        let nodes = self
            .nodes
            .iter()
            .filter(|(id, _)| !body_nodes.contains(id.as_str()))
            .map(|(id, n)| {
                (
                    id.clone(),
                    queue::GraphNode {
                        id: n.id.clone(),
                        depth: n.depth,
                        dependencies: n
                            .dependencies
                            .iter()
                            .filter(|d| !body_nodes.contains(d.as_str()))
                            .cloned()
                            .collect(),
                        dependents: n
                            .dependents
                            .iter()
                            .filter(|d| !body_nodes.contains(d.as_str()))
                            .cloned()
                            .collect(),
                    },
                )
            })
            .collect();

        let edges = self
            .edges
            .iter()
            .filter(|(_, e)| {
                !body_nodes.contains(e.source.as_str()) && !body_nodes.contains(e.target.as_str())
            })
            .map(|(id, e)| {
                (
                    id.clone(),
                    queue::GraphEdge {
                        id: e.id.clone(),
                        source: e.source.clone(),
                        target: e.target.clone(),
                    },
                )
            })
            .collect();

        queue::Graph {
            nodes,
            edges,
            trigger_node_id: self.trigger_node_id.clone(),
        }
    }
}
