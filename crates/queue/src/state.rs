//! Per-node lifecycle state machine (spec §4.3, component C3).
//!
//! ```text
//! pending -> ready -> executing -> completed
//!                                -> failed
//! pending -> unreachable (dependency failed / no incoming edge fired)
//! pending|ready -> skipped (cancellation, §5)
//! ```

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::QueueError;
use crate::graph::Graph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    Pending,
    Ready,
    Executing,
    Completed,
    Failed,
    Skipped,
    Unreachable,
}

impl NodeStatus {
    /// Terminal statuses don't contribute to `isExecutionComplete`'s "still
    /// running" check.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped | NodeStatus::Unreachable
        )
    }
}

/// Bookkeeping for one execution's worth of node statuses.
///
/// Holds no reference to the `Graph` it was initialized from — every method
/// that needs graph shape takes `&Graph` explicitly, so the same state can
/// be (de)serialized and paired back up with a reconstructed graph on
/// resume (spec §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueState {
    statuses: std::collections::HashMap<String, NodeStatus>,
    /// Edge ids that the Edge Router decided *fire*.
    fired_edges: HashSet<String>,
    /// Edge ids whose fire/no-fire decision has been recorded (the source
    /// node has resolved, one way or another).
    resolved_edges: HashSet<String>,
}

impl QueueState {
    /// The trigger node enters `ready`; everything else starts `pending`.
    pub fn initialize(graph: &Graph) -> Self {
        let mut statuses = std::collections::HashMap::with_capacity(graph.nodes.len());
        for id in graph.node_ids() {
            let status = if id == graph.trigger_node_id {
                NodeStatus::Ready
            } else {
                NodeStatus::Pending
            };
            statuses.insert(id.to_string(), status);
        }
        Self {
            statuses,
            fired_edges: HashSet::new(),
            resolved_edges: HashSet::new(),
        }
    }

    /// Reconstruct state from a resumed snapshot: every node named as
    /// `completed` is marked so directly (no re-dispatch), matching §4.6's
    /// resume protocol. Edge resolution is replayed so downstream readiness
    /// recomputes consistently.
    pub fn restore(graph: &Graph, completed: &[String], failed: &[String]) -> Self {
        let mut state = Self::initialize(graph);
        for id in &state.statuses.keys().cloned().collect::<Vec<_>>() {
            state.statuses.insert(id.clone(), NodeStatus::Pending);
        }
        state
            .statuses
            .insert(graph.trigger_node_id.clone(), NodeStatus::Ready);

        // Replay completions in dependency order so each `resolve_node` call
        // sees a consistent predecessor state. A single pass in depth order
        // is sufficient because restored completions never reference a
        // still-pending predecessor (the original run already enforced
        // topological dispatch).
        let mut ordered: Vec<&String> = completed.iter().chain(failed.iter()).collect();
        ordered.sort_by_key(|id| graph.nodes.get(id.as_str()).map(|n| n.depth).unwrap_or(u32::MAX));

        for id in ordered {
            if state.statuses.get(id.as_str()).copied() == Some(NodeStatus::Completed)
                || state.statuses.get(id.as_str()).copied() == Some(NodeStatus::Failed)
            {
                continue;
            }
            let success = !failed.contains(id);
            // All outgoing edges of an already-completed node are treated as
            // fired by default on restore; the original firing decisions
            // aren't replayed because the snapshot doesn't retain them. This
            // is safe because restored nodes never get re-dispatched, and
            // their dependents were already computed once before the pause.
            let fired: HashSet<String> = graph.outgoing(id).map(|e| e.id.clone()).collect();
            let _ = state.resolve_node(graph, id, success, &fired);
        }
        state
    }

    pub fn status(&self, node_id: &str) -> Option<NodeStatus> {
        self.statuses.get(node_id).copied()
    }

    /// Up to `cap - |executing|` ready node ids, ordered `(depth asc, id asc)`.
    pub fn ready_nodes(&self, graph: &Graph, cap: usize) -> Vec<String> {
        let executing = self
            .statuses
            .values()
            .filter(|s| **s == NodeStatus::Executing)
            .count();
        let budget = cap.saturating_sub(executing);
        if budget == 0 {
            return Vec::new();
        }

        let mut ready: Vec<&String> = self
            .statuses
            .iter()
            .filter(|(_, s)| **s == NodeStatus::Ready)
            .map(|(id, _)| id)
            .collect();

        ready.sort_by(|a, b| {
            let depth_a = graph.nodes.get(a.as_str()).map(|n| n.depth).unwrap_or(0);
            let depth_b = graph.nodes.get(b.as_str()).map(|n| n.depth).unwrap_or(0);
            depth_a.cmp(&depth_b).then_with(|| a.cmp(b))
        });

        ready.into_iter().take(budget).cloned().collect()
    }

    pub fn mark_executing(&mut self, ids: &[String]) -> Result<(), QueueError> {
        for id in ids {
            match self.statuses.get(id) {
                Some(NodeStatus::Ready) => {
                    self.statuses.insert(id.clone(), NodeStatus::Executing);
                }
                Some(other) => {
                    return Err(QueueError::InvalidTransition {
                        node_id: id.clone(),
                        message: format!("cannot execute a node in state {other:?}"),
                    })
                }
                None => return Err(QueueError::UnknownNode(id.clone())),
            }
        }
        Ok(())
    }

    /// Resolve a node that just finished executing (successfully or not).
    /// `fired_edge_ids` is the Edge Router's verdict for every outgoing edge
    /// of `node_id` that fires; every other outgoing edge is implicitly
    /// "resolved, did not fire". Returns newly-`ready` node ids.
    pub fn resolve_node(
        &mut self,
        graph: &Graph,
        node_id: &str,
        success: bool,
        fired_edge_ids: &HashSet<String>,
    ) -> Result<Vec<String>, QueueError> {
        if !graph.nodes.contains_key(node_id) {
            return Err(QueueError::UnknownNode(node_id.to_string()));
        }

        self.statuses.insert(
            node_id.to_string(),
            if success {
                NodeStatus::Completed
            } else {
                NodeStatus::Failed
            },
        );

        let mut newly_ready = Vec::new();
        let mut worklist: VecDeque<String> = VecDeque::new();

        self.resolve_outgoing_edges(graph, node_id, fired_edge_ids, &mut worklist);

        let mut seen = HashSet::new();
        while let Some(target) = worklist.pop_front() {
            if !seen.insert(target.clone()) {
                continue;
            }
            self.recompute(graph, &target, &mut newly_ready, &mut worklist);
        }

        Ok(newly_ready)
    }

    /// Mark every still-`pending`/`ready` node `skipped` (§5 cancellation).
    /// Must be called only after the in-flight `executing` batch has
    /// drained.
    pub fn cancel_remaining(&mut self) {
        for status in self.statuses.values_mut() {
            if matches!(*status, NodeStatus::Pending | NodeStatus::Ready) {
                *status = NodeStatus::Skipped;
            }
        }
    }

    pub fn is_execution_complete(&self) -> bool {
        self.statuses.values().all(|s| s.is_terminal())
    }

    pub fn executing_count(&self) -> usize {
        self.statuses
            .values()
            .filter(|s| **s == NodeStatus::Executing)
            .count()
    }

    pub fn completed_ids(&self) -> Vec<String> {
        self.ids_with_status(NodeStatus::Completed)
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.ids_with_status(NodeStatus::Failed)
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.ids_with_status(NodeStatus::Pending)
    }

    pub fn ready_ids(&self) -> Vec<String> {
        self.ids_with_status(NodeStatus::Ready)
    }

    pub fn executing_ids(&self) -> Vec<String> {
        self.ids_with_status(NodeStatus::Executing)
    }

    pub fn skipped_ids(&self) -> Vec<String> {
        self.ids_with_status(NodeStatus::Skipped)
    }

    pub fn unreachable_ids(&self) -> Vec<String> {
        self.ids_with_status(NodeStatus::Unreachable)
    }

    fn ids_with_status(&self, status: NodeStatus) -> Vec<String> {
        self.statuses
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn resolve_outgoing_edges(
        &mut self,
        graph: &Graph,
        node_id: &str,
        fired_edge_ids: &HashSet<String>,
        worklist: &mut VecDeque<String>,
    ) {
        for edge in graph.outgoing(node_id) {
            self.resolved_edges.insert(edge.id.clone());
            if fired_edge_ids.contains(&edge.id) {
                self.fired_edges.insert(edge.id.clone());
            }
            worklist.push_back(edge.target.clone());
        }
    }

    /// Re-evaluate one `pending` node against the latest dependency/edge
    /// state. No-op for nodes that have already left `pending`.
    fn recompute(
        &mut self,
        graph: &Graph,
        target: &str,
        newly_ready: &mut Vec<String>,
        worklist: &mut VecDeque<String>,
    ) {
        if self.statuses.get(target).copied() != Some(NodeStatus::Pending) {
            return;
        }
        let Some(node) = graph.nodes.get(target) else {
            return;
        };

        let has_terminal_non_completed_dependency = node.dependencies.iter().any(|dep| {
            matches!(
                self.statuses.get(dep),
                Some(NodeStatus::Failed) | Some(NodeStatus::Unreachable) | Some(NodeStatus::Skipped)
            )
        });

        if has_terminal_non_completed_dependency {
            self.statuses.insert(target.to_string(), NodeStatus::Unreachable);
            self.resolve_outgoing_edges(graph, target, &HashSet::new(), worklist);
            return;
        }

        let deps_completed = node
            .dependencies
            .iter()
            .all(|dep| self.statuses.get(dep).copied() == Some(NodeStatus::Completed));

        if !deps_completed {
            return; // still waiting on a dependency; stays pending
        }

        let incoming: Vec<_> = graph.incoming(target).collect();
        let any_fired = incoming.iter().any(|e| self.fired_edges.contains(&e.id));
        if any_fired {
            self.statuses.insert(target.to_string(), NodeStatus::Ready);
            newly_ready.push(target.to_string());
            return;
        }

        let all_resolved = incoming.iter().all(|e| self.resolved_edges.contains(&e.id));
        if all_resolved {
            self.statuses.insert(target.to_string(), NodeStatus::Unreachable);
            self.resolve_outgoing_edges(graph, target, &HashSet::new(), worklist);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphEdge, GraphNode};
    use std::collections::HashMap;

    fn linear_graph() -> Graph {
        // trigger -> a -> b
        let mut nodes = HashMap::new();
        nodes.insert(
            "trigger".to_string(),
            GraphNode {
                id: "trigger".into(),
                depth: 0,
                dependencies: vec![],
                dependents: vec!["a".into()],
            },
        );
        nodes.insert(
            "a".to_string(),
            GraphNode {
                id: "a".into(),
                depth: 1,
                dependencies: vec!["trigger".into()],
                dependents: vec!["b".into()],
            },
        );
        nodes.insert(
            "b".to_string(),
            GraphNode {
                id: "b".into(),
                depth: 2,
                dependencies: vec!["a".into()],
                dependents: vec![],
            },
        );
        let mut edges = HashMap::new();
        edges.insert(
            "e1".to_string(),
            GraphEdge {
                id: "e1".into(),
                source: "trigger".into(),
                target: "a".into(),
            },
        );
        edges.insert(
            "e2".to_string(),
            GraphEdge {
                id: "e2".into(),
                source: "a".into(),
                target: "b".into(),
            },
        );
        Graph {
            nodes,
            edges,
            trigger_node_id: "trigger".into(),
        }
    }

    #[test]
    fn trigger_starts_ready_rest_pending() {
        let graph = linear_graph();
        let state = QueueState::initialize(&graph);
        assert_eq!(state.status("trigger"), Some(NodeStatus::Ready));
        assert_eq!(state.status("a"), Some(NodeStatus::Pending));
        assert_eq!(state.status("b"), Some(NodeStatus::Pending));
    }

    #[test]
    fn linear_chain_advances_one_node_at_a_time() {
        let graph = linear_graph();
        let mut state = QueueState::initialize(&graph);

        let ready = state.ready_nodes(&graph, 10);
        assert_eq!(ready, vec!["trigger".to_string()]);
        state.mark_executing(&ready).unwrap();

        let fired: HashSet<String> = ["e1".to_string()].into_iter().collect();
        let newly_ready = state.resolve_node(&graph, "trigger", true, &fired).unwrap();
        assert_eq!(newly_ready, vec!["a".to_string()]);

        let ready = state.ready_nodes(&graph, 10);
        state.mark_executing(&ready).unwrap();
        let fired: HashSet<String> = ["e2".to_string()].into_iter().collect();
        let newly_ready = state.resolve_node(&graph, "a", true, &fired).unwrap();
        assert_eq!(newly_ready, vec!["b".to_string()]);

        assert!(!state.is_execution_complete());
        let ready = state.ready_nodes(&graph, 10);
        state.mark_executing(&ready).unwrap();
        state
            .resolve_node(&graph, "b", true, &HashSet::new())
            .unwrap();
        assert!(state.is_execution_complete());
    }

    #[test]
    fn concurrency_cap_limits_ready_batch() {
        // trigger fans out to three siblings, cap = 2
        let mut nodes = HashMap::new();
        nodes.insert(
            "trigger".to_string(),
            GraphNode {
                id: "trigger".into(),
                depth: 0,
                dependencies: vec![],
                dependents: vec!["a".into(), "b".into(), "c".into()],
            },
        );
        for id in ["a", "b", "c"] {
            nodes.insert(
                id.to_string(),
                GraphNode {
                    id: id.into(),
                    depth: 1,
                    dependencies: vec!["trigger".into()],
                    dependents: vec![],
                },
            );
        }
        let mut edges = HashMap::new();
        for (i, id) in ["a", "b", "c"].iter().enumerate() {
            edges.insert(
                format!("e{i}"),
                GraphEdge {
                    id: format!("e{i}"),
                    source: "trigger".into(),
                    target: id.to_string(),
                },
            );
        }
        let graph = Graph {
            nodes,
            edges,
            trigger_node_id: "trigger".into(),
        };

        let mut state = QueueState::initialize(&graph);
        state.mark_executing(&["trigger".to_string()]).unwrap();
        let fired: HashSet<String> = ["e0".to_string(), "e1".to_string(), "e2".to_string()]
            .into_iter()
            .collect();
        state.resolve_node(&graph, "trigger", true, &fired).unwrap();

        let ready = state.ready_nodes(&graph, 2);
        assert_eq!(ready.len(), 2);
        assert_eq!(ready, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn failed_node_marks_strict_descendants_unreachable() {
        let graph = linear_graph();
        let mut state = QueueState::initialize(&graph);
        state.mark_executing(&["trigger".to_string()]).unwrap();
        state
            .resolve_node(&graph, "trigger", false, &HashSet::new())
            .unwrap();

        assert_eq!(state.status("a"), Some(NodeStatus::Unreachable));
        assert_eq!(state.status("b"), Some(NodeStatus::Unreachable));
        assert!(state.is_execution_complete());
    }

    #[test]
    fn switch_unfired_branch_becomes_unreachable_fired_branch_becomes_ready() {
        // trigger -> switch -> {left, right}; only "left" fires.
        let mut nodes = HashMap::new();
        nodes.insert(
            "trigger".into(),
            GraphNode { id: "trigger".into(), depth: 0, dependencies: vec![], dependents: vec!["switch".into()] },
        );
        nodes.insert(
            "switch".into(),
            GraphNode { id: "switch".into(), depth: 1, dependencies: vec!["trigger".into()], dependents: vec!["left".into(), "right".into()] },
        );
        nodes.insert(
            "left".into(),
            GraphNode { id: "left".into(), depth: 2, dependencies: vec!["switch".into()], dependents: vec![] },
        );
        nodes.insert(
            "right".into(),
            GraphNode { id: "right".into(), depth: 2, dependencies: vec!["switch".into()], dependents: vec![] },
        );
        let mut edges = HashMap::new();
        edges.insert("e0".into(), GraphEdge { id: "e0".into(), source: "trigger".into(), target: "switch".into() });
        edges.insert("e1".into(), GraphEdge { id: "e1".into(), source: "switch".into(), target: "left".into() });
        edges.insert("e2".into(), GraphEdge { id: "e2".into(), source: "switch".into(), target: "right".into() });
        let graph = Graph { nodes, edges, trigger_node_id: "trigger".into() };

        let mut state = QueueState::initialize(&graph);
        state.mark_executing(&["trigger".to_string()]).unwrap();
        state.resolve_node(&graph, "trigger", true, &["e0".to_string()].into_iter().collect()).unwrap();
        state.mark_executing(&["switch".to_string()]).unwrap();
        let fired = state
            .resolve_node(&graph, "switch", true, &["e1".to_string()].into_iter().collect())
            .unwrap();

        assert_eq!(fired, vec!["left".to_string()]);
        assert_eq!(state.status("right"), Some(NodeStatus::Unreachable));
    }

    #[test]
    fn cancel_remaining_skips_pending_and_ready() {
        let graph = linear_graph();
        let mut state = QueueState::initialize(&graph);
        state.cancel_remaining();
        assert_eq!(state.status("trigger"), Some(NodeStatus::Skipped));
        assert_eq!(state.status("a"), Some(NodeStatus::Skipped));
        assert!(state.is_execution_complete());
    }
}
