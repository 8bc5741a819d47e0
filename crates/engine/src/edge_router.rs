//! Edge Router (spec §4.5, component C5).
//!
//! Decides, once a node has finished executing, which of its outgoing
//! edges *fire*. The scheduler feeds the fired edge ids into
//! `queue::QueueState::resolve_node`, which is where readiness/
//! unreachability actually gets decided — this module only answers "does
//! this edge fire".

use serde_json::Value;

use crate::model::{BuiltWorkflow, HandleType, Node, NodeType};

/// Resolved design decision (§4.5 Open Question): a `conditional` node's
/// executor writes `{"result": bool}` to its output, and a `switch`
/// node's executor writes `{"case": "<value>"}`. The router reads these
/// back out of `nodeOutputs` rather than out of the node's `config`,
/// since config may itself contain unresolved template references that
/// only resolve to a concrete branch decision once the node has run.
pub fn fires(workflow: &BuiltWorkflow, node: &Node, output: &Value, edge_handle: &HandleType) -> bool {
    match node.node_type {
        NodeType::Conditional => match edge_handle {
            HandleType::True => output.get("result").and_then(Value::as_bool).unwrap_or(false),
            HandleType::False => !output.get("result").and_then(Value::as_bool).unwrap_or(false),
            HandleType::Default => true,
            _ => false,
        },
        NodeType::Switch => {
            let case = output.get("case").and_then(Value::as_str);
            match (edge_handle, case) {
                (HandleType::Case(v), Some(actual)) => v == actual,
                (HandleType::Fallback, Some(actual)) => {
                    !has_matching_case(workflow, node, actual)
                }
                (HandleType::Fallback, None) => true,
                _ => false,
            }
        }
        // Every other node type fires all of its outgoing edges
        // unconditionally — branching is exclusive to conditional/switch.
        _ => matches!(edge_handle, HandleType::Default),
    }
}

fn has_matching_case(workflow: &BuiltWorkflow, node: &Node, case: &str) -> bool {
    workflow.outgoing_edges(&node.id).any(|e| matches!(&e.handle_type, HandleType::Case(v) if v == case))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Edge, LoopContext};
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    fn workflow_with_edges(node_id: &str, edges: Vec<(HandleType, &str)>) -> (BuiltWorkflow, Node) {
        let node = Node {
            id: node_id.to_string(),
            node_type: NodeType::Switch,
            name: node_id.to_string(),
            config: json!({}),
            depth: 0,
            dependencies: vec![],
            dependents: vec![],
        };
        let mut edge_map = HashMap::new();
        for (i, (handle, target)) in edges.into_iter().enumerate() {
            let id = format!("e{i}");
            edge_map.insert(
                id.clone(),
                Edge {
                    id,
                    source: node_id.to_string(),
                    target: target.to_string(),
                    source_handle: None,
                    target_handle: None,
                    handle_type: handle,
                },
            );
        }
        let wf = BuiltWorkflow {
            id: uuid::Uuid::new_v4(),
            name: "t".into(),
            nodes: HashMap::from([(node_id.to_string(), node.clone())]),
            edges: edge_map,
            execution_levels: vec![],
            trigger_node_id: node_id.to_string(),
            output_node_ids: HashSet::new(),
            loop_contexts: HashMap::<String, LoopContext>::new(),
            max_concurrent_nodes: 10,
            trigger: crate::model::TriggerKind::Manual,
        };
        (wf, node)
    }

    #[test]
    fn switch_fires_matching_case_only() {
        let (wf, node) =
            workflow_with_edges("sw", vec![(HandleType::Case("a".into()), "t1"), (HandleType::Case("b".into()), "t2")]);
        let output = json!({"case": "a"});
        assert!(fires(&wf, &node, &output, &HandleType::Case("a".into())));
        assert!(!fires(&wf, &node, &output, &HandleType::Case("b".into())));
    }

    #[test]
    fn switch_fires_fallback_when_no_case_matches() {
        let (wf, node) = workflow_with_edges(
            "sw",
            vec![(HandleType::Case("a".into()), "t1"), (HandleType::Fallback, "t2")],
        );
        let output = json!({"case": "zzz"});
        assert!(!fires(&wf, &node, &output, &HandleType::Case("a".into())));
        assert!(fires(&wf, &node, &output, &HandleType::Fallback));
    }

    #[test]
    fn conditional_fires_true_or_false_branch() {
        let node = Node {
            id: "c".into(),
            node_type: NodeType::Conditional,
            name: "c".into(),
            config: json!({}),
            depth: 0,
            dependencies: vec![],
            dependents: vec![],
        };
        let wf = BuiltWorkflow {
            id: uuid::Uuid::new_v4(),
            name: "t".into(),
            nodes: HashMap::new(),
            edges: HashMap::new(),
            execution_levels: vec![],
            trigger_node_id: "c".into(),
            output_node_ids: HashSet::new(),
            loop_contexts: HashMap::new(),
            max_concurrent_nodes: 10,
            trigger: crate::model::TriggerKind::Manual,
        };
        let truthy = json!({"result": true});
        assert!(fires(&wf, &node, &truthy, &HandleType::True));
        assert!(!fires(&wf, &node, &truthy, &HandleType::False));
    }
}
