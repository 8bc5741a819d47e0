//! Workflow Builder (spec §4.2, component C2).
//!
//! Validates a [`RawWorkflowDefinition`] and produces a [`BuiltWorkflow`]:
//! dependencies, dependents, depth, execution levels, and loop contexts are
//! all computed here, once, up front — the scheduler never recomputes them.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::EngineError;
use crate::model::{BuiltWorkflow, LoopContext, Node, NodeType, RawWorkflowDefinition};

/// Validate `raw` and compute everything the scheduler needs to run it.
///
/// # Errors
/// Any [`EngineError`] variant for which [`EngineError::is_invalid_definition`]
/// returns `true`.
pub fn build(raw: RawWorkflowDefinition) -> Result<BuiltWorkflow, EngineError> {
    let node_ids = check_unique_node_ids(&raw)?;
    check_edge_endpoints(&raw, &node_ids)?;
    let trigger_node_id = find_trigger(&raw)?;
    let loop_contexts = check_loop_configs(&raw, &node_ids)?;

    let back_edges = back_edge_ids(&raw, &loop_contexts);

    let (dependencies, dependents) = compute_dependency_maps(&raw, &back_edges);
    check_acyclic(&raw, &dependencies)?;
    let depth = compute_depth(&raw, &trigger_node_id, &dependencies)?;

    let nodes: HashMap<String, Node> = raw
        .nodes
        .iter()
        .map(|n| {
            let id = n.id.clone();
            (
                id.clone(),
                Node {
                    id: id.clone(),
                    node_type: n.node_type,
                    name: n.name.clone(),
                    config: n.config.clone(),
                    depth: *depth.get(&id).unwrap_or(&0),
                    dependencies: dependencies.get(&id).cloned().unwrap_or_default(),
                    dependents: dependents.get(&id).cloned().unwrap_or_default(),
                },
            )
        })
        .collect();

    let output_node_ids: HashSet<String> = raw
        .nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Output)
        .map(|n| n.id.clone())
        .collect();

    check_outputs_reachable(&output_node_ids, &depth)?;

    let mut execution_levels: Vec<Vec<String>> = Vec::new();
    for (id, d) in &depth {
        let level = *d as usize;
        if execution_levels.len() <= level {
            execution_levels.resize(level + 1, Vec::new());
        }
        execution_levels[level].push(id.clone());
    }
    for level in &mut execution_levels {
        level.sort();
    }

    let edges = raw
        .edges
        .iter()
        .map(|e| {
            (
                e.id.clone(),
                crate::model::Edge {
                    id: e.id.clone(),
                    source: e.source.clone(),
                    target: e.target.clone(),
                    source_handle: e.source_handle.clone(),
                    target_handle: e.target_handle.clone(),
                    handle_type: e.handle_type.clone(),
                },
            )
        })
        .collect();

    Ok(BuiltWorkflow {
        id: raw.id,
        name: raw.name,
        nodes,
        edges,
        execution_levels,
        trigger_node_id,
        output_node_ids,
        loop_contexts,
        max_concurrent_nodes: raw.max_concurrent_nodes.max(1),
        trigger: raw.trigger,
    })
}

fn check_unique_node_ids(raw: &RawWorkflowDefinition) -> Result<HashSet<String>, EngineError> {
    let mut seen = HashSet::new();
    for node in &raw.nodes {
        if !seen.insert(node.id.clone()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
    }
    Ok(seen)
}

fn check_edge_endpoints(
    raw: &RawWorkflowDefinition,
    node_ids: &HashSet<String>,
) -> Result<(), EngineError> {
    for edge in &raw.edges {
        if !node_ids.contains(&edge.source) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.source.clone(),
                side: "source",
            });
        }
        if !node_ids.contains(&edge.target) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.target.clone(),
                side: "target",
            });
        }
    }
    Ok(())
}

fn find_trigger(raw: &RawWorkflowDefinition) -> Result<String, EngineError> {
    let triggers: Vec<&String> = raw
        .nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Input)
        .map(|n| &n.id)
        .collect();
    match triggers.as_slice() {
        [single] => Ok((*single).clone()),
        other => Err(EngineError::MissingOrAmbiguousTrigger { count: other.len() }),
    }
}

fn check_loop_configs(
    raw: &RawWorkflowDefinition,
    node_ids: &HashSet<String>,
) -> Result<HashMap<String, LoopContext>, EngineError> {
    let mut out = HashMap::new();
    for lc in &raw.loops {
        if !node_ids.contains(&lc.loop_node_id) {
            return Err(EngineError::UnknownLoopBodyNode {
                loop_node_id: lc.loop_node_id.clone(),
                node_id: lc.loop_node_id.clone(),
            });
        }
        for body_id in &lc.body_node_ids {
            if !node_ids.contains(body_id) {
                return Err(EngineError::UnknownLoopBodyNode {
                    loop_node_id: lc.loop_node_id.clone(),
                    node_id: body_id.clone(),
                });
            }
        }
        out.insert(
            lc.loop_node_id.clone(),
            LoopContext {
                loop_node_id: lc.loop_node_id.clone(),
                body_node_ids: lc.body_node_ids.clone(),
                max_iterations: lc.max_iterations,
                iteration_variable: lc.iteration_variable.clone(),
            },
        );
    }
    Ok(out)
}

/// Edges from a loop's body back into the loop node — permitted cycles
/// per §4.2 step 3, excluded from the dependency graph entirely because
/// the scheduler drives loop iterations explicitly (§9).
fn back_edge_ids(
    raw: &RawWorkflowDefinition,
    loop_contexts: &HashMap<String, LoopContext>,
) -> HashSet<String> {
    raw.edges
        .iter()
        .filter(|e| {
            loop_contexts
                .get(&e.target)
                .map(|lc| lc.body_node_ids.contains(&e.source))
                .unwrap_or(false)
        })
        .map(|e| e.id.clone())
        .collect()
}

fn compute_dependency_maps(
    raw: &RawWorkflowDefinition,
    back_edges: &HashSet<String>,
) -> (HashMap<String, Vec<String>>, HashMap<String, Vec<String>>) {
    let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

    for node in &raw.nodes {
        dependencies.entry(node.id.clone()).or_default();
        dependents.entry(node.id.clone()).or_default();
    }

    for edge in &raw.edges {
        if back_edges.contains(&edge.id) {
            continue;
        }
        dependencies.entry(edge.target.clone()).or_default().push(edge.source.clone());
        dependents.entry(edge.source.clone()).or_default().push(edge.target.clone());
    }

    for deps in dependencies.values_mut() {
        deps.sort();
        deps.dedup();
    }
    for deps in dependents.values_mut() {
        deps.sort();
        deps.dedup();
    }

    (dependencies, dependents)
}

fn check_acyclic(
    raw: &RawWorkflowDefinition,
    dependencies: &HashMap<String, Vec<String>>,
) -> Result<(), EngineError> {
    // Kahn's algorithm over the dependency graph (with loop back edges
    // already excluded) — any remaining unvisited node is part of a
    // genuine cycle.
    let mut in_degree: HashMap<&str, usize> = raw
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), dependencies.get(&n.id).map(|d| d.len()).unwrap_or(0)))
        .collect();

    let mut dependents_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for (target, deps) in dependencies {
        for dep in deps {
            dependents_of.entry(dep.as_str()).or_default().push(target.as_str());
        }
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut visited = 0usize;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        if let Some(children) = dependents_of.get(id) {
            for &child in children {
                let entry = in_degree.entry(child).or_insert(0);
                *entry = entry.saturating_sub(1);
                if *entry == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    if visited != raw.nodes.len() {
        let stuck: Vec<String> = in_degree
            .iter()
            .filter(|(_, &d)| d > 0)
            .map(|(&id, _)| id.to_string())
            .collect();
        return Err(EngineError::CycleDetected(stuck));
    }
    Ok(())
}

fn compute_depth(
    raw: &RawWorkflowDefinition,
    trigger_node_id: &str,
    dependencies: &HashMap<String, Vec<String>>,
) -> Result<HashMap<String, u32>, EngineError> {
    let mut depth: HashMap<String, u32> = HashMap::new();
    let mut dependents_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for (target, deps) in dependencies {
        for dep in deps {
            dependents_of.entry(dep.as_str()).or_default().push(target.as_str());
        }
    }
    let mut remaining: HashMap<&str, usize> = raw
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), dependencies.get(&n.id).map(|d| d.len()).unwrap_or(0)))
        .collect();

    depth.insert(trigger_node_id.to_string(), 0);
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(trigger_node_id);

    // Depth is reachability-from-trigger, full stop: a node with zero
    // dependencies that isn't the trigger is a disconnected island and
    // deliberately gets no depth entry here — `check_outputs_reachable`
    // relies on exactly that to catch an output node nothing feeds into.
    let _ = &remaining;

    let mut processed: HashSet<&str> = queue.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        let d = depth[id];
        if let Some(children) = dependents_of.get(id) {
            for &child in children {
                let candidate = d + 1;
                let entry = depth.entry(child.to_string()).or_insert(candidate);
                if candidate > *entry {
                    *entry = candidate;
                }
                let rem = remaining.entry(child).or_insert(0);
                *rem = rem.saturating_sub(1);
                if *rem == 0 && processed.insert(child) {
                    queue.push_back(child);
                }
            }
        }
    }

    Ok(depth)
}

fn check_outputs_reachable(
    output_node_ids: &HashSet<String>,
    depth: &HashMap<String, u32>,
) -> Result<(), EngineError> {
    for id in output_node_ids {
        if !depth.contains_key(id) {
            return Err(EngineError::UnreachableOutput(id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HandleType, RawEdge, RawNode};
    use serde_json::json;

    fn node(id: &str, ty: NodeType) -> RawNode {
        RawNode { id: id.into(), node_type: ty, name: id.into(), config: json!({}) }
    }

    fn edge(id: &str, from: &str, to: &str, handle: HandleType) -> RawEdge {
        RawEdge {
            id: id.into(),
            source: from.into(),
            target: to.into(),
            source_handle: None,
            target_handle: None,
            handle_type: handle,
        }
    }

    fn linear_def() -> RawWorkflowDefinition {
        RawWorkflowDefinition {
            id: uuid::Uuid::new_v4(),
            name: "linear".into(),
            nodes: vec![
                node("trigger", NodeType::Input),
                node("t", NodeType::Transform),
                node("out", NodeType::Output),
            ],
            edges: vec![
                edge("e1", "trigger", "t", HandleType::Default),
                edge("e2", "t", "out", HandleType::Default),
            ],
            loops: vec![],
            max_concurrent_nodes: 10,
            trigger: crate::model::TriggerKind::Manual,
        }
    }

    #[test]
    fn builds_linear_workflow_with_correct_depth() {
        let built = build(linear_def()).expect("should build");
        assert_eq!(built.trigger_node_id, "trigger");
        assert_eq!(built.node("trigger").unwrap().depth, 0);
        assert_eq!(built.node("t").unwrap().depth, 1);
        assert_eq!(built.node("out").unwrap().depth, 2);
        assert_eq!(built.node("t").unwrap().dependencies, vec!["trigger".to_string()]);
        assert_eq!(built.node("trigger").unwrap().dependents, vec!["t".to_string()]);
    }

    #[test]
    fn rejects_ambiguous_trigger() {
        let mut def = linear_def();
        def.nodes.push(node("trigger2", NodeType::Input));
        let err = build(def).unwrap_err();
        assert!(matches!(err, EngineError::MissingOrAmbiguousTrigger { count: 2 }));
    }

    #[test]
    fn rejects_missing_trigger() {
        let mut def = linear_def();
        def.nodes.retain(|n| n.id != "trigger");
        def.edges.retain(|e| e.source != "trigger");
        let err = build(def).unwrap_err();
        assert!(matches!(err, EngineError::MissingOrAmbiguousTrigger { count: 0 }));
    }

    #[test]
    fn rejects_unreachable_output() {
        let mut def = linear_def();
        def.nodes.push(node("stray_out", NodeType::Output));
        let err = build(def).unwrap_err();
        assert!(matches!(err, EngineError::UnreachableOutput(id) if id == "stray_out"));
    }

    #[test]
    fn rejects_dangling_edge_reference() {
        let mut def = linear_def();
        def.edges.push(edge("e3", "t", "ghost", HandleType::Default));
        let err = build(def).unwrap_err();
        assert!(matches!(err, EngineError::UnknownNodeReference { node_id, .. } if node_id == "ghost"));
    }

    #[test]
    fn rejects_genuine_cycle() {
        let mut def = linear_def();
        def.edges.push(edge("back", "out", "trigger", HandleType::Default));
        let err = build(def).unwrap_err();
        assert!(matches!(err, EngineError::CycleDetected(_)));
    }

    #[test]
    fn loop_back_edge_is_not_a_cycle() {
        let mut def = RawWorkflowDefinition {
            id: uuid::Uuid::new_v4(),
            name: "loopy".into(),
            nodes: vec![
                node("trigger", NodeType::Input),
                node("loop", NodeType::Loop),
                node("body1", NodeType::Transform),
                node("out", NodeType::Output),
            ],
            edges: vec![
                edge("e1", "trigger", "loop", HandleType::Default),
                edge("e2", "loop", "body1", HandleType::Default),
                edge("e3", "body1", "loop", HandleType::Default),
                edge("e4", "loop", "out", HandleType::Default),
            ],
            loops: vec![crate::model::RawLoopConfig {
                loop_node_id: "loop".into(),
                body_node_ids: vec!["body1".into()],
                max_iterations: 3,
                iteration_variable: "i".into(),
            }],
            max_concurrent_nodes: 10,
            trigger: crate::model::TriggerKind::Manual,
        };
        def.max_concurrent_nodes = 10;
        let built = build(def).expect("loop cycle should be permitted");
        assert_eq!(built.loop_contexts.len(), 1);
    }
}
