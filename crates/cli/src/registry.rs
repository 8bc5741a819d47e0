//! The node registry the CLI wires up when nothing fancier is supplied.
//!
//! Covers every node type that has a genuine built-in in `nodes`
//! (`input`/`output` pass data through unchanged, same as a `transform`
//! with no mapping configured). `llm`/`http`/`database`/`vision`/
//! `fileOperations`/`agent` are real external collaborators with no
//! built-in — a workflow that reaches one of those dispatches to a
//! missing executor and fails, which is the correct behaviour for a
//! registry with nothing plugged in for them.

use std::sync::Arc;

use engine::{ExecuteNode, NodeRegistry, NodeType};
use nodes::{ComparisonConditional, PassthroughTransform, ValueSwitch, WaitForUser};

pub fn default_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    let passthrough: Arc<dyn ExecuteNode> = Arc::new(PassthroughTransform);
    registry.register(NodeType::Input, passthrough.clone());
    registry.register(NodeType::Output, passthrough.clone());
    registry.register(NodeType::Transform, passthrough);
    registry.register(NodeType::Conditional, Arc::new(ComparisonConditional));
    registry.register(NodeType::Switch, Arc::new(ValueSwitch));
    registry.register(NodeType::WaitForUser, Arc::new(WaitForUser));
    registry
}
