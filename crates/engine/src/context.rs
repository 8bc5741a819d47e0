//! Execution context (spec §5, component C1).
//!
//! `ExecutionContext` is the immutable-per-write record an execution
//! accumulates as it runs: the original inputs, one output blob per node
//! (write-once), a free-form variable bag, and metadata. It also owns
//! `{{A.b.c}}` template substitution — the engine resolves templates in a
//! node's config before dispatching to an executor, so executors never see
//! unresolved placeholders (§5.3, a resolved design decision: this keeps
//! `ExecuteNode` implementations free of templating concerns).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;

/// Everything an execution has accumulated so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub inputs: HashMap<String, Value>,
    pub node_outputs: HashMap<String, Value>,
    pub variables: HashMap<String, Value>,
    pub metadata: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(inputs: HashMap<String, Value>) -> Self {
        Self { inputs, ..Default::default() }
    }

    /// Record a node's output. Errors if this node id has already written
    /// an output — the write-once invariant (§5.2).
    pub fn record_output(&mut self, node_id: &str, output: Value) -> Result<(), EngineError> {
        if self.node_outputs.contains_key(node_id) {
            return Err(EngineError::DuplicateOutput(node_id.to_string()));
        }
        self.node_outputs.insert(node_id.to_string(), output);
        Ok(())
    }

    /// Record one iteration's output for a loop body node, keyed
    /// `"{node_id}#{iteration_index}"` (§9). Each iteration key is itself
    /// write-once.
    pub fn record_loop_output(
        &mut self,
        node_id: &str,
        iteration_index: u32,
        output: Value,
    ) -> Result<(), EngineError> {
        let key = format!("{node_id}#{iteration_index}");
        self.record_output(&key, output)
    }

    /// Resolve every `{{A.b.c}}` placeholder in `config` against
    /// `nodeOutputs ∪ inputs ∪ variables`, in that precedence order.
    /// Unresolvable paths are substituted with the empty string (§5.3) —
    /// this is a template language for data plumbing, not a scripting
    /// surface, so there's no "fail the node" path for a bad reference.
    pub fn resolve_templates(&self, config: &Value) -> Value {
        match config {
            Value::String(s) => Value::String(self.resolve_string(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.resolve_templates(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_templates(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve_string(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + 2..];
            match after_open.find("}}") {
                Some(end) => {
                    let path = after_open[..end].trim();
                    out.push_str(&self.resolve_path(path));
                    rest = &after_open[end + 2..];
                }
                None => {
                    // Unterminated placeholder: emit literally and stop.
                    out.push_str(&rest[start..]);
                    rest = "";
                    break;
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn resolve_path(&self, path: &str) -> String {
        let mut segments = path.split('.');
        let Some(root) = segments.next() else { return String::new() };

        let value = self
            .node_outputs
            .get(root)
            .or_else(|| self.inputs.get(root))
            .or_else(|| self.variables.get(root));

        let Some(mut current) = value else { return String::new() };
        for seg in segments {
            match current.get(seg) {
                Some(next) => current = next,
                None => return String::new(),
            }
        }
        value_to_template_string(current)
    }
}

fn value_to_template_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        let mut ctx = ExecutionContext::new(HashMap::from([(
            "user".to_string(),
            json!({"name": "Ada"}),
        )]));
        ctx.node_outputs.insert("fetch".to_string(), json!({"body": {"id": 42}}));
        ctx.variables.insert("retries".to_string(), json!(3));
        ctx
    }

    #[test]
    fn resolves_nested_node_output_path() {
        let ctx = ctx();
        assert_eq!(ctx.resolve_string("value: {{fetch.body.id}}"), "value: 42");
    }

    #[test]
    fn resolves_input_path() {
        let ctx = ctx();
        assert_eq!(ctx.resolve_string("hi {{user.name}}"), "hi Ada");
    }

    #[test]
    fn unresolvable_path_becomes_empty_string() {
        let ctx = ctx();
        assert_eq!(ctx.resolve_string("{{nope.at.all}} tail"), " tail");
    }

    #[test]
    fn resolves_templates_recursively_through_objects_and_arrays() {
        let ctx = ctx();
        let cfg = json!({"url": "/users/{{fetch.body.id}}", "tags": ["{{user.name}}", "static"]});
        let resolved = ctx.resolve_templates(&cfg);
        assert_eq!(resolved["url"], json!("/users/42"));
        assert_eq!(resolved["tags"][0], json!("Ada"));
        assert_eq!(resolved["tags"][1], json!("static"));
    }

    #[test]
    fn duplicate_output_write_is_rejected() {
        let mut ctx = ctx();
        let err = ctx.record_output("fetch", json!({})).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateOutput(id) if id == "fetch"));
    }

    #[test]
    fn loop_iterations_use_indexed_keys() {
        let mut ctx = ExecutionContext::default();
        ctx.record_loop_output("body1", 0, json!({"n": 1})).unwrap();
        ctx.record_loop_output("body1", 1, json!({"n": 2})).unwrap();
        assert_eq!(ctx.node_outputs["body1#0"], json!({"n": 1}));
        assert_eq!(ctx.node_outputs["body1#1"], json!({"n": 2}));
    }
}
