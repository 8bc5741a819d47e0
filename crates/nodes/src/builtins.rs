//! Minimal built-in [`engine::ExecuteNode`] implementations for the node
//! types the engine's own tests and the CLI's `execute` subcommand need to
//! drive a workflow end to end. Real LLM/HTTP/database/vision/agent
//! executors are genuine external collaborators (spec §1) and have no
//! built-in here.

use async_trait::async_trait;
use engine::{ExecuteNode, NodeError, NodeOutput, NodeRequest, PauseRequest};
use serde_json::{json, Value};

/// A `transform` node: projects its (already template-resolved) config
/// down to an output value. If `config.output` is set, that becomes the
/// node's output verbatim; otherwise the whole config is passed through.
/// Real transform nodes would run a user-authored mapping here — this is
/// the identity case, useful for wiring data between nodes in tests.
pub struct PassthroughTransform;

#[async_trait]
impl ExecuteNode for PassthroughTransform {
    async fn execute(&self, request: NodeRequest) -> Result<NodeOutput, NodeError> {
        let value = request.config.get("output").cloned().unwrap_or(request.config);
        Ok(NodeOutput::value(value))
    }
}

/// A `conditional` node: evaluates `{left, operator, right}` (already
/// template-resolved) and reports `{"result": bool}` for the Edge Router
/// to read back (§4.5). Falls back to truthiness of `left` for an unknown
/// or missing operator.
pub struct ComparisonConditional;

#[async_trait]
impl ExecuteNode for ComparisonConditional {
    async fn execute(&self, request: NodeRequest) -> Result<NodeOutput, NodeError> {
        let config = &request.config;
        let left = config.get("left").cloned().unwrap_or(Value::Null);
        let right = config.get("right").cloned().unwrap_or(Value::Null);
        let operator = config.get("operator").and_then(Value::as_str).unwrap_or("truthy");
        let result = evaluate(operator, &left, &right);
        Ok(NodeOutput::value(json!({ "result": result })))
    }
}

fn evaluate(operator: &str, left: &Value, right: &Value) -> bool {
    match operator {
        "equals" => left == right,
        "notEquals" => left != right,
        "contains" => match left {
            Value::String(s) => right.as_str().map(|r| s.contains(r)).unwrap_or(false),
            Value::Array(items) => items.contains(right),
            _ => false,
        },
        "greaterThan" => matches!((left.as_f64(), right.as_f64()), (Some(l), Some(r)) if l > r),
        "lessThan" => matches!((left.as_f64(), right.as_f64()), (Some(l), Some(r)) if l < r),
        _ => is_truthy(left),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// A `switch` node: reports the (already template-resolved) `selector`
/// value as `{"case": "<value>"}` for the Edge Router to match against
/// `case-<value>` edges (§4.5). Non-string selectors are stringified.
pub struct ValueSwitch;

#[async_trait]
impl ExecuteNode for ValueSwitch {
    async fn execute(&self, request: NodeRequest) -> Result<NodeOutput, NodeError> {
        let selector = request.config.get("selector").cloned().unwrap_or(Value::Null);
        let case = match &selector {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Ok(NodeOutput::value(json!({ "case": case })))
    }
}

/// A `waitForUser` node: always raises a pause signal (§6.1), carrying
/// the conventional `preservedData` fields (`variableName`, `inputType`,
/// `validation`, `required`) a resume caller needs to know what input is
/// expected.
pub struct WaitForUser;

#[async_trait]
impl ExecuteNode for WaitForUser {
    async fn execute(&self, request: NodeRequest) -> Result<NodeOutput, NodeError> {
        let config = &request.config;
        let variable_name = config.get("variableName").and_then(Value::as_str).unwrap_or("input").to_string();
        let input_type = config.get("inputType").and_then(Value::as_str).unwrap_or("text").to_string();
        let required = config.get("required").and_then(Value::as_bool).unwrap_or(true);
        let reason = config.get("prompt").and_then(Value::as_str).unwrap_or("waiting for user input").to_string();

        let preserved_data = json!({
            "variableName": variable_name,
            "inputType": input_type,
            "required": required,
            "validation": config.get("validation").cloned().unwrap_or(Value::Null),
        });

        let mut pause_request = PauseRequest::new(reason).with_preserved_data(preserved_data);
        if let Some(timeout_ms) = config.get("timeoutMs").and_then(Value::as_u64) {
            pause_request = pause_request.with_timeout_ms(timeout_ms);
        }

        Ok(NodeOutput {
            value: json!({ "awaiting": variable_name }),
            signal: engine::Signal::Pause(pause_request),
            token_usage: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(node_type: engine::NodeType, config: Value) -> NodeRequest {
        NodeRequest {
            execution_id: uuid::Uuid::new_v4(),
            node_id: "n1".into(),
            node_type,
            name: "n1".into(),
            config,
            loop_iteration: None,
        }
    }

    #[tokio::test]
    async fn passthrough_prefers_output_field() {
        let out = PassthroughTransform
            .execute(request(engine::NodeType::Transform, json!({ "output": {"x": 1}, "scratch": true })))
            .await
            .unwrap();
        assert_eq!(out.value, json!({ "x": 1 }));
    }

    #[tokio::test]
    async fn passthrough_falls_back_to_whole_config() {
        let out = PassthroughTransform
            .execute(request(engine::NodeType::Transform, json!({ "a": 1 })))
            .await
            .unwrap();
        assert_eq!(out.value, json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn conditional_equals() {
        let out = ComparisonConditional
            .execute(request(
                engine::NodeType::Conditional,
                json!({ "left": "image", "operator": "equals", "right": "image" }),
            ))
            .await
            .unwrap();
        assert_eq!(out.value, json!({ "result": true }));
    }

    #[tokio::test]
    async fn conditional_defaults_to_truthiness() {
        let out = ComparisonConditional
            .execute(request(engine::NodeType::Conditional, json!({ "left": "" })))
            .await
            .unwrap();
        assert_eq!(out.value, json!({ "result": false }));
    }

    #[tokio::test]
    async fn switch_reports_selector_as_case() {
        let out = ValueSwitch
            .execute(request(engine::NodeType::Switch, json!({ "selector": "image" })))
            .await
            .unwrap();
        assert_eq!(out.value, json!({ "case": "image" }));
    }

    #[tokio::test]
    async fn wait_for_user_raises_pause_with_preserved_data() {
        let out = WaitForUser
            .execute(request(
                engine::NodeType::WaitForUser,
                json!({ "variableName": "approval", "inputType": "boolean", "required": true }),
            ))
            .await
            .unwrap();
        match out.signal {
            engine::Signal::Pause(request) => {
                assert_eq!(request.preserved_data["variableName"], json!("approval"));
            }
            other => panic!("expected Pause, got {other:?}"),
        }
    }
}
