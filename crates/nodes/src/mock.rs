//! `MockNode` — a configurable test double for [`engine::ExecuteNode`].
//!
//! Useful in unit and integration tests where a real node implementation is
//! either unavailable or irrelevant — and in `engine`'s own test suite
//! before this crate existed, a private copy of exactly this pattern did
//! that job.

use async_trait::async_trait;
use engine::{NodeError, NodeOutput, NodeRequest, PauseRequest, Signal};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Succeed but raise a pause signal, as a `waitForUser` node would.
    Pause(PauseRequest),
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
}

/// A mock node that records every request it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// Every request seen by this node, in call order.
    pub calls: Arc<Mutex<Vec<NodeRequest>>>,
}

impl MockNode {
    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self { name: name.into(), behaviour: MockBehaviour::ReturnValue(value), calls: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Create a mock that raises a pause signal, as a `waitForUser` node would.
    pub fn pausing(name: impl Into<String>, request: PauseRequest) -> Self {
        Self { name: name.into(), behaviour: MockBehaviour::Pause(request), calls: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { name: name.into(), behaviour: MockBehaviour::FailFatal(msg.into()), calls: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self { name: name.into(), behaviour: MockBehaviour::FailRetryable(msg.into()), calls: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl engine::ExecuteNode for MockNode {
    async fn execute(&self, request: NodeRequest) -> Result<NodeOutput, NodeError> {
        self.calls.lock().unwrap().push(request.clone());

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                // Merge the node's own label with its configured output so
                // tests can trace which node in a fan-out produced which
                // value without threading names through `config`.
                let mut out = json!({ "node": self.name });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Ok(NodeOutput::value(out))
            }
            MockBehaviour::Pause(request) => {
                Ok(NodeOutput { value: json!({ "node": self.name }), signal: Signal::Pause(request.clone()), token_usage: None })
            }
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::ExecuteNode;

    fn request(config: Value) -> NodeRequest {
        NodeRequest {
            execution_id: uuid::Uuid::new_v4(),
            node_id: "n1".into(),
            node_type: engine::NodeType::Transform,
            name: "n1".into(),
            config,
            loop_iteration: None,
        }
    }

    #[tokio::test]
    async fn returning_merges_node_label_with_value() {
        let mock = MockNode::returning("greeter", json!({ "greeting": "hi" }));
        let out = mock.execute(request(json!({}))).await.unwrap();
        assert_eq!(out.value, json!({ "node": "greeter", "greeting": "hi" }));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn failing_fatal_returns_fatal_error() {
        let mock = MockNode::failing_fatal("boom", "kaboom");
        let err = mock.execute(request(json!({}))).await.unwrap_err();
        assert!(matches!(err, NodeError::Fatal(msg) if msg == "kaboom"));
    }

    #[tokio::test]
    async fn pausing_raises_pause_signal() {
        let mock = MockNode::pausing("wait", PauseRequest::new("need input"));
        let out = mock.execute(request(json!({}))).await.unwrap();
        assert!(matches!(out.signal, Signal::Pause(_)));
    }
}
