//! The `ExecuteNode` contract (spec §6) — the seam between the scheduler
//! and whatever actually runs a node. The engine never implements this
//! trait itself; `nodes` provides built-ins and callers may register
//! their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::NodeType;

/// Errors a node implementation can return. The scheduler treats
/// `Retryable` as eligible for re-dispatch within the same execution
/// (subject to the executor's own retry policy — the engine does not
/// retry on its behalf, §6.2) and `Fatal` as an immediate node failure
/// that propagates to `NodeExecutionError`.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    #[error("retryable node error: {0}")]
    Retryable(String),

    #[error("fatal node error: {0}")]
    Fatal(String),
}

/// Everything a node implementation needs to run — already template
/// resolved (§5.3) — and nothing it doesn't. Node implementations never
/// see sibling outputs or variables directly; anything they need must
/// already be spliced into `config` by the engine.
#[derive(Debug, Clone)]
pub struct NodeRequest {
    pub execution_id: uuid::Uuid,
    pub node_id: String,
    pub node_type: NodeType,
    pub name: String,
    /// Fully template-resolved config.
    pub config: Value,
    /// Present only while this dispatch is a resumed loop iteration.
    pub loop_iteration: Option<u32>,
}

/// Token accounting a `llm` node reports back so the engine can compute
/// its actual credit accrual (§8.3: `ceil((input+output)/100)`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// How a paused execution expects to be woken back up (§3 `PauseContext`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResumeTrigger {
    /// An external caller invokes `Resume` with concrete input.
    Signal,
    /// `timeoutMs` elapses; a surrounding collaborator decides what
    /// happens next (§4.6 "Timeouts" — advisory, not enforced here).
    Timeout,
    /// Some other external event (e.g. a webhook) drives the resume.
    External,
}

/// What a node asks the engine to raise before pausing (§6.1 `signals`).
/// The scheduler fills in `node_id` and `paused_at` to turn this into the
/// full [`PauseContext`] it persists in the [`crate::snapshot::Snapshot`].
#[derive(Debug, Clone)]
pub struct PauseRequest {
    pub reason: String,
    pub resume_trigger: ResumeTrigger,
    pub timeout_ms: Option<u64>,
    /// Free-form data the pause wants preserved and handed back on resume
    /// — conventionally carries `variableName`, `inputType`, `validation`,
    /// `required` for a `waitForUser` node (§3).
    pub preserved_data: Value,
}

impl PauseRequest {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            resume_trigger: ResumeTrigger::Signal,
            timeout_ms: None,
            preserved_data: Value::Null,
        }
    }

    pub fn with_preserved_data(mut self, preserved_data: Value) -> Self {
        self.preserved_data = preserved_data;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self.resume_trigger = ResumeTrigger::Timeout;
        self
    }
}

/// The full serializable record of why and how an execution suspended
/// (§3 `PauseContext`), persisted verbatim inside a [`crate::snapshot::Snapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseContext {
    pub reason: String,
    pub node_id: String,
    pub paused_at: DateTime<Utc>,
    pub resume_trigger: ResumeTrigger,
    pub timeout_ms: Option<u64>,
    pub preserved_data: Value,
}

/// A cooperative signal a node can raise alongside a successful result.
#[derive(Debug, Clone, Default)]
pub enum Signal {
    #[default]
    None,
    /// Ask the engine to pause the execution after this node (§6.3).
    /// The scheduler snapshots and returns control to the caller; it does
    /// not mark this node's dependents ready until `Resume` is called.
    Pause(PauseRequest),
}

/// What a node implementation hands back to the scheduler on success.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    pub value: Value,
    pub signal: Signal,
    pub token_usage: Option<TokenUsage>,
}

impl NodeOutput {
    pub fn value(value: Value) -> Self {
        Self { value, ..Default::default() }
    }
}

/// The node execution contract. Implementations live in `nodes` (or a
/// caller's own crate) — the engine only ever holds a `dyn ExecuteNode`.
#[async_trait]
pub trait ExecuteNode: Send + Sync {
    async fn execute(&self, request: NodeRequest) -> Result<NodeOutput, NodeError>;
}

/// Default per-invocation credit cost by node type (§8.2), used when a
/// node doesn't report its own usage (everything except `llm`, which is
/// token-metered instead).
pub fn default_credit_cost(node_type: NodeType) -> i64 {
    match node_type {
        NodeType::Input | NodeType::Output => 0,
        NodeType::Transform | NodeType::Conditional | NodeType::Switch | NodeType::Loop => 1,
        NodeType::Http | NodeType::WaitForUser => 2,
        NodeType::Database | NodeType::FileOperations => 2,
        NodeType::Vision | NodeType::Agent => 5,
        NodeType::Llm => 10,
    }
}

/// The tool name an `agent:tool:call:*` event (§4.8) reports for a node
/// type, or `None` if the type has no tool-like side effect and is
/// exempt from the tool-call event pair entirely.
pub fn tool_name(node_type: NodeType) -> Option<&'static str> {
    match node_type {
        NodeType::Http => Some("http"),
        NodeType::Llm => Some("llm"),
        NodeType::Database => Some("database"),
        NodeType::Vision => Some("vision"),
        NodeType::FileOperations => Some("fileOperations"),
        NodeType::Agent => Some("agent"),
        NodeType::Input
        | NodeType::Output
        | NodeType::Transform
        | NodeType::Conditional
        | NodeType::Switch
        | NodeType::Loop
        | NodeType::WaitForUser => None,
    }
}

/// Actual credit accrual for a completed node (§8.3). `llm` nodes that
/// reported token usage are metered; everything else (and `llm` nodes
/// that didn't report usage, e.g. a cached response) falls back to the
/// type default.
pub fn accrued_credits(node_type: NodeType, token_usage: Option<TokenUsage>) -> i64 {
    match (node_type, token_usage) {
        (NodeType::Llm, Some(usage)) => {
            let total = usage.input_tokens + usage.output_tokens;
            ((total + 99) / 100) as i64
        }
        _ => default_credit_cost(node_type),
    }
}

/// Maps node types to the implementation that runs them. A workflow
/// fails to dispatch (not to *build* — registration is a runtime
/// concern) if a node type has no registered executor.
#[derive(Default, Clone)]
pub struct NodeRegistry {
    executors: std::collections::HashMap<NodeType, std::sync::Arc<dyn ExecuteNode>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node_type: NodeType, executor: std::sync::Arc<dyn ExecuteNode>) {
        self.executors.insert(node_type, executor);
    }

    pub fn get(&self, node_type: NodeType) -> Option<&std::sync::Arc<dyn ExecuteNode>> {
        self.executors.get(&node_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_credit_cost_is_token_metered() {
        let usage = TokenUsage { input_tokens: 150, output_tokens: 55 };
        assert_eq!(accrued_credits(NodeType::Llm, Some(usage)), 3);
    }

    #[test]
    fn llm_without_usage_falls_back_to_default() {
        assert_eq!(accrued_credits(NodeType::Llm, None), 10);
    }

    #[test]
    fn transform_cost_is_flat() {
        assert_eq!(accrued_credits(NodeType::Transform, None), 1);
    }
}
