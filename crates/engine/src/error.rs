//! Engine-level error types (spec §7 "Error Handling Design").

use thiserror::Error;

/// Errors produced by the workflow engine — builder validation and
/// scheduler execution alike.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ InvalidDefinition (builder) ------
    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference { node_id: String, side: &'static str },

    /// Zero or more than one `input`-typed node exists.
    #[error("workflow must have exactly one input-typed trigger node, found {count}")]
    MissingOrAmbiguousTrigger { count: usize },

    /// The dependency graph contains a cycle that isn't accounted for by a
    /// declared loop context.
    #[error("workflow graph contains a cycle outside any declared loop: {0:?}")]
    CycleDetected(Vec<String>),

    /// An output node is not reachable from the trigger.
    #[error("output node '{0}' is not reachable from the trigger")]
    UnreachableOutput(String),

    /// A declared loop config references nodes that don't exist.
    #[error("loop '{loop_node_id}' references unknown body node '{node_id}'")]
    UnknownLoopBodyNode { loop_node_id: String, node_id: String },

    // ------ Execution errors ------
    /// An executor returned `success = false`.
    #[error("node '{node_id}' failed: {message}")]
    NodeExecutionError { node_id: String, message: String },

    /// Programming/invariant error: a node id was written to `nodeOutputs`
    /// twice within one execution.
    #[error("duplicate output write for node '{0}' (invariant violation)")]
    DuplicateOutput(String),

    /// Credit reservation was refused before any node was dispatched.
    #[error("insufficient credits: need {needed}, available {available}")]
    InsufficientCredits { needed: i64, available: i64 },

    /// Execution was cancelled by an external `Cancel` call.
    #[error("execution cancelled")]
    Cancelled,

    /// No node is executing but the queue isn't complete either — a
    /// scheduling deadlock (should be unreachable for a builder-validated
    /// workflow, but guarded against defensively).
    #[error("scheduler stalled: no ready nodes and execution incomplete")]
    SchedulerStalled,

    /// Wraps an error surfaced by a `QueueState` operation.
    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),

    /// An external collaborator (persistence, credit service, event sink)
    /// failed.
    #[error("collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),
}

impl EngineError {
    /// True for the `InvalidDefinition` family of errors (builder-time).
    pub fn is_invalid_definition(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateNodeId(_)
                | EngineError::UnknownNodeReference { .. }
                | EngineError::MissingOrAmbiguousTrigger { .. }
                | EngineError::CycleDetected(_)
                | EngineError::UnreachableOutput(_)
                | EngineError::UnknownLoopBodyNode { .. }
        )
    }
}
