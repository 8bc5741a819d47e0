//! Queue-level error type.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// A caller referenced a node ID that isn't part of the graph.
    #[error("unknown node id: '{0}'")]
    UnknownNode(String),

    /// A node transition was attempted from a state that doesn't allow it
    /// (e.g. completing a node that was never marked executing).
    #[error("invalid transition for node '{node_id}': {message}")]
    InvalidTransition { node_id: String, message: String },
}
