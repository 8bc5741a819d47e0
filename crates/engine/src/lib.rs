//! `engine` crate — the workflow execution engine: graph model, builder,
//! execution context, edge routing, the scheduler, and the external
//! collaborator contracts (credits, events, snapshots, node execution)
//! a caller must implement to actually run anything.
//!
//! This crate depends only on `queue` — it has no knowledge of how nodes
//! are actually executed, how credits are actually ledgered, or how
//! snapshots are actually persisted. Those live behind the
//! [`executor::ExecuteNode`], [`credits::CreditService`],
//! [`events::EventSink`], and [`snapshot::SnapshotStore`] traits, which
//! `nodes` and `db` implement.

pub mod builder;
pub mod context;
pub mod credits;
pub mod edge_router;
pub mod error;
pub mod events;
pub mod executor;
pub mod model;
pub mod scheduler;
pub mod snapshot;

pub use context::ExecutionContext;
pub use error::EngineError;
pub use executor::{
    ExecuteNode, NodeError, NodeOutput, NodeRegistry, NodeRequest, PauseContext, PauseRequest, ResumeTrigger,
    Signal, TokenUsage,
};
pub use model::{
    BuiltWorkflow, Edge, HandleType, LoopContext, Node, NodeId, NodeType, RawEdge, RawLoopConfig, RawNode,
    RawWorkflowDefinition, TriggerKind,
};
pub use scheduler::{CancellationToken, ExecutionOutcome, Scheduler};
pub use snapshot::{InMemorySnapshotStore, Snapshot, SnapshotStore};
pub use credits::{CreditService, InMemoryCreditService};
pub use events::{EventSink, ExecutionEvent, ExecutionEventKind, NullEventSink};
