//! `nodes` crate — sample and built-in implementations of
//! [`engine::ExecuteNode`].
//!
//! The engine treats every node type as an opaque dispatch target (§6.1);
//! this crate supplies the handful of executors needed to actually run a
//! workflow end to end in tests and from the CLI, plus a configurable
//! [`mock::MockNode`] test double. `llm`, `http`, `database`, `vision`,
//! `fileOperations`, and `agent` nodes are genuine external collaborators
//! per spec §1 and have no built-in here — a caller wires in its own
//! provider-backed `ExecuteNode` for those.

pub mod builtins;
pub mod mock;

pub use builtins::{ComparisonConditional, PassthroughTransform, ValueSwitch, WaitForUser};
pub use mock::{MockBehaviour, MockNode};
