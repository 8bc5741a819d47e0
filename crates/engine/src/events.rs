//! Execution event stream (spec §10, component C8).
//!
//! The scheduler emits one [`ExecutionEvent`] per state transition, in
//! order, each carrying a monotonically increasing sequence number so a
//! consumer reconstructing history from an unordered transport (a
//! message bus, a websocket fanout) can still recover the true order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEventKind {
    Started,
    NodeStarted { node_id: String },
    NodeCompleted { node_id: String, output: Value },
    NodeFailed { node_id: String, message: String },
    ToolCallStarted { node_id: String, tool: String },
    ToolCallCompleted { node_id: String, tool: String },
    Paused { node_id: String, reason: String },
    Resumed,
    Completed,
    /// Also the terminal event for a cancelled execution, with
    /// `message = "cancelled"` (§7: cancellation is not its own terminal
    /// event kind, it's a `failed` with that reason).
    Failed { message: String },
}

/// One entry in the ordered event stream for a single execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub execution_id: Uuid,
    /// Strictly increasing per execution; the authoritative ordering key.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: ExecutionEventKind,
}

/// External collaborator the scheduler publishes events to. Fire-and-
/// forget from the engine's point of view — a failed `publish` never
/// fails the node or the execution (§10.2).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: ExecutionEvent);
}

/// An `EventSink` that drops everything — the default when a caller
/// doesn't care about the event stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn publish(&self, _event: ExecutionEvent) {}
}

/// Assigns the monotonic `sequence` counter for one execution's events.
/// Kept separate from the sink so the scheduler (the only writer) can own
/// the counter without the sink implementation needing to coordinate it.
#[derive(Debug, Default)]
pub struct EventSequencer {
    next: u64,
}

impl EventSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_event(
        &mut self,
        execution_id: Uuid,
        timestamp: DateTime<Utc>,
        kind: ExecutionEventKind,
    ) -> ExecutionEvent {
        let sequence = self.next;
        self.next += 1;
        ExecutionEvent { execution_id, sequence, timestamp, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_increases_monotonically() {
        let mut seq = EventSequencer::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let a = seq.next_event(id, now, ExecutionEventKind::Started);
        let b = seq.next_event(id, now, ExecutionEventKind::Completed);
        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
    }
}
