//! Pause/resume snapshotting (spec §6.3-6.4, component C6).
//!
//! When a node's [`crate::executor::Signal::Pause`] is raised, the
//! scheduler freezes `ExecutionContext` and `QueueState` into a
//! [`Snapshot`] and hands it to a [`SnapshotStore`]. `Resume` loads the
//! most recent snapshot for an execution and re-enters the scheduling
//! loop from there — nodes the snapshot already marks terminal are never
//! re-dispatched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::credits::CreditLedger;
use crate::executor::PauseContext;
use queue::QueueState;

/// The full freeze-dried state of a paused execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub execution_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub context: ExecutionContext,
    pub queue_state: QueueState,
    pub ledger: CreditLedger,
    pub pause_context: PauseContext,
}

/// External collaborator persisting snapshots (§6.4). Keyed by
/// `(execution_id, created_at)` so a single execution can accumulate a
/// history of pauses; `load_latest` is what `Resume` actually uses.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()>;

    async fn load_latest(&self, execution_id: Uuid) -> anyhow::Result<Option<Snapshot>>;
}

/// An in-memory `SnapshotStore`, useful for engine tests and for callers
/// who only need pause/resume within a single process lifetime.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: tokio::sync::Mutex<std::collections::HashMap<Uuid, Vec<Snapshot>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let mut guard = self.snapshots.lock().await;
        guard.entry(snapshot.execution_id).or_default().push(snapshot.clone());
        Ok(())
    }

    async fn load_latest(&self, execution_id: Uuid) -> anyhow::Result<Option<Snapshot>> {
        let guard = self.snapshots.lock().await;
        Ok(guard
            .get(&execution_id)
            .and_then(|list| list.iter().max_by_key(|s| s.created_at).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue::Graph;
    use std::collections::HashMap;

    fn empty_graph() -> Graph {
        Graph {
            nodes: HashMap::new(),
            edges: HashMap::new(),
            trigger_node_id: "trigger".into(),
        }
    }

    #[tokio::test]
    async fn in_memory_store_returns_latest_snapshot() {
        let store = InMemorySnapshotStore::new();
        let execution_id = Uuid::new_v4();
        let graph = empty_graph();

        let pause_context = PauseContext {
            reason: "first".into(),
            node_id: "wait".into(),
            paused_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
            resume_trigger: crate::executor::ResumeTrigger::Signal,
            timeout_ms: None,
            preserved_data: serde_json::Value::Null,
        };
        let first = Snapshot {
            execution_id,
            created_at: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
            context: ExecutionContext::default(),
            queue_state: QueueState::initialize(&graph),
            ledger: crate::credits::CreditLedger::new(100),
            pause_context,
        };
        let second = Snapshot {
            created_at: DateTime::parse_from_rfc3339("2026-01-02T00:00:00Z").unwrap().with_timezone(&Utc),
            pause_context: PauseContext { reason: "second".into(), ..first.pause_context.clone() },
            ..first.clone()
        };

        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let latest = store.load_latest(execution_id).await.unwrap().unwrap();
        assert_eq!(latest.pause_context.reason, "second");
    }

    #[tokio::test]
    async fn load_latest_is_none_for_unknown_execution() {
        let store = InMemorySnapshotStore::new();
        assert!(store.load_latest(Uuid::new_v4()).await.unwrap().is_none());
    }
}
