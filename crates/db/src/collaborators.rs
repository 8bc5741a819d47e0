//! Postgres-backed implementations of the `engine` crate's external
//! collaborator traits (§D, §E). `engine` itself never depends on `sqlx`
//! — these adapters are the only place that bridges the two.

use async_trait::async_trait;
use engine::credits::CreditService;
use engine::events::{EventSink, ExecutionEvent};
use engine::snapshot::{Snapshot, SnapshotStore};
use uuid::Uuid;

use crate::repository::{credits, events, snapshots};
use crate::DbPool;

/// `engine::credits::CreditService` backed by the `credit_accounts` /
/// `credit_reservations` tables.
pub struct PgCreditService {
    pool: DbPool,
}

impl PgCreditService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditService for PgCreditService {
    async fn reserve(&self, execution_id: Uuid, amount: i64) -> anyhow::Result<bool> {
        let workflow_id = credits::workflow_id_for_execution(&self.pool, execution_id).await?;
        let mut tx = self.pool.begin().await?;
        let account = credits::lock_or_create_account(&mut tx, workflow_id).await?;

        if account.balance < amount {
            tx.rollback().await?;
            return Ok(false);
        }

        credits::set_balance(&mut tx, workflow_id, account.balance - amount).await?;
        credits::insert_reservation(&mut tx, execution_id, workflow_id, amount).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn available_balance(&self, execution_id: Uuid) -> anyhow::Result<i64> {
        let workflow_id = credits::workflow_id_for_execution(&self.pool, execution_id).await?;
        let mut tx = self.pool.begin().await?;
        let account = credits::lock_or_create_account(&mut tx, workflow_id).await?;
        tx.rollback().await?;
        Ok(account.balance)
    }

    async fn finalize(&self, execution_id: Uuid, reserved: i64, actual: i64) -> anyhow::Result<()> {
        let workflow_id = credits::workflow_id_for_execution(&self.pool, execution_id).await?;
        let mut tx = self.pool.begin().await?;
        let reserved_on_record = credits::take_reservation(&mut tx, execution_id).await?.unwrap_or(reserved);
        let account = credits::lock_or_create_account(&mut tx, workflow_id).await?;
        let refund = reserved_on_record - actual;
        credits::set_balance(&mut tx, workflow_id, account.balance + refund).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// `engine::snapshot::SnapshotStore` backed by the `execution_snapshots`
/// table (§6.4: keyed by `(execution_id, created_at)`).
pub struct PgSnapshotStore {
    pool: DbPool,
}

impl PgSnapshotStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> anyhow::Result<()> {
        let payload = serde_json::to_value(snapshot)?;
        snapshots::insert_snapshot(&self.pool, snapshot.execution_id, snapshot.created_at, payload).await?;
        Ok(())
    }

    async fn load_latest(&self, execution_id: Uuid) -> anyhow::Result<Option<Snapshot>> {
        let row = snapshots::latest_snapshot(&self.pool, execution_id).await?;
        Ok(match row {
            Some(row) => Some(serde_json::from_value(row.snapshot)?),
            None => None,
        })
    }
}

/// `engine::events::EventSink` backed by the `execution_events` table
/// (§F). Publish is fire-and-forget per the trait's contract: a failed
/// insert is logged and swallowed rather than propagated, since losing
/// an event must never fail the node or the execution it describes.
pub struct PgEventSink {
    pool: DbPool,
}

impl PgEventSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    async fn publish(&self, event: ExecutionEvent) {
        let payload = match serde_json::to_value(&event.kind) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize execution event, dropping");
                return;
            }
        };
        let kind = payload
            .get("type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        if let Err(err) = events::insert_event(
            &self.pool,
            event.execution_id,
            event.sequence as i64,
            &kind,
            payload,
            event.timestamp,
        )
        .await
        {
            tracing::warn!(error = %err, execution_id = %event.execution_id, "failed to persist execution event");
        }
    }
}
