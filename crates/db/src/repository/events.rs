//! Execution event repository functions backing `PgEventSink` (§F).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::ExecutionEventRow, DbError};

pub async fn insert_event(
    pool: &PgPool,
    execution_id: Uuid,
    sequence: i64,
    kind: &str,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
) -> Result<(), DbError> {
    let id = Uuid::new_v4();
    sqlx::query!(
        r#"
        INSERT INTO execution_events (id, execution_id, sequence, kind, payload, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (execution_id, sequence) DO NOTHING
        "#,
        id,
        execution_id,
        sequence,
        kind,
        payload,
        created_at,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Every event recorded for `execution_id`, ordered by sequence (§8.4
/// "event monotonicity").
pub async fn list_events(pool: &PgPool, execution_id: Uuid) -> Result<Vec<ExecutionEventRow>, DbError> {
    let rows = sqlx::query_as!(
        ExecutionEventRow,
        r#"
        SELECT id, execution_id, sequence, kind, payload, created_at
        FROM execution_events
        WHERE execution_id = $1
        ORDER BY sequence ASC
        "#,
        execution_id,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
