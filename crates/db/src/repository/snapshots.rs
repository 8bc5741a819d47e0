//! Execution snapshot repository functions backing `PgSnapshotStore` (§E).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::ExecutionSnapshotRow, DbError};

pub async fn insert_snapshot(
    pool: &PgPool,
    execution_id: Uuid,
    created_at: DateTime<Utc>,
    snapshot: serde_json::Value,
) -> Result<(), DbError> {
    let id = Uuid::new_v4();
    sqlx::query!(
        r#"
        INSERT INTO execution_snapshots (id, execution_id, created_at, snapshot)
        VALUES ($1, $2, $3, $4)
        "#,
        id,
        execution_id,
        created_at,
        snapshot,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recently created snapshot for `execution_id`, if any.
pub async fn latest_snapshot(pool: &PgPool, execution_id: Uuid) -> Result<Option<ExecutionSnapshotRow>, DbError> {
    let row = sqlx::query_as!(
        ExecutionSnapshotRow,
        r#"
        SELECT id, execution_id, created_at, snapshot
        FROM execution_snapshots
        WHERE execution_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#,
        execution_id,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
