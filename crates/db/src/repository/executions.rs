//! Execution and node-execution repository functions.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{WorkflowExecutionRow, NodeExecutionRow},
};

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// Create a new workflow execution record in `pending` status.
pub async fn create_execution(
    pool: &PgPool,
    workflow_id: Uuid,
) -> Result<WorkflowExecutionRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as!(
        WorkflowExecutionRow,
        r#"
        INSERT INTO workflow_executions (id, workflow_id, status, started_at)
        VALUES ($1, $2, 'pending', $3)
        RETURNING id, workflow_id, status, started_at, finished_at
        "#,
        id,
        workflow_id,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single workflow execution by its primary key.
pub async fn get_execution(pool: &PgPool, execution_id: Uuid) -> Result<WorkflowExecutionRow, DbError> {
    let row = sqlx::query_as!(
        WorkflowExecutionRow,
        r#"SELECT id, workflow_id, status, started_at, finished_at FROM workflow_executions WHERE id = $1"#,
        execution_id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Update the `status` (and optionally `finished_at`) of a workflow execution.
pub async fn update_execution_status(
    pool: &PgPool,
    execution_id: Uuid,
    status: &str,
    finished: bool,
) -> Result<(), DbError> {
    if finished {
        sqlx::query!(
            r#"
            UPDATE workflow_executions
            SET status = $1, finished_at = $2
            WHERE id = $3
            "#,
            status,
            Utc::now(),
            execution_id,
        )
        .execute(pool)
        .await?;
    } else {
        sqlx::query!(
            r#"UPDATE workflow_executions SET status = $1 WHERE id = $2"#,
            status,
            execution_id,
        )
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Flag an execution for cooperative cancellation (§5). A worker driving
/// this execution polls [`is_cancel_requested`] between dispatch batches
/// and feeds the answer into the scheduler's `CancellationToken`.
pub async fn request_cancel(pool: &PgPool, execution_id: Uuid) -> Result<(), DbError> {
    sqlx::query!(
        r#"UPDATE workflow_executions SET cancel_requested = TRUE WHERE id = $1"#,
        execution_id,
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn is_cancel_requested(pool: &PgPool, execution_id: Uuid) -> Result<bool, DbError> {
    let row = sqlx::query!(
        r#"SELECT cancel_requested FROM workflow_executions WHERE id = $1"#,
        execution_id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;
    Ok(row.cancel_requested)
}

// ---------------------------------------------------------------------------
// node_executions
// ---------------------------------------------------------------------------

/// Insert a completed node execution record.
pub async fn insert_node_execution(
    pool: &PgPool,
    execution_id: Uuid,
    node_id: &str,
    input: serde_json::Value,
    output: Option<serde_json::Value>,
    status: &str,
    started_at: chrono::DateTime<Utc>,
) -> Result<NodeExecutionRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as!(
        NodeExecutionRow,
        r#"
        INSERT INTO node_executions
            (id, execution_id, node_id, input, output, status, started_at, finished_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, execution_id, node_id, input, output, status, started_at, finished_at
        "#,
        id,
        execution_id,
        node_id,
        input,
        output,
        status,
        started_at,
        now,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}
