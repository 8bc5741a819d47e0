//! Credit ledger repository functions backing `PgCreditService` (§D).

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::CreditAccountRow, DbError};

/// Starting balance given to a workflow's credit account the first time
/// it's touched. There is no real top-up flow in this MVP ledger.
const DEFAULT_STARTING_BALANCE: i64 = 1_000_000;

/// Fetch (creating with the default balance if absent) the account row
/// for `workflow_id`, locking it for the duration of the caller's
/// transaction.
pub async fn lock_or_create_account(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    workflow_id: Uuid,
) -> Result<CreditAccountRow, DbError> {
    sqlx::query!(
        r#"
        INSERT INTO credit_accounts (workflow_id, balance)
        VALUES ($1, $2)
        ON CONFLICT (workflow_id) DO NOTHING
        "#,
        workflow_id,
        DEFAULT_STARTING_BALANCE,
    )
    .execute(&mut **tx)
    .await?;

    let row = sqlx::query_as!(
        CreditAccountRow,
        r#"SELECT workflow_id, balance FROM credit_accounts WHERE workflow_id = $1 FOR UPDATE"#,
        workflow_id,
    )
    .fetch_one(&mut **tx)
    .await?;

    Ok(row)
}

/// Look up the workflow that owns `execution_id`.
pub async fn workflow_id_for_execution(pool: &PgPool, execution_id: Uuid) -> Result<Uuid, DbError> {
    let row = sqlx::query!(
        r#"SELECT workflow_id FROM workflow_executions WHERE id = $1"#,
        execution_id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row.workflow_id)
}

pub async fn set_balance(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    workflow_id: Uuid,
    balance: i64,
) -> Result<(), DbError> {
    sqlx::query!(
        r#"UPDATE credit_accounts SET balance = $1 WHERE workflow_id = $2"#,
        balance,
        workflow_id,
    )
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn insert_reservation(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    execution_id: Uuid,
    workflow_id: Uuid,
    reserved: i64,
) -> Result<(), DbError> {
    sqlx::query!(
        r#"
        INSERT INTO credit_reservations (execution_id, workflow_id, reserved, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
        execution_id,
        workflow_id,
        reserved,
        Utc::now(),
    )
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn take_reservation(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    execution_id: Uuid,
) -> Result<Option<i64>, DbError> {
    let row = sqlx::query!(
        r#"DELETE FROM credit_reservations WHERE execution_id = $1 RETURNING reserved"#,
        execution_id,
    )
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.map(|r| r.reserved))
}
