use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use uuid::Uuid;
use super::AppState;
use db::repository::{executions as exec_repo, jobs as job_repo};

#[derive(serde::Deserialize)]
pub struct ExecuteWorkflowDto {
    pub input: Value,
}

#[derive(serde::Deserialize)]
pub struct ResumeExecutionDto {
    pub input: Value,
}

pub async fn execute(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<ExecuteWorkflowDto>,
) -> Result<(StatusCode, Json<db::models::JobRow>), StatusCode> {
    // 1. Create a `pending` execution record
    let exec = match exec_repo::create_execution(&state.pool, id).await {
        Ok(e) => e,
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    // 2. Queue the job for background worker
    // The payload represents initial input.
    let job = match job_repo::enqueue_job(&state.pool, exec.id, id, payload.input).await {
        Ok(j) => j,
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// Resume a paused execution. `id` here is the execution id, not the
/// workflow id — a resume doesn't need a fresh execution record, just a
/// `resume`-kind job the worker picks up against the same one.
pub async fn resume(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<ResumeExecutionDto>,
) -> Result<(StatusCode, Json<db::models::JobRow>), StatusCode> {
    let exec = match exec_repo::get_execution(&state.pool, id).await {
        Ok(e) => e,
        Err(db::DbError::NotFound) => return Err(StatusCode::NOT_FOUND),
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    let job = match job_repo::enqueue_resume_job(&state.pool, exec.id, exec.workflow_id, payload.input).await {
        Ok(j) => j,
        Err(_) => return Err(StatusCode::INTERNAL_SERVER_ERROR),
    };

    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// Request cooperative cancellation of a running execution (§5). The
/// worker driving it polls `cancel_requested` between dispatch batches —
/// this just flips the flag, it doesn't wait for the execution to settle.
pub async fn cancel(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, StatusCode> {
    match exec_repo::request_cancel(&state.pool, id).await {
        Ok(()) => Ok(StatusCode::ACCEPTED),
        Err(db::DbError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
