//! Background queue worker (`rusty-automation-tool worker`).
//!
//! Polls `job_queue` for pending jobs (§6.2's job broker supplement),
//! loads and builds the referenced workflow, and drives it through the
//! `Scheduler` using Postgres-backed collaborators. A job that pauses is
//! left `processing` — its execution row stays `running` and a later
//! `resume` (CLI or API) picks the snapshot back up; completion,
//! failure, and cancellation all settle the job.

use std::sync::Arc;
use std::time::Duration;

use db::repository::{executions as exec_repo, jobs as job_repo, workflows as wf_repo};
use db::{DbPool, PgCreditService, PgEventSink, PgSnapshotStore};
use engine::{BuiltWorkflow, CancellationToken, ExecutionOutcome, RawWorkflowDefinition, Scheduler};
use tracing::{error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub async fn run(pool: DbPool) -> anyhow::Result<()> {
    let registry = Arc::new(crate::registry::default_registry());
    let credit_service = Arc::new(PgCreditService::new(pool.clone()));
    let event_sink = Arc::new(PgEventSink::new(pool.clone()));
    let snapshot_store = Arc::new(PgSnapshotStore::new(pool.clone()));
    let scheduler = Scheduler::new(registry, credit_service, event_sink, snapshot_store);

    info!("worker polling job_queue every {POLL_INTERVAL:?}");
    loop {
        match job_repo::fetch_next_job(&pool).await {
            Ok(Some(job)) => {
                if let Err(err) = process_job(&pool, &scheduler, &job).await {
                    error!(job_id = %job.id, error = %err, "job failed");
                    if let Err(err) = job_repo::fail_job(&pool, job.id, job.max_attempts).await {
                        error!(job_id = %job.id, error = %err, "failed to record job failure");
                    }
                }
            }
            Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(err) => {
                error!(error = %err, "failed to poll job queue");
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }
    }
}

async fn process_job(pool: &DbPool, scheduler: &Scheduler, job: &db::models::JobRow) -> anyhow::Result<()> {
    let workflow_row = wf_repo::get_workflow(pool, job.workflow_id).await?;
    let raw: RawWorkflowDefinition = serde_json::from_value(workflow_row.definition)?;
    let built = engine::builder::build(raw).map_err(|e| anyhow::anyhow!(e))?;

    let inputs: std::collections::HashMap<String, serde_json::Value> = job
        .payload
        .as_object()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .collect();

    let cancel = CancellationToken::new();
    let watcher = spawn_cancel_watcher(pool.clone(), job.execution_id, cancel.clone());

    let outcome = if job.kind == "resume" {
        let snapshot_store = PgSnapshotStore::new(pool.clone());
        let snapshot = engine::SnapshotStore::load_latest(&snapshot_store, job.execution_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no snapshot found for execution {}", job.execution_id))?;
        scheduler.resume(&built, snapshot, inputs, cancel).await?
    } else {
        exec_repo::update_execution_status(pool, job.execution_id, "running", false).await?;
        scheduler.execute(&built, job.execution_id, inputs, cancel).await?
    };
    watcher.abort();

    settle(pool, job, &built, outcome).await
}

/// Polls `cancel_requested` for `execution_id` and flips `token` the
/// moment it's set, so a dispatch batch in flight sees it on its next
/// check (§5). The caller aborts this task once its own run settles.
fn spawn_cancel_watcher(pool: DbPool, execution_id: uuid::Uuid, token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;
            match exec_repo::is_cancel_requested(&pool, execution_id).await {
                Ok(true) => {
                    token.cancel();
                    break;
                }
                Ok(false) => {}
                Err(_) => break,
            }
        }
    })
}

async fn settle(
    pool: &DbPool,
    job: &db::models::JobRow,
    _workflow: &BuiltWorkflow,
    outcome: ExecutionOutcome,
) -> anyhow::Result<()> {
    match outcome {
        ExecutionOutcome::Completed { .. } => {
            exec_repo::update_execution_status(pool, job.execution_id, "succeeded", true).await?;
            job_repo::complete_job(pool, job.id).await?;
        }
        ExecutionOutcome::Failed { error, .. } => {
            warn!(execution_id = %job.execution_id, error = %error, "execution failed");
            exec_repo::update_execution_status(pool, job.execution_id, "failed", true).await?;
            job_repo::fail_job(pool, job.id, job.max_attempts).await?;
        }
        ExecutionOutcome::Cancelled { .. } => {
            exec_repo::update_execution_status(pool, job.execution_id, "failed", true).await?;
            job_repo::complete_job(pool, job.id).await?;
        }
        ExecutionOutcome::Paused { .. } => {
            // Execution stays `running`; the job is done from the queue's
            // perspective — a `resume` re-enters the scheduler directly,
            // it doesn't go back through job_queue.
            job_repo::complete_job(pool, job.id).await?;
        }
    }
    Ok(())
}
