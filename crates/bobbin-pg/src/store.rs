//! PostgreSQL task store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` plus a lease (`claimed_by`,
//! `claimed_until`) written in the same statement, so a claim stays
//! exclusive after its transaction commits and until the row is marked
//! running, released, or the lease lapses.

use std::time::Duration;

use async_trait::async_trait;
use bobbin_core::domain::{
    ClaimedTask, ExecutionError, ExecutorId, InstanceId, LoadedTask, NewTask, StoreError,
    TaskId, TaskRecord, TaskStatus, TerminalStatus,
};
use bobbin_core::observability::StatusCounts;
use bobbin_core::ports::{ClaimRequest, TaskStore};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info, warn};

use crate::rows::{ClaimRow, LoadRow, TaskRow};

const CLAIM_SQL: &str = "
    WITH due AS (
        SELECT id FROM bobbin.tasks
        WHERE status = 'pending'
          AND scheduled_time <= $1
          AND (claimed_until IS NULL OR claimed_until <= $1)
        ORDER BY priority DESC, scheduled_time ASC, id ASC
        LIMIT $2
        FOR UPDATE SKIP LOCKED
    )
    UPDATE bobbin.tasks AS t
    SET claimed_by = $3, claimed_until = $4
    FROM due
    WHERE t.id = due.id
    RETURNING t.id, t.command, t.task_type, t.priority, t.scheduled_time";

const TASK_COLUMNS: &str =
    "id, command, task_type, status, priority, scheduled_time, started_at, completed_at, executor_id";

#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(store_error)?;
        info!(max_connections, "PostgreSQL connected");
        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("migration failed: {e}")))?;
        info!("database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Connection-level failures are `Unavailable` (retry next cycle); anything
/// the server rejected is a `Query` error.
pub(crate) fn store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StoreError::Unavailable(e.to_string()),
        other => StoreError::Query(other.to_string()),
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn count_running(&self) -> Result<u64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM bobbin.tasks WHERE status = 'running'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(count.max(0) as u64)
    }

    async fn claim_pending(&self, request: &ClaimRequest) -> Result<Vec<ClaimedTask>, StoreError> {
        let limit = i64::try_from(request.limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, ClaimRow>(CLAIM_SQL)
            .bind(request.now)
            .bind(limit)
            .bind(request.owner.to_string())
            .bind(request.lease_until)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

        // UPDATE ... RETURNING does not keep the CTE's order
        let mut claimed: Vec<ClaimedTask> = rows.into_iter().map(ClaimedTask::from).collect();
        claimed.sort_by(ClaimedTask::claim_order);
        debug!(owner = %request.owner, claimed = claimed.len(), "claimed rows");
        Ok(claimed)
    }

    async fn release_claim(&self, id: TaskId, owner: InstanceId) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE bobbin.tasks
             SET claimed_by = NULL, claimed_until = NULL
             WHERE id = $1 AND claimed_by = $2",
        )
        .bind(id.value())
        .bind(owner.to_string())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn mark_running(
        &self,
        id: TaskId,
        executor: ExecutorId,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE bobbin.tasks
             SET status = 'running',
                 started_at = COALESCE(started_at, $2),
                 executor_id = COALESCE(executor_id, $3),
                 claimed_by = NULL,
                 claimed_until = NULL
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id.value())
        .bind(started_at)
        .bind(executor.value())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<LoadedTask>, StoreError> {
        let row = sqlx::query_as::<_, LoadRow>(
            "SELECT id, command, task_type, status FROM bobbin.tasks WHERE id = $1",
        )
        .bind(id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        row.map(LoadedTask::try_from).transpose()
    }

    async fn mark_terminal(
        &self,
        id: TaskId,
        status: TerminalStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE bobbin.tasks
             SET status = $2, completed_at = COALESCE(completed_at, $3)
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id.value())
        .bind(status.as_str())
        .bind(completed_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn execute_transactional(&self, command: &str) -> Result<(), ExecutionError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        // on error `tx` is dropped without commit, which rolls it back
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(command))
            .await
            .map_err(|e| ExecutionError::RolledBack(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| ExecutionError::RolledBack(format!("commit failed: {e}")))
    }

    async fn insert_task(&self, task: &NewTask) -> Result<TaskId, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO bobbin.tasks (command, task_type, priority, scheduled_time)
             VALUES ($1, $2, $3, COALESCE($4, now()))
             RETURNING id",
        )
        .bind(&task.command)
        .bind(task.task_type.as_str())
        .bind(task.priority)
        .bind(task.scheduled_time)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(TaskId::new(id))
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM bobbin.tasks WHERE id = $1"
        ))
        .bind(id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        row.map(TaskRecord::try_from).transpose()
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM bobbin.tasks GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            match status.parse::<TaskStatus>() {
                Ok(status) => counts.add(status, n.max(0) as u64),
                Err(e) => warn!(error = %e, rows = n, "ignoring rows with unknown status"),
            }
        }
        Ok(counts)
    }
}
