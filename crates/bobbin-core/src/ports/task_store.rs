//! TaskStore port - the transactional store that owns task rows.
//!
//! The store is the source of truth and the only shared mutable resource.
//! The scheduler loop and the workers are its only writers, and each writes
//! disjoint fields at disjoint lifecycle points:
//!
//! | step            | writer     | fields                                     |
//! |-----------------|------------|--------------------------------------------|
//! | claim           | scheduler  | `claimed_by`, `claimed_until`              |
//! | mark running    | scheduler* | `status`, `started_at`, `executor_id`      |
//! | mark terminal   | worker     | `status`, `completed_at`                   |
//!
//! (*) the worker may win the race to `running`; both writers are
//! conditional on `status = pending`, so exactly one succeeds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    ClaimedTask, ExecutionError, ExecutorId, InstanceId, LoadedTask, NewTask, StoreError,
    TaskId, TaskRecord, TerminalStatus,
};
use crate::observability::StatusCounts;

/// Parameters for one claim.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRequest {
    /// Scheduler instance taking the claim.
    pub owner: InstanceId,
    /// Maximum number of rows to claim (the available slots).
    pub limit: usize,
    /// Rows with `scheduled_time <= now` are due.
    pub now: DateTime<Utc>,
    /// Claims taken now expire at this instant unless resolved first.
    pub lease_until: DateTime<Utc>,
}

/// Design:
/// - Every method is one atomic unit (one transaction or one conditional
///   single-row update).
/// - `claim_pending` uses skip-locked semantics: rows locked or claimed by a
///   concurrent claimant are skipped, never waited on.
/// - Conditional updates return `Ok(false)` when the row was not in the
///   expected state; that is not an error.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Number of rows with `status = running`.
    async fn count_running(&self) -> Result<u64, StoreError>;

    /// Claim up to `limit` pending, due, unclaimed rows, ordered by
    /// `priority DESC, scheduled_time ASC, id ASC`. Does not change `status`.
    async fn claim_pending(&self, request: &ClaimRequest) -> Result<Vec<ClaimedTask>, StoreError>;

    /// Drop `owner`'s claim on a row that could not be dispatched.
    async fn release_claim(&self, id: TaskId, owner: InstanceId) -> Result<(), StoreError>;

    /// `pending -> running`, recording `started_at` and `executor_id` once.
    async fn mark_running(
        &self,
        id: TaskId,
        executor: ExecutorId,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Load the columns a worker needs. `None` when the row does not exist.
    async fn load_task(&self, id: TaskId) -> Result<Option<LoadedTask>, StoreError>;

    /// `running -> completed | failed`, recording `completed_at` once.
    async fn mark_terminal(
        &self,
        id: TaskId,
        status: TerminalStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Run a `Command` payload inside one transaction. Any failure rolls the
    /// whole unit back.
    async fn execute_transactional(&self, command: &str) -> Result<(), ExecutionError>;

    /// Insert a new pending task.
    async fn insert_task(&self, task: &NewTask) -> Result<TaskId, StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError>;

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError>;
}
