//! Row types as they come off the wire, and their conversion into domain types.

use bobbin_core::domain::{
    ClaimedTask, ExecutorId, LoadedTask, StoreError, TaskId, TaskRecord, TaskStatus,
};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct TaskRow {
    pub id: i64,
    pub command: Option<String>,
    pub task_type: Option<String>,
    pub status: String,
    pub priority: i32,
    pub scheduled_time: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub executor_id: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct ClaimRow {
    pub id: i64,
    pub command: Option<String>,
    pub task_type: Option<String>,
    pub priority: i32,
    pub scheduled_time: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct LoadRow {
    pub id: i64,
    pub command: Option<String>,
    pub task_type: Option<String>,
    pub status: String,
}

fn parse_status(id: i64, raw: &str) -> Result<TaskStatus, StoreError> {
    raw.parse().map_err(|e| StoreError::MalformedRow {
        id: TaskId::new(id),
        reason: format!("{e}"),
    })
}

impl TryFrom<TaskRow> for TaskRecord {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(TaskRecord {
            id: TaskId::new(row.id),
            status: parse_status(row.id, &row.status)?,
            command: row.command,
            task_type: row.task_type,
            priority: row.priority,
            scheduled_time: row.scheduled_time,
            started_at: row.started_at,
            completed_at: row.completed_at,
            executor_id: row.executor_id.map(ExecutorId::new),
        })
    }
}

impl TryFrom<LoadRow> for LoadedTask {
    type Error = StoreError;

    fn try_from(row: LoadRow) -> Result<Self, Self::Error> {
        Ok(LoadedTask {
            id: TaskId::new(row.id),
            status: parse_status(row.id, &row.status)?,
            command: row.command,
            task_type: row.task_type,
        })
    }
}

impl From<ClaimRow> for ClaimedTask {
    fn from(row: ClaimRow) -> Self {
        ClaimedTask {
            id: TaskId::new(row.id),
            command: row.command,
            task_type: row.task_type,
            priority: row.priority,
            scheduled_time: row.scheduled_time,
        }
    }
}
