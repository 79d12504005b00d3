//! Errors - error types by layer.
//!
//! - `StoreError`: infrastructure (store unreachable, query failed). The
//!   scheduler treats these as transient and retries on the next interval.
//! - `LaunchError` / `DispatchError`: the execution substrate could not start
//!   or confirm a worker. The claimed task stays pending.
//! - `ExecutionError`: the payload itself failed. Always converted into a
//!   `failed` terminal status at the worker boundary.

use thiserror::Error;

use super::ids::TaskId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task store unavailable: {0}")]
    Unavailable(String),

    #[error("task store query failed: {0}")]
    Query(String),

    #[error("malformed task row {id}: {reason}")]
    MalformedRow { id: TaskId, reason: String },
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn worker for {task_id}: {reason}")]
    Spawn { task_id: TaskId, reason: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("worker for {task_id} failed to start: {reason}")]
    FailedToStart { task_id: TaskId, reason: String },

    #[error("worker for {task_id} did not confirm start within {timeout_ms}ms")]
    StartTimeout { task_id: TaskId, timeout_ms: u64 },
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("unknown task type {0:?}")]
    UnknownTaskType(String),

    /// The transactional command failed and was rolled back.
    #[error("command rolled back: {0}")]
    RolledBack(String),

    #[error("failed to start external process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("external process exited with {}: {stderr}", describe_exit(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("task store error during execution: {0}")]
    Store(#[from] StoreError),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}
