//! Outcome model: how one execution ended, and what that means for the
//! worker's exit code.

use serde::{Deserialize, Serialize};

use super::state::TerminalStatus;

/// Result of running a task payload, already stripped of error types so it
/// can be logged and persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionOutcome {
    Completed,
    Failed { reason: String },
}

impl ExecutionOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn terminal_status(&self) -> TerminalStatus {
        match self {
            ExecutionOutcome::Completed => TerminalStatus::Completed,
            ExecutionOutcome::Failed { .. } => TerminalStatus::Failed,
        }
    }
}

/// How a worker execution context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Terminal status `completed` written.
    Completed,
    /// Terminal status `failed` written.
    Failed,
    /// Nothing to do: the row had already left the pending/running states.
    Skipped,
    /// Task row missing or unusable, or the store could not be reached.
    SetupFailed,
    /// Execution finished but the terminal status could not be written.
    StoreFailed,
}

impl WorkerExit {
    /// Process exit code: 0 for normal completion (including skips), 1 for
    /// fatal setup failures.
    pub fn exit_code(self) -> i32 {
        match self {
            WorkerExit::Completed | WorkerExit::Failed | WorkerExit::Skipped => 0,
            WorkerExit::SetupFailed | WorkerExit::StoreFailed => 1,
        }
    }
}
