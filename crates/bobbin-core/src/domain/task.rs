//! Task rows and the views of them each component works with.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ExecutionError;
use super::ids::{ExecutorId, TaskId};
use super::state::TaskStatus;

/// Execution mode of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Payload runs inside one store transaction; failure rolls everything back.
    Command,

    /// Payload runs as an OS process outside any transaction; nothing is rolled back.
    ExternalProcess,
}

impl TaskType {
    /// Store spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Command => "command",
            TaskType::ExternalProcess => "external_process",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = ExecutionError;

    /// Accepts the snake_case store spelling as well as the CamelCase and
    /// kebab-case forms found in hand-written rows.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "command" | "Command" => Ok(TaskType::Command),
            "external_process" | "ExternalProcess" | "external-process" => {
                Ok(TaskType::ExternalProcess)
            }
            other => Err(ExecutionError::UnknownTaskType(other.to_string())),
        }
    }
}

/// A full task row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub command: Option<String>,
    /// Kept as the raw column text: an unrecognised value is a task-level
    /// failure at execution time, not a read error.
    pub task_type: Option<String>,
    pub status: TaskStatus,
    pub priority: i32,
    pub scheduled_time: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub executor_id: Option<ExecutorId>,
}

/// Insert request for a new pending task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub command: String,
    pub task_type: TaskType,
    pub priority: i32,
    /// `None` means "due now" (the store's clock decides).
    pub scheduled_time: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            task_type: TaskType::Command,
            priority: 0,
            scheduled_time: None,
        }
    }

    pub fn external_process(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            task_type: TaskType::ExternalProcess,
            priority: 0,
            scheduled_time: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_time = Some(at);
        self
    }
}

/// What a claim hands back to the scheduler loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimedTask {
    pub id: TaskId,
    pub command: Option<String>,
    pub task_type: Option<String>,
    pub priority: i32,
    pub scheduled_time: DateTime<Utc>,
}

impl ClaimedTask {
    /// Claim order: `priority DESC, scheduled_time ASC, id ASC`.
    pub fn claim_order(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.scheduled_time.cmp(&other.scheduled_time))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// What a worker loads for its task id.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedTask {
    pub id: TaskId,
    pub command: Option<String>,
    pub task_type: Option<String>,
    pub status: TaskStatus,
}
