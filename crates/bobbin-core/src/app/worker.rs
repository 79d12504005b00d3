//! Worker execution: everything that happens inside one isolated execution
//! context for one task id.
//!
//! The flow:
//! 1. load the row (absent or unreadable is a setup failure, exit 1)
//! 2. rows already terminal are skipped (exit 0)
//! 3. a still-pending row is moved to `running` here (the scheduler may not
//!    have got there yet; both writers are conditional)
//! 4. run the payload in its mode, with panics caught
//! 5. write the terminal status and `completed_at`

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    ExecutionError, ExecutionOutcome, ExecutorId, LoadedTask, StoreError, TaskId, TaskStatus,
    TaskType, TerminalStatus, WorkerExit,
};
use crate::ports::{Clock, CommandRunner, TaskStore};

pub struct Worker {
    store: Arc<dyn TaskStore>,
    runner: Arc<dyn CommandRunner>,
    clock: Arc<dyn Clock>,
}

/// What loading and claiming the row for execution produced.
enum Begin {
    Execute(LoadedTask),
    Skip(TaskStatus),
    Missing,
}

impl Worker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        runner: Arc<dyn CommandRunner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            runner,
            clock,
        }
    }

    #[instrument(skip_all, fields(task_id = %task_id, executor = %executor))]
    pub async fn run(&self, task_id: TaskId, executor: ExecutorId) -> WorkerExit {
        let task = match self.begin(task_id, executor).await {
            Ok(Begin::Execute(task)) => task,
            Ok(Begin::Skip(status)) => {
                info!(%status, "task already finished, nothing to do");
                return WorkerExit::Skipped;
            }
            Ok(Begin::Missing) => {
                error!("task row not found");
                return WorkerExit::SetupFailed;
            }
            Err(e) => {
                error!(error = %e, "could not load task");
                return WorkerExit::SetupFailed;
            }
        };

        let (Some(command), Some(task_type)) = (task.command.as_deref(), task.task_type.as_deref())
        else {
            error!(
                has_command = task.command.is_some(),
                has_task_type = task.task_type.is_some(),
                "task row is missing its command or type"
            );
            return match self.finish(task_id, TerminalStatus::Failed).await {
                WorkerExit::StoreFailed => WorkerExit::StoreFailed,
                _ => WorkerExit::SetupFailed,
            };
        };

        let outcome = self.execute(command, task_type).await;
        match &outcome {
            ExecutionOutcome::Completed => info!("task completed"),
            ExecutionOutcome::Failed { reason } => warn!(%reason, "task failed"),
        }
        self.finish(task_id, outcome.terminal_status()).await
    }

    /// Load the row and make sure it is `running` before executing.
    async fn begin(&self, task_id: TaskId, executor: ExecutorId) -> Result<Begin, StoreError> {
        // the scheduler can flip pending -> running between our load and our
        // update; one reload settles it
        for _ in 0..2 {
            let Some(task) = self.store.load_task(task_id).await? else {
                return Ok(Begin::Missing);
            };
            match task.status {
                TaskStatus::Running => return Ok(Begin::Execute(task)),
                TaskStatus::Completed | TaskStatus::Failed => return Ok(Begin::Skip(task.status)),
                TaskStatus::Pending => {
                    let now = self.clock.now();
                    if self.store.mark_running(task_id, executor, now).await? {
                        debug!("worker moved task to running");
                        return Ok(Begin::Execute(LoadedTask {
                            status: TaskStatus::Running,
                            ..task
                        }));
                    }
                }
            }
        }
        Err(StoreError::Query(format!(
            "{task_id} stayed pending but could not be marked running"
        )))
    }

    async fn execute(&self, command: &str, task_type: &str) -> ExecutionOutcome {
        let mode = match task_type.parse::<TaskType>() {
            Ok(mode) => mode,
            Err(e) => return ExecutionOutcome::failure(e.to_string()),
        };

        let work = async {
            match mode {
                TaskType::Command => self.store.execute_transactional(command).await,
                TaskType::ExternalProcess => self.runner.run(command).await,
            }
        };

        let result = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(ExecutionError::Panicked(panic_message(panic.as_ref()))),
        };

        match result {
            Ok(()) => ExecutionOutcome::Completed,
            Err(e) => ExecutionOutcome::failure(e.to_string()),
        }
    }

    async fn finish(&self, task_id: TaskId, status: TerminalStatus) -> WorkerExit {
        let now = self.clock.now();
        match self.store.mark_terminal(task_id, status, now).await {
            Ok(true) => match status {
                TerminalStatus::Completed => WorkerExit::Completed,
                TerminalStatus::Failed => WorkerExit::Failed,
            },
            Ok(false) => {
                warn!(%status, "task left the running state before it could be finalized");
                WorkerExit::Skipped
            }
            Err(e) => {
                error!(error = %e, %status, "could not record terminal status");
                WorkerExit::StoreFailed
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
