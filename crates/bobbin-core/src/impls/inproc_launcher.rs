//! In-process launcher: each worker is its own tokio task.
//!
//! A panic that escapes the worker ends that task only; it is logged here
//! and never reaches the scheduler. Used by tests and single-binary setups.
//!
//! Workers outlive the dispatch that started them but not the runtime, so the
//! owner calls [`InProcessLauncher::drain`] before shutting the runtime down.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::app::Worker;
use crate::domain::{ExecutorId, LaunchError, TaskId, WorkerExit};
use crate::ports::{Launcher, PendingStart};

/// Per-process sequence shared by every launcher, so two schedulers in one
/// process never hand out the same executor id.
static NEXT_EXECUTOR: AtomicI64 = AtomicI64::new(1);

/// In-process executor ids carry the process id in the high 32 bits. They
/// cannot collide with another process's ids, nor with the plain pids used by
/// child-process workers.
fn next_executor_id() -> ExecutorId {
    let seq = NEXT_EXECUTOR.fetch_add(1, Ordering::Relaxed) & 0xFFFF_FFFF;
    ExecutorId::new((i64::from(std::process::id()) << 32) | seq)
}

pub struct InProcessLauncher {
    worker: Arc<Worker>,
    tracker: TaskTracker,
    exits: Option<mpsc::UnboundedSender<(TaskId, WorkerExit)>>,
}

impl InProcessLauncher {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self {
            worker,
            tracker: TaskTracker::new(),
            exits: None,
        }
    }

    /// Tracked tasks (workers and their supervisors) not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every worker started so far to finish. Launching after a
    /// drain is still allowed; those workers are waited on by the next drain.
    pub async fn drain(&self) {
        let remaining = self.tracker.len();
        if remaining > 0 {
            info!(remaining, "waiting for in-process workers to finish");
        }
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Report every finished worker on `tx`.
    pub fn with_exit_reporting(mut self, tx: mpsc::UnboundedSender<(TaskId, WorkerExit)>) -> Self {
        self.exits = Some(tx);
        self
    }
}

struct InProcessStart {
    confirmation: oneshot::Receiver<ExecutorId>,
    abort: AbortHandle,
}

#[async_trait]
impl PendingStart for InProcessStart {
    async fn started(&mut self) -> Result<ExecutorId, String> {
        (&mut self.confirmation)
            .await
            .map_err(|_| "worker ended before confirming start".to_string())
    }

    fn abort(self: Box<Self>) {
        self.abort.abort();
    }
}

#[async_trait]
impl Launcher for InProcessLauncher {
    async fn spawn(&self, task_id: TaskId) -> Result<Box<dyn PendingStart>, LaunchError> {
        let executor = next_executor_id();
        let (confirm_tx, confirm_rx) = oneshot::channel();
        let worker = Arc::clone(&self.worker);

        let handle = self.tracker.spawn(async move {
            // the dispatcher may already have given up; that is its call
            let _ = confirm_tx.send(executor);
            worker.run(task_id, executor).await
        });
        let abort = handle.abort_handle();

        let exits = self.exits.clone();
        self.tracker.spawn(async move {
            let exit = match handle.await {
                Ok(exit) => {
                    debug!(%task_id, %executor, ?exit, "worker finished");
                    exit
                }
                Err(e) if e.is_panic() => {
                    error!(%task_id, %executor, "worker panicked outside execution");
                    WorkerExit::StoreFailed
                }
                Err(_) => {
                    debug!(%task_id, %executor, "worker aborted");
                    return;
                }
            };
            if let Some(tx) = exits {
                let _ = tx.send((task_id, exit));
            }
        });

        Ok(Box::new(InProcessStart {
            confirmation: confirm_rx,
            abort,
        }))
    }
}
