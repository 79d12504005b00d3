//! Launcher port - the execution substrate that hosts workers.
//!
//! `spawn` asks the substrate to start an isolated worker bound to one task
//! id; the returned `PendingStart` resolves once the worker confirms it is
//! alive. The concrete substrate (child process, tokio task) is an
//! implementation choice; faults must not cross the boundary either way.

use async_trait::async_trait;

use crate::domain::{ExecutorId, LaunchError, TaskId};

/// A worker that has been spawned but has not confirmed startup yet.
///
/// The dispatcher owns this until `started` resolves (then the worker runs
/// on unsupervised) or until the bounded wait gives up (then it must call
/// `abort`).
#[async_trait]
pub trait PendingStart: Send {
    /// Resolve to the worker's executor identity, or a reason it failed.
    async fn started(&mut self) -> Result<ExecutorId, String>;

    /// Tear down a worker that never confirmed.
    fn abort(self: Box<Self>);
}

#[async_trait]
pub trait Launcher: Send + Sync {
    async fn spawn(&self, task_id: TaskId) -> Result<Box<dyn PendingStart>, LaunchError>;
}
