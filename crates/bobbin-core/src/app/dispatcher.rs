//! Worker dispatcher: spawn one worker for one task and wait, bounded, for it
//! to confirm start.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::{DispatchError, ExecutorId, TaskId};
use crate::ports::Launcher;

pub struct Dispatcher {
    launcher: Arc<dyn Launcher>,
}

impl Dispatcher {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self { launcher }
    }

    /// Start a worker for `task_id` and return its executor identity.
    ///
    /// A worker that fails or times out is aborted before this returns, so a
    /// failed dispatch never leaves a live worker behind.
    pub async fn dispatch(
        &self,
        task_id: TaskId,
        start_timeout: Duration,
    ) -> Result<ExecutorId, DispatchError> {
        let mut pending = self.launcher.spawn(task_id).await?;
        let confirmation = tokio::time::timeout(start_timeout, pending.started()).await;

        match confirmation {
            Ok(Ok(executor)) => {
                debug!(%task_id, %executor, "worker confirmed start");
                Ok(executor)
            }
            Ok(Err(reason)) => {
                pending.abort();
                Err(DispatchError::FailedToStart { task_id, reason })
            }
            Err(_elapsed) => {
                let timeout_ms = u64::try_from(start_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(%task_id, timeout_ms, "worker start timed out");
                pending.abort();
                Err(DispatchError::StartTimeout {
                    task_id,
                    timeout_ms,
                })
            }
        }
    }
}
