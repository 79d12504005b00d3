//! Claim protocol: atomically take up to N due, pending, unclaimed tasks.

use std::sync::Arc;

use tracing::debug;

use crate::domain::{ClaimedTask, InstanceId, StoreError};
use crate::ports::{ClaimRequest, Clock, TaskStore};

pub struct ClaimProtocol {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    owner: InstanceId,
}

impl ClaimProtocol {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, owner: InstanceId) -> Self {
        Self {
            store,
            clock,
            owner,
        }
    }

    pub fn owner(&self) -> InstanceId {
        self.owner
    }

    /// Claim up to `limit` tasks, best first. The claim holds for `lease`.
    ///
    /// `limit == 0` never touches the store. Store errors propagate; the caller
    /// treats them as transient.
    pub async fn claim(
        &self,
        limit: usize,
        lease: chrono::Duration,
    ) -> Result<Vec<ClaimedTask>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let request = ClaimRequest {
            owner: self.owner,
            limit,
            now,
            lease_until: now + lease,
        };

        let mut claimed = self.store.claim_pending(&request).await?;
        // stores promise the order; dispatch relies on it, so enforce it here too
        claimed.sort_by(ClaimedTask::claim_order);
        claimed.truncate(limit);

        debug!(owner = %self.owner, limit, claimed = claimed.len(), "claimed tasks");
        Ok(claimed)
    }

    /// Give a claim back so the next cycle can pick the task up again.
    pub async fn release(&self, task: &ClaimedTask) -> Result<(), StoreError> {
        self.store.release_claim(task.id, self.owner).await
    }
}
