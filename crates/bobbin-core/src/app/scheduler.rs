//! Scheduler loop: wait, gate, claim, dispatch, repeat.
//!
//! One instance is a single cooperative sequence. It only suspends on the
//! interval wait, store round-trips and the bounded start confirmation.
//! Workers run unsupervised once confirmed.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, instrument, warn};

use super::claim::ClaimProtocol;
use super::config::{LiveConfig, SchedulerConfig};
use super::dispatcher::Dispatcher;
use super::gate::available_slots;
use super::shutdown::Shutdown;
use crate::domain::{ClaimedTask, InstanceId, StoreError};
use crate::ports::{Clock, TaskStore};

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerExit {
    Shutdown,
    /// `enabled` was false at the top of an iteration.
    Disabled,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub running: u64,
    pub available: usize,
    pub claimed: usize,
    pub dispatched: usize,
    pub failed_dispatches: usize,
    /// Claims given back unused because shutdown arrived mid-cycle.
    pub released: usize,
}

pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    claims: ClaimProtocol,
    dispatcher: Dispatcher,
    config: LiveConfig,
    shutdown: Shutdown,
    wake: Arc<Notify>,
}

impl Scheduler {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        claims: ClaimProtocol,
        dispatcher: Dispatcher,
        config: LiveConfig,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            clock,
            claims,
            dispatcher,
            config,
            shutdown,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.claims.owner()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    /// Handle that cuts the current wait short and starts a cycle.
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Run until shutdown is requested or the scheduler is disabled.
    #[instrument(skip_all, fields(instance = %self.instance()))]
    pub async fn run(&self) -> SchedulerExit {
        let mut config_rx = self.config.subscribe();
        info!("scheduler started");

        loop {
            if self.shutdown.is_requested() {
                break;
            }
            let interval = self.config.snapshot().poll_interval();
            self.wait(interval, &mut config_rx).await;

            if self.shutdown.is_requested() {
                break;
            }
            let config = self.config.snapshot();
            if !config.enabled {
                info!("scheduler disabled, exiting");
                return SchedulerExit::Disabled;
            }

            match self.run_cycle(&config).await {
                Ok(report) => debug!(?report, "cycle finished"),
                Err(e) => warn!(error = %e, "cycle abandoned, retrying next interval"),
            }
        }

        info!("shutdown requested, scheduler exiting");
        SchedulerExit::Shutdown
    }

    /// Sleep for `interval`, or less if shutdown, a wake or a config update
    /// arrives first.
    async fn wait(
        &self,
        interval: std::time::Duration,
        config_rx: &mut watch::Receiver<SchedulerConfig>,
    ) {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = self.shutdown.requested() => {}
            _ = self.wake.notified() => debug!("woken early"),
            _ = config_rx.changed() => debug!("configuration updated"),
        }
    }

    /// One gate → claim → dispatch pass with the given snapshot.
    ///
    /// Store errors abandon the cycle. Dispatch failures do not: the task's
    /// claim is released and it stays pending for the next cycle.
    #[instrument(skip_all, fields(instance = %self.instance()))]
    pub async fn run_cycle(&self, config: &SchedulerConfig) -> Result<CycleReport, StoreError> {
        let running = self.store.count_running().await?;
        let available = available_slots(config.max_concurrent_workers, running);
        let mut report = CycleReport {
            running,
            available,
            ..CycleReport::default()
        };
        if available == 0 {
            debug!(running, cap = config.max_concurrent_workers, "no free slots");
            return Ok(report);
        }

        let claimed = self.claims.claim(available, config.claim_lease()).await?;
        report.claimed = claimed.len();

        for (index, task) in claimed.iter().enumerate() {
            if self.shutdown.is_requested() {
                report.released += self.release_all(&claimed[index..]).await;
                break;
            }

            match self.dispatcher.dispatch(task.id, config.start_timeout()).await {
                Ok(executor) => {
                    report.dispatched += 1;
                    let now = self.clock.now();
                    match self.store.mark_running(task.id, executor, now).await {
                        Ok(true) => info!(task_id = %task.id, %executor, "task dispatched"),
                        Ok(false) => {
                            debug!(task_id = %task.id, %executor, "worker already moved task out of pending")
                        }
                        // the worker marks itself running on load; nothing is lost
                        Err(e) => warn!(task_id = %task.id, error = %e, "could not mark task running"),
                    }
                }
                Err(e) => {
                    report.failed_dispatches += 1;
                    warn!(task_id = %task.id, error = %e, "dispatch failed, task stays pending");
                    self.release(task).await;
                }
            }
        }

        Ok(report)
    }

    async fn release(&self, task: &ClaimedTask) {
        if let Err(e) = self.claims.release(task).await {
            // the lease runs out on its own
            warn!(task_id = %task.id, error = %e, "could not release claim");
        }
    }

    async fn release_all(&self, tasks: &[ClaimedTask]) -> usize {
        for task in tasks {
            self.release(task).await;
        }
        tasks.len()
    }
}
