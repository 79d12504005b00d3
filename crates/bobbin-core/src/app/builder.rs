//! SchedulerBuilder - wiring and start-up validation.
//!
//! Every collaborator is checked at `build()` so a misconfigured process
//! fails before it ever touches the store.

use std::sync::Arc;

use super::claim::ClaimProtocol;
use super::config::LiveConfig;
use super::dispatcher::Dispatcher;
use super::scheduler::Scheduler;
use super::shutdown::Shutdown;
use crate::domain::InstanceId;
use crate::ports::{Clock, Launcher, SystemClock, TaskStore};

/// # Example
/// ```ignore
/// let scheduler = SchedulerBuilder::new()
///     .store(store)
///     .launcher(launcher)
///     .config(LiveConfig::new(config))
///     .build()?;
/// scheduler.run().await;
/// ```
#[derive(Default)]
pub struct SchedulerBuilder {
    store: Option<Arc<dyn TaskStore>>,
    launcher: Option<Arc<dyn Launcher>>,
    clock: Option<Arc<dyn Clock>>,
    config: Option<LiveConfig>,
    shutdown: Option<Shutdown>,
    instance: Option<InstanceId>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing components: {0:?}. These must be provided before build().")]
    MissingComponents(Vec<&'static str>),
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to `LiveConfig::default()`.
    pub fn config(mut self, config: LiveConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Share a shutdown flag with signal handlers. Defaults to a fresh one.
    pub fn shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Claim owner identity. Defaults to a fresh ULID.
    pub fn instance(mut self, instance: InstanceId) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn build(self) -> Result<Scheduler, BuildError> {
        let mut missing = Vec::new();
        if self.store.is_none() {
            missing.push("store");
        }
        if self.launcher.is_none() {
            missing.push("launcher");
        }
        let (Some(store), Some(launcher)) = (self.store, self.launcher) else {
            return Err(BuildError::MissingComponents(missing));
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let instance = self.instance.unwrap_or_else(InstanceId::generate);
        let claims = ClaimProtocol::new(Arc::clone(&store), Arc::clone(&clock), instance);

        Ok(Scheduler::new(
            store,
            clock,
            claims,
            Dispatcher::new(launcher),
            self.config.unwrap_or_default(),
            self.shutdown.unwrap_or_default(),
        ))
    }
}
