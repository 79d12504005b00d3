//! Scheduler configuration: the clamped snapshot the loop reads each
//! iteration, and the live provider that publishes new snapshots.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub const POLL_INTERVAL_MS_RANGE: (u64, u64) = (100, 60_000);
pub const MAX_CONCURRENT_WORKERS_RANGE: (u32, u32) = (1, 128);
pub const START_TIMEOUT_MS_RANGE: (u64, u64) = (100, 60_000);
pub const CLAIM_LEASE_MS_RANGE: (u64, u64) = (1_000, 3_600_000);

/// One immutable configuration snapshot.
///
/// Values are always within their bounds: construct through `clamped` or
/// deserialize (which clamps too).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawSchedulerConfig")]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
    pub max_concurrent_workers: u32,
    /// Kill switch. When false the loop exits gracefully.
    pub enabled: bool,
    /// Bounded wait for a spawned worker to confirm start.
    pub start_timeout_ms: u64,
    /// How long a claim keeps a row away from other claimants.
    pub claim_lease_ms: u64,
}

impl SchedulerConfig {
    pub fn clamped(self) -> Self {
        Self {
            poll_interval_ms: clamp(self.poll_interval_ms, POLL_INTERVAL_MS_RANGE),
            max_concurrent_workers: clamp(
                self.max_concurrent_workers,
                MAX_CONCURRENT_WORKERS_RANGE,
            ),
            enabled: self.enabled,
            start_timeout_ms: clamp(self.start_timeout_ms, START_TIMEOUT_MS_RANGE),
            claim_lease_ms: clamp(self.claim_lease_ms, CLAIM_LEASE_MS_RANGE),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn claim_lease(&self) -> chrono::Duration {
        // within CLAIM_LEASE_MS_RANGE, so the cast cannot truncate
        chrono::Duration::milliseconds(self.claim_lease_ms as i64)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            max_concurrent_workers: 4,
            enabled: true,
            start_timeout_ms: 10_000,
            claim_lease_ms: 60_000,
        }
    }
}

fn clamp<T: Ord>(value: T, (lo, hi): (T, T)) -> T {
    value.clamp(lo, hi)
}

/// Wire form: every field optional, missing ones fall back to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSchedulerConfig {
    poll_interval_ms: Option<u64>,
    max_concurrent_workers: Option<u32>,
    enabled: Option<bool>,
    start_timeout_ms: Option<u64>,
    claim_lease_ms: Option<u64>,
}

impl From<RawSchedulerConfig> for SchedulerConfig {
    fn from(raw: RawSchedulerConfig) -> Self {
        let d = SchedulerConfig::default();
        SchedulerConfig {
            poll_interval_ms: raw.poll_interval_ms.unwrap_or(d.poll_interval_ms),
            max_concurrent_workers: raw
                .max_concurrent_workers
                .unwrap_or(d.max_concurrent_workers),
            enabled: raw.enabled.unwrap_or(d.enabled),
            start_timeout_ms: raw.start_timeout_ms.unwrap_or(d.start_timeout_ms),
            claim_lease_ms: raw.claim_lease_ms.unwrap_or(d.claim_lease_ms),
        }
        .clamped()
    }
}

/// Live-reloadable configuration provider.
///
/// Cheap to clone; all clones see the same current value.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    tx: watch::Sender<SchedulerConfig>,
}

impl LiveConfig {
    pub fn new(initial: SchedulerConfig) -> Self {
        let (tx, _rx) = watch::channel(initial.clamped());
        Self { tx }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SchedulerConfig {
        *self.tx.borrow()
    }

    /// Publish a new snapshot. Waiters on `subscribe` are woken.
    pub fn update(&self, config: SchedulerConfig) {
        self.tx.send_replace(config.clamped());
    }

    /// Apply `f` to the current snapshot and publish the result.
    pub fn modify(&self, f: impl FnOnce(&mut SchedulerConfig)) {
        self.tx.send_modify(|config| {
            f(config);
            *config = config.clamped();
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerConfig> {
        self.tx.subscribe()
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
