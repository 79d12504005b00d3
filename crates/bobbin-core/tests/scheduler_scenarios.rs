//! End-to-end scheduler scenarios against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bobbin_core::app::{ClaimProtocol, LiveConfig, Scheduler, SchedulerBuilder, SchedulerConfig};
use bobbin_core::domain::{
    ExecutionError, ExecutorId, InstanceId, LaunchError, NewTask, TaskId, TaskStatus, WorkerExit,
};
use bobbin_core::impls::{InMemoryTaskStore, InProcessLauncher, ShellRunner};
use bobbin_core::ports::{
    Clock, CommandRunner, FixedClock, Launcher, PendingStart, SystemClock, TaskStore,
};
use bobbin_core::{SchedulerExit, Worker};
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Semaphore, mpsc};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn config(max_concurrent_workers: u32) -> SchedulerConfig {
    SchedulerConfig {
        poll_interval_ms: 100,
        max_concurrent_workers,
        enabled: true,
        start_timeout_ms: 1_000,
        claim_lease_ms: 60_000,
    }
}

/// Runs shell payloads, except `panic` (panics) and `block` (waits for a permit).
struct TestRunner {
    shell: ShellRunner,
    permits: Arc<Semaphore>,
}

#[async_trait]
impl CommandRunner for TestRunner {
    async fn run(&self, command: &str) -> Result<(), ExecutionError> {
        match command {
            "panic" => panic!("payload blew up"),
            "block" => {
                // each permit lets exactly one payload through
                if let Ok(permit) = self.permits.acquire().await {
                    permit.forget();
                }
                Ok(())
            }
            _ => self.shell.run(command).await,
        }
    }
}

struct Harness {
    store: Arc<InMemoryTaskStore>,
    clock: Arc<FixedClock>,
    permits: Arc<Semaphore>,
    launcher: Arc<InProcessLauncher>,
    exits: mpsc::UnboundedReceiver<(TaskId, WorkerExit)>,
    scheduler: Scheduler,
}

impl Harness {
    fn new(config: SchedulerConfig) -> Self {
        let clock = Arc::new(FixedClock::new(t0()));
        let store = Arc::new(InMemoryTaskStore::with_clock(clock.clone()));
        Self::with_store(store, clock, config)
    }

    fn with_store(
        store: Arc<InMemoryTaskStore>,
        clock: Arc<FixedClock>,
        config: SchedulerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(0));
        let runner = Arc::new(TestRunner {
            shell: ShellRunner::default(),
            permits: permits.clone(),
        });
        let worker = Arc::new(Worker::new(store.clone(), runner, clock.clone()));
        let (tx, exits) = mpsc::unbounded_channel();
        let launcher = Arc::new(InProcessLauncher::new(worker).with_exit_reporting(tx));

        let scheduler = SchedulerBuilder::new()
            .store(store.clone())
            .launcher(launcher.clone())
            .clock(clock.clone())
            .config(LiveConfig::new(config))
            .build()
            .unwrap();

        Self {
            store,
            clock,
            permits,
            launcher,
            exits,
            scheduler,
        }
    }

    async fn submit(&self, task: NewTask) -> TaskId {
        self.store.insert_task(&task).await.unwrap()
    }

    async fn cycle(&self) -> bobbin_core::app::CycleReport {
        let config = self.scheduler.config().snapshot();
        self.scheduler.run_cycle(&config).await.unwrap()
    }

    async fn next_exit(&mut self) -> (TaskId, WorkerExit) {
        tokio::time::timeout(Duration::from_secs(5), self.exits.recv())
            .await
            .expect("worker did not finish in time")
            .expect("exit channel closed")
    }

    async fn status(&self, id: TaskId) -> TaskStatus {
        self.store.get_task(id).await.unwrap().unwrap().status
    }
}

// --- ordering --------------------------------------------------------------

#[tokio::test]
async fn claim_prefers_priority_then_id() {
    let h = Harness::new(config(2));
    let a = h.submit(NewTask::command("set a 1").with_priority(5)).await;
    let _b = h.submit(NewTask::command("set b 1").with_priority(1)).await;
    let c = h.submit(NewTask::command("set c 1").with_priority(5)).await;

    let protocol = ClaimProtocol::new(h.store.clone(), h.clock.clone(), InstanceId::generate());
    let claimed = protocol.claim(2, chrono::Duration::seconds(60)).await.unwrap();

    let ids: Vec<TaskId> = claimed.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![a, c]);
}

// --- concurrency gate --------------------------------------------------------

#[tokio::test]
async fn full_gate_claims_nothing() {
    let h = Harness::new(config(1));
    let busy = h.submit(NewTask::command("set busy 1")).await;
    h.store.mark_running(busy, ExecutorId::new(99), t0()).await.unwrap();
    let waiting = h.submit(NewTask::command("set waiting 1")).await;

    let report = h.cycle().await;
    assert_eq!(report.running, 1);
    assert_eq!(report.available, 0);
    assert_eq!(report.claimed, 0);

    assert_eq!(h.status(waiting).await, TaskStatus::Pending);
    assert_eq!(h.store.claim_owner(waiting, t0()).await, None);
}

#[tokio::test]
async fn running_count_never_exceeds_cap() {
    let mut h = Harness::new(config(2));
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(h.submit(NewTask::external_process("block")).await);
    }

    let first = h.cycle().await;
    assert_eq!(first.dispatched, 2);
    assert_eq!(h.store.count_running().await.unwrap(), 2);

    let second = h.cycle().await;
    assert_eq!(second.available, 0);
    assert_eq!(h.store.count_running().await.unwrap(), 2);

    // let the blocked pair finish, then the gate opens again
    h.permits.add_permits(2);
    h.next_exit().await;
    h.next_exit().await;

    let third = h.cycle().await;
    assert_eq!(third.dispatched, 2);
    assert!(h.store.count_running().await.unwrap() <= 2);

    h.permits.add_permits(3);
    let counts = loop {
        h.cycle().await;
        h.next_exit().await;
        let counts = h.store.counts_by_status().await.unwrap();
        assert!(counts.running <= 2);
        if counts.completed == 5 {
            break counts;
        }
    };
    assert_eq!(counts.total(), 5);
}

// --- execution modes -------------------------------------------------------

#[tokio::test]
async fn failing_command_is_rolled_back() {
    let mut h = Harness::new(config(2));
    h.store.execute_transactional("set balance 10").await.unwrap();
    let id = h
        .submit(NewTask::command("incr balance; set audit yes; abort insufficient funds"))
        .await;

    assert_eq!(h.cycle().await.dispatched, 1);
    assert_eq!(h.next_exit().await, (id, WorkerExit::Failed));

    let row = h.store.get_task(id).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Failed);
    assert!(row.completed_at.is_some());

    let data = h.store.data().await;
    assert_eq!(data.get("balance").map(String::as_str), Some("10"));
    assert!(!data.contains_key("audit"));
}

#[tokio::test]
async fn failing_external_process_keeps_its_side_effects() {
    let mut h = Harness::new(config(2));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.txt");
    let id = h
        .submit(NewTask::external_process(format!(
            "echo half-written > '{}'; exit 1",
            path.display()
        )))
        .await;

    h.cycle().await;
    assert_eq!(h.next_exit().await, (id, WorkerExit::Failed));
    assert_eq!(h.status(id).await, TaskStatus::Failed);

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.trim(), "half-written");
}

// --- isolation ---------------------------------------------------------------

#[tokio::test]
async fn panicking_task_does_not_affect_siblings() {
    let mut h = Harness::new(config(8));
    let bad = h.submit(NewTask::external_process("panic").with_priority(9)).await;
    let good_a = h.submit(NewTask::command("incr done")).await;
    let good_b = h.submit(NewTask::external_process("true")).await;

    let report = h.cycle().await;
    assert_eq!(report.dispatched, 3);

    let mut exits = Vec::new();
    for _ in 0..3 {
        exits.push(h.next_exit().await);
    }
    exits.sort_by_key(|(id, _)| *id);
    assert_eq!(
        exits,
        vec![
            (bad, WorkerExit::Failed),
            (good_a, WorkerExit::Completed),
            (good_b, WorkerExit::Completed),
        ]
    );
    assert_eq!(h.store.data().await.get("done").map(String::as_str), Some("1"));
}

// --- dispatch failures -------------------------------------------------------

/// Spawns workers that never confirm start.
struct SilentLauncher;

struct NeverStarts;

#[async_trait]
impl PendingStart for NeverStarts {
    async fn started(&mut self) -> Result<ExecutorId, String> {
        std::future::pending().await
    }

    fn abort(self: Box<Self>) {}
}

#[async_trait]
impl Launcher for SilentLauncher {
    async fn spawn(&self, _task_id: TaskId) -> Result<Box<dyn PendingStart>, LaunchError> {
        Ok(Box::new(NeverStarts))
    }
}

#[tokio::test(start_paused = true)]
async fn start_timeout_leaves_task_pending_and_reclaimable() {
    let clock = Arc::new(FixedClock::new(t0()));
    let store = Arc::new(InMemoryTaskStore::with_clock(clock.clone()));
    let id = store.insert_task(&NewTask::command("set x 1")).await.unwrap();

    let scheduler = SchedulerBuilder::new()
        .store(store.clone())
        .launcher(Arc::new(SilentLauncher))
        .clock(clock.clone())
        .config(LiveConfig::new(SchedulerConfig {
            start_timeout_ms: 100,
            ..config(2)
        }))
        .build()
        .unwrap();
    let cfg = scheduler.config().snapshot();

    let report = scheduler.run_cycle(&cfg).await.unwrap();
    assert_eq!(report.claimed, 1);
    assert_eq!(report.failed_dispatches, 1);
    assert_eq!(report.dispatched, 0);

    let row = store.get_task(id).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Pending);
    assert_eq!(row.executor_id, None);
    assert_eq!(row.started_at, None);

    // claim was released: the next cycle selects it again
    let again = scheduler.run_cycle(&cfg).await.unwrap();
    assert_eq!(again.claimed, 1);
}

#[tokio::test]
async fn unreachable_store_abandons_the_cycle_only() {
    let mut h = Harness::new(config(2));
    let id = h.submit(NewTask::command("set k v")).await;

    h.store.set_available(false).await;
    let cfg = h.scheduler.config().snapshot();
    assert!(h.scheduler.run_cycle(&cfg).await.is_err());

    h.store.set_available(true).await;
    assert_eq!(h.cycle().await.dispatched, 1);
    assert_eq!(h.next_exit().await, (id, WorkerExit::Completed));
}

// --- exclusivity and closure -------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_schedulers_run_each_task_once() {
    let clock = Arc::new(FixedClock::new(t0()));
    let store = Arc::new(InMemoryTaskStore::with_clock(clock.clone()));
    let mut ids = Vec::new();
    for i in 0..30 {
        let id = store
            .insert_task(&NewTask::command(format!("incr task-{i}")).with_priority(i % 4))
            .await
            .unwrap();
        ids.push(id);
    }

    let mut a = Harness::with_store(store.clone(), clock.clone(), config(16));
    let mut b = Harness::with_store(store.clone(), clock.clone(), config(16));

    let mut finished = 0;
    while finished < ids.len() {
        let (ra, rb) = tokio::join!(a.cycle(), b.cycle());
        let dispatched = ra.dispatched + rb.dispatched;
        for _ in 0..ra.dispatched {
            a.next_exit().await;
        }
        for _ in 0..rb.dispatched {
            b.next_exit().await;
        }
        finished += dispatched;
        assert!(dispatched > 0, "no progress");
    }

    let data = store.data().await;
    for i in 0..30 {
        assert_eq!(data.get(&format!("task-{i}")).map(String::as_str), Some("1"));
    }
    for id in ids {
        assert_eq!(
            store.status_history(id).await,
            vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Completed]
        );
    }
}

// --- loop control ----------------------------------------------------------

#[tokio::test]
async fn shutdown_mid_wait_exits_without_claiming() {
    let h = Harness::new(SchedulerConfig {
        poll_interval_ms: 60_000,
        ..config(2)
    });
    let id = h.submit(NewTask::command("set x 1")).await;

    let scheduler = Arc::new(h.scheduler);
    let shutdown = scheduler.shutdown_handle();
    let run = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run().await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(shutdown.request());
    assert!(!shutdown.request());

    let exit = tokio::time::timeout(Duration::from_secs(1), run)
        .await
        .expect("loop did not wake on shutdown")
        .unwrap();
    assert_eq!(exit, SchedulerExit::Shutdown);

    let row = h.store.get_task(id).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Pending);
    assert_eq!(h.store.claim_owner(id, t0()).await, None);
}

#[tokio::test]
async fn dispatched_workers_finish_after_shutdown_when_drained() {
    let h = Harness::new(config(2));
    let id = h.submit(NewTask::external_process("block")).await;

    assert_eq!(h.cycle().await.dispatched, 1);
    assert!(h.scheduler.shutdown_handle().request());
    assert!(h.launcher.in_flight() > 0);
    assert_eq!(h.status(id).await, TaskStatus::Running);

    h.permits.add_permits(1);
    tokio::time::timeout(Duration::from_secs(5), h.launcher.drain())
        .await
        .expect("drain did not return");

    let row = h.store.get_task(id).await.unwrap().unwrap();
    assert_eq!(row.status, TaskStatus::Completed);
    assert!(row.completed_at.is_some());
    assert_eq!(h.launcher.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn disabled_scheduler_exits_gracefully() {
    let h = Harness::new(SchedulerConfig {
        enabled: false,
        ..config(2)
    });
    let id = h.submit(NewTask::command("set x 1")).await;

    assert_eq!(h.scheduler.run().await, SchedulerExit::Disabled);
    assert_eq!(h.status(id).await, TaskStatus::Pending);
}

#[tokio::test]
async fn wake_runs_a_cycle_early() {
    let mut h = Harness::new(SchedulerConfig {
        poll_interval_ms: 60_000,
        ..config(2)
    });
    let id = h.submit(NewTask::command("set woke yes")).await;

    let scheduler = Arc::new(h.scheduler);
    let waker = scheduler.waker();
    let shutdown = scheduler.shutdown_handle();
    let run = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run().await }
    });

    waker.notify_one();
    let (done, exit) = tokio::time::timeout(Duration::from_secs(5), h.exits.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!((done, exit), (id, WorkerExit::Completed));

    shutdown.request();
    assert_eq!(run.await.unwrap(), SchedulerExit::Shutdown);
}

#[tokio::test(start_paused = true)]
async fn disabling_live_stops_the_loop() {
    let h = Harness::new(config(2));
    let scheduler = Arc::new(h.scheduler);
    let run = tokio::spawn({
        let scheduler = Arc::clone(&scheduler);
        async move { scheduler.run().await }
    });

    tokio::time::sleep(Duration::from_millis(350)).await;
    scheduler.config().modify(|cfg| cfg.enabled = false);
    assert_eq!(run.await.unwrap(), SchedulerExit::Disabled);
}

#[test]
fn system_clock_is_usable_as_dyn() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    assert!(clock.now() > t0());
}
