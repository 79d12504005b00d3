//! In-memory task store.
//!
//! Behaves like the PostgreSQL store for everything the scheduler and
//! workers can observe: conditional updates, skip-claimed claims with a
//! lease, transactional command execution. One tokio `Mutex` stands in for
//! row locks; every trait method takes it exactly once, so each method is
//! atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::script;
use crate::domain::{
    ClaimedTask, ExecutionError, ExecutorId, InstanceId, LoadedTask, NewTask, StoreError,
    TaskId, TaskRecord, TaskStatus, TerminalStatus,
};
use crate::observability::StatusCounts;
use crate::ports::{ClaimRequest, Clock, SystemClock, TaskStore};

#[derive(Debug, Clone, Copy)]
struct ClaimLock {
    owner: InstanceId,
    until: DateTime<Utc>,
}

struct InMemoryState {
    /// All task rows (single source of truth).
    records: BTreeMap<TaskId, TaskRecord>,

    /// Outstanding claims, keyed by task. Expired entries are ignored and
    /// overwritten lazily.
    claims: HashMap<TaskId, ClaimLock>,

    /// The table `Command` scripts operate on.
    data: BTreeMap<String, String>,

    /// Every status a row has held, in order (including the initial one).
    history: Vec<(TaskId, TaskStatus)>,

    next_task_id: i64,

    /// Fault injection: when false every call fails with `Unavailable`.
    available: bool,
}

impl InMemoryState {
    fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            claims: HashMap::new(),
            data: BTreeMap::new(),
            history: Vec::new(),
            next_task_id: 1,
            available: true,
        }
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store switched off".to_string()))
        }
    }

    fn allocate_task_id(&mut self) -> TaskId {
        let id = TaskId::new(self.next_task_id);
        self.next_task_id += 1;
        id
    }

    fn is_claimed(&self, id: TaskId, now: DateTime<Utc>) -> bool {
        self.claims.get(&id).is_some_and(|claim| claim.until > now)
    }

    fn transition(&mut self, id: TaskId, next: TaskStatus) {
        if let Some(record) = self.records.get_mut(&id) {
            debug_assert!(record.status.can_transition_to(next));
            record.status = next;
            self.history.push((id, next));
        }
    }
}

pub struct InMemoryTaskStore {
    state: Arc<Mutex<InMemoryState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Use `clock` for default `scheduled_time` on insert.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryState::new())),
            clock,
        }
    }

    /// Insert a row as-is (nullable columns included). The id is assigned by
    /// the store; the one on `record` is ignored.
    pub async fn insert_record(&self, mut record: TaskRecord) -> TaskId {
        let mut state = self.state.lock().await;
        let id = state.allocate_task_id();
        record.id = id;
        state.history.push((id, record.status));
        state.records.insert(id, record);
        id
    }

    /// Remove a row outright, as a concurrent `DELETE` would.
    pub async fn delete_task(&self, id: TaskId) -> bool {
        let mut state = self.state.lock().await;
        state.claims.remove(&id);
        state.records.remove(&id).is_some()
    }

    /// Switch the store on or off (simulates an unreachable database).
    pub async fn set_available(&self, available: bool) {
        self.state.lock().await.available = available;
    }

    /// Copy of the table `Command` scripts operate on.
    pub async fn data(&self) -> BTreeMap<String, String> {
        self.state.lock().await.data.clone()
    }

    /// Statuses `id` has held, oldest first.
    pub async fn status_history(&self, id: TaskId) -> Vec<TaskStatus> {
        let state = self.state.lock().await;
        state
            .history
            .iter()
            .filter(|(task, _)| *task == id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Current claim owner of `id`, if the claim has not expired at `now`.
    pub async fn claim_owner(&self, id: TaskId, now: DateTime<Utc>) -> Option<InstanceId> {
        let state = self.state.lock().await;
        state
            .claims
            .get(&id)
            .filter(|claim| claim.until > now)
            .map(|claim| claim.owner)
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn count_running(&self) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state
            .records
            .values()
            .filter(|r| r.status == TaskStatus::Running)
            .count() as u64)
    }

    async fn claim_pending(&self, request: &ClaimRequest) -> Result<Vec<ClaimedTask>, StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;

        let mut due: Vec<ClaimedTask> = state
            .records
            .values()
            .filter(|r| r.status == TaskStatus::Pending && r.scheduled_time <= request.now)
            .filter(|r| !state.is_claimed(r.id, request.now))
            .map(|r| ClaimedTask {
                id: r.id,
                command: r.command.clone(),
                task_type: r.task_type.clone(),
                priority: r.priority,
                scheduled_time: r.scheduled_time,
            })
            .collect();

        due.sort_by(ClaimedTask::claim_order);
        due.truncate(request.limit);

        for task in &due {
            state.claims.insert(
                task.id,
                ClaimLock {
                    owner: request.owner,
                    until: request.lease_until,
                },
            );
        }
        Ok(due)
    }

    async fn release_claim(&self, id: TaskId, owner: InstanceId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;
        if state.claims.get(&id).is_some_and(|claim| claim.owner == owner) {
            state.claims.remove(&id);
        }
        Ok(())
    }

    async fn mark_running(
        &self,
        id: TaskId,
        executor: ExecutorId,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;

        let Some(record) = state.records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != TaskStatus::Pending {
            return Ok(false);
        }
        record.started_at.get_or_insert(started_at);
        record.executor_id.get_or_insert(executor);
        state.claims.remove(&id);
        state.transition(id, TaskStatus::Running);
        Ok(true)
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<LoadedTask>, StoreError> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.records.get(&id).map(|r| LoadedTask {
            id: r.id,
            command: r.command.clone(),
            task_type: r.task_type.clone(),
            status: r.status,
        }))
    }

    async fn mark_terminal(
        &self,
        id: TaskId,
        status: TerminalStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;

        let Some(record) = state.records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status != TaskStatus::Running {
            return Ok(false);
        }
        record.completed_at.get_or_insert(completed_at);
        state.transition(id, status.into());
        Ok(true)
    }

    async fn execute_transactional(&self, command: &str) -> Result<(), ExecutionError> {
        let mut state = self.state.lock().await;
        state.ensure_available()?;

        let statements =
            script::parse(command).map_err(|e| ExecutionError::RolledBack(e.to_string()))?;

        // stage on a copy; only a fully successful script is swapped in
        let mut staged = state.data.clone();
        script::apply(&statements, &mut staged)
            .map_err(|e| ExecutionError::RolledBack(e.to_string()))?;
        state.data = staged;
        Ok(())
    }

    async fn insert_task(&self, task: &NewTask) -> Result<TaskId, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.ensure_available()?;

        let id = state.allocate_task_id();
        let record = TaskRecord {
            id,
            command: Some(task.command.clone()),
            task_type: Some(task.task_type.as_str().to_string()),
            status: TaskStatus::Pending,
            priority: task.priority,
            scheduled_time: task.scheduled_time.unwrap_or(now),
            started_at: None,
            completed_at: None,
            executor_id: None,
        };
        state.records.insert(id, record);
        state.history.push((id, TaskStatus::Pending));
        Ok(id)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        Ok(state.records.get(&id).cloned())
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError> {
        let state = self.state.lock().await;
        state.ensure_available()?;
        let mut counts = StatusCounts::default();
        for record in state.records.values() {
            counts.record(record.status);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use crate::ports::FixedClock;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn store() -> InMemoryTaskStore {
        InMemoryTaskStore::with_clock(Arc::new(FixedClock::new(t0())))
    }

    fn request(owner: InstanceId, limit: usize, now: DateTime<Utc>) -> ClaimRequest {
        ClaimRequest {
            owner,
            limit,
            now,
            lease_until: now + Duration::seconds(60),
        }
    }

    #[tokio::test]
    async fn insert_defaults_to_pending_and_due_now() {
        let store = store();
        let id = store
            .insert_task(&NewTask::command("set a 1").with_priority(3))
            .await
            .unwrap();

        let record = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.priority, 3);
        assert_eq!(record.scheduled_time, t0());
        assert_eq!(record.task_type.as_deref(), Some(TaskType::Command.as_str()));
        assert_eq!(store.counts_by_status().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn claim_skips_future_and_non_pending_rows() {
        let store = store();
        let due = store.insert_task(&NewTask::command("a")).await.unwrap();
        let later = store
            .insert_task(&NewTask::command("b").scheduled_at(t0() + Duration::minutes(5)))
            .await
            .unwrap();
        let running = store.insert_task(&NewTask::command("c")).await.unwrap();
        store
            .mark_running(running, ExecutorId::new(1), t0())
            .await
            .unwrap();

        let claimed = store
            .claim_pending(&request(InstanceId::generate(), 10, t0()))
            .await
            .unwrap();
        let ids: Vec<TaskId> = claimed.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![due]);
        assert!(!ids.contains(&later));
    }

    #[tokio::test]
    async fn claimed_rows_are_skipped_until_released_or_expired() {
        let store = store();
        let id = store.insert_task(&NewTask::command("a")).await.unwrap();
        let first = InstanceId::generate();
        let second = InstanceId::generate();

        assert_eq!(store.claim_pending(&request(first, 1, t0())).await.unwrap().len(), 1);
        assert!(store.claim_pending(&request(second, 1, t0())).await.unwrap().is_empty());

        // someone else's release is a no-op
        store.release_claim(id, second).await.unwrap();
        assert_eq!(store.claim_owner(id, t0()).await, Some(first));

        store.release_claim(id, first).await.unwrap();
        assert_eq!(store.claim_pending(&request(second, 1, t0())).await.unwrap().len(), 1);

        // lease expiry makes it claimable without a release
        let after_lease = t0() + Duration::seconds(61);
        let again = store.claim_pending(&request(first, 1, after_lease)).await.unwrap();
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn mark_running_is_conditional_and_writes_once() {
        let store = store();
        let id = store.insert_task(&NewTask::command("a")).await.unwrap();

        assert!(store.mark_running(id, ExecutorId::new(7), t0()).await.unwrap());
        assert!(
            !store
                .mark_running(id, ExecutorId::new(8), t0() + Duration::seconds(1))
                .await
                .unwrap()
        );

        let record = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Running);
        assert_eq!(record.executor_id, Some(ExecutorId::new(7)));
        assert_eq!(record.started_at, Some(t0()));
        assert_eq!(store.count_running().await.unwrap(), 1);
        assert_eq!(store.claim_owner(id, t0()).await, None);
    }

    #[tokio::test]
    async fn mark_terminal_requires_running_and_is_sticky() {
        let store = store();
        let id = store.insert_task(&NewTask::command("a")).await.unwrap();

        // pending -> completed is not an edge
        assert!(
            !store
                .mark_terminal(id, TerminalStatus::Completed, t0())
                .await
                .unwrap()
        );

        store.mark_running(id, ExecutorId::new(1), t0()).await.unwrap();
        let done_at = t0() + Duration::seconds(3);
        assert!(
            store
                .mark_terminal(id, TerminalStatus::Failed, done_at)
                .await
                .unwrap()
        );
        assert!(
            !store
                .mark_terminal(id, TerminalStatus::Completed, done_at + Duration::seconds(1))
                .await
                .unwrap()
        );

        let record = store.get_task(id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.completed_at, Some(done_at));
        assert_eq!(
            store.status_history(id).await,
            vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Failed]
        );
    }

    #[tokio::test]
    async fn failing_script_leaves_no_partial_effects() {
        let store = store();
        store.execute_transactional("set kept yes").await.unwrap();

        let err = store
            .execute_transactional("set x 1; incr counter; abort halfway; set y 2")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::RolledBack(ref m) if m.contains("halfway")));

        let data = store.data().await;
        assert_eq!(data.len(), 1);
        assert_eq!(data.get("kept").map(String::as_str), Some("yes"));
    }

    #[tokio::test]
    async fn increment_past_the_limit_rolls_back() {
        let store = store();
        store
            .execute_transactional(&format!("set n {}", i64::MAX))
            .await
            .unwrap();

        let err = store
            .execute_transactional("set touched yes; incr n")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::RolledBack(_)));

        let data = store.data().await;
        assert_eq!(data.get("n"), Some(&i64::MAX.to_string()));
        assert!(!data.contains_key("touched"));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = store();
        store.set_available(false).await;

        assert!(matches!(
            store.count_running().await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.execute_transactional("set a 1").await,
            Err(ExecutionError::Store(StoreError::Unavailable(_)))
        ));

        store.set_available(true).await;
        assert_eq!(store.count_running().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deleted_rows_cannot_be_loaded() {
        let store = store();
        let id = store.insert_task(&NewTask::command("a")).await.unwrap();
        assert!(store.delete_task(id).await);
        assert_eq!(store.load_task(id).await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_never_overlap() {
        let store = Arc::new(store());
        for i in 0..40 {
            store
                .insert_task(&NewTask::command("a").with_priority(i % 3))
                .await
                .unwrap();
        }

        let mut joins = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            joins.push(tokio::spawn(async move {
                store
                    .claim_pending(&request(InstanceId::generate(), 7, t0()))
                    .await
                    .unwrap()
            }));
        }

        let mut seen = std::collections::HashSet::new();
        let mut total = 0;
        for join in joins {
            for task in join.await.unwrap() {
                assert!(seen.insert(task.id), "{} claimed twice", task.id);
                total += 1;
            }
        }
        assert_eq!(total, 40);
    }

    proptest! {
        // A claim of size k returns exactly the k best (priority DESC, scheduled ASC).
        #[test]
        fn claim_returns_the_k_best(
            tasks in proptest::collection::vec((0i32..5, 0i64..600), 1..25),
            k in 1usize..10,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = store();
                for (priority, offset) in &tasks {
                    store
                        .insert_task(
                            &NewTask::command("x")
                                .with_priority(*priority)
                                .scheduled_at(t0() - Duration::seconds(*offset)),
                        )
                        .await
                        .unwrap();
                }

                let claimed = store
                    .claim_pending(&request(InstanceId::generate(), k, t0()))
                    .await
                    .unwrap();

                let mut expected: Vec<(i32, i64, i64)> = tasks
                    .iter()
                    .enumerate()
                    .map(|(i, (p, off))| (-*p, -*off, i as i64 + 1))
                    .collect();
                expected.sort();
                let expected_ids: Vec<i64> =
                    expected.iter().take(k).map(|(_, _, id)| *id).collect();
                let got: Vec<i64> = claimed.iter().map(|t| t.id.value()).collect();

                prop_assert_eq!(got, expected_ids);
                Ok(())
            })?;
        }
    }
}
