//! Bounded, deduplicated background fetch execution.
//!
//! # Architecture
//!
//! - **Task table**: `Mutex<HashMap<FetchKey, FetchTask>>`, the only shared
//!   mutable state. Every transition goes through it.
//! - **Queue**: unbounded FIFO channel of jobs. A job is sent only when its
//!   task moves into `Pending`, so a key is never queued twice.
//! - **Dispatcher**: pulls jobs in order and starts each one once a worker
//!   slot (semaphore permit) is free.
//! - **Workers**: run the injected [`Fetcher`] in a separate task so that a
//!   panic is caught as a failure and the slot is released. On timeout or
//!   shutdown the attempt's [`Budget`] is cancelled and the key stays
//!   `Running` until the fetcher has returned, so two attempts for one key
//!   never overlap.
//!
//! Retries are request driven: a failed task becomes eligible again after its
//! backoff and is re-queued by the next [`Orchestrator::schedule`] call.

use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use pkgdoc_storage::{
    ModuleVersionState, STATUS_FAILED, STATUS_MALFORMED, STATUS_NOT_FOUND, STATUS_OK,
    STATUS_RETRY, StateStore, StorageError,
};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinError;

use crate::fetcher::{Budget, Clock, ExperimentSet, FetchError, Fetcher};
use crate::task::{FetchKey, FetchTask, TaskStatus, add_delay, backoff};

/// How long a cancelled attempt may take to stop before it is aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Number of fetches that may run at once.
    pub workers: usize,
    /// Attempts before a transient failure becomes permanent.
    pub max_attempts: u32,
    /// Backoff after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound for the backoff.
    pub max_backoff: Duration,
    /// Deadline for a single attempt.
    pub task_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 5,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(60 * 60),
            task_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Result of [`Orchestrator::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// A new attempt was queued.
    Enqueued,
    /// An attempt is already queued or running.
    Coalesced,
    /// The last attempt failed; a retry is allowed from the given time.
    Backoff(DateTime<Utc>),
    /// The task has settled (succeeded or failed permanently).
    Settled(TaskStatus),
    /// The orchestrator has been shut down.
    Closed,
}

/// Counts from [`Orchestrator::restore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Successful fetches whose data is still present.
    pub succeeded: usize,
    /// Failures waiting for their backoff to elapse.
    pub retryable: usize,
    /// Permanent failures.
    pub failed: usize,
    /// Entries queued again (unfinished, or data missing).
    pub requeued: usize,
}

struct Job {
    key: FetchKey,
    experiments: Arc<ExperimentSet>,
}

enum Outcome {
    Success,
    Cancelled,
    Error {
        message: String,
        permanent_code: Option<u16>,
    },
}

struct Inner {
    config: FetchConfig,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    tasks: Mutex<HashMap<FetchKey, FetchTask>>,
    queue: mpsc::UnboundedSender<Job>,
    shutdown: watch::Sender<bool>,
}

/// Background fetch orchestrator.
///
/// Cheap to clone; clones share the same task table and worker pool.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Start the orchestrator and its dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: FetchConfig,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let orchestrator = Self::new(config, fetcher, store, clock, queue);
        tokio::spawn(dispatch(Arc::clone(&orchestrator.inner), receiver));
        orchestrator
    }

    fn new(
        config: FetchConfig,
        fetcher: Arc<dyn Fetcher>,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        queue: mpsc::UnboundedSender<Job>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            config,
            fetcher,
            store,
            clock,
            tasks: Mutex::new(HashMap::new()),
            queue,
            shutdown,
        });
        Self { inner }
    }

    /// Request a fetch for `key`. Never blocks on the fetch itself.
    ///
    /// A new key, or a retryable failure whose backoff has elapsed, is queued.
    /// Queued and running keys are coalesced into the existing attempt.
    pub fn schedule(&self, key: FetchKey, experiments: &ExperimentSet) -> ScheduleOutcome {
        if *self.inner.shutdown.borrow() {
            return ScheduleOutcome::Closed;
        }
        let now = self.inner.clock.now();
        let mut tasks = self.inner.tasks.lock().unwrap();
        let previous = tasks.get(&key).map(|task| task.status);

        let outcome = match tasks.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(FetchTask::new(key.clone(), now));
                ScheduleOutcome::Enqueued
            }
            Entry::Occupied(mut slot) => {
                let task = slot.get_mut();
                match task.status {
                    TaskStatus::Pending | TaskStatus::Running => ScheduleOutcome::Coalesced,
                    TaskStatus::Succeeded | TaskStatus::Failed { retryable: false } => {
                        ScheduleOutcome::Settled(task.status)
                    }
                    TaskStatus::Failed { retryable: true } if now >= task.next_eligible_at => {
                        task.status = TaskStatus::Pending;
                        ScheduleOutcome::Enqueued
                    }
                    TaskStatus::Failed { retryable: true } => {
                        ScheduleOutcome::Backoff(task.next_eligible_at)
                    }
                }
            }
        };

        if outcome == ScheduleOutcome::Enqueued && !self.inner.enqueue(&key, experiments) {
            // No job behind the transition; undo it.
            match previous {
                None => {
                    tasks.remove(&key);
                }
                Some(status) => {
                    if let Some(task) = tasks.get_mut(&key) {
                        task.status = status;
                    }
                }
            }
            return ScheduleOutcome::Closed;
        }
        drop(tasks);

        tracing::debug!(
            module_path = %key.module_path,
            version = %key.version,
            outcome = ?outcome,
            "Scheduled fetch"
        );
        outcome
    }

    /// Current state of the task for `key`.
    pub fn status(&self, key: &FetchKey) -> Option<FetchTask> {
        self.inner.snapshot(key)
    }

    /// Snapshot of every known task, ordered by key.
    pub fn tasks(&self) -> Vec<FetchTask> {
        let tasks = self.inner.tasks.lock().unwrap();
        let mut all: Vec<FetchTask> = tasks.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Replay the durable state into memory.
    ///
    /// Successes whose data `is_present` stay settled; successes with missing
    /// data and unfinished entries are queued again; failures keep their
    /// attempt count and backoff. Keys already in memory are left alone.
    pub async fn restore<F>(
        &self,
        experiments: &ExperimentSet,
        is_present: F,
    ) -> Result<RestoreSummary, StorageError>
    where
        F: Fn(&FetchKey) -> bool,
    {
        let states = self.inner.store.load_all().await?;
        let mut summary = RestoreSummary::default();
        let mut requeue = Vec::new();

        {
            let mut tasks = self.inner.tasks.lock().unwrap();
            for state in states {
                let key = FetchKey::new(state.module_path.clone(), state.version.clone());
                if tasks.contains_key(&key) {
                    continue;
                }
                let mut task = FetchTask {
                    key: key.clone(),
                    attempts: state.try_count,
                    status: TaskStatus::Pending,
                    next_eligible_at: state.next_processed_after,
                    last_error: state.error,
                    status_code: state.status,
                    created_at: state.created_at,
                    last_processed_at: state.last_processed_at,
                };
                match state.status {
                    Some(STATUS_OK) if is_present(&key) => {
                        task.status = TaskStatus::Succeeded;
                        summary.succeeded += 1;
                    }
                    Some(STATUS_RETRY) => {
                        task.status = TaskStatus::Failed { retryable: true };
                        summary.retryable += 1;
                    }
                    Some(STATUS_NOT_FOUND | STATUS_MALFORMED | STATUS_FAILED) => {
                        task.status = TaskStatus::Failed { retryable: false };
                        summary.failed += 1;
                    }
                    _ => {
                        requeue.push(key.clone());
                        summary.requeued += 1;
                    }
                }
                tasks.insert(key, task);
            }
        }

        let queued = requeue
            .iter()
            .take_while(|key| self.inner.enqueue(key, experiments))
            .count();
        if queued < requeue.len() {
            tracing::warn!(
                pending = requeue.len() - queued,
                "Fetch queue closed during restore, entries left pending"
            );
        }

        tracing::info!(
            succeeded = summary.succeeded,
            retryable = summary.retryable,
            failed = summary.failed,
            requeued = summary.requeued,
            "Restored fetch state"
        );
        Ok(summary)
    }

    /// Stop accepting work and cancel running fetches.
    ///
    /// Queued tasks stay `Pending`; running tasks become retryable failures.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        tracing::info!("Fetch orchestrator shutting down");
    }
}

impl Inner {
    fn enqueue(&self, key: &FetchKey, experiments: &ExperimentSet) -> bool {
        let job = Job {
            key: key.clone(),
            experiments: Arc::new(experiments.clone()),
        };
        if self.queue.send(job).is_err() {
            tracing::warn!(
                module_path = %key.module_path,
                version = %key.version,
                "Fetch queue closed"
            );
            return false;
        }
        true
    }

    fn snapshot(&self, key: &FetchKey) -> Option<FetchTask> {
        self.tasks.lock().unwrap().get(key).cloned()
    }

    /// Move a pending task to running. Returns the attempt number.
    fn begin(&self, key: &FetchKey) -> Option<u32> {
        if *self.shutdown.borrow() {
            return None;
        }
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(key)?;
        if task.status != TaskStatus::Pending {
            return None;
        }
        task.status = TaskStatus::Running;
        task.attempts += 1;
        Some(task.attempts)
    }

    async fn run(&self, job: Job) {
        let Some(attempt) = self.begin(&job.key) else {
            return;
        };
        if let Some(task) = self.snapshot(&job.key) {
            self.persist(&task).await;
        }

        let started = Instant::now();
        let outcome = self.execute(&job).await;
        let Some(task) = self.finish(&job.key, outcome, self.clock.now()) else {
            return;
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match task.status {
            TaskStatus::Succeeded => tracing::info!(
                module_path = %task.key.module_path,
                version = %task.key.version,
                attempt,
                elapsed_ms,
                "Fetched module version"
            ),
            TaskStatus::Failed { retryable } => tracing::warn!(
                module_path = %task.key.module_path,
                version = %task.key.version,
                attempt,
                elapsed_ms,
                retryable,
                error = task.last_error.as_deref().unwrap_or_default(),
                "Fetch failed"
            ),
            TaskStatus::Pending | TaskStatus::Running => {}
        }

        self.persist(&task).await;
    }

    async fn execute(&self, job: &Job) -> Outcome {
        let budget = Budget::new(self.config.task_timeout);
        let fetcher = Arc::clone(&self.fetcher);
        let key = job.key.clone();
        let experiments = Arc::clone(&job.experiments);
        let attempt_budget = budget.clone();
        let mut handle =
            tokio::spawn(async move { fetcher.fetch(&key, &experiments, &attempt_budget).await });
        let mut shutdown = self.shutdown.subscribe();

        let interrupted = tokio::select! {
            result = &mut handle => return outcome_of(result),
            () = tokio::time::sleep(self.config.task_timeout) => Outcome::Error {
                message: format!("timed out after {}s", self.config.task_timeout.as_secs_f64()),
                permanent_code: None,
            },
            () = cancelled(&mut shutdown) => Outcome::Cancelled,
        };

        budget.cancel();
        let result = match tokio::time::timeout(CANCEL_GRACE, &mut handle).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    module_path = %job.key.module_path,
                    version = %job.key.version,
                    "Fetch ignored cancellation, aborting"
                );
                handle.abort();
                handle.await
            }
        };
        match result {
            Ok(Ok(())) => Outcome::Success,
            _ => interrupted,
        }
    }

    fn finish(&self, key: &FetchKey, outcome: Outcome, now: DateTime<Utc>) -> Option<FetchTask> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.get_mut(key)?;
        task.last_processed_at = Some(now);

        match outcome {
            Outcome::Success => {
                task.status = TaskStatus::Succeeded;
                task.status_code = Some(STATUS_OK);
                task.last_error = None;
            }
            Outcome::Cancelled => {
                // Partial side effects are possible; force a clean retry.
                task.status = TaskStatus::Failed { retryable: true };
                task.status_code = Some(STATUS_RETRY);
                task.last_error = Some("cancelled".to_owned());
                task.next_eligible_at = now;
            }
            Outcome::Error {
                message,
                permanent_code: Some(code),
            } => {
                task.status = TaskStatus::Failed { retryable: false };
                task.status_code = Some(code);
                task.last_error = Some(message);
            }
            Outcome::Error {
                message,
                permanent_code: None,
            } => {
                task.last_error = Some(message);
                if task.attempts >= self.config.max_attempts {
                    task.status = TaskStatus::Failed { retryable: false };
                    task.status_code = Some(STATUS_FAILED);
                } else {
                    task.status = TaskStatus::Failed { retryable: true };
                    task.status_code = Some(STATUS_RETRY);
                    let delay = backoff(
                        task.attempts,
                        self.config.initial_backoff,
                        self.config.max_backoff,
                    );
                    task.next_eligible_at = add_delay(now, delay);
                }
            }
        }
        Some(task.clone())
    }

    async fn persist(&self, task: &FetchTask) {
        let status = match task.status {
            TaskStatus::Pending | TaskStatus::Running => None,
            TaskStatus::Succeeded | TaskStatus::Failed { .. } => task.status_code,
        };
        let state = ModuleVersionState {
            module_path: task.key.module_path.clone(),
            version: task.key.version.clone(),
            status,
            error: task.last_error.clone(),
            try_count: task.attempts,
            created_at: task.created_at,
            last_processed_at: task.last_processed_at,
            next_processed_after: task.next_eligible_at,
        };
        if let Err(err) = self.store.upsert(&state).await {
            tracing::warn!(
                module_path = %state.module_path,
                version = %state.version,
                error = %err,
                "Failed to persist fetch state"
            );
        }
    }
}

async fn dispatch(inner: Arc<Inner>, mut receiver: mpsc::UnboundedReceiver<Job>) {
    let slots = Arc::new(Semaphore::new(inner.config.workers.max(1)));
    let mut shutdown = inner.shutdown.subscribe();

    loop {
        let job = tokio::select! {
            () = cancelled(&mut shutdown) => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        if let Some(task) = inner.snapshot(&job.key) {
            inner.persist(&task).await;
        }

        let permit = tokio::select! {
            () = cancelled(&mut shutdown) => break,
            permit = Arc::clone(&slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let worker = Arc::clone(&inner);
        tokio::spawn(async move {
            worker.run(job).await;
            drop(permit);
        });
    }

    tracing::debug!("Fetch dispatcher stopped");
}

/// Resolves once shutdown has been requested.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn outcome_of(result: Result<Result<(), FetchError>, JoinError>) -> Outcome {
    match result {
        Ok(Ok(())) => Outcome::Success,
        Ok(Err(err)) => Outcome::Error {
            message: err.to_string(),
            permanent_code: permanent_code(&err),
        },
        Err(err) if err.is_panic() => Outcome::Error {
            message: format!("fetch panicked: {}", panic_message(&*err.into_panic())),
            permanent_code: None,
        },
        Err(_) => Outcome::Cancelled,
    }
}

fn permanent_code(err: &FetchError) -> Option<u16> {
    err.is_permanent().then(|| {
        if matches!(err, FetchError::NotFound(_)) {
            STATUS_NOT_FOUND
        } else {
            STATUS_MALFORMED
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use pkgdoc_storage::NullStateStore;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::fetcher::SystemClock;
    use crate::fetcher::testing::ManualClock;

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Succeed,
        Transient,
        Malformed,
        Panic,
        Hang,
    }

    struct FakeFetcher {
        behavior: Box<dyn Fn(&FetchKey) -> Behavior + Send + Sync>,
        delay: Duration,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeFetcher {
        fn new(behavior: impl Fn(&FetchKey) -> Behavior + Send + Sync + 'static) -> Arc<Self> {
            Self::with_delay(behavior, Duration::ZERO)
        }

        fn with_delay(
            behavior: impl Fn(&FetchKey) -> Behavior + Send + Sync + 'static,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                behavior: Box::new(behavior),
                delay,
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(
            &self,
            key: &FetchKey,
            _experiments: &ExperimentSet,
            budget: &Budget,
        ) -> Result<(), FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let result = match (self.behavior)(key) {
                Behavior::Succeed => Ok(()),
                Behavior::Transient => Err(FetchError::Transient("proxy unavailable".to_owned())),
                Behavior::Malformed => {
                    Err(FetchError::Malformed("zip: not a valid zip file".to_owned()))
                }
                Behavior::Panic => panic!("fetcher exploded"),
                Behavior::Hang => {
                    budget.cancelled().await;
                    Err(FetchError::Transient("cancelled".to_owned()))
                }
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }

    /// Runs on a blocking thread, which an abort cannot stop, and checks its
    /// budget between steps.
    struct BlockingFetcher {
        steps: u32,
        step: Duration,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        stored: Arc<AtomicUsize>,
    }

    impl BlockingFetcher {
        fn new(steps: u32, step: Duration) -> Arc<Self> {
            Arc::new(Self {
                steps,
                step,
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
                stored: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    #[async_trait]
    impl Fetcher for BlockingFetcher {
        async fn fetch(
            &self,
            _key: &FetchKey,
            _experiments: &ExperimentSet,
            budget: &Budget,
        ) -> Result<(), FetchError> {
            let (steps, step) = (self.steps, self.step);
            let budget = budget.clone();
            let in_flight = Arc::clone(&self.in_flight);
            let max_in_flight = Arc::clone(&self.max_in_flight);
            let stored = Arc::clone(&self.stored);

            tokio::task::spawn_blocking(move || {
                let running = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(running, Ordering::SeqCst);
                let result = (|| {
                    for _ in 0..steps {
                        budget.remaining()?;
                        std::thread::sleep(step);
                    }
                    budget.remaining()?;
                    stored.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })();
                in_flight.fetch_sub(1, Ordering::SeqCst);
                result
            })
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        initial: Vec<ModuleVersionState>,
        written: Mutex<Vec<ModuleVersionState>>,
    }

    impl RecordingStore {
        fn last_for(&self, key: &FetchKey) -> Option<ModuleVersionState> {
            self.written
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|s| s.module_path == key.module_path && s.version == key.version)
                .cloned()
        }
    }

    #[async_trait]
    impl StateStore for RecordingStore {
        async fn load_all(&self) -> Result<Vec<ModuleVersionState>, StorageError> {
            Ok(self.initial.clone())
        }

        async fn upsert(&self, state: &ModuleVersionState) -> Result<(), StorageError> {
            self.written.lock().unwrap().push(state.clone());
            Ok(())
        }
    }

    fn config() -> FetchConfig {
        FetchConfig {
            workers: 2,
            max_attempts: 3,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(3600),
            task_timeout: Duration::from_secs(5),
        }
    }

    fn start(config: FetchConfig, fetcher: Arc<FakeFetcher>) -> Orchestrator {
        Orchestrator::start(config, fetcher, Arc::new(NullStateStore), Arc::new(SystemClock))
    }

    fn key(path: &str) -> FetchKey {
        FetchKey::new(path, "v1.0.0")
    }

    async fn wait_until(
        orchestrator: &Orchestrator,
        key: &FetchKey,
        done: impl Fn(&FetchTask) -> bool,
    ) -> FetchTask {
        for _ in 0..1000 {
            if let Some(task) = orchestrator.status(key)
                && done(&task)
            {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {key}: {:?}", orchestrator.status(key));
    }

    fn settled(task: &FetchTask) -> bool {
        matches!(task.status, TaskStatus::Succeeded | TaskStatus::Failed { .. })
    }

    #[tokio::test]
    async fn test_schedule_runs_fetch() {
        let fetcher = FakeFetcher::new(|_| Behavior::Succeed);
        let orchestrator = start(config(), Arc::clone(&fetcher));
        let key = key("github.com/a/b");

        assert_eq!(
            orchestrator.schedule(key.clone(), &ExperimentSet::default()),
            ScheduleOutcome::Enqueued
        );
        let task = wait_until(&orchestrator, &key, settled).await;

        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.status_code, Some(STATUS_OK));
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(
            orchestrator.schedule(key, &ExperimentSet::default()),
            ScheduleOutcome::Settled(TaskStatus::Succeeded)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_schedules_coalesce() {
        let fetcher = FakeFetcher::with_delay(|_| Behavior::Succeed, Duration::from_millis(50));
        let orchestrator = start(config(), Arc::clone(&fetcher));
        let key = key("github.com/a/b");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let orchestrator = orchestrator.clone();
                let key = key.clone();
                tokio::spawn(async move { orchestrator.schedule(key, &ExperimentSet::default()) })
            })
            .collect();
        let mut enqueued = 0;
        for handle in handles {
            if handle.await.unwrap() == ScheduleOutcome::Enqueued {
                enqueued += 1;
            }
        }

        wait_until(&orchestrator, &key, settled).await;
        assert_eq!(enqueued, 1);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let fetcher = FakeFetcher::with_delay(|_| Behavior::Succeed, Duration::from_millis(20));
        let orchestrator = start(config(), Arc::clone(&fetcher));

        let keys: Vec<FetchKey> = (0..6).map(|i| key(&format!("example.com/m{i}"))).collect();
        for key in &keys {
            orchestrator.schedule(key.clone(), &ExperimentSet::default());
        }
        for key in &keys {
            wait_until(&orchestrator, key, settled).await;
        }

        assert_eq!(fetcher.calls(), 6);
        assert!(fetcher.max_in_flight.load(Ordering::SeqCst) <= 2);
        assert_eq!(orchestrator.tasks().len(), 6);
    }

    #[tokio::test]
    async fn test_transient_failures_retry_with_backoff_then_settle() {
        let fetcher = FakeFetcher::new(|_| Behavior::Transient);
        let clock = Arc::new(ManualClock::new());
        let orchestrator = Orchestrator::start(
            config(),
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            Arc::new(NullStateStore),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        let key = key("github.com/a/b");
        let experiments = ExperimentSet::default();
        let mut previous: Option<DateTime<Utc>> = None;

        for attempt in 1..=3 {
            assert_eq!(
                orchestrator.schedule(key.clone(), &experiments),
                ScheduleOutcome::Enqueued
            );
            let task =
                wait_until(&orchestrator, &key, |t| t.attempts == attempt && settled(t)).await;

            if attempt < 3 {
                assert_eq!(task.status, TaskStatus::Failed { retryable: true });
                assert_eq!(task.status_code, Some(STATUS_RETRY));
                if let Some(previous) = previous {
                    assert!(task.next_eligible_at > previous);
                }
                previous = Some(task.next_eligible_at);

                assert_eq!(
                    orchestrator.schedule(key.clone(), &experiments),
                    ScheduleOutcome::Backoff(task.next_eligible_at)
                );
                clock.advance(3600);
            } else {
                assert_eq!(task.status, TaskStatus::Failed { retryable: false });
                assert_eq!(task.status_code, Some(STATUS_FAILED));
            }
        }

        assert_eq!(
            orchestrator.schedule(key, &experiments),
            ScheduleOutcome::Settled(TaskStatus::Failed { retryable: false })
        );
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn test_malformed_artifact_fails_permanently_after_one_attempt() {
        let fetcher = FakeFetcher::new(|_| Behavior::Malformed);
        let orchestrator = start(config(), Arc::clone(&fetcher));
        let key = key("github.com/a/b");

        orchestrator.schedule(key.clone(), &ExperimentSet::default());
        let task = wait_until(&orchestrator, &key, settled).await;

        assert_eq!(task.status, TaskStatus::Failed { retryable: false });
        assert_eq!(task.status_code, Some(STATUS_MALFORMED));
        assert!(task.last_error.unwrap().contains("malformed"));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_panic_is_recorded_and_slot_reused() {
        let fetcher = FakeFetcher::new(|key| {
            if key.module_path == "example.com/panics" {
                Behavior::Panic
            } else {
                Behavior::Succeed
            }
        });
        let config = FetchConfig {
            workers: 1,
            ..config()
        };
        let orchestrator = start(config, Arc::clone(&fetcher));
        let bad = key("example.com/panics");
        let good = key("example.com/works");

        orchestrator.schedule(bad.clone(), &ExperimentSet::default());
        orchestrator.schedule(good.clone(), &ExperimentSet::default());

        let failed = wait_until(&orchestrator, &bad, settled).await;
        assert_eq!(failed.status, TaskStatus::Failed { retryable: true });
        assert!(failed.last_error.unwrap().contains("fetcher exploded"));

        let ok = wait_until(&orchestrator, &good, settled).await;
        assert_eq!(ok.status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_attempt_times_out() {
        let fetcher = FakeFetcher::new(|_| Behavior::Hang);
        let config = FetchConfig {
            task_timeout: Duration::from_millis(50),
            ..config()
        };
        let orchestrator = start(config, fetcher);
        let key = key("github.com/a/b");

        orchestrator.schedule(key.clone(), &ExperimentSet::default());
        let task = wait_until(&orchestrator, &key, settled).await;

        assert_eq!(task.status, TaskStatus::Failed { retryable: true });
        assert!(task.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_timed_out_attempt_finishes_before_retry() {
        let fetcher = BlockingFetcher::new(4, Duration::from_millis(25));
        let config = FetchConfig {
            initial_backoff: Duration::ZERO,
            task_timeout: Duration::from_millis(60),
            ..config()
        };
        let orchestrator = Orchestrator::start(
            config,
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            Arc::new(NullStateStore),
            Arc::new(SystemClock),
        );
        let key = key("github.com/a/b");

        orchestrator.schedule(key.clone(), &ExperimentSet::default());
        let first = wait_until(&orchestrator, &key, settled).await;

        assert_eq!(first.status, TaskStatus::Failed { retryable: true });
        assert!(first.last_error.unwrap().contains("timed out"));
        assert_eq!(fetcher.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(fetcher.stored.load(Ordering::SeqCst), 0);

        assert_eq!(
            orchestrator.schedule(key.clone(), &ExperimentSet::default()),
            ScheduleOutcome::Enqueued
        );
        wait_until(&orchestrator, &key, |t| t.attempts == 2 && settled(t)).await;

        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.stored.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_blocking_attempt() {
        let fetcher = BlockingFetcher::new(1000, Duration::from_millis(5));
        let orchestrator = Orchestrator::start(
            config(),
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            Arc::new(NullStateStore),
            Arc::new(SystemClock),
        );
        let key = key("github.com/a/b");

        orchestrator.schedule(key.clone(), &ExperimentSet::default());
        wait_until(&orchestrator, &key, |t| t.status == TaskStatus::Running).await;
        orchestrator.shutdown();
        let task = wait_until(&orchestrator, &key, settled).await;

        assert_eq!(task.last_error.as_deref(), Some("cancelled"));
        assert_eq!(fetcher.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(fetcher.stored.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_closed_queue_leaves_no_orphan_task() {
        let (queue, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        let orchestrator = Orchestrator::new(
            config(),
            FakeFetcher::new(|_| Behavior::Succeed),
            Arc::new(NullStateStore),
            Arc::new(SystemClock),
            queue,
        );
        let key = key("github.com/a/b");

        assert_eq!(
            orchestrator.schedule(key.clone(), &ExperimentSet::default()),
            ScheduleOutcome::Closed
        );
        assert_eq!(orchestrator.status(&key), None);
    }

    #[tokio::test]
    async fn test_closed_queue_keeps_retryable_failure() {
        let (queue, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        let now = Utc::now();
        let store = Arc::new(RecordingStore {
            initial: vec![ModuleVersionState {
                status: Some(STATUS_RETRY),
                try_count: 1,
                next_processed_after: now,
                ..ModuleVersionState::new("github.com/a/b", "v1.0.0", now)
            }],
            written: Mutex::new(Vec::new()),
        });
        let orchestrator = Orchestrator::new(
            config(),
            FakeFetcher::new(|_| Behavior::Succeed),
            store,
            Arc::new(SystemClock),
            queue,
        );
        orchestrator
            .restore(&ExperimentSet::default(), |_| false)
            .await
            .unwrap();
        let key = key("github.com/a/b");

        assert_eq!(
            orchestrator.schedule(key.clone(), &ExperimentSet::default()),
            ScheduleOutcome::Closed
        );
        assert_eq!(
            orchestrator.status(&key).unwrap().status,
            TaskStatus::Failed { retryable: true }
        );
    }

    #[tokio::test]
    async fn test_restore_with_closed_queue_leaves_entries_pending() {
        let (queue, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        let now = Utc::now();
        let store = Arc::new(RecordingStore {
            initial: vec![ModuleVersionState::new("github.com/a/b", "v1.0.0", now)],
            written: Mutex::new(Vec::new()),
        });
        let orchestrator = Orchestrator::new(
            config(),
            FakeFetcher::new(|_| Behavior::Succeed),
            store,
            Arc::new(SystemClock),
            queue,
        );

        let summary = orchestrator
            .restore(&ExperimentSet::default(), |_| false)
            .await
            .unwrap();

        assert_eq!(summary.requeued, 1);
        assert_eq!(
            orchestrator.status(&key("github.com/a/b")).unwrap().status,
            TaskStatus::Pending
        );
    }

    #[test]
    fn test_permanent_codes() {
        assert_eq!(permanent_code(&FetchError::Transient("reset".to_owned())), None);
        assert_eq!(
            permanent_code(&FetchError::NotFound("gone".to_owned())),
            Some(STATUS_NOT_FOUND)
        );
        assert_eq!(
            permanent_code(&FetchError::Malformed("bad zip".to_owned())),
            Some(STATUS_MALFORMED)
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_and_keeps_queued_pending() {
        let fetcher = FakeFetcher::new(|_| Behavior::Hang);
        let config = FetchConfig {
            workers: 1,
            ..config()
        };
        let orchestrator = start(config, fetcher);
        let running = key("example.com/running");
        let queued = key("example.com/queued");

        orchestrator.schedule(running.clone(), &ExperimentSet::default());
        orchestrator.schedule(queued.clone(), &ExperimentSet::default());
        wait_until(&orchestrator, &running, |t| t.status == TaskStatus::Running).await;

        orchestrator.shutdown();
        let task = wait_until(&orchestrator, &running, settled).await;

        assert_eq!(task.status, TaskStatus::Failed { retryable: true });
        assert_eq!(task.last_error.as_deref(), Some("cancelled"));
        assert_eq!(orchestrator.status(&queued).unwrap().status, TaskStatus::Pending);
        assert_eq!(
            orchestrator.schedule(key("example.com/new"), &ExperimentSet::default()),
            ScheduleOutcome::Closed
        );
    }

    #[tokio::test]
    async fn test_outcomes_are_persisted() {
        let fetcher = FakeFetcher::new(|_| Behavior::Succeed);
        let store = Arc::new(RecordingStore::default());
        let orchestrator = Orchestrator::start(
            config(),
            fetcher,
            Arc::clone(&store) as Arc<dyn StateStore>,
            Arc::new(SystemClock),
        );
        let key = key("github.com/a/b");

        orchestrator.schedule(key.clone(), &ExperimentSet::default());
        wait_until(&orchestrator, &key, settled).await;

        // Persisted after the in-memory transition; give the worker a moment.
        for _ in 0..100 {
            if store.last_for(&key).is_some_and(|s| s.status.is_some()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let state = store.last_for(&key).unwrap();
        assert_eq!(state.status, Some(STATUS_OK));
        assert_eq!(state.try_count, 1);
        assert!(state.last_processed_at.is_some());
        assert_eq!(store.written.lock().unwrap()[0].status, None);
    }

    #[tokio::test]
    async fn test_restore_replays_durable_state() {
        let now = Utc::now();
        let state = |path: &str, status: Option<u16>, try_count: u32| ModuleVersionState {
            status,
            try_count,
            next_processed_after: now + chrono::TimeDelta::hours(1),
            ..ModuleVersionState::new(path, "v1.0.0", now)
        };
        let store = Arc::new(RecordingStore {
            initial: vec![
                state("example.com/present", Some(STATUS_OK), 1),
                state("example.com/missing", Some(STATUS_OK), 1),
                state("example.com/retry", Some(STATUS_RETRY), 2),
                state("example.com/bad", Some(STATUS_MALFORMED), 1),
                state("example.com/unfinished", None, 0),
            ],
            written: Mutex::new(Vec::new()),
        });
        let fetcher = FakeFetcher::new(|_| Behavior::Succeed);
        let orchestrator = Orchestrator::start(
            config(),
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            store,
            Arc::new(SystemClock),
        );

        let summary = orchestrator
            .restore(&ExperimentSet::default(), |k| k.module_path == "example.com/present")
            .await
            .unwrap();
        assert_eq!(
            summary,
            RestoreSummary {
                succeeded: 1,
                retryable: 1,
                failed: 1,
                requeued: 2,
            }
        );

        for path in ["example.com/missing", "example.com/unfinished"] {
            let task =
                wait_until(&orchestrator, &key(path), |t| t.status == TaskStatus::Succeeded).await;
            assert!(task.attempts >= 1);
        }
        assert_eq!(fetcher.calls(), 2);

        let retry = orchestrator.status(&key("example.com/retry")).unwrap();
        assert_eq!(retry.status, TaskStatus::Failed { retryable: true });
        assert_eq!(retry.attempts, 2);
        assert!(matches!(
            orchestrator.schedule(key("example.com/retry"), &ExperimentSet::default()),
            ScheduleOutcome::Backoff(_)
        ));
        assert_eq!(
            orchestrator.status(&key("example.com/bad")).unwrap().status,
            TaskStatus::Failed { retryable: false }
        );
    }
}
