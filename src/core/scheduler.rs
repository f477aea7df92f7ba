//! Priority scheduler with context, dependency and backoff admission.
//!
//! Pending work lives in a [`TaskQueue`] ordered by priority, then earliest
//! `scheduled_at`, then admission order. A single scheduling loop polls every
//! `tick_interval` (or sooner, when woken by `add_task`) and on each iteration:
//!
//! 1. reaps finished executions and applies their outcomes,
//! 2. aborts executions that exceeded their timeout,
//! 3. probes the context and unparks WAITING tasks when it changed,
//! 4. pops entries while below `max_concurrent_tasks`, launching ready ones, parking
//!    inadmissible ones, cancelling ones whose dependency failed, and pushing the rest
//!    back unchanged.
//!
//! Lifecycle transitions are published on the [`EventBus`] and, when configured, sent to
//! an [`AuditSink`](crate::core::AuditSink).

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::audit::{build_audit_event, record_to, AuditComponent, SharedAuditSink};
use super::error::SchedulerError;
use super::event::{Event, EventPriority, EventType};
use super::event_bus::EventBus;
use super::executor::{AdmissibleKinds, ContextProbe, TaskExecutor};
use super::task::{ScheduledTask, Task, TaskId, TaskOptions, TaskOutcome, TaskStatus};
use crate::config::SchedulerConfig;
use crate::infra::queue::TaskQueue;

const EVENT_SOURCE: &str = "scheduler";
/// Upper bound on the poll interval used while waiting for executions during `stop`.
const STOP_POLL: Duration = Duration::from_millis(25);

/// Lifecycle state of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Constructed, loop not started.
    Idle,
    /// Loop running.
    Running,
    /// Loop running, dispatch suspended.
    Paused,
    /// `stop` in progress.
    Stopping,
    /// Stopped.
    Stopped,
}

/// Point-in-time scheduler status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Lifecycle state.
    pub state: SchedulerState,
    /// Tasks in the queue.
    pub queue_size: usize,
    /// Tasks parked on a context mismatch.
    pub waiting_count: usize,
    /// Tasks executing.
    pub running_count: usize,
    /// Tasks completed.
    pub completed_count: u64,
    /// Tasks failed.
    pub failed_count: u64,
    /// Tasks cancelled.
    pub cancelled_count: u64,
    /// Retries scheduled.
    pub retried_count: u64,
}

#[derive(Default)]
struct SchedulerCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    retried: AtomicU64,
}

struct ParkedTask {
    entry: ScheduledTask,
    parked_at: Instant,
}

struct RunningTask {
    entry: ScheduledTask,
    handle: JoinHandle<TaskOutcome>,
    started_at: Instant,
    timeout: Duration,
}

/// Everything the scheduler owns about individual tasks, guarded by one lock.
struct TaskTable {
    queue: Box<dyn TaskQueue + Send>,
    parked: Vec<ParkedTask>,
    running: HashMap<TaskId, RunningTask>,
    completed: HashSet<TaskId>,
    /// Failed or cancelled; their dependents are cancelled.
    abandoned: HashSet<TaskId>,
    statuses: HashMap<TaskId, TaskStatus>,
    /// Finished ids, oldest first, bounded by `max_task_history`.
    finished: VecDeque<TaskId>,
    last_context: Option<AdmissibleKinds>,
}

impl TaskTable {
    fn is_live(&self, task_id: &str) -> bool {
        self.statuses
            .get(task_id)
            .is_some_and(|status| !status.is_terminal())
    }

    fn pending(&self) -> usize {
        self.queue.len() + self.parked.len()
    }

    /// Record a terminal status and forget the oldest finished tasks beyond `retain`.
    fn finish(&mut self, task_id: &TaskId, status: TaskStatus, retain: usize) {
        if status == TaskStatus::Completed {
            self.completed.insert(task_id.clone());
        } else {
            self.abandoned.insert(task_id.clone());
        }
        self.statuses.insert(task_id.clone(), status);
        self.finished.push_back(task_id.clone());

        while self.finished.len() > retain {
            let Some(oldest) = self.finished.pop_front() else {
                break;
            };
            self.completed.remove(&oldest);
            self.abandoned.remove(&oldest);
            self.statuses.remove(&oldest);
        }
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    bus: Arc<EventBus>,
    executor: Arc<dyn TaskExecutor>,
    probe: Arc<dyn ContextProbe>,
    audit: Option<SharedAuditSink>,
    table: Mutex<TaskTable>,
    state: Mutex<SchedulerState>,
    counters: SchedulerCounters,
    wakeup: Notify,
    stop_requested: AtomicBool,
    seq: AtomicU64,
    /// Serialises scheduling iterations between the loop and `run_once` callers.
    tick_guard: tokio::sync::Mutex<()>,
}

/// Priority scheduler running tasks through a [`TaskExecutor`].
pub struct PriorityScheduler {
    inner: Arc<SchedulerInner>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PriorityScheduler {
    /// Create a scheduler. The loop is not started until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidConfig` if the configuration is invalid.
    pub fn new(
        config: SchedulerConfig,
        bus: Arc<EventBus>,
        executor: Arc<dyn TaskExecutor>,
        probe: Arc<dyn ContextProbe>,
        queue: Box<dyn TaskQueue + Send>,
        audit: Option<SharedAuditSink>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                bus,
                executor,
                probe,
                audit,
                table: Mutex::new(TaskTable {
                    queue,
                    parked: Vec::new(),
                    running: HashMap::new(),
                    completed: HashSet::new(),
                    abandoned: HashSet::new(),
                    statuses: HashMap::new(),
                    finished: VecDeque::new(),
                    last_context: None,
                }),
                state: Mutex::new(SchedulerState::Idle),
                counters: SchedulerCounters::default(),
                wakeup: Notify::new(),
                stop_requested: AtomicBool::new(false),
                seq: AtomicU64::new(0),
                tick_guard: tokio::sync::Mutex::new(()),
            }),
            loop_handle: Mutex::new(None),
        })
    }

    /// Submit a task.
    ///
    /// Without an explicit priority the task gets
    /// `base(level) + bonus(kind) + base * context_boost_factor` (the last term only when
    /// its kind is admissible right now).
    ///
    /// # Errors
    ///
    /// - `DuplicateTask` if a queued, waiting or running task has the same id.
    /// - `QueueFull` if `max_queue_depth` pending tasks already exist.
    /// - `InvalidState` once the scheduler is stopping or stopped.
    pub async fn add_task(
        &self,
        task: Task,
        options: TaskOptions,
    ) -> Result<TaskStatus, SchedulerError> {
        if matches!(
            self.state(),
            SchedulerState::Stopping | SchedulerState::Stopped
        ) {
            return Err(SchedulerError::InvalidState("scheduler is stopped".into()));
        }

        let priority = match options.priority {
            Some(priority) => priority,
            None => self.inner.compute_priority(&task).await,
        };
        let entry = ScheduledTask {
            task: Arc::new(task),
            priority,
            scheduled_at: options.scheduled_at.unwrap_or_else(Instant::now),
            retry_count: 0,
            last_attempt: None,
            dependencies: options.dependencies,
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
        };
        let task_id = entry.id().clone();
        let event = task_event(EventType::TaskQueued, &entry.task)
            .with_payload("priority", priority)
            .with_payload("dependencies", entry.dependencies.len());

        {
            let mut table = self.inner.table.lock();
            if table.is_live(&task_id) {
                return Err(SchedulerError::DuplicateTask(task_id));
            }
            if table.pending() >= self.inner.config.max_queue_depth {
                return Err(SchedulerError::QueueFull(format!(
                    "{} tasks pending",
                    table.pending()
                )));
            }
            table.queue.enqueue(entry)?;
            table.completed.remove(&task_id);
            table.abandoned.remove(&task_id);
            table.finished.retain(|id| id != &task_id);
            table.statuses.insert(task_id.clone(), TaskStatus::Queued);
        }

        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.audit(&task_id, &TaskStatus::Queued, None);
        debug!(task_id = %task_id, priority, "task queued");
        self.inner.bus.publish(event).await;
        self.inner.wakeup.notify_one();
        Ok(TaskStatus::Queued)
    }

    /// Run one scheduling iteration. Does nothing while paused or stopped.
    pub async fn run_once(&self) {
        self.inner.tick().await;
    }

    /// Start the scheduling loop on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the loop is already running.
    pub fn start(&self) -> Result<(), SchedulerError> {
        {
            let mut state = self.inner.state.lock();
            if !matches!(*state, SchedulerState::Idle | SchedulerState::Stopped) {
                return Err(SchedulerError::InvalidState(format!(
                    "cannot start from {:?}",
                    *state
                )));
            }
            *state = SchedulerState::Running;
        }
        self.inner.stop_requested.store(false, Ordering::Release);
        *self.loop_handle.lock() = Some(tokio::spawn(scheduling_loop(Arc::clone(&self.inner))));

        info!(
            max_concurrent_tasks = self.inner.config.max_concurrent_tasks,
            tick_interval_ms = self.inner.config.tick_interval_ms,
            "scheduler started"
        );
        self.inner
            .bus
            .try_publish(Event::new(EventType::SchedulerStarted, EVENT_SOURCE));
        Ok(())
    }

    /// Stop the loop, give running executions `stop_grace` to finish, then abort the rest
    /// and mark them cancelled.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            if !matches!(*state, SchedulerState::Running | SchedulerState::Paused) {
                return;
            }
            *state = SchedulerState::Stopping;
        }
        self.inner.stop_requested.store(true, Ordering::Release);
        self.inner.wakeup.notify_one();

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduling loop ended abnormally");
            }
        }

        let deadline = Instant::now() + self.inner.config.stop_grace();
        loop {
            let events = self.inner.reap_finished().await;
            self.inner.emit(events).await;
            if self.inner.table.lock().running.is_empty() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep((deadline - now).min(STOP_POLL)).await;
        }

        let mut events = Vec::new();
        let aborted = {
            let mut table = self.inner.table.lock();
            let remaining: Vec<RunningTask> = table.running.drain().map(|(_, r)| r).collect();
            let aborted = remaining.len();
            for running in remaining {
                running.handle.abort();
                self.inner.cancel_entry(
                    &mut table,
                    &running.entry.task,
                    "scheduler stopped",
                    &mut events,
                );
            }
            aborted
        };
        self.inner.emit(events).await;

        *self.inner.state.lock() = SchedulerState::Stopped;
        info!(aborted, "scheduler stopped");
        self.inner
            .bus
            .publish(Event::new(EventType::SchedulerStopped, EVENT_SOURCE))
            .await;
    }

    /// Suspend dispatch. Running executions continue. Returns whether the state changed.
    pub fn pause(&self) -> bool {
        let paused = self.inner.transition(SchedulerState::Running, SchedulerState::Paused);
        if paused {
            info!("scheduler paused");
            self.inner
                .bus
                .try_publish(Event::new(EventType::SchedulerPaused, EVENT_SOURCE));
        }
        paused
    }

    /// Resume dispatch after [`pause`](Self::pause). Returns whether the state changed.
    pub fn resume(&self) -> bool {
        let resumed = self.inner.transition(SchedulerState::Paused, SchedulerState::Running);
        if resumed {
            info!("scheduler resumed");
            self.inner
                .bus
                .try_publish(Event::new(EventType::SchedulerResumed, EVENT_SOURCE));
            self.inner.wakeup.notify_one();
        }
        resumed
    }

    /// Cancel a queued, waiting or running task. Returns `false` if it is not live.
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        let mut events = Vec::new();
        let cancelled = {
            let mut table = self.inner.table.lock();
            let task = if let Some(pos) = table.parked.iter().position(|p| p.entry.id() == task_id)
            {
                Some(table.parked.swap_remove(pos).entry.task)
            } else if let Some(running) = table.running.remove(task_id) {
                running.handle.abort();
                Some(running.entry.task)
            } else {
                match table.queue.remove(task_id) {
                    Ok(entry) => entry.map(|e| e.task),
                    Err(e) => {
                        warn!(task_id, error = %e, "queue removal failed");
                        None
                    }
                }
            };
            if let Some(task) = &task {
                self.inner
                    .cancel_entry(&mut table, task, "cancelled by request", &mut events);
            }
            task.is_some()
        };
        self.inner.emit(events).await;
        cancelled
    }

    /// Status of a task, if it was ever submitted.
    #[must_use]
    pub fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.inner.table.lock().statuses.get(task_id).cloned()
    }

    /// Whether a task has completed successfully.
    #[must_use]
    pub fn is_completed(&self, task_id: &str) -> bool {
        self.inner.table.lock().completed.contains(task_id)
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.inner.state.lock()
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        let (queue_size, waiting_count, running_count) = {
            let table = self.inner.table.lock();
            (table.queue.len(), table.parked.len(), table.running.len())
        };
        let c = &self.inner.counters;
        SchedulerStatus {
            state: self.state(),
            queue_size,
            waiting_count,
            running_count,
            completed_count: c.completed.load(Ordering::Relaxed),
            failed_count: c.failed.load(Ordering::Relaxed),
            cancelled_count: c.cancelled.load(Ordering::Relaxed),
            retried_count: c.retried.load(Ordering::Relaxed),
        }
    }
}

impl Drop for PriorityScheduler {
    fn drop(&mut self) {
        self.inner.stop_requested.store(true, Ordering::Release);
        if let Some(handle) = self.loop_handle.lock().take() {
            handle.abort();
        }
    }
}

impl SchedulerInner {
    fn transition(&self, from: SchedulerState, to: SchedulerState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    async fn compute_priority(&self, task: &Task) -> i64 {
        let base = self.config.base_for(task.level);
        let bonus = self.config.bonus_for(&task.kind);
        let suitability = if self.probe.admissible_kinds().await.admits(&task.kind) {
            (base as f64 * self.config.context_boost_factor).round() as i64
        } else {
            0
        };
        base + bonus + suitability
    }

    async fn tick(&self) {
        let _guard = self.tick_guard.lock().await;
        if !matches!(*self.state.lock(), SchedulerState::Running | SchedulerState::Idle) {
            return;
        }

        let mut events = self.reap_finished().await;
        self.enforce_timeouts(&mut events);

        // A pause triggered by a failure above takes effect before dispatch.
        if *self.state.lock() == SchedulerState::Paused {
            self.emit(events).await;
            return;
        }

        let kinds = self.probe.admissible_kinds().await;
        {
            let mut table = self.table.lock();
            self.refresh_context(&mut table, &kinds, &mut events);
            self.dispatch_ready(&mut table, &kinds, &mut events);
        }
        self.emit(events).await;
    }

    /// Collect finished executions and apply their outcomes.
    async fn reap_finished(&self) -> Vec<Event> {
        let finished: Vec<RunningTask> = {
            let mut table = self.table.lock();
            let ids: Vec<TaskId> = table
                .running
                .iter()
                .filter(|(_, running)| running.handle.is_finished())
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| table.running.remove(id)).collect()
        };

        let mut outcomes = Vec::with_capacity(finished.len());
        for running in finished {
            let outcome = match running.handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => TaskOutcome::Cancelled,
                Err(e) => TaskOutcome::Failed(format!("task execution aborted: {e}")),
            };
            debug!(
                task_id = %running.entry.id(),
                elapsed_ms = u64::try_from(running.started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
                ?outcome,
                "task execution finished"
            );
            outcomes.push((running.entry, outcome));
        }

        let mut events = Vec::new();
        if !outcomes.is_empty() {
            let mut table = self.table.lock();
            for (entry, outcome) in outcomes {
                self.apply_outcome(&mut table, entry, outcome, &mut events);
            }
        }
        events
    }

    fn enforce_timeouts(&self, events: &mut Vec<Event>) {
        let mut table = self.table.lock();
        let now = Instant::now();
        let expired: Vec<TaskId> = table
            .running
            .iter()
            .filter(|(_, r)| now.saturating_duration_since(r.started_at) > r.timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for task_id in expired {
            let Some(running) = table.running.remove(&task_id) else {
                continue;
            };
            running.handle.abort();
            let timeout_ms = u64::try_from(running.timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(task_id = %task_id, timeout_ms, "task execution timed out");
            events.push(
                task_event(EventType::TaskTimeout, &running.entry.task)
                    .with_payload("timeout_ms", timeout_ms),
            );
            self.fail_entry(
                &mut table,
                &running.entry.task,
                &format!("execution timed out after {timeout_ms}ms"),
                "task_timeout",
                events,
            );
        }
    }

    fn refresh_context(
        &self,
        table: &mut TaskTable,
        kinds: &AdmissibleKinds,
        events: &mut Vec<Event>,
    ) {
        let now = Instant::now();
        let changed = table.last_context.as_ref() != Some(kinds);
        let recheck = self.config.context_recheck_interval();

        let parked = std::mem::take(&mut table.parked);
        let mut unparked = 0usize;
        for parked_task in parked {
            let due = changed || now.saturating_duration_since(parked_task.parked_at) >= recheck;
            if !due {
                table.parked.push(parked_task);
                continue;
            }
            let task_id = parked_task.entry.id().clone();
            match table.queue.enqueue(parked_task.entry) {
                Ok(()) => {
                    table.statuses.insert(task_id, TaskStatus::Queued);
                    unparked += 1;
                }
                Err(e) => error!(task_id = %task_id, error = %e, "failed to unpark task"),
            }
        }

        if changed {
            let previous = table.last_context.replace(kinds.clone());
            if previous.is_some() {
                info!(unparked, "context changed");
                events.push(
                    Event::new(EventType::ContextChanged, EVENT_SOURCE)
                        .with_payload("admissible_kinds", describe_kinds(kinds))
                        .with_payload("unparked", unparked),
                );
            }
        } else if unparked > 0 {
            debug!(unparked, "parked tasks re-examined");
        }
    }

    fn dispatch_ready(
        &self,
        table: &mut TaskTable,
        kinds: &AdmissibleKinds,
        events: &mut Vec<Event>,
    ) {
        let now = Instant::now();
        let retry_delay = self.config.retry_delay();
        let mut deferred = Vec::new();
        let mut launches = Vec::new();

        while table.running.len() + launches.len() < self.config.max_concurrent_tasks {
            let entry = match table.queue.dequeue() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "queue dequeue failed");
                    break;
                }
            };

            if let Some(dependency) = entry
                .dependencies
                .iter()
                .find(|dep| table.abandoned.contains(*dep))
                .cloned()
            {
                let reason = format!("dependency {dependency} did not complete");
                self.cancel_entry(table, &entry.task, &reason, events);
                continue;
            }

            let ready = entry.scheduled_at <= now
                && entry.dependencies.iter().all(|dep| table.completed.contains(dep))
                && entry.backoff_elapsed(now, retry_delay);
            if !ready {
                deferred.push(entry);
                continue;
            }

            if !kinds.admits(&entry.task.kind) {
                debug!(task_id = %entry.id(), kind = %entry.task.kind, "task parked on context");
                table.statuses.insert(entry.id().clone(), TaskStatus::Waiting);
                self.audit(entry.id(), &TaskStatus::Waiting, None);
                table.parked.push(ParkedTask {
                    entry,
                    parked_at: now,
                });
                continue;
            }

            launches.push(entry);
        }

        for entry in deferred {
            let task_id = entry.id().clone();
            if let Err(e) = table.queue.enqueue(entry) {
                error!(task_id = %task_id, error = %e, "failed to re-queue deferred task");
            }
        }

        for entry in launches {
            self.launch(table, entry, now, events);
        }
    }

    fn launch(
        &self,
        table: &mut TaskTable,
        mut entry: ScheduledTask,
        now: Instant,
        events: &mut Vec<Event>,
    ) {
        entry.last_attempt = Some(now);
        let task = Arc::clone(&entry.task);
        let executor = Arc::clone(&self.executor);
        let handle = tokio::spawn(async move {
            AssertUnwindSafe(executor.execute(&task))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| TaskOutcome::Failed("task execution panicked".into()))
        });

        let timeout = entry.task.timeout.unwrap_or_else(|| self.config.task_timeout());
        let task_id = entry.id().clone();
        info!(
            task_id = %task_id,
            priority = entry.priority,
            retry_count = entry.retry_count,
            "task started"
        );
        events.push(
            task_event(EventType::TaskStarted, &entry.task)
                .with_payload("retry_count", entry.retry_count),
        );
        table.statuses.insert(task_id.clone(), TaskStatus::Running);
        self.audit(&task_id, &TaskStatus::Running, None);
        table.running.insert(
            task_id,
            RunningTask {
                entry,
                handle,
                started_at: now,
                timeout,
            },
        );
    }

    fn apply_outcome(
        &self,
        table: &mut TaskTable,
        mut entry: ScheduledTask,
        outcome: TaskOutcome,
        events: &mut Vec<Event>,
    ) {
        let task_id = entry.id().clone();
        match outcome {
            TaskOutcome::Success => {
                table.finish(&task_id, TaskStatus::Completed, self.config.max_task_history);
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                self.audit(&task_id, &TaskStatus::Completed, None);
                info!(task_id = %task_id, retry_count = entry.retry_count, "task completed");
                events.push(
                    task_event(EventType::TaskCompleted, &entry.task)
                        .with_payload("retry_count", entry.retry_count),
                );
            }
            TaskOutcome::Retry => {
                let max_retries = entry
                    .task
                    .max_retries
                    .unwrap_or(self.config.max_retry_count);
                if entry.retry_count >= max_retries {
                    let reason = format!("retries exhausted after {max_retries} retries");
                    self.fail_entry(table, &entry.task, &reason, "retries_exhausted", events);
                    return;
                }
                if table.queue.len() >= table.queue.max_depth() {
                    self.fail_entry(
                        table,
                        &entry.task,
                        "queue full while scheduling retry",
                        "queue_full",
                        events,
                    );
                    return;
                }

                entry.retry_count += 1;
                entry.scheduled_at = Instant::now() + self.config.retry_delay();
                let retry_count = entry.retry_count;
                let event = task_event(EventType::TaskRetrying, &entry.task)
                    .with_payload("retry_count", retry_count);
                match table.queue.enqueue(entry) {
                    Ok(()) => {
                        table.statuses.insert(task_id.clone(), TaskStatus::Queued);
                        self.counters.retried.fetch_add(1, Ordering::Relaxed);
                        self.audit(
                            &task_id,
                            &TaskStatus::Queued,
                            Some(format!("retry {retry_count}/{max_retries}")),
                        );
                        info!(task_id = %task_id, retry_count, max_retries, "task retry scheduled");
                        events.push(event);
                    }
                    Err(e) => {
                        error!(task_id = %task_id, error = %e, "failed to re-queue retry");
                        let reason = format!("retry could not be queued: {e}");
                        table.finish(
                            &task_id,
                            TaskStatus::Failed(reason),
                            self.config.max_task_history,
                        );
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            TaskOutcome::Failed(reason) => {
                self.fail_entry(table, &entry.task, &reason, "task_failure", events);
            }
            TaskOutcome::Cancelled => {
                self.cancel_entry(table, &entry.task, "cancelled by executor", events);
            }
        }
    }

    fn fail_entry(
        &self,
        table: &mut TaskTable,
        task: &Task,
        reason: &str,
        error_type: &str,
        events: &mut Vec<Event>,
    ) {
        let status = TaskStatus::Failed(reason.to_string());
        table.finish(&task.id, status.clone(), self.config.max_task_history);
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        self.audit(&task.id, &status, Some(reason.to_string()));
        warn!(task_id = %task.id, error_type, error = reason, "task failed");
        events.push(
            task_event(EventType::TaskFailed, task)
                .with_priority(EventPriority::High)
                .with_payload("error_type", error_type)
                .with_payload("error", reason),
        );

        if self.config.pause_on_error
            && self.transition(SchedulerState::Running, SchedulerState::Paused)
        {
            warn!(task_id = %task.id, "scheduler paused after task failure");
            events.push(
                Event::new(EventType::SchedulerPaused, EVENT_SOURCE)
                    .with_payload("task_id", task.id.as_str()),
            );
        }
    }

    fn cancel_entry(
        &self,
        table: &mut TaskTable,
        task: &Task,
        reason: &str,
        events: &mut Vec<Event>,
    ) {
        let status = TaskStatus::Cancelled(reason.to_string());
        table.finish(&task.id, status.clone(), self.config.max_task_history);
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        self.audit(&task.id, &status, Some(reason.to_string()));
        info!(task_id = %task.id, reason, "task cancelled");
        events.push(task_event(EventType::TaskCancelled, task).with_payload("reason", reason));
    }

    fn audit(&self, task_id: &str, status: &TaskStatus, detail: Option<String>) {
        record_to(
            self.audit.as_ref(),
            build_audit_event(task_id, AuditComponent::Scheduler, status_name(status), detail),
        );
    }

    async fn emit(&self, events: Vec<Event>) {
        for event in events {
            self.bus.publish(event).await;
        }
    }
}

async fn scheduling_loop(inner: Arc<SchedulerInner>) {
    debug!("scheduling loop started");
    let tick = inner.config.tick_interval();
    loop {
        if inner.stop_requested.load(Ordering::Acquire) {
            break;
        }
        inner.tick().await;
        let _ = tokio::time::timeout(tick, inner.wakeup.notified()).await;
    }
    debug!("scheduling loop exiting");
}

fn task_event(event_type: EventType, task: &Task) -> Event {
    Event::new(event_type, EVENT_SOURCE)
        .with_payload("task_id", task.id.as_str())
        .with_payload("task_name", task.name.as_str())
        .with_payload("kind", task.kind.as_str())
}

const fn status_name(status: &TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "queued",
        TaskStatus::Waiting => "waiting",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed(_) => "failed",
        TaskStatus::Cancelled(_) => "cancelled",
    }
}

fn describe_kinds(kinds: &AdmissibleKinds) -> Value {
    match kinds {
        AdmissibleKinds::Any => Value::from("any"),
        AdmissibleKinds::Only(set) => {
            let mut names: Vec<&str> = set.iter().map(|k| k.as_str()).collect();
            names.sort_unstable();
            Value::from(names)
        }
    }
}
