//! Integration tests for the PriorityScheduler
//!
//! These tests validate:
//! - Priority ordering under bounded concurrency
//! - Dependency, backoff and context admission
//! - Retry, timeout and failure handling
//! - Pause, cancellation and shutdown semantics

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use prometheus_task_coordinator::builders::SchedulerBuilder;
use prometheus_task_coordinator::config::{EventBusConfig, SchedulerConfig};
use prometheus_task_coordinator::core::{
    handler_fn, AdmissibleKinds, ContextProbe, Event, EventBus, EventPriority, EventType,
    PriorityLevel, PriorityScheduler, SchedulerError, SchedulerState, StaticContextProbe,
    SubscribeOptions, Task, TaskAction, TaskExecutor, TaskId, TaskOptions, TaskOutcome,
    TaskStatus,
};
use serde_json::json;

// ============================================================================
// TEST DOUBLES
// ============================================================================

/// Executor that returns scripted outcomes per task and records start order.
///
/// `Wait` actions sleep before returning; a `Custom` action named `panic` panics.
/// Unscripted tasks succeed.
#[derive(Default)]
struct ScriptedExecutor {
    scripts: Mutex<HashMap<TaskId, VecDeque<TaskOutcome>>>,
    started: Mutex<Vec<TaskId>>,
}

impl ScriptedExecutor {
    fn script(&self, task_id: &str, outcomes: Vec<TaskOutcome>) {
        self.scripts
            .lock()
            .insert(task_id.to_string(), outcomes.into_iter().collect());
    }

    fn started(&self) -> Vec<TaskId> {
        self.started.lock().clone()
    }

    fn runs(&self, task_id: &str) -> usize {
        self.started.lock().iter().filter(|id| *id == task_id).count()
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, task: &Task) -> TaskOutcome {
        self.started.lock().push(task.id.clone());
        match &task.action {
            TaskAction::Wait { duration_ms } => {
                tokio::time::sleep(Duration::from_millis(*duration_ms)).await;
            }
            TaskAction::Custom { name, .. } if name == "panic" => panic!("executor bug"),
            _ => {}
        }
        self.scripts
            .lock()
            .get_mut(&task.id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(TaskOutcome::Success)
    }
}

struct Harness {
    bus: Arc<EventBus>,
    executor: Arc<ScriptedExecutor>,
    scheduler: PriorityScheduler,
}

impl Harness {
    async fn shutdown(self) {
        self.scheduler.stop().await;
        self.bus.stop().await;
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn fast_config() -> SchedulerConfig {
    SchedulerConfig::new()
        .with_tick_interval(Duration::from_millis(10))
        .with_retry_delay(Duration::from_millis(20))
        .with_stop_grace(Duration::from_millis(100))
}

fn harness(config: SchedulerConfig, probe: Option<Arc<dyn ContextProbe>>) -> Harness {
    let bus = Arc::new(
        EventBus::new(
            EventBusConfig::new()
                .with_worker_count(2)
                .with_poll_interval(Duration::from_millis(10)),
        )
        .unwrap(),
    );
    bus.start().unwrap();
    let executor = Arc::new(ScriptedExecutor::default());

    let mut builder = SchedulerBuilder::new(config)
        .with_bus(Arc::clone(&bus))
        .with_executor(Arc::clone(&executor) as Arc<dyn TaskExecutor>);
    if let Some(probe) = probe {
        builder = builder.with_probe(probe);
    }
    let scheduler = builder.build().unwrap();
    Harness {
        bus,
        executor,
        scheduler,
    }
}

fn task(id: &str, kind: &str) -> Task {
    Task::new(id, format!("task {id}"), kind, TaskAction::Click { x: 10, y: 20 })
}

fn slow_task(id: &str, millis: u64) -> Task {
    Task::new(
        id,
        format!("task {id}"),
        "daily",
        TaskAction::Wait { duration_ms: millis },
    )
}

fn capture(bus: &EventBus, event_type: EventType) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe(
        event_type,
        handler_fn(move |event| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(event);
                Ok(())
            }
        }),
        SubscribeOptions::new(),
    );
    seen
}

async fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

async fn wait_for_status(
    scheduler: &PriorityScheduler,
    task_id: &str,
    pred: impl Fn(&TaskStatus) -> bool,
) -> bool {
    wait_for(
        || scheduler.task_status(task_id).as_ref().is_some_and(&pred),
        Duration::from_secs(3),
    )
    .await
}

// ============================================================================
// ORDERING
// ============================================================================

#[tokio::test]
async fn test_tasks_run_in_priority_order() {
    let h = harness(fast_config().with_max_concurrent_tasks(1), None);

    for (id, priority) in [("low", 10), ("high", 100), ("mid", 50)] {
        h.scheduler
            .add_task(task(id, "daily"), TaskOptions::new().with_priority(priority))
            .await
            .unwrap();
    }
    h.scheduler.start().unwrap();

    assert!(wait_for(|| h.scheduler.status().completed_count == 3, Duration::from_secs(3)).await);
    assert_eq!(h.executor.started(), vec!["high", "mid", "low"]);
    h.shutdown().await;
}

#[tokio::test]
async fn test_equal_priority_runs_in_submission_order() {
    let h = harness(fast_config().with_max_concurrent_tasks(1), None);
    for id in ["first", "second", "third"] {
        h.scheduler
            .add_task(task(id, "daily"), TaskOptions::new())
            .await
            .unwrap();
    }
    h.scheduler.start().unwrap();

    assert!(wait_for(|| h.scheduler.status().completed_count == 3, Duration::from_secs(3)).await);
    assert_eq!(h.executor.started(), vec!["first", "second", "third"]);
    h.shutdown().await;
}

#[tokio::test]
async fn test_computed_priority_includes_bonus_and_context_boost() {
    let probe: Arc<dyn ContextProbe> =
        Arc::new(StaticContextProbe::new(AdmissibleKinds::only(["mail"])));
    let h = harness(fast_config().with_kind_bonus("mail", 5), Some(probe));
    let queued = capture(&h.bus, EventType::TaskQueued);

    h.scheduler
        .add_task(task("mail", "mail"), TaskOptions::new())
        .await
        .unwrap();
    h.scheduler
        .add_task(
            task("raid", "combat").with_level(PriorityLevel::High),
            TaskOptions::new(),
        )
        .await
        .unwrap();

    assert!(wait_for(|| queued.lock().len() == 2, Duration::from_secs(2)).await);
    let priority_of = |id: &str| {
        queued
            .lock()
            .iter()
            .find(|e| e.payload_str("task_id") == Some(id))
            .and_then(|e| e.payload.get("priority").cloned())
    };
    // Normal base 50, kind bonus 5, admissible boost 50 * 0.5.
    assert_eq!(priority_of("mail"), Some(json!(80)));
    // High base 100, no bonus, not admissible.
    assert_eq!(priority_of("raid"), Some(json!(100)));
    h.shutdown().await;
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let h = harness(fast_config().with_max_concurrent_tasks(2), None);
    for i in 0..5 {
        h.scheduler
            .add_task(slow_task(&format!("t{i}"), 60), TaskOptions::new())
            .await
            .unwrap();
    }
    h.scheduler.start().unwrap();

    let mut max_running = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while h.scheduler.status().completed_count < 5 && tokio::time::Instant::now() < deadline {
        max_running = max_running.max(h.scheduler.status().running_count);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.scheduler.status().completed_count, 5);
    assert!(max_running <= 2);
    assert!(max_running >= 1);
    h.shutdown().await;
}

// ============================================================================
// ADMISSION
// ============================================================================

#[tokio::test]
async fn test_dependent_waits_for_dependency() {
    let h = harness(fast_config().with_max_concurrent_tasks(2), None);

    h.scheduler
        .add_task(slow_task("a", 80), TaskOptions::new().with_priority(10))
        .await
        .unwrap();
    h.scheduler
        .add_task(
            task("b", "daily"),
            TaskOptions::new().with_priority(100).with_dependency("a"),
        )
        .await
        .unwrap();
    h.scheduler.start().unwrap();

    assert!(wait_for_status(&h.scheduler, "a", |s| *s == TaskStatus::Running).await);
    assert_eq!(h.scheduler.task_status("b"), Some(TaskStatus::Queued));

    assert!(wait_for(|| h.scheduler.is_completed("b"), Duration::from_secs(3)).await);
    assert_eq!(h.executor.started(), vec!["a", "b"]);
    h.shutdown().await;
}

#[tokio::test]
async fn test_dependent_cancelled_when_dependency_fails() {
    let h = harness(fast_config(), None);
    h.executor
        .script("a", vec![TaskOutcome::Failed("button not found".into())]);

    h.scheduler
        .add_task(task("a", "daily"), TaskOptions::new())
        .await
        .unwrap();
    h.scheduler
        .add_task(task("b", "daily"), TaskOptions::new().with_dependency("a"))
        .await
        .unwrap();
    h.scheduler.start().unwrap();

    assert!(wait_for_status(&h.scheduler, "b", TaskStatus::is_terminal).await);
    assert_eq!(
        h.scheduler.task_status("a"),
        Some(TaskStatus::Failed("button not found".into()))
    );
    match h.scheduler.task_status("b") {
        Some(TaskStatus::Cancelled(reason)) => assert!(reason.contains("dependency a")),
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(h.executor.runs("b"), 0);
    h.shutdown().await;
}

#[tokio::test]
async fn test_future_scheduled_task_is_not_dispatched_early() {
    let h = harness(fast_config(), None);
    h.scheduler
        .add_task(
            task("later", "daily"),
            TaskOptions::new().with_delay(Duration::from_millis(150)),
        )
        .await
        .unwrap();
    h.scheduler.start().unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.executor.runs("later"), 0);
    assert_eq!(h.scheduler.task_status("later"), Some(TaskStatus::Queued));

    assert!(wait_for(|| h.scheduler.is_completed("later"), Duration::from_secs(3)).await);
    h.shutdown().await;
}

#[tokio::test]
async fn test_inadmissible_task_parks_until_context_changes() {
    let probe = Arc::new(StaticContextProbe::new(AdmissibleKinds::only(["mail"])));
    let h = harness(
        fast_config(),
        Some(Arc::clone(&probe) as Arc<dyn ContextProbe>),
    );
    let changes = capture(&h.bus, EventType::ContextChanged);

    h.scheduler
        .add_task(task("raid", "combat"), TaskOptions::new())
        .await
        .unwrap();
    h.scheduler
        .add_task(task("inbox", "mail"), TaskOptions::new())
        .await
        .unwrap();
    h.scheduler.start().unwrap();

    assert!(wait_for(|| h.scheduler.is_completed("inbox"), Duration::from_secs(3)).await);
    assert!(wait_for_status(&h.scheduler, "raid", |s| *s == TaskStatus::Waiting).await);
    assert_eq!(h.scheduler.status().waiting_count, 1);
    assert_eq!(h.executor.runs("raid"), 0);

    probe.set(AdmissibleKinds::Any);
    assert!(wait_for(|| h.scheduler.is_completed("raid"), Duration::from_secs(3)).await);
    assert!(wait_for(|| !changes.lock().is_empty(), Duration::from_secs(2)).await);
    assert_eq!(
        changes.lock()[0].payload.get("admissible_kinds"),
        Some(&json!("any"))
    );
    h.shutdown().await;
}

// ============================================================================
// RETRY, TIMEOUT AND FAILURE
// ============================================================================

#[tokio::test]
async fn test_retry_then_success() {
    let h = harness(fast_config(), None);
    let completed = capture(&h.bus, EventType::TaskCompleted);
    let retrying = capture(&h.bus, EventType::TaskRetrying);
    h.executor.script(
        "flaky",
        vec![TaskOutcome::Retry, TaskOutcome::Retry, TaskOutcome::Success],
    );

    h.scheduler
        .add_task(task("flaky", "daily"), TaskOptions::new())
        .await
        .unwrap();
    h.scheduler.start().unwrap();

    assert!(wait_for(|| h.scheduler.is_completed("flaky"), Duration::from_secs(3)).await);
    assert_eq!(h.executor.runs("flaky"), 3);
    assert_eq!(h.scheduler.status().retried_count, 2);

    assert!(wait_for(|| completed.lock().len() == 1, Duration::from_secs(2)).await);
    assert_eq!(completed.lock()[0].payload.get("retry_count"), Some(&json!(2)));
    assert!(wait_for(|| retrying.lock().len() == 2, Duration::from_secs(2)).await);
    h.shutdown().await;
}

#[tokio::test]
async fn test_retries_exhausted_fails_task() {
    let h = harness(fast_config(), None);
    let failed = capture(&h.bus, EventType::TaskFailed);
    h.executor.script(
        "stubborn",
        vec![TaskOutcome::Retry, TaskOutcome::Retry, TaskOutcome::Retry],
    );

    h.scheduler
        .add_task(task("stubborn", "daily").with_max_retries(1), TaskOptions::new())
        .await
        .unwrap();
    h.scheduler.start().unwrap();

    assert!(wait_for_status(&h.scheduler, "stubborn", TaskStatus::is_terminal).await);
    assert_eq!(
        h.scheduler.task_status("stubborn"),
        Some(TaskStatus::Failed("retries exhausted after 1 retries".into()))
    );
    assert_eq!(h.executor.runs("stubborn"), 2);

    assert!(wait_for(|| failed.lock().len() == 1, Duration::from_secs(2)).await);
    let event = failed.lock()[0].clone();
    assert_eq!(event.priority, EventPriority::High);
    assert_eq!(event.payload_str("error_type"), Some("retries_exhausted"));
    assert_eq!(event.payload_str("task_id"), Some("stubborn"));
    h.shutdown().await;
}

#[tokio::test]
async fn test_execution_timeout_fails_task() {
    let h = harness(fast_config(), None);
    let timeouts = capture(&h.bus, EventType::TaskTimeout);

    h.scheduler
        .add_task(
            slow_task("hung", 5_000).with_timeout(Duration::from_millis(30)),
            TaskOptions::new(),
        )
        .await
        .unwrap();
    h.scheduler.start().unwrap();

    assert!(wait_for_status(&h.scheduler, "hung", TaskStatus::is_terminal).await);
    match h.scheduler.task_status("hung") {
        Some(TaskStatus::Failed(reason)) => assert!(reason.contains("timed out")),
        other => panic!("unexpected status {other:?}"),
    }
    assert!(wait_for(|| timeouts.lock().len() == 1, Duration::from_secs(2)).await);
    assert_eq!(h.scheduler.status().running_count, 0);
    h.shutdown().await;
}

#[tokio::test]
async fn test_executor_panic_is_reported_as_failure() {
    let h = harness(fast_config(), None);
    let crashing = Task::new(
        "crash",
        "crash",
        "daily",
        TaskAction::Custom {
            name: "panic".into(),
            params: serde_json::Map::new(),
        },
    );
    h.scheduler.add_task(crashing, TaskOptions::new()).await.unwrap();
    h.scheduler.start().unwrap();

    assert!(wait_for_status(&h.scheduler, "crash", TaskStatus::is_terminal).await);
    assert_eq!(
        h.scheduler.task_status("crash"),
        Some(TaskStatus::Failed("task execution panicked".into()))
    );
    h.shutdown().await;
}

#[tokio::test]
async fn test_pause_on_error_suspends_dispatch() {
    let h = harness(fast_config().with_pause_on_error(true), None);
    h.executor
        .script("bad", vec![TaskOutcome::Failed("boom".into())]);

    h.scheduler
        .add_task(task("bad", "daily"), TaskOptions::new())
        .await
        .unwrap();
    h.scheduler.start().unwrap();

    assert!(wait_for(|| h.scheduler.state() == SchedulerState::Paused, Duration::from_secs(3)).await);

    h.scheduler
        .add_task(task("good", "daily"), TaskOptions::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(h.scheduler.task_status("good"), Some(TaskStatus::Queued));

    assert!(h.scheduler.resume());
    assert!(wait_for(|| h.scheduler.is_completed("good"), Duration::from_secs(3)).await);
    h.shutdown().await;
}

// ============================================================================
// CONTROL
// ============================================================================

#[tokio::test]
async fn test_run_once_drives_without_loop() {
    let h = harness(fast_config(), None);
    h.scheduler
        .add_task(task("manual", "daily"), TaskOptions::new())
        .await
        .unwrap();
    assert_eq!(h.scheduler.state(), SchedulerState::Idle);

    for _ in 0..200 {
        h.scheduler.run_once().await;
        if h.scheduler.is_completed("manual") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.scheduler.is_completed("manual"));
    assert_eq!(h.executor.runs("manual"), 1);
    h.bus.stop().await;
}

#[tokio::test]
async fn test_pause_and_resume() {
    let h = harness(fast_config(), None);
    h.scheduler.start().unwrap();

    assert!(h.scheduler.pause());
    assert!(!h.scheduler.pause());
    h.scheduler
        .add_task(task("held", "daily"), TaskOptions::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.executor.runs("held"), 0);

    assert!(h.scheduler.resume());
    assert!(!h.scheduler.resume());
    assert!(wait_for(|| h.scheduler.is_completed("held"), Duration::from_secs(3)).await);
    h.shutdown().await;
}

#[tokio::test]
async fn test_cancel_queued_and_running_tasks() {
    let h = harness(fast_config(), None);
    h.scheduler
        .add_task(
            task("queued", "daily"),
            TaskOptions::new().with_delay(Duration::from_secs(30)),
        )
        .await
        .unwrap();
    h.scheduler
        .add_task(slow_task("running", 5_000), TaskOptions::new())
        .await
        .unwrap();
    h.scheduler.start().unwrap();

    assert!(wait_for_status(&h.scheduler, "running", |s| *s == TaskStatus::Running).await);

    assert!(h.scheduler.cancel_task("queued").await);
    assert!(h.scheduler.cancel_task("running").await);
    assert!(!h.scheduler.cancel_task("running").await);
    assert!(!h.scheduler.cancel_task("unknown").await);

    let cancelled = TaskStatus::Cancelled("cancelled by request".into());
    assert_eq!(h.scheduler.task_status("queued"), Some(cancelled.clone()));
    assert_eq!(h.scheduler.task_status("running"), Some(cancelled));
    let status = h.scheduler.status();
    assert_eq!(status.cancelled_count, 2);
    assert_eq!(status.queue_size, 0);
    assert_eq!(status.running_count, 0);
    h.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_and_queue_full_rejected() {
    let h = harness(fast_config().with_max_queue_depth(2), None);

    h.scheduler
        .add_task(task("a", "daily"), TaskOptions::new())
        .await
        .unwrap();
    let duplicate = h
        .scheduler
        .add_task(task("a", "daily"), TaskOptions::new())
        .await;
    assert!(matches!(duplicate, Err(SchedulerError::DuplicateTask(id)) if id == "a"));

    h.scheduler
        .add_task(task("b", "daily"), TaskOptions::new())
        .await
        .unwrap();
    let full = h
        .scheduler
        .add_task(task("c", "daily"), TaskOptions::new())
        .await;
    assert!(matches!(full, Err(SchedulerError::QueueFull(_))));
    assert_eq!(h.scheduler.status().queue_size, 2);
    h.shutdown().await;
}

#[tokio::test]
async fn test_completed_task_id_can_be_resubmitted() {
    let h = harness(fast_config(), None);
    h.scheduler.start().unwrap();

    h.scheduler
        .add_task(task("again", "daily"), TaskOptions::new())
        .await
        .unwrap();
    assert!(wait_for(|| h.scheduler.is_completed("again"), Duration::from_secs(3)).await);

    h.scheduler
        .add_task(task("again", "daily"), TaskOptions::new())
        .await
        .unwrap();
    assert!(wait_for(|| h.executor.runs("again") == 2, Duration::from_secs(3)).await);
    assert!(wait_for(|| h.scheduler.is_completed("again"), Duration::from_secs(3)).await);
    h.shutdown().await;
}

#[tokio::test]
async fn test_finished_task_history_is_bounded() {
    let h = harness(
        fast_config()
            .with_max_concurrent_tasks(1)
            .with_max_task_history(2),
        None,
    );
    for id in ["t1", "t2", "t3", "t4"] {
        h.scheduler
            .add_task(task(id, "daily"), TaskOptions::new())
            .await
            .unwrap();
    }
    h.scheduler.start().unwrap();

    assert!(wait_for(|| h.scheduler.is_completed("t4"), Duration::from_secs(3)).await);
    assert_eq!(h.executor.started(), vec!["t1", "t2", "t3", "t4"]);
    assert_eq!(h.scheduler.task_status("t1"), None);
    assert_eq!(h.scheduler.task_status("t2"), None);
    assert!(!h.scheduler.is_completed("t1"));
    assert_eq!(h.scheduler.task_status("t3"), Some(TaskStatus::Completed));
    assert_eq!(h.scheduler.status().completed_count, 4);
    h.shutdown().await;
}

#[tokio::test]
async fn test_stop_cancels_running_tasks() {
    let h = harness(fast_config().with_stop_grace(Duration::from_millis(50)), None);
    let stopped = capture(&h.bus, EventType::SchedulerStopped);

    h.scheduler
        .add_task(slow_task("long", 10_000), TaskOptions::new())
        .await
        .unwrap();
    h.scheduler.start().unwrap();
    assert!(wait_for_status(&h.scheduler, "long", |s| *s == TaskStatus::Running).await);

    h.scheduler.stop().await;
    assert_eq!(h.scheduler.state(), SchedulerState::Stopped);
    assert_eq!(
        h.scheduler.task_status("long"),
        Some(TaskStatus::Cancelled("scheduler stopped".into()))
    );

    let rejected = h
        .scheduler
        .add_task(task("late", "daily"), TaskOptions::new())
        .await;
    assert!(matches!(rejected, Err(SchedulerError::InvalidState(_))));

    assert!(wait_for(|| stopped.lock().len() == 1, Duration::from_secs(2)).await);
    h.bus.stop().await;
}

#[tokio::test]
async fn test_start_requires_idle_or_stopped() {
    let h = harness(fast_config(), None);
    h.scheduler.start().unwrap();
    assert!(matches!(
        h.scheduler.start(),
        Err(SchedulerError::InvalidState(_))
    ));
    h.scheduler.stop().await;
    h.scheduler.start().unwrap();
    assert_eq!(h.scheduler.state(), SchedulerState::Running);
    h.shutdown().await;
}
