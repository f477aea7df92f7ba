//! Session worker pool driving recovery sessions through their phases.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    DetectedError, ErrorCategory, ErrorClassification, ErrorClassifier, ErrorContext,
    HealthStatus, RecoveryActionExecutor, RecoveryPhase, RecoveryResult, RecoverySession,
    RecoveryStatistics, RecoveryStatus, RecoveryStrategy, SessionId, MAX_RECOVERY_PRIORITY,
};
use crate::config::RecoveryConfig;
use crate::core::audit::{build_audit_event, record_to, AuditComponent, SharedAuditSink};
use crate::core::error::{AppResult, RecoveryError};
use crate::core::event::{Event, EventPriority, EventType};
use crate::core::event_bus::{EventBus, EventHandler, SubscribeOptions, SubscriptionId};
use crate::util::clock::now_ms;

const EVENT_SOURCE: &str = "recovery_coordinator";
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Queue key used when a session is re-enqueued after a failed attempt.
const RETRY_QUEUE_KEY: u8 = 5;

/// Coordinates recovery sessions on a pool of worker loops.
///
/// Sessions are queued by `10 - priority`, so higher priorities are picked up first.
/// Termination is single-winner: the path that removes a session from the active map
/// (worker, timeout monitor, cancellation or shutdown) publishes its terminal event and
/// every later transition for that session is ignored.
pub struct RecoveryCoordinator {
    inner: Arc<CoordinatorInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    monitors: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Default)]
struct RecoveryCounters {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    escalated: AtomicU64,
    cancelled: AtomicU64,
    retries: AtomicU64,
    finished: AtomicU64,
    total_duration_ms: AtomicU64,
}

struct CoordinatorInner {
    config: RecoveryConfig,
    bus: Arc<EventBus>,
    classifier: Arc<dyn ErrorClassifier>,
    executor: Arc<dyn RecoveryActionExecutor>,
    audit: Option<SharedAuditSink>,
    active: RwLock<HashMap<SessionId, RecoverySession>>,
    completed: RwLock<HashMap<SessionId, RecoverySession>>,
    queue: Mutex<BinaryHeap<Reverse<(u8, u64, SessionId)>>>,
    seq: AtomicU64,
    wakeup: Notify,
    running: AtomicBool,
    shutdown: AtomicBool,
    counters: RecoveryCounters,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

enum PhaseOutcome {
    Success(RecoveryResult),
    Failed(String),
    Escalate(String),
    /// The session left the active map while the phases ran.
    Abandoned,
}

impl RecoveryCoordinator {
    /// Create a coordinator. Workers are not spawned until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::InvalidConfig` if the configuration is invalid.
    pub fn new(
        config: RecoveryConfig,
        bus: Arc<EventBus>,
        classifier: Arc<dyn ErrorClassifier>,
        executor: Arc<dyn RecoveryActionExecutor>,
        audit: Option<SharedAuditSink>,
    ) -> Result<Self, RecoveryError> {
        config.validate().map_err(RecoveryError::InvalidConfig)?;
        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                config,
                bus,
                classifier,
                executor,
                audit,
                active: RwLock::new(HashMap::new()),
                completed: RwLock::new(HashMap::new()),
                queue: Mutex::new(BinaryHeap::new()),
                seq: AtomicU64::new(0),
                wakeup: Notify::new(),
                running: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                counters: RecoveryCounters::default(),
                subscriptions: Mutex::new(Vec::new()),
            }),
            workers: Mutex::new(Vec::new()),
            monitors: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the session workers, the timeout monitor and the history cleanup loop.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::AlreadyRunning` if already started.
    pub fn start(&self) -> Result<(), RecoveryError> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            return Err(RecoveryError::AlreadyRunning);
        }
        self.inner.shutdown.store(false, Ordering::Release);

        let mut workers = self.workers.lock();
        for worker_id in 0..self.inner.config.worker_count {
            workers.push(tokio::spawn(session_worker(Arc::clone(&self.inner), worker_id)));
        }
        let mut monitors = self.monitors.lock();
        monitors.push(tokio::spawn(timeout_monitor(Arc::clone(&self.inner))));
        monitors.push(tokio::spawn(history_cleanup(Arc::clone(&self.inner))));

        info!(
            worker_count = self.inner.config.worker_count,
            "recovery coordinator started"
        );
        Ok(())
    }

    /// Stop the workers and cancel every session still active.
    ///
    /// Sessions still being opened when this runs are refused with
    /// `RecoveryError::ShutDown`.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        // Must precede the `active` snapshot below; `open_session` re-checks it under
        // the same lock.
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wakeup.notify_waiters();

        for handle in std::mem::take(&mut *self.monitors.lock()) {
            handle.abort();
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for (worker_id, handle) in workers.into_iter().enumerate() {
            let abort = handle.abort_handle();
            if tokio::time::timeout(WORKER_JOIN_TIMEOUT, handle).await.is_err() {
                warn!(worker_id, "recovery worker did not exit within timeout - aborting");
                abort.abort();
            }
        }

        let remaining: Vec<SessionId> = self.inner.active.read().keys().cloned().collect();
        let cancelled = remaining.len();
        for session_id in remaining {
            self.inner
                .terminate(
                    &session_id,
                    RecoveryStatus::Cancelled,
                    Some("recovery coordinator stopped".into()),
                    None,
                )
                .await;
        }
        self.inner.queue.lock().clear();
        info!(cancelled, "recovery coordinator stopped");
    }

    /// Whether the workers are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Open a session for `error` using the classifier's strategy.
    ///
    /// `priority` is clamped to 0-10; higher is picked up sooner.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::ShutDown` after [`stop`](Self::stop).
    pub async fn coordinate_recovery(
        &self,
        error: DetectedError,
        context: ErrorContext,
        priority: u8,
    ) -> Result<SessionId, RecoveryError> {
        self.inner.open_session(error, context, None, priority).await
    }

    /// Open a session for `error` with a caller-supplied strategy.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::ShutDown` after [`stop`](Self::stop).
    pub async fn coordinate_with_strategy(
        &self,
        error: DetectedError,
        context: ErrorContext,
        strategy: RecoveryStrategy,
        priority: u8,
    ) -> Result<SessionId, RecoveryError> {
        self.inner
            .open_session(error, context, Some(strategy), priority)
            .await
    }

    /// Subscribe to the configured trigger event types so that matching bus events open
    /// sessions. Returns the subscription ids.
    pub fn attach_to_bus(&self) -> Vec<SubscriptionId> {
        let mut ids = Vec::with_capacity(self.inner.config.trigger_events.len());
        for event_type in &self.inner.config.trigger_events {
            let handler = Arc::new(TriggerHandler {
                inner: Arc::downgrade(&self.inner),
            });
            let id = self.inner.bus.subscribe(
                event_type.clone(),
                handler,
                SubscribeOptions::new().with_priority(EventPriority::High),
            );
            debug!(%event_type, subscription_id = %id, "recovery trigger attached");
            ids.push(id);
        }
        self.inner.subscriptions.lock().extend(ids.iter().copied());
        ids
    }

    /// Remove the subscriptions made by [`attach_to_bus`](Self::attach_to_bus).
    pub fn detach_from_bus(&self) -> usize {
        let ids = std::mem::take(&mut *self.inner.subscriptions.lock());
        ids.into_iter()
            .filter(|id| self.inner.bus.unsubscribe(*id))
            .count()
    }

    /// Look up a session, active or completed.
    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<RecoverySession> {
        if let Some(session) = self.inner.active.read().get(session_id) {
            return Some(session.clone());
        }
        self.inner.completed.read().get(session_id).cloned()
    }

    /// Sessions not yet terminated, oldest first.
    #[must_use]
    pub fn active_sessions(&self) -> Vec<RecoverySession> {
        let mut sessions: Vec<_> = self.inner.active.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.start_time_ms);
        sessions
    }

    /// Terminated sessions in history, oldest termination first.
    #[must_use]
    pub fn completed_sessions(&self) -> Vec<RecoverySession> {
        let mut sessions: Vec<_> = self.inner.completed.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.end_time_ms);
        sessions
    }

    /// Cancel an active session. Returns `false` if it was not active.
    pub async fn cancel_session(&self, session_id: &str) -> bool {
        self.inner
            .terminate(
                session_id,
                RecoveryStatus::Cancelled,
                Some("cancelled by request".into()),
                None,
            )
            .await
    }

    /// Current statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn statistics(&self) -> RecoveryStatistics {
        let c = &self.inner.counters;
        let successful = c.successful.load(Ordering::Relaxed);
        let failed = c.failed.load(Ordering::Relaxed);
        let escalated = c.escalated.load(Ordering::Relaxed);
        let finished = c.finished.load(Ordering::Relaxed);

        let outcomes = successful + failed + escalated;
        let success_rate = if outcomes == 0 {
            100.0
        } else {
            successful as f64 / outcomes as f64 * 100.0
        };
        let average_recovery_ms = if finished == 0 {
            0.0
        } else {
            c.total_duration_ms.load(Ordering::Relaxed) as f64 / finished as f64
        };

        RecoveryStatistics {
            total_sessions: c.total.load(Ordering::Relaxed),
            active_sessions: self.inner.active.read().len(),
            completed_sessions: self.inner.completed.read().len(),
            successful_sessions: successful,
            failed_sessions: failed,
            escalated_sessions: escalated,
            cancelled_sessions: c.cancelled.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            success_rate,
            average_recovery_ms,
            health: HealthStatus::from_success_rate(success_rate),
        }
    }

    /// Health derived from the success rate.
    #[must_use]
    pub fn health_status(&self) -> HealthStatus {
        self.statistics().health
    }

    /// Trim completed history to `max_session_history`, keeping the newest. Returns how
    /// many sessions were purged.
    pub fn cleanup_history(&self) -> usize {
        self.inner.cleanup_history()
    }
}

impl Drop for RecoveryCoordinator {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        for handle in self.monitors.lock().drain(..) {
            handle.abort();
        }
    }
}

impl CoordinatorInner {
    async fn open_session(
        &self,
        error: DetectedError,
        context: ErrorContext,
        strategy: Option<RecoveryStrategy>,
        priority: u8,
    ) -> Result<SessionId, RecoveryError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(RecoveryError::ShutDown);
        }

        let classification = self.classifier.classify(&error).await;
        let strategy = strategy.unwrap_or_else(|| {
            self.classifier
                .default_strategy(&error.error_type, &classification)
        });
        let priority = priority.min(MAX_RECOVERY_PRIORITY);
        let max_attempts = if classification.category == ErrorCategory::Validation {
            1
        } else {
            strategy.retry.max_attempts.max(1)
        };

        let session_id = Uuid::new_v4().to_string();
        let session = RecoverySession {
            id: session_id.clone(),
            error_type: error.error_type.clone(),
            error_message: error.message.clone(),
            context: Arc::new(context),
            classification,
            strategy: Arc::new(strategy),
            status: RecoveryStatus::Pending,
            phase: RecoveryPhase::Detection,
            priority,
            attempt_count: 0,
            max_attempts,
            start_time_ms: now_ms(),
            end_time_ms: None,
            last_update: Instant::now(),
            error_messages: Vec::new(),
            success_metrics: HashMap::new(),
        };
        let strategy_name = session.strategy.name.clone();
        {
            // `stop` sets `shutdown` before it snapshots `active`, so a session inserted
            // under this lock is either seen by that snapshot or refused here.
            let mut active = self.active.write();
            if self.shutdown.load(Ordering::Acquire) {
                return Err(RecoveryError::ShutDown);
            }
            active.insert(session_id.clone(), session);
        }
        self.counters.total.fetch_add(1, Ordering::Relaxed);
        self.audit(&session_id, RecoveryStatus::Pending, None);

        info!(
            session_id = %session_id,
            error_type = %error.error_type,
            source = %error.source,
            category = %classification.category,
            severity = ?classification.severity,
            strategy = %strategy_name,
            priority,
            "recovery session opened"
        );
        self.bus.try_publish(
            session_event(EventType::RecoveryStarted, &session_id, &error.error_type)
                .with_payload("priority", priority),
        );

        self.enqueue(session_id.clone(), MAX_RECOVERY_PRIORITY - priority);
        Ok(session_id)
    }

    fn enqueue(&self, session_id: SessionId, key: u8) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.queue.lock().push(Reverse((key, seq, session_id)));
        self.wakeup.notify_one();
    }

    /// Run one attempt of a queued session.
    async fn process(&self, session_id: &str, worker_id: usize) {
        let snapshot = {
            let mut active = self.active.write();
            let Some(session) = active.get_mut(session_id) else {
                return;
            };
            if session.status != RecoveryStatus::Pending {
                return;
            }
            session.status = RecoveryStatus::Running;
            session.phase = RecoveryPhase::Analysis;
            session.attempt_count += 1;
            session.last_update = Instant::now();
            session.clone()
        };
        self.audit(session_id, RecoveryStatus::Running, None);
        debug!(
            worker_id,
            session_id,
            attempt = snapshot.attempt_count,
            max_attempts = snapshot.max_attempts,
            "recovery attempt started"
        );

        match self.run_phases(&snapshot).await {
            PhaseOutcome::Success(result) => {
                self.terminate(session_id, RecoveryStatus::Success, None, Some(result))
                    .await;
            }
            PhaseOutcome::Escalate(reason) => {
                self.escalate_or_fail(session_id, Some(reason)).await;
            }
            PhaseOutcome::Failed(reason) => self.handle_failure(session_id, reason).await,
            PhaseOutcome::Abandoned => {
                debug!(session_id, "session terminated elsewhere during attempt");
            }
        }
    }

    async fn run_phases(&self, session: &RecoverySession) -> PhaseOutcome {
        // ANALYSIS
        if session.classification.requires_escalation() {
            return PhaseOutcome::Escalate(format!(
                "{} error requires escalation",
                describe(&session.classification)
            ));
        }

        // PLANNING
        if !self.set_phase(&session.id, RecoveryPhase::Planning) {
            return PhaseOutcome::Abandoned;
        }
        if session.strategy.actions.is_empty() {
            return PhaseOutcome::Failed(format!(
                "strategy '{}' has no recovery actions",
                session.strategy.name
            ));
        }

        // EXECUTION
        if !self.set_phase(&session.id, RecoveryPhase::Execution) {
            return PhaseOutcome::Abandoned;
        }
        let timeout = self.config.action_timeout();
        let applied = tokio::time::timeout(
            timeout,
            AssertUnwindSafe(self.executor.apply(&session.strategy, &session.context))
                .catch_unwind(),
        )
        .await;
        let result = match applied {
            Err(_) => {
                return PhaseOutcome::Failed(format!(
                    "recovery actions timed out after {}ms",
                    timeout.as_millis()
                ))
            }
            Ok(Err(_)) => return PhaseOutcome::Failed("recovery action panicked".into()),
            Ok(Ok(Err(e))) => return PhaseOutcome::Failed(format!("{e:#}")),
            Ok(Ok(Ok(result))) if !result.success => {
                return PhaseOutcome::Failed(
                    result
                        .error_message
                        .unwrap_or_else(|| "recovery actions reported failure".into()),
                )
            }
            Ok(Ok(Ok(result))) => result,
        };

        // VALIDATION
        if !self.set_phase(&session.id, RecoveryPhase::Validation) {
            return PhaseOutcome::Abandoned;
        }
        let validated = AssertUnwindSafe(self.executor.validate(&result))
            .catch_unwind()
            .await
            .unwrap_or(false);
        if validated {
            PhaseOutcome::Success(result)
        } else {
            PhaseOutcome::Failed("recovery validation failed".into())
        }
    }

    /// Advance a running session's phase. Returns `false` if it is no longer running.
    fn set_phase(&self, session_id: &str, phase: RecoveryPhase) -> bool {
        let mut active = self.active.write();
        match active.get_mut(session_id) {
            Some(session) if session.status == RecoveryStatus::Running => {
                session.phase = phase;
                session.last_update = Instant::now();
                debug!(session_id, %phase, "recovery phase");
                true
            }
            _ => false,
        }
    }

    async fn handle_failure(&self, session_id: &str, reason: String) {
        let retry = {
            let mut active = self.active.write();
            let Some(session) = active.get_mut(session_id) else {
                return;
            };
            session.error_messages.push(reason.clone());
            session.last_update = Instant::now();
            if session.attempt_count < session.max_attempts {
                session.status = RecoveryStatus::Pending;
                session.phase = RecoveryPhase::Detection;
                Some((
                    session.attempt_count,
                    session.strategy.retry.delay_for(session.attempt_count),
                    session.error_type.clone(),
                ))
            } else {
                None
            }
        };

        let Some((attempt, delay, error_type)) = retry else {
            debug!(session_id, error = %reason, "recovery attempts exhausted");
            self.escalate_or_fail(session_id, None).await;
            return;
        };

        self.counters.retries.fetch_add(1, Ordering::Relaxed);
        self.audit(session_id, RecoveryStatus::Pending, Some(reason.clone()));
        warn!(
            session_id,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %reason,
            "recovery attempt failed; retrying"
        );

        tokio::time::sleep(delay).await;
        let still_pending = self
            .active
            .read()
            .get(session_id)
            .is_some_and(|s| s.status == RecoveryStatus::Pending);
        if !still_pending {
            return;
        }
        self.bus.try_publish(
            session_event(EventType::RecoveryRetrying, session_id, &error_type)
                .with_payload("attempt", attempt)
                .with_payload("error", reason),
        );
        self.enqueue(session_id.to_string(), RETRY_QUEUE_KEY);
    }

    /// Escalate or fail a session that will not be retried. `note` is appended to its
    /// error messages unless the reason was already recorded.
    async fn escalate_or_fail(&self, session_id: &str, note: Option<String>) {
        let status = if self.escalation_enabled(session_id) {
            RecoveryStatus::Escalated
        } else {
            RecoveryStatus::Failed
        };
        self.terminate(session_id, status, note, None).await;
    }

    fn escalation_enabled(&self, session_id: &str) -> bool {
        self.config.auto_escalate
            && self
                .active
                .read()
                .get(session_id)
                .is_some_and(|s| s.strategy.auto_escalate)
    }

    /// Move a session to history with a terminal status. Returns `false` if another path
    /// already terminated it.
    async fn terminate(
        &self,
        session_id: &str,
        status: RecoveryStatus,
        note: Option<String>,
        result: Option<RecoveryResult>,
    ) -> bool {
        let Some(mut session) = self.active.write().remove(session_id) else {
            return false;
        };

        session.status = status;
        session.phase = if status == RecoveryStatus::Escalated {
            RecoveryPhase::Escalation
        } else {
            RecoveryPhase::Completion
        };
        session.end_time_ms = Some(now_ms());
        session.last_update = Instant::now();
        if let Some(note) = note.clone() {
            session.error_messages.push(note);
        }
        if let Some(result) = &result {
            session
                .success_metrics
                .insert("actions_taken".into(), Value::from(result.actions_taken.clone()));
            session.success_metrics.insert(
                "time_taken_ms".into(),
                Value::from(u64::try_from(result.time_taken.as_millis()).unwrap_or(u64::MAX)),
            );
            session
                .success_metrics
                .insert("attempts".into(), Value::from(session.attempt_count));
        }

        let counter = match status {
            RecoveryStatus::Success | RecoveryStatus::Partial => &self.counters.successful,
            RecoveryStatus::Escalated => &self.counters.escalated,
            RecoveryStatus::Cancelled => &self.counters.cancelled,
            RecoveryStatus::Failed | RecoveryStatus::Pending | RecoveryStatus::Running => {
                &self.counters.failed
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.counters.finished.fetch_add(1, Ordering::Relaxed);
        let duration_ms = session.duration_ms().unwrap_or_default();
        self.counters.total_duration_ms.fetch_add(
            u64::try_from(duration_ms).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );

        let event = terminal_event(&session);
        let error_type = session.error_type.clone();
        let attempts = session.attempt_count;
        self.completed.write().insert(session_id.to_string(), session);

        record_to(
            self.audit.as_ref(),
            build_audit_event(session_id, AuditComponent::Recovery, status.as_str(), note),
        );
        match status {
            RecoveryStatus::Success | RecoveryStatus::Partial => {
                info!(session_id, %error_type, attempts, %status, "recovery session finished");
            }
            RecoveryStatus::Escalated => {
                error!(session_id, %error_type, attempts, "recovery session escalated");
            }
            _ => warn!(session_id, %error_type, attempts, %status, "recovery session finished"),
        }

        self.bus.publish(event).await;
        true
    }

    async fn expire_stale(&self) -> usize {
        let timeout = self.config.session_timeout();
        let now = Instant::now();
        let stale: Vec<SessionId> = self
            .active
            .read()
            .values()
            .filter(|s| now.saturating_duration_since(s.last_update) > timeout)
            .map(|s| s.id.clone())
            .collect();

        let mut expired = 0;
        for session_id in stale {
            let note = format!("session timed out after {}ms", timeout.as_millis());
            if self
                .terminate(&session_id, RecoveryStatus::Failed, Some(note), None)
                .await
            {
                expired += 1;
            }
        }
        expired
    }

    fn cleanup_history(&self) -> usize {
        let max = self.config.max_session_history;
        let mut completed = self.completed.write();
        if completed.len() <= max {
            return 0;
        }
        let mut by_end: Vec<(u128, SessionId)> = completed
            .values()
            .map(|s| (s.end_time_ms.unwrap_or_default(), s.id.clone()))
            .collect();
        by_end.sort_unstable();
        let excess = completed.len() - max;
        for (_, session_id) in by_end.into_iter().take(excess) {
            completed.remove(&session_id);
        }
        debug!(purged = excess, retained = max, "recovery history trimmed");
        excess
    }

    fn audit(&self, session_id: &str, status: RecoveryStatus, detail: Option<String>) {
        record_to(
            self.audit.as_ref(),
            build_audit_event(session_id, AuditComponent::Recovery, status.as_str(), detail),
        );
    }
}

fn describe(classification: &ErrorClassification) -> String {
    format!("{:?} {}", classification.severity, classification.category).to_lowercase()
}

fn session_event(
    event_type: EventType,
    session_id: &str,
    error_type: &str,
) -> Event {
    Event::new(event_type, EVENT_SOURCE)
        .with_payload("session_id", session_id)
        .with_payload("error_type", error_type)
}

fn terminal_event(session: &RecoverySession) -> Event {
    let priority = match session.status {
        RecoveryStatus::Escalated => EventPriority::Critical,
        RecoveryStatus::Failed => EventPriority::High,
        _ => EventPriority::Normal,
    };
    let mut event = session_event(session.status.terminal_event(), &session.id, &session.error_type)
        .with_priority(priority)
        .with_payload("status", session.status.as_str())
        .with_payload("attempts", session.attempt_count);
    if let Some(last) = session.error_messages.last() {
        event = event.with_payload("error", last.as_str());
    }
    event
}

async fn session_worker(inner: Arc<CoordinatorInner>, worker_id: usize) {
    debug!(worker_id, "recovery worker started");
    let poll = inner.config.poll_interval();
    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        let next = inner.queue.lock().pop();
        match next {
            Some(Reverse((_, _, session_id))) => inner.process(&session_id, worker_id).await,
            None => {
                let _ = tokio::time::timeout(poll, inner.wakeup.notified()).await;
            }
        }
    }
    debug!(worker_id, "recovery worker exiting");
}

async fn timeout_monitor(inner: Arc<CoordinatorInner>) {
    let mut ticker = tokio::time::interval(inner.config.timeout_check_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        let expired = inner.expire_stale().await;
        if expired > 0 {
            warn!(expired, "recovery sessions timed out");
        }
    }
}

async fn history_cleanup(inner: Arc<CoordinatorInner>) {
    let mut ticker = tokio::time::interval(inner.config.cleanup_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        inner.cleanup_history();
    }
}

/// Opens a session for every trigger event delivered by the bus.
struct TriggerHandler {
    inner: Weak<CoordinatorInner>,
}

/// Session priority for a trigger event.
const fn session_priority(priority: EventPriority) -> u8 {
    match priority {
        EventPriority::Critical => 9,
        EventPriority::High => 7,
        EventPriority::Normal => 5,
        EventPriority::Low => 3,
    }
}

#[async_trait]
impl EventHandler for TriggerHandler {
    async fn handle(&self, event: &Event) -> AppResult<()> {
        let Some(inner) = self.inner.upgrade() else {
            return Ok(());
        };
        let error = DetectedError::from_event(event);
        let mut context: ErrorContext = event.payload.clone();
        context.insert("event_id".into(), Value::from(event.id.as_str()));
        context.insert("event_type".into(), Value::from(event.event_type.as_str()));

        match inner
            .open_session(error, context, None, session_priority(event.priority))
            .await
        {
            Ok(session_id) => {
                debug!(event_id = %event.id, session_id = %session_id, "session opened from event");
                Ok(())
            }
            Err(RecoveryError::ShutDown) => {
                debug!(event_id = %event.id, "coordinator shut down; trigger event ignored");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
