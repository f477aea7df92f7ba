//! Bounded, multi-worker publish/subscribe dispatcher.
//!
//! Events enter a bounded MPMC queue and are pulled by a fixed pool of dispatch
//! workers. For each event a worker snapshots the active subscriptions for its type,
//! already kept in descending priority order, and invokes them one after another. A
//! failing handler is retried with a linearly growing delay; once its retries are
//! exhausted the failure is counted and the next subscriber runs.
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_task_coordinator::config::EventBusConfig;
//! use prometheus_task_coordinator::core::{
//!     handler_fn, Event, EventBus, EventPriority, EventType, SubscribeOptions,
//! };
//!
//! let bus = EventBus::new(EventBusConfig::new().with_worker_count(2))?;
//! bus.subscribe(
//!     EventType::TaskFailed,
//!     handler_fn(|event| async move {
//!         tracing::warn!(task_id = ?event.payload_str("task_id"), "task failed");
//!         Ok(())
//!     }),
//!     SubscribeOptions::new().with_priority(EventPriority::High),
//! );
//! bus.start()?;
//! bus.publish(Event::new(EventType::TaskFailed, "scheduler")).await;
//! bus.stop().await;
//! ```

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{AppResult, BusError};
use super::event::{Event, EventPriority, EventType};
use crate::config::EventBusConfig;

/// How long `stop` waits for each dispatch worker to exit before aborting it.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Subscription identifier returned by [`EventBus::subscribe`].
pub type SubscriptionId = Uuid;

/// Predicate deciding whether a subscription wants a particular event.
pub type EventFilter = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// Receives events for the types it is subscribed to.
///
/// Returning an error (or panicking) triggers the subscription's retry policy; the
/// failure never reaches the publisher.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event.
    async fn handle(&self, event: &Event) -> AppResult<()>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    async fn handle(&self, event: &Event) -> AppResult<()> {
        (self.0)(event.clone()).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Per-subscription policy.
#[derive(Clone)]
pub struct SubscribeOptions {
    /// Invocation order among subscriptions of the same type (higher first).
    pub priority: EventPriority,
    /// Optional predicate; events it rejects are skipped.
    pub filter: Option<EventFilter>,
    /// Retries after the first failed invocation.
    pub max_retries: u32,
    /// Base retry delay, multiplied by the attempt number.
    pub retry_delay: Duration,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            priority: EventPriority::Normal,
            filter: None,
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl SubscribeOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the invocation priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Only receive events accepted by `filter`.
    #[must_use]
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Set the retry count.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

struct Subscription {
    id: SubscriptionId,
    priority: EventPriority,
    filter: Option<EventFilter>,
    max_retries: u32,
    retry_delay: Duration,
    active: AtomicBool,
    handler: Arc<dyn EventHandler>,
}

impl Subscription {
    fn accepts(&self, event: &Event) -> bool {
        self.filter.as_ref().is_none_or(|filter| filter(event))
    }
}

/// Point-in-time bus statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusStats {
    /// Events accepted into the queue.
    pub published: u64,
    /// Events rejected by `try_publish` because the queue was full.
    pub dropped: u64,
    /// Events fully dispatched.
    pub processed: u64,
    /// Successful handler invocations.
    pub handlers_invoked: u64,
    /// Handler invocations that failed after all retries.
    pub handlers_failed: u64,
    /// Individual handler retries.
    pub handler_retries: u64,
    /// Invocations skipped by a subscription filter.
    pub filtered: u64,
    /// Events waiting in the queue.
    pub queue_depth: usize,
    /// Registered subscriptions across all types.
    pub subscription_count: usize,
}

#[derive(Default)]
struct BusCounters {
    published: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    handlers_invoked: AtomicU64,
    handlers_failed: AtomicU64,
    handler_retries: AtomicU64,
    filtered: AtomicU64,
}

struct BusInner {
    config: EventBusConfig,
    tx: flume::Sender<Arc<Event>>,
    rx: flume::Receiver<Arc<Event>>,
    subscriptions: RwLock<HashMap<EventType, Vec<Arc<Subscription>>>>,
    history: Mutex<VecDeque<Arc<Event>>>,
    counters: BusCounters,
    /// Accepted events not yet fully dispatched.
    in_flight: AtomicU64,
    drained: Notify,
    shutdown: AtomicBool,
}

/// Bounded publish/subscribe dispatcher with a fixed worker pool.
pub struct EventBus {
    inner: Arc<BusInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl EventBus {
    /// Create a bus. Workers are not spawned until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns `BusError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: EventBusConfig) -> Result<Self, BusError> {
        config.validate().map_err(BusError::InvalidConfig)?;
        let (tx, rx) = flume::bounded(config.queue_capacity);
        let history = VecDeque::with_capacity(config.history_size.min(1024));
        Ok(Self {
            inner: Arc::new(BusInner {
                config,
                tx,
                rx,
                subscriptions: RwLock::new(HashMap::new()),
                history: Mutex::new(history),
                counters: BusCounters::default(),
                in_flight: AtomicU64::new(0),
                drained: Notify::new(),
                shutdown: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Spawn the dispatch workers on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `BusError::AlreadyRunning` if the workers are already running.
    pub fn start(&self) -> Result<(), BusError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(BusError::AlreadyRunning);
        }
        self.inner.shutdown.store(false, Ordering::Release);

        let mut workers = self.workers.lock();
        for worker_id in 0..self.inner.config.worker_count {
            let inner = Arc::clone(&self.inner);
            workers.push(tokio::spawn(dispatch_worker(inner, worker_id)));
        }
        info!(
            worker_count = self.inner.config.worker_count,
            queue_capacity = self.inner.config.queue_capacity,
            "event bus started"
        );
        Ok(())
    }

    /// Drain outstanding events, then stop the workers.
    ///
    /// Waits up to the configured drain timeout for every accepted event to be
    /// dispatched, then signals the workers and joins them, aborting any that do not
    /// exit in time. Does nothing if the bus is not running.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let drain_timeout = self.inner.config.drain_timeout();
        let poll = self.inner.config.poll_interval();
        let deadline = Instant::now() + drain_timeout;
        loop {
            let pending = self.inner.in_flight.load(Ordering::Acquire);
            if pending == 0 {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(pending, "event bus drain timed out; stopping with pending events");
                break;
            }
            let wait = (deadline - now).min(poll);
            let _ = tokio::time::timeout(wait, self.inner.drained.notified()).await;
        }

        self.inner.shutdown.store(true, Ordering::Release);
        let handles = std::mem::take(&mut *self.workers.lock());
        let worker_count = handles.len();
        for (worker_id, handle) in handles.into_iter().enumerate() {
            let abort = handle.abort_handle();
            match tokio::time::timeout(WORKER_JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!(worker_id, "dispatch worker joined"),
                Ok(Err(e)) => warn!(worker_id, error = %e, "dispatch worker ended abnormally"),
                Err(_) => {
                    warn!(worker_id, "dispatch worker did not exit within timeout - aborting");
                    abort.abort();
                }
            }
        }
        info!(worker_count, "event bus stopped");
    }

    /// Whether the dispatch workers are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Publish an event, waiting for queue space if the queue is full.
    ///
    /// Returns `false` only if the queue has been torn down.
    pub async fn publish(&self, event: Event) -> bool {
        let event = Arc::new(event);
        // Released on error or if this future is dropped while waiting for space.
        let reservation = InFlight::reserve(&self.inner);
        if self.inner.tx.send_async(Arc::clone(&event)).await.is_ok() {
            reservation.commit();
            self.inner.counters.published.fetch_add(1, Ordering::Relaxed);
            debug!(event_id = %event.id, event_type = %event.event_type, "event published");
            true
        } else {
            false
        }
    }

    /// Publish an event without waiting.
    ///
    /// Returns `false` immediately if the queue is full; the caller decides whether to
    /// retry, coalesce or drop.
    pub fn try_publish(&self, event: Event) -> bool {
        let event = Arc::new(event);
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        match self.inner.tx.try_send(Arc::clone(&event)) {
            Ok(()) => {
                self.inner.counters.published.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = %event.id, event_type = %event.event_type, "event published");
                true
            }
            Err(flume::TrySendError::Full(_)) => {
                self.inner.finish_one();
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(event_type = %event.event_type, "event bus queue is full; event rejected");
                false
            }
            Err(flume::TrySendError::Disconnected(_)) => {
                self.inner.finish_one();
                false
            }
        }
    }

    /// Register `handler` for `event_type`.
    ///
    /// Takes effect for events dispatched after registration; events already being
    /// dispatched may or may not see it.
    pub fn subscribe(
        &self,
        event_type: EventType,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> SubscriptionId {
        let id = Uuid::new_v4();
        let subscription = Arc::new(Subscription {
            id,
            priority: options.priority,
            filter: options.filter,
            max_retries: options.max_retries,
            retry_delay: options.retry_delay,
            active: AtomicBool::new(true),
            handler,
        });

        let mut table = self.inner.subscriptions.write();
        let list = table.entry(event_type.clone()).or_default();
        // Insert after every subscription of equal or higher priority.
        let pos = list
            .iter()
            .position(|s| s.priority < subscription.priority)
            .unwrap_or(list.len());
        list.insert(pos, subscription);
        drop(table);

        debug!(subscription_id = %id, %event_type, priority = ?options.priority, "subscribed");
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut table = self.inner.subscriptions.write();
        let mut removed = false;
        for list in table.values_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                let subscription = list.remove(pos);
                subscription.active.store(false, Ordering::Release);
                removed = true;
                break;
            }
        }
        table.retain(|_, list| !list.is_empty());
        removed
    }

    /// Remove every subscription for `event_type`. Returns how many were removed.
    pub fn unsubscribe_all(&self, event_type: &EventType) -> usize {
        let removed = self.inner.subscriptions.write().remove(event_type);
        removed.map_or(0, |list| {
            for subscription in &list {
                subscription.active.store(false, Ordering::Release);
            }
            list.len()
        })
    }

    /// Number of subscriptions registered for `event_type`.
    #[must_use]
    pub fn subscription_count(&self, event_type: &EventType) -> usize {
        self.inner
            .subscriptions
            .read()
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// The most recently dispatched events, oldest first, at most `limit`.
    #[must_use]
    pub fn recent_events(&self, limit: usize) -> Vec<Arc<Event>> {
        let history = self.inner.history.lock();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let c = &self.inner.counters;
        BusStats {
            published: c.published.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            handlers_invoked: c.handlers_invoked.load(Ordering::Relaxed),
            handlers_failed: c.handlers_failed.load(Ordering::Relaxed),
            handler_retries: c.handler_retries.load(Ordering::Relaxed),
            filtered: c.filtered.load(Ordering::Relaxed),
            queue_depth: self.inner.rx.len(),
            subscription_count: self.inner.subscriptions.read().values().map(Vec::len).sum(),
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        // Workers notice the flag at their next poll; they are not joined here.
        self.inner.shutdown.store(true, Ordering::Release);
    }
}

impl BusInner {
    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    fn matching(&self, event_type: &EventType) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .get(event_type)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn dispatch(&self, event: &Event, worker_id: usize) {
        let subscriptions = self.matching(&event.event_type);
        debug!(
            worker_id,
            event_id = %event.id,
            event_type = %event.event_type,
            handlers = subscriptions.len(),
            "dispatching event"
        );

        for subscription in subscriptions {
            if !subscription.active.load(Ordering::Acquire) {
                continue;
            }
            if !subscription.accepts(event) {
                self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.invoke(&subscription, event).await;
        }
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    async fn invoke(&self, subscription: &Subscription, event: &Event) {
        let mut attempt: u32 = 0;
        loop {
            let outcome = AssertUnwindSafe(subscription.handler.handle(event))
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(())) => {
                    self.counters.handlers_invoked.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(_) => "handler panicked".to_string(),
            };

            if attempt >= subscription.max_retries {
                self.counters.handlers_failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    subscription_id = %subscription.id,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    attempts = attempt + 1,
                    error = %failure,
                    "event handler failed; giving up"
                );
                return;
            }

            attempt += 1;
            self.counters.handler_retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                subscription_id = %subscription.id,
                event_type = %event.event_type,
                attempt,
                error = %failure,
                "event handler failed; retrying"
            );
            tokio::time::sleep(subscription.retry_delay * attempt).await;
        }
    }

    fn remember(&self, event: Arc<Event>) {
        if self.config.history_size == 0 {
            return;
        }
        let mut history = self.history.lock();
        if history.len() >= self.config.history_size {
            history.pop_front();
        }
        history.push_back(event);
    }
}

/// One `in_flight` slot held for an event that has not reached the queue yet.
struct InFlight<'a> {
    inner: &'a BusInner,
}

impl<'a> InFlight<'a> {
    fn reserve(inner: &'a BusInner) -> Self {
        inner.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { inner }
    }

    /// The event is queued; the dispatch worker that receives it releases the slot.
    fn commit(self) {
        std::mem::forget(self);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.inner.finish_one();
    }
}

async fn dispatch_worker(inner: Arc<BusInner>, worker_id: usize) {
    debug!(worker_id, "dispatch worker started");
    let poll = inner.config.poll_interval();
    loop {
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }
        match tokio::time::timeout(poll, inner.rx.recv_async()).await {
            Ok(Ok(event)) => {
                inner.dispatch(&event, worker_id).await;
                inner.remember(event);
                inner.finish_one();
            }
            Ok(Err(_)) => {
                debug!(worker_id, "event queue closed");
                break;
            }
            Err(_) => {}
        }
    }
    debug!(worker_id, "dispatch worker exiting");
}
