//! Recovery model: error taxonomy, strategies, sessions and the collaborator traits the
//! [`RecoveryCoordinator`] drives.
//!
//! A session is opened per detected error. The coordinator classifies the error, picks a
//! [`RecoveryStrategy`], and walks the session through analysis, planning, execution and
//! validation. Failed attempts are retried with exponential backoff until the strategy's
//! [`RetryPolicy`] is exhausted, after which the session is escalated or failed.

mod coordinator;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;

pub use coordinator::RecoveryCoordinator;

use super::error::AppResult;
use super::event::{Event, EventType};

/// Session identifier (UUID v4 string).
pub type SessionId = String;

/// Free-form context attached to a detected error.
pub type ErrorContext = HashMap<String, Value>;

/// Priority used when the caller does not choose one (scale 0-10, higher is more urgent).
pub const DEFAULT_RECOVERY_PRIORITY: u8 = 5;

/// Highest accepted session priority.
pub const MAX_RECOVERY_PRIORITY: u8 = 10;

/// Exponential backoff policy for recovery attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts allowed before the session is escalated or failed.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay_ms: u64,
    /// Multiplier applied per further attempt.
    pub backoff_factor: f64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Policy allowing a single attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the attempt limit.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = crate::config::bus::duration_ms(delay);
        self
    }

    /// Set the backoff factor.
    #[must_use]
    pub const fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = crate::config::bus::duration_ms(delay);
        self
    }

    /// Delay before the next attempt after `attempt` attempts have failed:
    /// `min(initial_delay * backoff_factor^(attempt - 1), max_delay)`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay = self.initial_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Validate policy values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".into());
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err("backoff_factor must be a finite value >= 1.0".into());
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err("max_delay_ms must be >= initial_delay_ms".into());
        }
        Ok(())
    }
}

/// How bad an error is.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Cosmetic or self-healing.
    Low,
    /// Default severity.
    #[default]
    Medium,
    /// Degrades functionality.
    High,
    /// Requires immediate attention; escalated without retry.
    Critical,
}

/// Recovery-relevant error category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Likely to succeed on retry; retried with backoff.
    #[default]
    Transient,
    /// Bad input or state; never retried.
    Validation,
    /// Resource pressure; retried, escalated if it persists.
    Resource,
    /// Broken environment; escalated immediately.
    System,
}

impl ErrorCategory {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Validation => "validation",
            Self::Resource => "resource",
            Self::System => "system",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    /// Severity.
    pub severity: ErrorSeverity,
    /// Category.
    pub category: ErrorCategory,
}

impl ErrorClassification {
    /// Build a classification.
    #[must_use]
    pub const fn new(severity: ErrorSeverity, category: ErrorCategory) -> Self {
        Self { severity, category }
    }

    /// Whether the session must be escalated without attempting recovery.
    #[must_use]
    pub fn requires_escalation(&self) -> bool {
        self.category == ErrorCategory::System || self.severity == ErrorSeverity::Critical
    }
}

/// An error reported to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedError {
    /// Machine-readable error type, e.g. `"connection_timeout"`.
    pub error_type: String,
    /// Human-readable message.
    pub message: String,
    /// Component that raised the error.
    pub source: String,
}

impl DetectedError {
    /// Create an error with an unknown source.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            source: "unknown".into(),
        }
    }

    /// Set the reporting component.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Build from a bus event. `error_type` and `error` (or `message`) payload fields are
    /// used when present; the event type name is the fallback error type.
    #[must_use]
    pub fn from_event(event: &Event) -> Self {
        let error_type = event
            .payload_str("error_type")
            .map_or_else(|| event.event_type.as_str().to_string(), str::to_string);
        let message = event
            .payload_str("error")
            .or_else(|| event.payload_str("message"))
            .unwrap_or_default()
            .to_string();
        Self {
            error_type,
            message,
            source: event.source.clone(),
        }
    }
}

/// One step of a recovery strategy, interpreted by the [`RecoveryActionExecutor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Re-run the failed operation.
    Retry,
    /// Restart a named component.
    RestartComponent {
        /// Component name.
        component: String,
    },
    /// Reset component state to a known baseline.
    ResetState,
    /// Drop cached data.
    ClearCache,
    /// Pause before the next action.
    Wait {
        /// Duration in milliseconds.
        duration_ms: u64,
    },
    /// Alert a human operator.
    NotifyOperator,
    /// Executor-defined action.
    Custom {
        /// Action name.
        name: String,
        /// Parameters.
        #[serde(default)]
        params: Map<String, Value>,
    },
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => f.write_str("retry"),
            Self::RestartComponent { component } => write!(f, "restart_component:{component}"),
            Self::ResetState => f.write_str("reset_state"),
            Self::ClearCache => f.write_str("clear_cache"),
            Self::Wait { duration_ms } => write!(f, "wait:{duration_ms}ms"),
            Self::NotifyOperator => f.write_str("notify_operator"),
            Self::Custom { name, .. } => write!(f, "custom:{name}"),
        }
    }
}

/// Ordered recovery actions plus the retry and escalation policy applied to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    /// Strategy name.
    pub name: String,
    /// Actions, executed in order.
    pub actions: Vec<RecoveryAction>,
    /// Retry policy for the whole action sequence.
    pub retry: RetryPolicy,
    /// Escalate when attempts are exhausted instead of failing.
    pub auto_escalate: bool,
}

impl RecoveryStrategy {
    /// Empty strategy with the default retry policy and escalation on.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
            retry: RetryPolicy::default(),
            auto_escalate: true,
        }
    }

    /// Append an action.
    #[must_use]
    pub fn with_action(mut self, action: RecoveryAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable or disable escalation.
    #[must_use]
    pub const fn with_auto_escalate(mut self, enabled: bool) -> Self {
        self.auto_escalate = enabled;
        self
    }
}

/// Session status. Terminal statuses are everything except `Pending` and `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// Waiting for a worker.
    Pending,
    /// A worker is running the phases.
    Running,
    /// Recovery validated.
    Success,
    /// Attempts exhausted, timed out, or failed without escalation.
    Failed,
    /// Recovery partly succeeded.
    Partial,
    /// Cancelled by the caller or by shutdown.
    Cancelled,
    /// Handed off to a human.
    Escalated,
}

impl RecoveryStatus {
    /// Whether no further transitions will happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Partial => "partial",
            Self::Cancelled => "cancelled",
            Self::Escalated => "escalated",
        }
    }

    /// Bus event announcing this terminal status.
    #[must_use]
    pub const fn terminal_event(self) -> EventType {
        match self {
            Self::Success | Self::Partial => EventType::RecoveryCompleted,
            Self::Escalated => EventType::RecoveryEscalated,
            Self::Cancelled => EventType::RecoveryCancelled,
            Self::Pending | Self::Running | Self::Failed => EventType::RecoveryFailed,
        }
    }
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPhase {
    /// Error detected, not yet picked up.
    Detection,
    /// Classification checked against the escalation policy.
    Analysis,
    /// Strategy checked for executable actions.
    Planning,
    /// Actions running.
    Execution,
    /// Result being validated.
    Validation,
    /// Terminal: success, failure or cancellation.
    Completion,
    /// Terminal: escalated.
    Escalation,
}

impl RecoveryPhase {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::Analysis => "analysis",
            Self::Planning => "planning",
            Self::Execution => "execution",
            Self::Validation => "validation",
            Self::Completion => "completion",
            Self::Escalation => "escalation",
        }
    }
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one error's recovery.
#[derive(Debug, Clone)]
pub struct RecoverySession {
    /// Session id.
    pub id: SessionId,
    /// Error type being recovered.
    pub error_type: String,
    /// Error message.
    pub error_message: String,
    /// Context supplied with the error.
    pub context: Arc<ErrorContext>,
    /// Classification result.
    pub classification: ErrorClassification,
    /// Strategy in use.
    pub strategy: Arc<RecoveryStrategy>,
    /// Status.
    pub status: RecoveryStatus,
    /// Phase.
    pub phase: RecoveryPhase,
    /// Priority (0-10).
    pub priority: u8,
    /// Attempts started so far.
    pub attempt_count: u32,
    /// Attempts allowed.
    pub max_attempts: u32,
    /// Creation time, ms since epoch.
    pub start_time_ms: u128,
    /// Termination time, ms since epoch.
    pub end_time_ms: Option<u128>,
    /// Last progress, used by the timeout monitor.
    pub last_update: Instant,
    /// Failure reasons, oldest first.
    pub error_messages: Vec<String>,
    /// Metrics recorded on success.
    pub success_metrics: HashMap<String, Value>,
}

impl RecoverySession {
    /// Whether the session has terminated.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall time from creation to termination.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u128> {
        self.end_time_ms
            .map(|end| end.saturating_sub(self.start_time_ms))
    }
}

/// What a strategy execution did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryResult {
    /// Whether the actions succeeded.
    pub success: bool,
    /// Descriptions of the actions performed.
    pub actions_taken: Vec<String>,
    /// Time spent executing.
    pub time_taken: Duration,
    /// Failure description.
    pub error_message: Option<String>,
}

impl RecoveryResult {
    /// Successful result.
    #[must_use]
    pub const fn succeeded(actions_taken: Vec<String>, time_taken: Duration) -> Self {
        Self {
            success: true,
            actions_taken,
            time_taken,
            error_message: None,
        }
    }

    /// Failed result.
    pub fn failed(
        message: impl Into<String>,
        actions_taken: Vec<String>,
        time_taken: Duration,
    ) -> Self {
        Self {
            success: false,
            actions_taken,
            time_taken,
            error_message: Some(message.into()),
        }
    }
}

/// Assigns a severity and category to errors and proposes a strategy for them.
#[async_trait]
pub trait ErrorClassifier: Send + Sync + 'static {
    /// Classify an error.
    async fn classify(&self, error: &DetectedError) -> ErrorClassification;

    /// Strategy to use for `error_type` with the given classification.
    fn default_strategy(
        &self,
        error_type: &str,
        classification: &ErrorClassification,
    ) -> RecoveryStrategy;
}

/// Carries out recovery actions.
#[async_trait]
pub trait RecoveryActionExecutor: Send + Sync + 'static {
    /// Execute the strategy's actions in order.
    ///
    /// An `Err` or a result with `success == false` counts as a failed attempt.
    async fn apply(
        &self,
        strategy: &RecoveryStrategy,
        context: &ErrorContext,
    ) -> AppResult<RecoveryResult>;

    /// Confirm that recovery actually took effect.
    async fn validate(&self, result: &RecoveryResult) -> bool {
        result.success
    }
}

/// Keyword-based classifier covering the common error taxonomy.
///
/// Custom rules are matched first, in insertion order, against the lowercased error type
/// and message. Unmatched errors are `Transient` / `Medium`.
#[derive(Debug, Clone)]
pub struct StandardErrorClassifier {
    rules: Vec<(String, ErrorClassification)>,
    retry: RetryPolicy,
    auto_escalate: bool,
}

const SYSTEM_KEYWORDS: &[&str] = &["panic", "fatal", "corrupt", "crash", "segfault", "system"];
const VALIDATION_KEYWORDS: &[&str] = &["invalid", "validation", "malformed", "parse", "schema"];
const RESOURCE_KEYWORDS: &[&str] = &[
    "memory", "resource", "disk", "quota", "exhausted", "capacity", "too many",
];
const TRANSIENT_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "unavailable",
    "network",
    "temporar",
    "busy",
];

impl Default for StandardErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl StandardErrorClassifier {
    /// Classifier with the built-in keyword table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            retry: RetryPolicy::default(),
            auto_escalate: true,
        }
    }

    /// Add a rule matched before the built-in table.
    #[must_use]
    pub fn with_rule(
        mut self,
        keyword: impl Into<String>,
        classification: ErrorClassification,
    ) -> Self {
        self.rules.push((keyword.into().to_lowercase(), classification));
        self
    }

    /// Base retry policy for proposed strategies.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Escalation flag for proposed strategies.
    #[must_use]
    pub const fn with_auto_escalate(mut self, enabled: bool) -> Self {
        self.auto_escalate = enabled;
        self
    }

    fn classify_text(&self, text: &str) -> ErrorClassification {
        if let Some((_, classification)) = self.rules.iter().find(|(kw, _)| text.contains(kw.as_str())) {
            return *classification;
        }
        let matches = |keywords: &[&str]| keywords.iter().any(|kw| text.contains(kw));
        if matches(SYSTEM_KEYWORDS) {
            ErrorClassification::new(ErrorSeverity::Critical, ErrorCategory::System)
        } else if matches(VALIDATION_KEYWORDS) {
            ErrorClassification::new(ErrorSeverity::Low, ErrorCategory::Validation)
        } else if matches(RESOURCE_KEYWORDS) {
            ErrorClassification::new(ErrorSeverity::High, ErrorCategory::Resource)
        } else if matches(TRANSIENT_KEYWORDS) {
            ErrorClassification::new(ErrorSeverity::Medium, ErrorCategory::Transient)
        } else {
            ErrorClassification::default()
        }
    }
}

#[async_trait]
impl ErrorClassifier for StandardErrorClassifier {
    async fn classify(&self, error: &DetectedError) -> ErrorClassification {
        let text = format!("{} {}", error.error_type, error.message).to_lowercase();
        self.classify_text(&text)
    }

    fn default_strategy(
        &self,
        error_type: &str,
        classification: &ErrorClassification,
    ) -> RecoveryStrategy {
        let name = format!("{}_recovery:{error_type}", classification.category);
        let strategy = RecoveryStrategy::new(name)
            .with_retry(self.retry)
            .with_auto_escalate(self.auto_escalate);
        match classification.category {
            ErrorCategory::Transient => strategy.with_action(RecoveryAction::Retry),
            ErrorCategory::Resource => strategy
                .with_action(RecoveryAction::ClearCache)
                .with_action(RecoveryAction::Wait {
                    duration_ms: self.retry.initial_delay_ms,
                })
                .with_action(RecoveryAction::Retry),
            ErrorCategory::Validation => strategy
                .with_retry(self.retry.with_max_attempts(1))
                .with_action(RecoveryAction::ResetState),
            ErrorCategory::System => strategy.with_action(RecoveryAction::NotifyOperator),
        }
    }
}

/// Coarse health derived from the recovery success rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Success rate of at least 95 %.
    Healthy,
    /// At least 80 %.
    Degraded,
    /// At least 50 %.
    Warning,
    /// Below 50 %.
    Critical,
}

impl HealthStatus {
    /// Map a success rate in percent to a health level.
    #[must_use]
    pub fn from_success_rate(rate: f64) -> Self {
        if rate >= 95.0 {
            Self::Healthy
        } else if rate >= 80.0 {
            Self::Degraded
        } else if rate >= 50.0 {
            Self::Warning
        } else {
            Self::Critical
        }
    }
}

/// Point-in-time coordinator statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStatistics {
    /// Sessions opened.
    pub total_sessions: u64,
    /// Sessions not yet terminated.
    pub active_sessions: usize,
    /// Sessions in the completed history.
    pub completed_sessions: usize,
    /// Sessions that succeeded.
    pub successful_sessions: u64,
    /// Sessions that failed.
    pub failed_sessions: u64,
    /// Sessions escalated.
    pub escalated_sessions: u64,
    /// Sessions cancelled.
    pub cancelled_sessions: u64,
    /// Retries scheduled across all sessions.
    pub retries: u64,
    /// Successful / (successful + failed + escalated), in percent; 100 when none.
    pub success_rate: f64,
    /// Mean creation-to-termination time of finished sessions.
    pub average_recovery_ms: f64,
    /// Health derived from `success_rate`.
    pub health: HealthStatus,
}
