//! Core data model shared by every orchestration component.
//!
//! These types are the wire format crossing component boundaries: a
//! `MessageEnvelope` crossing the channel boundary, a `BotMessage` crossing
//! the bus, a `Task` owned by the coordinator, and so on. None of them carry
//! behaviour beyond small derived accessors — the components in this crate
//! own the algorithms that operate on them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction a `MessageEnvelope` travels relative to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// From an external channel into the orchestrator.
    Inbound,
    /// From the orchestrator out to an external channel.
    Outbound,
}

/// Who originated a `MessageEnvelope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    /// A human user on the channel.
    User,
    /// One of the fleet's bots.
    Bot,
    /// A synthetic sender (e.g. the routines scheduler).
    System,
}

/// The transport unit crossing the channel boundary (spec 3, `MessageEnvelope`).
///
/// Immutable once published: every field is set at construction and the
/// envelope is never mutated in place by a component that receives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Channel tag (e.g. "telegram", "slack").
    pub channel: String,
    /// Chat identifier within the channel.
    pub chat_id: String,
    /// Message body.
    pub content: String,
    /// Direction relative to the core.
    pub direction: Direction,
    /// Sender identifier (user id, bot name, or "system").
    pub sender_id: String,
    /// Kind of sender.
    pub sender_kind: SenderKind,
    /// Bot name, when the sender is a bot.
    pub bot_name: Option<String>,
    /// Id of the message this one replies to, if any.
    pub reply_to: Option<String>,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Attached media references (urls or opaque ids).
    pub media: Vec<String>,
    /// Free-form metadata carried alongside the envelope.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Room grouping several channel/chat pairs into one conversation.
    pub room_id: Option<String>,
    /// Trace id propagated through derived work for observability.
    pub trace_id: String,
}

impl MessageEnvelope {
    /// Derived session key: `room_id|channel|chat_id`.
    ///
    /// `room_id` defaults to the empty string when absent so the key is
    /// still well-formed for channels that never group into rooms.
    #[must_use]
    pub fn session_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.room_id.as_deref().unwrap_or(""),
            self.channel,
            self.chat_id
        )
    }
}

/// Kind of inter-bot message (spec 3, `BotMessage`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A task assignment awaiting a response.
    Request,
    /// A reply to a prior request.
    Response,
    /// Free-form team discussion, not tied to a task.
    Discussion,
    /// Sent to every registered bot.
    Broadcast,
    /// A one-way team announcement.
    Announcement,
}

/// Literal recipient id meaning "every registered bot".
pub const TEAM_RECIPIENT: &str = "team";

/// Inter-bot transport unit delivered via the `MessageBus` (spec 3, 4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotMessage {
    /// Unique message id, assigned by the sending caller before the
    /// message reaches the bus (see `new_id()` at call sites).
    pub id: String,
    /// Sending bot's id.
    pub sender_id: String,
    /// Recipient bot id, or [`TEAM_RECIPIENT`] for a broadcast.
    pub recipient_id: String,
    /// Message kind.
    pub kind: MessageKind,
    /// Message body.
    pub content: String,
    /// Context map, conventionally carrying `task_id` and `subject`.
    pub context: HashMap<String, String>,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle state of a `Task` (spec 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet picked up.
    Created,
    /// Assigned bot is working on it.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Withdrawn before completion.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal (no further transitions are valid).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Unit of delegated work owned by the `Coordinator` (spec 3, 4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Full description handed to the assignee.
    pub description: String,
    /// Domain tag used for expertise scoring.
    pub domain: String,
    /// Bot id this task is assigned to.
    pub assigned_to: String,
    /// Bot id (or "coordinator") that created this task.
    pub created_by: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Completion timestamp, set once terminal.
    pub completed_at: Option<DateTime<Utc>>,
    /// Requirements the assignee should satisfy.
    pub requirements: Vec<String>,
    /// Optional due date.
    pub due_date: Option<DateTime<Utc>>,
    /// Parent task id, for sub-tasks.
    pub parent_task_id: Option<String>,
    /// Result text, set on completion.
    pub result: Option<String>,
    /// Confidence in the result, in `[0, 1]`.
    pub confidence: Option<f64>,
    /// Learnings surfaced while executing the task.
    pub learnings: Vec<String>,
    /// New tasks discovered while executing this one.
    pub follow_ups: Vec<String>,
    /// Error message, set on failure.
    pub error: Option<String>,
}

impl Task {
    /// Transition this task to `completed`, recording the result.
    pub fn mark_completed(&mut self, result: String, confidence: f64) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.confidence = Some(confidence);
        self.completed_at = Some(Utc::now());
    }

    /// Transition this task to `failed`, recording the error.
    pub fn mark_failed(&mut self, error: String) {
        self.status = TaskStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }
}

/// Severity/importance level of a `WorkLogEntry` (spec 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Normal operation.
    Info,
    /// Reasoning step.
    Thinking,
    /// A choice made.
    Decision,
    /// A mistake fixed.
    Correction,
    /// Low confidence.
    Uncertainty,
    /// Issue encountered.
    Warning,
    /// Failure.
    Error,
    /// Tool execution.
    Tool,
}

impl LogLevel {
    /// String tag used for the SQLite `level` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Thinking => "thinking",
            Self::Decision => "decision",
            Self::Correction => "correction",
            Self::Uncertainty => "uncertainty",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Tool => "tool",
        }
    }

    /// Parse the SQLite `level` column back into a `LogLevel`.
    ///
    /// # Errors
    ///
    /// Returns an error describing the unrecognised value.
    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "info" => Ok(Self::Info),
            "thinking" => Ok(Self::Thinking),
            "decision" => Ok(Self::Decision),
            "correction" => Ok(Self::Correction),
            "uncertainty" => Ok(Self::Uncertainty),
            "warning" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// One step in a work log (spec 3, `WorkLogEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkLogEntry {
    /// When this entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Severity/importance.
    pub level: LogLevel,
    /// Sequential step number; `entries[i].step == i + 1`.
    pub step: u32,
    /// Free-form category tag ("memory", "tool", "routing", ...).
    pub category: String,
    /// Human-readable description.
    pub message: String,
    /// Structured data about the entry.
    pub details: serde_json::Value,
    /// Confidence in `[0, 1]`, when applicable.
    pub confidence: Option<f64>,
    /// How long this step took.
    pub duration_ms: Option<i64>,
    /// Tool name, when this entry is a tool execution.
    pub tool_name: Option<String>,
    /// Tool input, when this entry is a tool execution.
    pub tool_input: Option<serde_json::Value>,
    /// Tool output, when this entry is a tool execution.
    pub tool_output: Option<serde_json::Value>,
    /// Tool status ("success", "error", "timeout"), when applicable.
    pub tool_status: Option<String>,
}

impl WorkLogEntry {
    /// Whether this entry represents a tool execution.
    #[must_use]
    pub fn is_tool_entry(&self) -> bool {
        self.tool_name.is_some()
    }
}

/// A complete work log for a single user turn (spec 3, `WorkLog`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkLog {
    /// Owning session id.
    pub session_id: String,
    /// Original user query.
    pub query: String,
    /// Start timestamp.
    pub start_time: DateTime<Utc>,
    /// End timestamp, set once the turn finishes.
    pub end_time: Option<DateTime<Utc>>,
    /// Recorded entries, in step order.
    pub entries: Vec<WorkLogEntry>,
    /// Final output text, set once the turn finishes.
    pub final_output: Option<String>,
}

/// Declarative shape of a bot's periodic work (spec 3, 4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Owning bot's name.
    pub bot_name: String,
    /// Tick interval in seconds.
    pub interval_s: u64,
    /// Whether this heartbeat runs at all.
    pub enabled: bool,
    /// Named checks executed each tick.
    pub checks: Vec<CheckDefinition>,
    /// Run checks concurrently (bounded) instead of sequentially.
    pub parallel_checks: bool,
    /// Concurrency cap when `parallel_checks` is set.
    pub max_concurrent_checks: usize,
    /// Abort the remaining checks after the first failure.
    pub stop_on_first_failure: bool,
    /// Retry attempts per check.
    pub retry_attempts: u32,
    /// Base retry delay in seconds.
    pub retry_delay_s: f64,
    /// Exponential backoff multiplier applied per retry attempt.
    pub retry_backoff: f64,
    /// Whether a circuit breaker guards this bot's checks.
    pub circuit_breaker_enabled: bool,
    /// Consecutive failures before the circuit opens.
    pub circuit_breaker_threshold: u32,
    /// Seconds the circuit stays open before trying half-open.
    pub circuit_breaker_timeout_s: u64,
    /// Path to this bot's heartbeat directive file, if it has one.
    #[serde(default)]
    pub directive_path: Option<std::path::PathBuf>,
}

impl HeartbeatConfig {
    /// Tick interval expressed in minutes, for display purposes.
    #[must_use]
    pub fn interval_minutes(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let secs = self.interval_s as f64;
        secs / 60.0
    }
}

/// A single named unit of background work a bot performs each tick (spec 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDefinition {
    /// Check name, looked up in the check registry.
    pub name: String,
    /// Whether this check currently runs.
    pub enabled: bool,
    /// Maximum wall-clock duration before the check times out.
    pub max_duration_s: u64,
}

/// Outcome status of one `CheckResult` (spec 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Completed without error.
    Success,
    /// Completed with an error.
    Failed,
    /// Exceeded `max_duration_s`.
    Timeout,
    /// Not run (disabled, or skipped after an earlier failure).
    Skipped,
}

/// Result of executing one `CheckDefinition` (spec 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Name of the check that produced this result.
    pub check_name: String,
    /// Outcome status.
    pub status: CheckStatus,
    /// When the check started.
    pub started_at: DateTime<Utc>,
    /// When the check finished, if it did.
    pub ended_at: Option<DateTime<Utc>>,
    /// Convenience flag mirroring `status == Success`.
    pub success: bool,
    /// Error message, when not successful.
    pub error: Option<String>,
    /// Error type tag, when not successful.
    pub error_type: Option<String>,
    /// Human-readable summary.
    pub message: Option<String>,
}

/// What triggered a `HeartbeatTick` (spec 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Fired by the regular interval loop.
    Scheduled,
    /// Fired via `trigger_now`.
    Manual,
    /// Fired in response to an external event.
    Event,
}

/// Overall outcome of a `HeartbeatTick` (spec 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStatus {
    /// Still running.
    Pending,
    /// All checks succeeded.
    Completed,
    /// Some checks failed, but the tick did not stop early.
    CompletedWithFailures,
    /// Stopped due to a failure with `stop_on_first_failure` set.
    Failed,
    /// Not executed because the circuit breaker was open.
    Skipped,
}

/// One execution of a bot's heartbeat (spec 3, 4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatTick {
    /// Short tick id.
    pub tick_id: String,
    /// Owning bot's name.
    pub bot_name: String,
    /// When this tick started.
    pub started_at: DateTime<Utc>,
    /// Snapshot of the config this tick ran under.
    pub config: HeartbeatConfig,
    /// What triggered this tick.
    pub trigger_type: TriggerKind,
    /// Free-form reason, mainly for manual/event triggers.
    pub triggered_by: Option<String>,
    /// Per-check results, in execution order.
    pub results: Vec<CheckResult>,
    /// Overall outcome.
    pub status: TickStatus,
}

impl HeartbeatTick {
    /// Fraction of `results` that succeeded, or `1.0` when there were none.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 1.0;
        }
        let successes = self.results.iter().filter(|r| r.success).count();
        #[allow(clippy::cast_precision_loss)]
        let rate = successes as f64 / self.results.len() as f64;
        rate
    }
}

/// A routine's schedule shape (spec 3, `Routine`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CronSchedule {
    /// Fire exactly once, at an absolute instant.
    At {
        /// Fire time, epoch milliseconds.
        at_ms: i64,
    },
    /// Fire repeatedly at a fixed interval.
    Every {
        /// Interval, milliseconds.
        every_ms: i64,
    },
    /// Fire on a 5-field cron expression in a named timezone.
    Cron {
        /// Standard 5-field POSIX cron expression.
        expr: String,
        /// IANA timezone name the expression is evaluated in.
        tz: String,
    },
}

/// What a routine produces when it fires (spec 3, `Routine`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronPayloadKind {
    /// Inject a synthetic inbound `MessageEnvelope`.
    AgentTurn,
    /// Invoke an in-process handler by name.
    SystemEvent,
}

/// Scope a routine's synthetic event is delivered at (spec 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronScope {
    /// Delivered as if from a user.
    User,
    /// Delivered as a system-level event.
    System,
}

/// Payload dispatched when a routine fires (spec 3, `Routine`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronPayload {
    /// Dispatch kind.
    pub kind: CronPayloadKind,
    /// Message text for `agent_turn` payloads.
    #[serde(default)]
    pub message: String,
    /// Whether the injected message should be delivered to a live channel.
    #[serde(default)]
    pub deliver: bool,
    /// Delivery channel tag, when `deliver` is set.
    pub channel: Option<String>,
    /// Delivery chat id, when `deliver` is set.
    pub to: Option<String>,
    /// Delivery scope.
    #[serde(default = "default_cron_scope")]
    pub scope: CronScope,
    /// Handler name for `system_event` payloads.
    pub routine: Option<String>,
    /// Bot this payload concerns, if any.
    pub bot: Option<String>,
    /// Free-form metadata carried through to the synthetic event.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_cron_scope() -> CronScope {
    CronScope::User
}

/// Last-known execution status of a routine (spec 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Last run succeeded.
    Ok,
    /// Last run raised an error.
    Error,
    /// Last run was skipped (e.g. disabled mid-flight).
    Skipped,
}

/// Mutable run state attached to a `Routine` (spec 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobState {
    /// Next scheduled fire time, epoch milliseconds.
    pub next_run_at_ms: i64,
    /// Last fire time, epoch milliseconds, if it has ever run.
    pub last_run_at_ms: Option<i64>,
    /// Status of the last run, if it has ever run.
    pub last_status: Option<RunStatus>,
    /// Error message from the last run, if it failed.
    pub last_error: Option<String>,
}

/// A persisted scheduler job (spec 3, `Routine`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Routine {
    /// Unique routine id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this routine currently fires.
    pub enabled: bool,
    /// Schedule shape.
    pub schedule: CronSchedule,
    /// Dispatch payload.
    pub payload: CronPayload,
    /// Mutable run state.
    pub state: CronJobState,
    /// Creation timestamp, epoch milliseconds.
    pub created_at_ms: i64,
    /// Last-updated timestamp, epoch milliseconds.
    pub updated_at_ms: i64,
    /// Remove this routine after it next fires successfully.
    pub delete_after_run: bool,
}

/// Overall confidence tier of an `InjectionDetectionResult` (spec 3, 4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionConfidence {
    /// Lowest tier: recorded but not acted on.
    Low,
    /// Medium tier: surfaced as a warning.
    Medium,
    /// Highest tier: content is blocked outright.
    High,
}

/// Action taken as a result of a scan (spec 3, 4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionAction {
    /// Content passes through unmodified.
    Allow,
    /// Content passes through, but the verdict is recorded.
    Warn,
    /// Content is withheld from the language model.
    Block,
}

/// A single pattern hit within a scanned text (spec 3, 4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionMatch {
    /// Name of the pattern that matched.
    pub pattern_name: String,
    /// The matched substring.
    pub matched_text: String,
    /// Confidence tier of the pattern that matched.
    pub confidence: InjectionConfidence,
    /// Byte offset span of the match within the scanned text.
    pub position: (usize, usize),
}

/// Result of scanning a piece of text for prompt injection (spec 3, 4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectionDetectionResult {
    /// Source url, or empty string when scanning non-url content.
    pub url: String,
    /// When the scan ran.
    pub scanned_at: DateTime<Utc>,
    /// Highest confidence tier among `matches`.
    pub confidence: InjectionConfidence,
    /// All matches found, across all tiers.
    pub matches: Vec<InjectionMatch>,
    /// Action implied by `confidence`.
    pub action: InjectionAction,
}

impl InjectionDetectionResult {
    /// Whether this result blocks the content outright.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.action == InjectionAction::Block
    }

    /// Whether this result warrants a warning but not a block.
    #[must_use]
    pub fn is_warn(&self) -> bool {
        self.action == InjectionAction::Warn
    }
}

/// An entry in the `ContentStore` (spec 3, 4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedContent {
    /// Opaque id, `fetch_` followed by 12 hex characters.
    pub id: String,
    /// Source url.
    pub url: String,
    /// Optional title, when known.
    pub title: Option<String>,
    /// Stored content, possibly truncated to the store's size cap.
    pub content: String,
    /// When this content was scanned.
    pub scanned_at: DateTime<Utc>,
    /// Injection scan result for this content.
    pub scan_result: InjectionDetectionResult,
    /// Whether this content has been retrieved via `get`.
    pub accessed: bool,
    /// When this content was last retrieved, if ever.
    pub accessed_at: Option<DateTime<Utc>>,
}

impl FetchedContent {
    /// Whether this content is safe to hand to the language model.
    #[must_use]
    pub fn is_safe(&self) -> bool {
        !self.scan_result.is_blocked()
    }

    /// Whether this content carries a warning but is not blocked.
    #[must_use]
    pub fn needs_warning(&self) -> bool {
        self.scan_result.is_warn()
    }
}

/// Output format requested of a sidekick (spec 3, `SidekickTaskEnvelope`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidekickOutputFormat {
    /// Plain text summary.
    Text,
    /// Structured JSON payload.
    Json,
}

/// A bounded sub-task spawned by a bot (spec 3, 4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidekickTaskEnvelope {
    /// Unique sub-task id.
    pub task_id: String,
    /// Id of the bot that spawned this sub-task.
    pub parent_bot_id: String,
    /// Room this sub-task runs on behalf of.
    pub room_id: String,
    /// What the sub-task is trying to accomplish.
    pub goal: String,
    /// Inputs handed to the sub-task.
    pub input: HashMap<String, serde_json::Value>,
    /// Constraints the sub-task must respect.
    pub constraints: HashMap<String, serde_json::Value>,
    /// Requested output shape.
    pub output_format: SidekickOutputFormat,
    /// Always `false` at entry — sidekicks may never spawn sidekicks.
    pub parent_is_sidekick: bool,
}

/// Outcome status of a `SidekickResult` (spec 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SidekickStatus {
    /// Completed successfully.
    Success,
    /// Completed with a partial result.
    Partial,
    /// Failed with an error.
    Failed,
    /// Exceeded `timeout_seconds`.
    Timeout,
    /// Cancelled before completion.
    Cancelled,
}

/// Result of running one `SidekickTaskEnvelope` (spec 3, 4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidekickResult {
    /// Id of the task this result belongs to.
    pub task_id: String,
    /// Outcome status.
    pub status: SidekickStatus,
    /// Human-readable summary.
    pub summary: String,
    /// Artifact references produced, if any.
    pub artifacts: Vec<String>,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: i64,
}

/// Severity of a hard ban rule on a `RoleCard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanSeverity {
    /// Should be avoided.
    Soft,
    /// Must never happen.
    Hard,
}

/// A rule a bot must never violate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardBan {
    /// The rule text.
    pub rule: String,
    /// How strictly this rule is enforced.
    pub severity: BanSeverity,
}

/// A named affinity towards another bot, used for team-routing hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Affinity {
    /// The other bot's name.
    pub bot_name: String,
    /// Affinity score, higher is stronger.
    pub score: f64,
    /// Free-form note explaining the affinity.
    pub note: String,
}

/// Static description of a bot (spec 3, `RoleCard`). Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleCard {
    /// Bot name / id.
    pub name: String,
    /// Primary domain this bot handles.
    pub domain: String,
    /// Display title.
    pub title: String,
    /// Voice/persona description.
    pub voice: String,
    /// Greeting shown when the bot first engages.
    pub greeting: String,
    /// Rules this bot must never break.
    pub hard_bans: Vec<HardBan>,
    /// Affinities towards other bots.
    pub affinities: Vec<Affinity>,
}

/// Generate a fresh `Uuid` v4 as a lowercase hyphenated string.
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
