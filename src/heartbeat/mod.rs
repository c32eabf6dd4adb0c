//! BotHeartbeat: each bot's independent cadenced work loop (spec 4.4).
//!
//! Runs as a background Tokio task, ticking at `config.interval_s`. Each
//! tick consults the circuit breaker, executes registered checks (parallel
//! or sequential, with retry/backoff), and appends the outcome to a
//! [`HeartbeatHistory`]. Shutdown is cooperative via a `watch::Receiver<bool>`,
//! matching the rest of the crate's background-task shutdown idiom.

pub mod checks;
pub mod circuit_breaker;
pub mod fleet;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tracing::{info, warn};

use crate::types::{CheckResult, CheckStatus, HeartbeatConfig, HeartbeatTick, TickStatus, TriggerKind};
use checks::CheckRegistry;
use circuit_breaker::{CircuitBreaker, CircuitState};

/// The step 2 LLM-driven execution run against a bot's heartbeat
/// directive file, when one is present and non-empty.
#[async_trait]
pub trait DirectiveExecutor: Send + Sync {
    /// Execute the directive's contents, returning the model's raw reply.
    async fn execute(&self, directive: &str) -> Result<String, String>;
}

/// A boxed, dynamically-dispatched directive executor.
pub type BoxedDirectiveExecutor = Arc<dyn DirectiveExecutor>;

/// Cap on how much of a directive response is retained in a tick's history.
const DIRECTIVE_RESPONSE_TRUNCATE_LEN: usize = 2000;

const DIRECTIVE_CHECK_NAME: &str = "heartbeat_directive";

/// Whether `contents` has no actionable directive: every non-blank,
/// non-comment line is a checkbox placeholder (`- [ ]`, `* [ ]`,
/// `- [x]`, `* [x]`) rather than free-form task text.
fn directive_is_empty(contents: &str) -> bool {
    contents.lines().all(|line| {
        let trimmed = line.trim();
        trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with("- [ ]")
            || trimmed.starts_with("* [ ]")
            || trimmed.starts_with("- [x]")
            || trimmed.starts_with("* [x]")
    })
}

/// Whether `response` contains the `HEARTBEAT_OK` token, matched
/// case-insensitively and independent of underscores/spaces/dashes.
fn contains_heartbeat_ok(response: &str) -> bool {
    let normalized: String = response.chars().filter(|c| c.is_alphanumeric()).map(|c| c.to_ascii_lowercase()).collect();
    normalized.contains("heartbeatok")
}

fn truncate_for_persistence(text: &str) -> String {
    if text.len() <= DIRECTIVE_RESPONSE_TRUNCATE_LEN {
        return text.to_owned();
    }
    let mut cut = DIRECTIVE_RESPONSE_TRUNCATE_LEN.min(text.len());
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

/// Running totals over every tick a bot has executed.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatHistory {
    total_ticks: u64,
    successful_ticks: u64,
    failed_ticks: u64,
    ticks: Vec<HeartbeatTick>,
}

/// Cap on retained tick history, to bound memory for long-lived bots.
const MAX_HISTORY: usize = 500;

impl HeartbeatHistory {
    /// Append a completed tick, trimming the oldest entry past
    /// [`MAX_HISTORY`].
    pub fn record(&mut self, tick: HeartbeatTick) {
        self.total_ticks = self.total_ticks.saturating_add(1);
        match tick.status {
            TickStatus::Completed => self.successful_ticks = self.successful_ticks.saturating_add(1),
            TickStatus::Failed | TickStatus::CompletedWithFailures => {
                self.failed_ticks = self.failed_ticks.saturating_add(1);
            }
            TickStatus::Pending | TickStatus::Skipped => {}
        }
        self.ticks.push(tick);
        if self.ticks.len() > MAX_HISTORY {
            self.ticks.remove(0);
        }
    }

    /// Total ticks recorded.
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Ticks that completed with no failures.
    pub fn successful_ticks(&self) -> u64 {
        self.successful_ticks
    }

    /// Ticks that failed or completed with failures.
    pub fn failed_ticks(&self) -> u64 {
        self.failed_ticks
    }

    /// `successful_ticks / total_ticks`, or `1.0` with no history.
    pub fn get_average_success_rate(&self) -> f64 {
        if self.total_ticks == 0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.successful_ticks as f64 / self.total_ticks as f64;
        rate
    }

    /// Fraction of ticks within the last `window_hours` that were not
    /// `failed` (`completed_with_failures` counts as up).
    pub fn get_uptime_percentage(&self, window_hours: i64) -> f64 {
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(window_hours);
        let recent: Vec<&HeartbeatTick> = self
            .ticks
            .iter()
            .filter(|t| t.started_at >= cutoff)
            .collect();
        if recent.is_empty() {
            return 1.0;
        }
        let up = recent.iter().filter(|t| t.status != TickStatus::Failed).count();
        #[allow(clippy::cast_precision_loss)]
        let rate = up as f64 / recent.len() as f64;
        rate
    }
}

/// A bot's cadenced heartbeat runner.
pub struct BotHeartbeat {
    config: RwLock<HeartbeatConfig>,
    registry: CheckRegistry,
    circuit_breaker: Option<CircuitBreaker>,
    directive_executor: Option<BoxedDirectiveExecutor>,
    history: Arc<RwLock<HeartbeatHistory>>,
    current_tick: Arc<Mutex<Option<String>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BotHeartbeat {
    /// Build a heartbeat runner for `config`, wiring a circuit breaker if
    /// `config.circuit_breaker_enabled`.
    pub fn new(config: HeartbeatConfig, registry: CheckRegistry) -> Self {
        let circuit_breaker = config.circuit_breaker_enabled.then(|| {
            CircuitBreaker::new(config.circuit_breaker_threshold, config.circuit_breaker_timeout_s)
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config: RwLock::new(config),
            registry,
            circuit_breaker,
            directive_executor: None,
            history: Arc::new(RwLock::new(HeartbeatHistory::default())),
            current_tick: Arc::new(Mutex::new(None)),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Attach the executor run against this bot's heartbeat directive
    /// file, if `config.directive_path` is set.
    #[must_use]
    pub fn with_directive_executor(mut self, executor: BoxedDirectiveExecutor) -> Self {
        self.directive_executor = Some(executor);
        self
    }

    /// Run the tick loop until `stop()` is called or the process exits.
    ///
    /// Intended to be spawned as its own Tokio task per bot.
    pub async fn run(self: Arc<Self>) {
        let interval_s = self.config.read().await.interval_s;
        if interval_s == 0 {
            warn!("heartbeat interval is zero, not starting loop");
            return;
        }
        let mut interval = tokio::time::interval(Duration::from_secs(interval_s));
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.execute_tick(TriggerKind::Scheduled, None).await;
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Request the loop to stop. Does not wait for the current tick.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run a single tick immediately, out of cadence.
    pub async fn trigger_now(&self, reason: impl Into<String>) -> HeartbeatTick {
        self.execute_tick(TriggerKind::Manual, Some(reason.into())).await
    }

    /// Poll `current_tick` until it clears or `timeout` elapses.
    ///
    /// Returns `true` if the tick cleared before the timeout.
    pub async fn wait_for_current_tick(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.current_tick.lock().await.is_none() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Current tick history snapshot.
    pub async fn history(&self) -> HeartbeatHistory {
        self.history.read().await.clone()
    }

    /// Current circuit breaker state, or `None` if this bot has no
    /// circuit breaker configured.
    pub fn circuit_state(&self) -> Option<CircuitState> {
        self.circuit_breaker.as_ref().map(CircuitBreaker::state)
    }

    async fn execute_tick(&self, trigger_type: TriggerKind, triggered_by: Option<String>) -> HeartbeatTick {
        let config = self.config.read().await.clone();
        let tick_id = crate::types::new_id();
        *self.current_tick.lock().await = Some(tick_id.clone());

        let started_at = chrono::Utc::now();

        if let Some(cb) = &self.circuit_breaker {
            if cb.state() == CircuitState::Open {
                let tick = HeartbeatTick {
                    tick_id,
                    bot_name: config.bot_name.clone(),
                    started_at,
                    config,
                    trigger_type,
                    triggered_by,
                    results: Vec::new(),
                    status: TickStatus::Skipped,
                };
                self.history.write().await.record(tick.clone());
                *self.current_tick.lock().await = None;
                return tick;
            }
        }

        let mut results = Vec::new();
        if let Some(path) = config.directive_path.clone() {
            if let Some(directive_result) = self.run_directive_step(&path).await {
                results.push(directive_result);
            }
        }

        let mut check_results = if config.parallel_checks {
            self.run_checks_parallel(&config).await
        } else {
            self.run_checks_sequential(&config).await
        };
        results.append(&mut check_results);

        let any_failed = results.iter().any(|r| !r.success);
        let status = if any_failed && config.stop_on_first_failure {
            TickStatus::Failed
        } else if any_failed {
            TickStatus::CompletedWithFailures
        } else {
            TickStatus::Completed
        };

        if let Some(cb) = &self.circuit_breaker {
            if any_failed {
                cb.record_failure();
            } else {
                cb.record_success();
            }
        }

        let tick = HeartbeatTick {
            tick_id,
            bot_name: config.bot_name.clone(),
            started_at,
            config,
            trigger_type,
            triggered_by,
            results,
            status,
        };

        self.history.write().await.record(tick.clone());
        *self.current_tick.lock().await = None;
        info!(bot = %tick.bot_name, status = ?tick.status, "heartbeat tick complete");
        tick
    }

    /// Step 2 of the tick algorithm: if `path` holds a non-empty
    /// heartbeat directive, run it through the registered executor and
    /// inspect the reply for the `HEARTBEAT_OK` token.
    async fn run_directive_step(&self, path: &std::path::Path) -> Option<CheckResult> {
        let started_at = chrono::Utc::now();

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                return Some(CheckResult {
                    check_name: DIRECTIVE_CHECK_NAME.to_owned(),
                    status: CheckStatus::Failed,
                    started_at,
                    ended_at: Some(chrono::Utc::now()),
                    success: false,
                    error: Some(format!("failed to read heartbeat directive: {e}")),
                    error_type: Some("directive_io".to_owned()),
                    message: None,
                });
            }
        };

        if directive_is_empty(&contents) {
            return None;
        }

        let Some(executor) = &self.directive_executor else {
            warn!(path = %path.display(), "heartbeat directive present but no executor registered");
            return None;
        };

        match executor.execute(&contents).await {
            Ok(response) => {
                let message = if contains_heartbeat_ok(&response) {
                    "no action".to_owned()
                } else {
                    format!("action taken: {}", truncate_for_persistence(&response))
                };
                Some(CheckResult {
                    check_name: DIRECTIVE_CHECK_NAME.to_owned(),
                    status: CheckStatus::Success,
                    started_at,
                    ended_at: Some(chrono::Utc::now()),
                    success: true,
                    error: None,
                    error_type: None,
                    message: Some(message),
                })
            }
            Err(error) => Some(CheckResult {
                check_name: DIRECTIVE_CHECK_NAME.to_owned(),
                status: CheckStatus::Failed,
                started_at,
                ended_at: Some(chrono::Utc::now()),
                success: false,
                error: Some(error),
                error_type: Some("directive_execution".to_owned()),
                message: None,
            }),
        }
    }

    async fn run_checks_sequential(&self, config: &HeartbeatConfig) -> Vec<CheckResult> {
        let mut results = Vec::new();
        for check in config.checks.iter().filter(|c| c.enabled) {
            let result = self.execute_with_retry(config, check).await;
            let failed = !result.success;
            results.push(result);
            if failed && config.stop_on_first_failure {
                break;
            }
        }
        results
    }

    async fn run_checks_parallel(&self, config: &HeartbeatConfig) -> Vec<CheckResult> {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_checks.max(1)));
        let mut handles = Vec::new();

        for check in config.checks.iter().filter(|c| c.enabled).cloned() {
            let semaphore = Arc::clone(&semaphore);
            let registry = self.registry.clone();
            let retry_attempts = config.retry_attempts;
            let retry_delay_s = config.retry_delay_s;
            let retry_backoff = config.retry_backoff;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                execute_with_retry_static(&registry, &check, retry_attempts, retry_delay_s, retry_backoff).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => results.push(CheckResult {
                    check_name: "unknown".to_owned(),
                    status: CheckStatus::Failed,
                    started_at: chrono::Utc::now(),
                    ended_at: Some(chrono::Utc::now()),
                    success: false,
                    error: Some(format!("check task panicked: {e}")),
                    error_type: Some("panic".to_owned()),
                    message: None,
                }),
            }
        }
        results
    }

    async fn execute_with_retry(
        &self,
        config: &HeartbeatConfig,
        check: &crate::types::CheckDefinition,
    ) -> CheckResult {
        execute_with_retry_static(
            &self.registry,
            check,
            config.retry_attempts,
            config.retry_delay_s,
            config.retry_backoff,
        )
        .await
    }
}

async fn execute_with_retry_static(
    registry: &CheckRegistry,
    check: &crate::types::CheckDefinition,
    retry_attempts: u32,
    retry_delay_s: f64,
    retry_backoff: f64,
) -> CheckResult {
    let attempts = retry_attempts.max(1);
    let mut last_result = None;

    for attempt in 0..attempts {
        let result = registry.execute_check(&check.name, check.max_duration_s).await;
        if result.success {
            return result;
        }
        last_result = Some(result);
        if attempt + 1 < attempts {
            let delay = retry_delay_s * retry_backoff.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
            tokio::time::sleep(Duration::from_secs_f64(delay.max(0.0))).await;
        }
    }

    last_result.unwrap_or_else(|| CheckResult {
        check_name: check.name.clone(),
        status: CheckStatus::Failed,
        started_at: chrono::Utc::now(),
        ended_at: Some(chrono::Utc::now()),
        success: false,
        error: Some("no attempts executed".to_owned()),
        error_type: Some("internal".to_owned()),
        message: None,
    })
}
