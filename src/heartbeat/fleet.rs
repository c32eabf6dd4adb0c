//! FleetManager: supervises every bot's `BotHeartbeat` instance (spec 4.5).

use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use super::circuit_breaker::CircuitState;
use super::BotHeartbeat;

/// A named, periodically-scheduled check run over the full set of
/// currently registered bots, independent of any individual bot's own
/// heartbeat cadence.
#[async_trait]
pub trait CrossBotCheck: Send + Sync {
    /// Run the check against the current roster of bot ids.
    async fn run(&self, bot_names: &[String]);
}

/// A boxed, dynamically-dispatched cross-bot check.
pub type BoxedCrossBotCheck = Arc<dyn CrossBotCheck>;

struct CrossBotCheckRegistration {
    task: JoinHandle<()>,
}

/// Per-bot health snapshot reported by [`FleetManager::team_health`].
#[derive(Debug, Clone)]
pub struct BotHealth {
    /// Bot id.
    pub bot_name: String,
    /// `HeartbeatHistory::get_average_success_rate`.
    pub success_rate: f64,
    /// `HeartbeatHistory::get_uptime_percentage(24)`.
    pub uptime_percentage_24h: f64,
    /// Whether the bot currently has a circuit breaker, and its state.
    pub circuit_state: Option<CircuitState>,
}

struct Registration {
    heartbeat: Arc<BotHeartbeat>,
    task: Option<JoinHandle<()>>,
}

/// Supervises the fleet's per-bot heartbeat loops.
#[derive(Default)]
pub struct FleetManager {
    bots: HashMap<String, Registration>,
    bot_names: Arc<StdRwLock<Vec<String>>>,
    cross_bot_checks: HashMap<String, CrossBotCheckRegistration>,
}

impl FleetManager {
    /// Create an empty fleet manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bot's heartbeat. Replacing an existing registration
    /// stops its previous loop first.
    pub fn register(&mut self, bot_name: impl Into<String>, heartbeat: Arc<BotHeartbeat>) {
        let bot_name = bot_name.into();
        if let Some(existing) = self.bots.remove(&bot_name) {
            existing.heartbeat.stop();
        }
        self.bots.insert(bot_name.clone(), Registration { heartbeat, task: None });
        let mut names = self.bot_names.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !names.contains(&bot_name) {
            names.push(bot_name);
        }
    }

    /// Unregister and stop a bot's heartbeat loop.
    pub fn unregister(&mut self, bot_name: &str) {
        if let Some(registration) = self.bots.remove(bot_name) {
            registration.heartbeat.stop();
            if let Some(task) = registration.task {
                task.abort();
            }
        }
        self.bot_names.write().unwrap_or_else(std::sync::PoisonError::into_inner).retain(|id| id != bot_name);
    }

    /// Register a cross-bot check under `name`, run every `interval`
    /// against the fleet's current roster. Replacing an existing name
    /// stops its previous schedule first.
    pub fn register_cross_bot_check(&mut self, name: impl Into<String>, interval: Duration, check: BoxedCrossBotCheck) {
        let name = name.into();
        if let Some(existing) = self.cross_bot_checks.remove(&name) {
            existing.task.abort();
        }
        let bot_names = Arc::clone(&self.bot_names);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let names = bot_names.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
                check.run(&names).await;
            }
        });
        self.cross_bot_checks.insert(name, CrossBotCheckRegistration { task });
    }

    /// Stop and remove a registered cross-bot check.
    pub fn unregister_cross_bot_check(&mut self, name: &str) {
        if let Some(registration) = self.cross_bot_checks.remove(name) {
            registration.task.abort();
        }
    }

    /// Start every registered bot's loop as its own Tokio task.
    pub fn start_all(&mut self) {
        for registration in self.bots.values_mut() {
            if registration.task.is_some() {
                continue;
            }
            let heartbeat = Arc::clone(&registration.heartbeat);
            registration.task = Some(tokio::spawn(async move {
                heartbeat.run().await;
            }));
        }
    }

    /// Stop every registered bot's loop and every cross-bot check.
    pub fn stop_all(&mut self) {
        for registration in self.bots.values() {
            registration.heartbeat.stop();
        }
        for registration in self.cross_bot_checks.values() {
            registration.task.abort();
        }
    }

    /// Trigger one bot's heartbeat immediately.
    pub async fn trigger_bot(&self, bot_name: &str, reason: &str) -> Option<crate::types::HeartbeatTick> {
        let registration = self.bots.get(bot_name)?;
        Some(registration.heartbeat.trigger_now(reason.to_owned()).await)
    }

    /// Trigger every bot's heartbeat immediately, concurrently.
    pub async fn trigger_all(&self, reason: &str) -> Vec<crate::types::HeartbeatTick> {
        let handles: Vec<JoinHandle<crate::types::HeartbeatTick>> = self
            .bots
            .values()
            .map(|registration| {
                let heartbeat = Arc::clone(&registration.heartbeat);
                let reason = reason.to_owned();
                tokio::spawn(async move { heartbeat.trigger_now(reason).await })
            })
            .collect();

        let mut ticks = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(tick) = handle.await {
                ticks.push(tick);
            }
        }
        ticks
    }

    /// Aggregate health across the fleet.
    pub async fn team_health(&self) -> Vec<BotHealth> {
        let mut health = Vec::with_capacity(self.bots.len());
        for (bot_name, registration) in &self.bots {
            let history = registration.heartbeat.history().await;
            health.push(BotHealth {
                bot_name: bot_name.clone(),
                success_rate: history.get_average_success_rate(),
                uptime_percentage_24h: history.get_uptime_percentage(24),
                circuit_state: registration.heartbeat.circuit_state(),
            });
        }
        health
    }

    /// Number of registered bots.
    pub fn len(&self) -> usize {
        self.bots.len()
    }

    /// Whether no bots are registered.
    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }
}

/// Sleep helper, handy when hand-writing a [`CrossBotCheck`] that needs
/// to stagger its own sub-steps.
pub async fn wait(duration: Duration) {
    tokio::time::sleep(duration).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::checks::CheckRegistry;
    use crate::types::HeartbeatConfig;

    fn config(name: &str) -> HeartbeatConfig {
        HeartbeatConfig {
            bot_name: name.to_owned(),
            interval_s: 60,
            enabled: true,
            checks: Vec::new(),
            parallel_checks: false,
            max_concurrent_checks: 1,
            stop_on_first_failure: false,
            retry_attempts: 1,
            retry_delay_s: 0.0,
            retry_backoff: 1.0,
            circuit_breaker_enabled: false,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_s: 60,
            directive_path: None,
        }
    }

    #[tokio::test]
    async fn trigger_bot_runs_only_that_bot() {
        let mut fleet = FleetManager::new();
        fleet.register("research", Arc::new(BotHeartbeat::new(config("research"), CheckRegistry::new())));
        fleet.register("design", Arc::new(BotHeartbeat::new(config("design"), CheckRegistry::new())));

        let tick = fleet.trigger_bot("research", "test").await;
        assert!(tick.is_some());
        assert!(fleet.trigger_bot("ghost", "test").await.is_none());
    }

    #[tokio::test]
    async fn team_health_reports_every_bot() {
        let mut fleet = FleetManager::new();
        fleet.register("research", Arc::new(BotHeartbeat::new(config("research"), CheckRegistry::new())));
        fleet.trigger_all("test").await;
        let health = fleet.team_health().await;
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].bot_name, "research");
    }

    #[tokio::test]
    async fn team_health_reports_circuit_state() {
        let mut fleet = FleetManager::new();
        let mut with_breaker = config("research");
        with_breaker.circuit_breaker_enabled = true;
        with_breaker.circuit_breaker_threshold = 5;
        fleet.register("research", Arc::new(BotHeartbeat::new(with_breaker, CheckRegistry::new())));

        let health = fleet.team_health().await;
        assert_eq!(health[0].circuit_state, Some(CircuitState::Closed));
    }

    struct RecordingCrossBotCheck {
        seen: Arc<std::sync::Mutex<Vec<Vec<String>>>>,
    }
    #[async_trait]
    impl CrossBotCheck for RecordingCrossBotCheck {
        async fn run(&self, bot_names: &[String]) {
            self.seen.lock().unwrap().push(bot_names.to_vec());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cross_bot_check_runs_on_its_own_cadence_over_the_roster() {
        let mut fleet = FleetManager::new();
        fleet.register("research", Arc::new(BotHeartbeat::new(config("research"), CheckRegistry::new())));
        fleet.register("design", Arc::new(BotHeartbeat::new(config("design"), CheckRegistry::new())));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        fleet.register_cross_bot_check("roster_sweep", Duration::from_secs(10), Arc::new(RecordingCrossBotCheck { seen: Arc::clone(&seen) }));

        tokio::time::advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        let recorded = seen.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].len(), 2);

        drop(recorded);
        fleet.stop_all();
    }
}
