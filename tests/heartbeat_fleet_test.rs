//! Cross-module coverage for `BotHeartbeat::run` driven by a real Tokio
//! interval and supervised through `FleetManager`.

use std::sync::Arc;
use std::time::Duration;

use swarmcore::heartbeat::checks::CheckRegistry;
use swarmcore::heartbeat::fleet::FleetManager;
use swarmcore::heartbeat::BotHeartbeat;
use swarmcore::types::HeartbeatConfig;

fn config(name: &str, interval_s: u64) -> HeartbeatConfig {
    HeartbeatConfig {
        bot_name: name.to_owned(),
        interval_s,
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
    }
}

#[tokio::test(start_paused = true)]
async fn run_loop_ticks_on_its_own_cadence() {
    let heartbeat = Arc::new(BotHeartbeat::new(config("research", 10), CheckRegistry::new()));
    let runner = tokio::spawn(Arc::clone(&heartbeat).run());

    tokio::time::advance(Duration::from_secs(31)).await;
    // Let the spawned task observe the advanced clock before reading history.
    tokio::task::yield_now().await;

    let history = heartbeat.history().await;
    assert!(history.total_ticks() >= 3, "expected at least 3 ticks, got {}", history.total_ticks());

    heartbeat.stop();
    let _ = runner.await;
}

#[tokio::test(start_paused = true)]
async fn stop_halts_the_loop_without_further_ticks() {
    let heartbeat = Arc::new(BotHeartbeat::new(config("design", 5), CheckRegistry::new()));
    let runner = tokio::spawn(Arc::clone(&heartbeat).run());

    tokio::time::advance(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;
    heartbeat.stop();
    runner.await.unwrap();

    let ticks_at_stop = heartbeat.history().await.total_ticks();
    assert!(ticks_at_stop >= 1);

    // Advancing time after stop() must not produce further ticks; the loop
    // task has already exited.
    tokio::time::advance(Duration::from_secs(50)).await;
    assert_eq!(heartbeat.history().await.total_ticks(), ticks_at_stop);
}

#[tokio::test]
async fn fleet_supervises_independent_bot_loops() {
    let mut fleet = FleetManager::new();
    fleet.register("research", Arc::new(BotHeartbeat::new(config("research", 60), CheckRegistry::new())));
    fleet.register("design", Arc::new(BotHeartbeat::new(config("design", 60), CheckRegistry::new())));
    fleet.start_all();

    let ticks = fleet.trigger_all("integration test").await;
    assert_eq!(ticks.len(), 2);

    let health = fleet.team_health().await;
    assert_eq!(health.len(), 2);
    assert!(health.iter().all(|h| h.success_rate >= 0.0));

    fleet.stop_all();
}
