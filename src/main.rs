//! swarmcore — fleet orchestrator binary.
//!
//! Loads the operator config, wires one instance of each core component
//! (message bus, coordinator, heartbeat supervision, routines, sidekicks,
//! content store, injection scanner, secret resolver, work log), and runs
//! until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use tracing::{info, warn};

use swarmcore::bus::MessageBus;
use swarmcore::config::{self, OrchestratorConfig};
use swarmcore::content_store::ContentStore;
use swarmcore::coordinator::Coordinator;
use swarmcore::expertise::BotExpertise;
use swarmcore::heartbeat::checks::CheckRegistry;
use swarmcore::heartbeat::fleet::FleetManager;
use swarmcore::heartbeat::BotHeartbeat;
use swarmcore::injection::InjectionScanner;
use swarmcore::routines::RoutinesScheduler;
use swarmcore::secrets::SecretResolver;
use swarmcore::sidekick::{SidekickLimits, SidekickOrchestrator};
use swarmcore::types::HeartbeatConfig;
use swarmcore::worklog::WorkLogStore;

#[tokio::main]
async fn main() -> Result<()> {
    let paths = config::runtime_paths().context("failed to resolve runtime paths")?;
    std::fs::create_dir_all(&paths.logs_dir).context("failed to create log directory")?;
    if let Some(data_dir) = paths.routines_json.parent() {
        std::fs::create_dir_all(data_dir).context("failed to create data directory")?;
    }

    let _logging_guard = swarmcore::logging::init_production(&paths.logs_dir).context("failed to initialise logging")?;

    info!("swarmcore starting");

    let config = if paths.config_toml.exists() {
        config::load_config(&paths.config_toml).context("failed to load config.toml")?
    } else {
        warn!(path = %paths.config_toml.display(), "no config.toml found, using defaults");
        OrchestratorConfig::default()
    };

    let bus = MessageBus::new();
    let expertise = BotExpertise::new();

    let coordinator_id = config
        .fleet
        .iter()
        .find(|b| b.is_coordinator)
        .map_or_else(|| "coordinator".to_owned(), |b| b.id.clone());
    let coordinator = Arc::new(Coordinator::new(coordinator_id, bus.clone(), expertise.clone()));

    let secrets = Arc::new(SecretResolver::from_config(&config.secrets).context("failed to initialise secret store")?);

    let injection_scanner = InjectionScanner::new(true);
    let content_store = ContentStore::new(config.content_store.clone(), injection_scanner);

    let db_url = format!("sqlite://{}?mode=rwc", paths.work_log_db.display());
    let db_pool = SqlitePoolOptions::new().connect(&db_url).await.context("failed to open work log database")?;
    let work_log = WorkLogStore::new(db_pool, true).await.context("failed to initialise work log store")?;

    let sidekicks = Arc::new(SidekickOrchestrator::new(SidekickLimits {
        max_per_bot: config.sidekicks.max_per_bot,
        max_per_room: config.sidekicks.max_per_room,
        timeout: std::time::Duration::from_secs(config.sidekicks.timeout_seconds),
    }));

    let mut fleet = FleetManager::new();
    for profile in &config.fleet {
        let interval_s = profile.heartbeat_interval_s.unwrap_or(if profile.is_coordinator {
            config.heartbeat_defaults.coordinator_interval_s
        } else {
            config.heartbeat_defaults.specialist_interval_s
        });

        let heartbeat_config = HeartbeatConfig {
            bot_name: profile.id.clone(),
            interval_s,
            enabled: true,
            checks: Vec::new(),
            parallel_checks: true,
            max_concurrent_checks: config.heartbeat_defaults.max_concurrent_checks,
            stop_on_first_failure: false,
            retry_attempts: config.heartbeat_defaults.retry_attempts,
            retry_delay_s: config.heartbeat_defaults.retry_delay_s,
            retry_backoff: config.heartbeat_defaults.retry_backoff,
            circuit_breaker_enabled: true,
            circuit_breaker_threshold: config.heartbeat_defaults.circuit_breaker_threshold,
            circuit_breaker_timeout_s: config.heartbeat_defaults.circuit_breaker_timeout_s,
            directive_path: Some(swarmcore::config::directive_path(&paths.workspaces_dir, &profile.id)),
        };

        fleet.register(profile.id.clone(), Arc::new(BotHeartbeat::new(heartbeat_config, CheckRegistry::default())));
    }
    fleet.start_all();
    info!(bots = fleet.len(), "fleet heartbeat supervision started");

    let routines = Arc::new(RoutinesScheduler::load(paths.routines_json.clone()).await.context("failed to load routines store")?);
    tokio::spawn(Arc::clone(&routines).start());

    // Kept alive for the lifetime of the process; dropping any of these
    // would tear down the component it owns.
    let _coordinator = coordinator;
    let _secrets = secrets;
    let _content_store = content_store;
    let _sidekicks = sidekicks;

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    fleet.stop_all();
    routines.stop();
    work_log.shutdown().await;

    info!("swarmcore shut down");
    Ok(())
}
