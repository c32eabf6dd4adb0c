//! Configuration loading.
//!
//! Split config model:
//! - `config.toml` — operator-owned: fleet roster, cadence defaults,
//!   compaction policy, content store limits, sidekick caps, secret
//!   backend selection. Read at startup, never rewritten by the process.
//! - Runtime paths (routines store, work-log database, log directory) are
//!   resolved from a single root, `~/.swarmcore`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level operator-owned configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Bots in the fleet, keyed by bot id.
    #[serde(default)]
    pub fleet: Vec<BotProfile>,

    /// Default heartbeat cadence and resilience settings, applied to any
    /// bot profile that does not override them.
    #[serde(default)]
    pub heartbeat_defaults: HeartbeatDefaults,

    /// Session compaction policy.
    #[serde(default)]
    pub compaction: CompactionConfig,

    /// Content store limits.
    #[serde(default)]
    pub content_store: ContentStoreConfig,

    /// Sidekick fan-out limits.
    #[serde(default)]
    pub sidekicks: SidekickConfig,

    /// Secret store backend selection.
    #[serde(default)]
    pub secrets: SecretsConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fleet: Vec::new(),
            heartbeat_defaults: HeartbeatDefaults::default(),
            compaction: CompactionConfig::default(),
            content_store: ContentStoreConfig::default(),
            sidekicks: SidekickConfig::default(),
            secrets: SecretsConfig::default(),
        }
    }
}

/// Declarative description of one fleet member.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BotProfile {
    /// Bot id, unique within the fleet.
    pub id: String,
    /// Primary domain this bot handles.
    pub domain: String,
    /// Whether this bot is the coordinator (exactly one must be).
    #[serde(default)]
    pub is_coordinator: bool,
    /// Override the default heartbeat interval for this bot, in seconds.
    pub heartbeat_interval_s: Option<u64>,
}

/// Defaults applied to a `HeartbeatConfig` built for a bot profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeartbeatDefaults {
    /// Specialist tick interval, seconds.
    #[serde(default = "default_specialist_interval_s")]
    pub specialist_interval_s: u64,
    /// Coordinator tick interval, seconds.
    #[serde(default = "default_coordinator_interval_s")]
    pub coordinator_interval_s: u64,
    /// Retry attempts per check.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Base retry delay, seconds.
    #[serde(default = "default_retry_delay_s")]
    pub retry_delay_s: f64,
    /// Retry backoff multiplier.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
    /// Circuit breaker failure threshold.
    #[serde(default = "default_cb_threshold")]
    pub circuit_breaker_threshold: u32,
    /// Circuit breaker open-state timeout, seconds.
    #[serde(default = "default_cb_timeout_s")]
    pub circuit_breaker_timeout_s: u64,
    /// Default check concurrency cap.
    #[serde(default = "default_max_concurrent_checks")]
    pub max_concurrent_checks: usize,
}

impl Default for HeartbeatDefaults {
    fn default() -> Self {
        Self {
            specialist_interval_s: default_specialist_interval_s(),
            coordinator_interval_s: default_coordinator_interval_s(),
            retry_attempts: default_retry_attempts(),
            retry_delay_s: default_retry_delay_s(),
            retry_backoff: default_retry_backoff(),
            circuit_breaker_threshold: default_cb_threshold(),
            circuit_breaker_timeout_s: default_cb_timeout_s(),
            max_concurrent_checks: default_max_concurrent_checks(),
        }
    }
}

/// Session compaction policy (spec 4.6).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Whether compaction runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Compaction strategy: "summary", "token-limit", or "off".
    #[serde(default = "default_compaction_mode")]
    pub mode: String,
    /// Fraction of `max_tokens` that triggers compaction.
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: f64,
    /// Target token count after compaction (advisory).
    #[serde(default = "default_target_tokens")]
    pub target_tokens: u64,
    /// Never compact below this many messages.
    #[serde(default = "default_min_messages")]
    pub min_messages: usize,
    /// Messages always kept verbatim in summary mode.
    #[serde(default = "default_preserve_recent")]
    pub preserve_recent: usize,
    /// Never split a tool_use/tool_result pair across the boundary.
    #[serde(default = "default_true")]
    pub preserve_tool_chains: bool,
    /// Chunk size used to group older messages in summary mode.
    #[serde(default = "default_summary_chunk_size")]
    pub summary_chunk_size: usize,
    /// Whether to invoke the pre-compaction memory-flush hook.
    #[serde(default = "default_true")]
    pub enable_memory_flush: bool,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            mode: default_compaction_mode(),
            threshold_percent: default_threshold_percent(),
            target_tokens: default_target_tokens(),
            min_messages: default_min_messages(),
            preserve_recent: default_preserve_recent(),
            preserve_tool_chains: default_true(),
            summary_chunk_size: default_summary_chunk_size(),
            enable_memory_flush: default_true(),
        }
    }
}

/// Content store limits (spec 4.9).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContentStoreConfig {
    /// Maximum stored content size, in characters.
    #[serde(default = "default_max_content_size")]
    pub max_content_size: usize,
    /// Time-to-live for cached content, in hours.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: i64,
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            max_content_size: default_max_content_size(),
            ttl_hours: default_ttl_hours(),
        }
    }
}

/// Sidekick fan-out limits (spec 4.8).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SidekickConfig {
    /// Max concurrently-active sidekicks per parent bot.
    #[serde(default = "default_max_per_bot")]
    pub max_per_bot: usize,
    /// Max concurrently-active sidekicks per room.
    #[serde(default = "default_max_per_room")]
    pub max_per_room: usize,
    /// Per-sub-task token budget.
    #[serde(default = "default_sidekick_max_tokens")]
    pub max_tokens: u64,
    /// Per-sub-task wall-clock timeout, seconds.
    #[serde(default = "default_sidekick_timeout_s")]
    pub timeout_seconds: u64,
}

impl Default for SidekickConfig {
    fn default() -> Self {
        Self {
            max_per_bot: default_max_per_bot(),
            max_per_room: default_max_per_room(),
            max_tokens: default_sidekick_max_tokens(),
            timeout_seconds: default_sidekick_timeout_s(),
        }
    }
}

/// Secret store backend selection (spec 4.11, 10.5).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Backend: "memory" or "keyring".
    #[serde(default = "default_secret_backend")]
    pub backend: String,
    /// Service name used for OS keyring entries.
    #[serde(default = "default_keyring_service")]
    pub keyring_service: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: default_secret_backend(),
            keyring_service: default_keyring_service(),
        }
    }
}

// Named default value functions for serde.

fn default_true() -> bool {
    true
}
fn default_specialist_interval_s() -> u64 {
    3600
}
fn default_coordinator_interval_s() -> u64 {
    1800
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay_s() -> f64 {
    2.0
}
fn default_retry_backoff() -> f64 {
    2.0
}
fn default_cb_threshold() -> u32 {
    5
}
fn default_cb_timeout_s() -> u64 {
    300
}
fn default_max_concurrent_checks() -> usize {
    4
}
fn default_compaction_mode() -> String {
    "summary".to_owned()
}
fn default_threshold_percent() -> f64 {
    0.80
}
fn default_target_tokens() -> u64 {
    3000
}
fn default_min_messages() -> usize {
    10
}
fn default_preserve_recent() -> usize {
    20
}
fn default_summary_chunk_size() -> usize {
    10
}
fn default_max_content_size() -> usize {
    500_000
}
fn default_ttl_hours() -> i64 {
    24
}
fn default_max_per_bot() -> usize {
    2
}
fn default_max_per_room() -> usize {
    3
}
fn default_sidekick_max_tokens() -> u64 {
    20_000
}
fn default_sidekick_timeout_s() -> u64 {
    120
}
fn default_secret_backend() -> String {
    "memory".to_owned()
}
fn default_keyring_service() -> String {
    "swarmcore".to_owned()
}

/// Resolved runtime paths under a single root directory.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Runtime root directory.
    pub root: PathBuf,
    /// Operator-owned config file path.
    pub config_toml: PathBuf,
    /// Routines store JSON file path.
    pub routines_json: PathBuf,
    /// Work-log SQLite database path.
    pub work_log_db: PathBuf,
    /// Log directory path.
    pub logs_dir: PathBuf,
    /// Root directory holding one subdirectory per bot workspace.
    pub workspaces_dir: PathBuf,
}

/// Load the operator-owned config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<OrchestratorConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
    let config: OrchestratorConfig = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?;
    Ok(config)
}

/// Resolve the default config directory (`~/.swarmcore`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".swarmcore"))
}

/// Resolve runtime paths under `~/.swarmcore`.
///
/// # Errors
///
/// Returns an error when the base config directory cannot be determined.
pub fn runtime_paths() -> anyhow::Result<RuntimePaths> {
    let root = config_dir()?;
    let config_toml = root.join("config.toml");
    let data_dir = root.join("data");
    let routines_json = data_dir.join("routines.json");
    let work_log_db = data_dir.join("work_logs.db");
    let logs_dir = root.join("logs");
    let workspaces_dir = root.join("workspaces");

    Ok(RuntimePaths {
        root,
        config_toml,
        routines_json,
        work_log_db,
        logs_dir,
        workspaces_dir,
    })
}

/// Path to a bot's heartbeat directive file within its workspace.
#[must_use]
pub fn directive_path(workspaces_dir: &Path, bot_id: &str) -> PathBuf {
    workspaces_dir.join(bot_id).join("HEARTBEAT.md")
}

/// Load the default operator-owned config from `~/.swarmcore/config.toml`.
///
/// # Errors
///
/// Returns an error if paths cannot be resolved or config parsing fails.
pub fn load_default_config() -> anyhow::Result<OrchestratorConfig> {
    let paths = runtime_paths()?;
    load_config(&paths.config_toml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.heartbeat_defaults.specialist_interval_s, 3600);
        assert_eq!(config.heartbeat_defaults.coordinator_interval_s, 1800);
        assert_eq!(config.compaction.mode, "summary");
        assert!((config.compaction.threshold_percent - 0.80).abs() < f64::EPSILON);
        assert_eq!(config.content_store.max_content_size, 500_000);
        assert_eq!(config.content_store.ttl_hours, 24);
        assert_eq!(config.sidekicks.max_per_bot, 2);
        assert_eq!(config.sidekicks.max_per_room, 3);
        assert_eq!(config.secrets.backend, "memory");
    }

    #[test]
    fn parse_partial_toml_uses_defaults() {
        let toml_str = r#"
[[fleet]]
id = "coordinator"
domain = "coordination"
is_coordinator = true

[compaction]
mode = "token-limit"
"#;
        let config: OrchestratorConfig = toml::from_str(toml_str).expect("should parse");
        assert_eq!(config.fleet.len(), 1);
        assert_eq!(config.fleet[0].id, "coordinator");
        assert_eq!(config.compaction.mode, "token-limit");
        assert_eq!(config.sidekicks.max_per_bot, 2);
    }
}
