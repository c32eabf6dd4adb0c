//! RoutinesScheduler: a persistent scheduler producing synthetic events
//! back into the orchestrator (spec 4.7).
//!
//! Jobs are kept in a single JSON document, written atomically (temp file
//! + rename) on every mutation, following the crate's atomic-write idiom
//! for small persisted documents.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, warn};

use crate::types::{CronJobState, CronPayload, CronPayloadKind, CronSchedule, RunStatus, Routine};

/// RoutinesScheduler failure modes.
#[derive(Debug, Error)]
pub enum RoutinesError {
    /// No routine with this id is registered.
    #[error("routine not found: {0}")]
    NotFound(String),
    /// The persisted store could not be read or written.
    #[error("routine store io error: {0}")]
    Io(#[from] std::io::Error),
    /// The persisted JSON document could not be parsed.
    #[error("routine store parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// A cron job's expression did not parse.
    #[error("invalid cron expression for routine {routine}: {source}")]
    InvalidCron {
        /// Offending routine id.
        routine: String,
        /// Underlying parse error.
        #[source]
        source: cron::error::Error,
    },
}

/// On-disk schema for the persisted routine store.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreDocument {
    schema_version: u32,
    jobs: Vec<Routine>,
}

const SCHEMA_VERSION: u32 = 1;
const TICK_INTERVAL_MS: u64 = 1000;

/// Handler invoked for `system_event` payloads.
pub type SystemEventHandler = Arc<dyn Fn(&CronPayload) + Send + Sync>;

/// Dispatch outcome for one fired routine, handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct DispatchedEvent {
    /// Routine id that fired.
    pub routine_id: String,
    /// Payload carried by the routine.
    pub payload: CronPayload,
}

/// Persistent cron/at/every job scheduler.
pub struct RoutinesScheduler {
    store_path: PathBuf,
    routines: RwLock<HashMap<String, Routine>>,
    handlers: RwLock<HashMap<String, SystemEventHandler>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RoutinesScheduler {
    /// Load (or initialise) the scheduler's persisted state at `store_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing store file cannot be parsed.
    pub async fn load(store_path: PathBuf) -> Result<Self, RoutinesError> {
        let routines = if store_path.exists() {
            let contents = tokio::fs::read_to_string(&store_path).await?;
            let doc: StoreDocument = serde_json::from_str(&contents)?;
            doc.jobs.into_iter().map(|r| (r.id.clone(), r)).collect()
        } else {
            HashMap::new()
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            store_path,
            routines: RwLock::new(routines),
            handlers: RwLock::new(HashMap::new()),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Register an in-process handler for `system_event` payloads whose
    /// `routine` field equals `name` (e.g. `team_check_in`, `bot_focus`,
    /// `room_pulse`, `calibration`).
    pub async fn register_handler(&self, name: impl Into<String>, handler: SystemEventHandler) {
        self.handlers.write().await.insert(name.into(), handler);
    }

    /// Add a new routine, persisting the store.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails.
    pub async fn add_routine(&self, routine: Routine) -> Result<(), RoutinesError> {
        self.routines.write().await.insert(routine.id.clone(), routine);
        self.persist().await
    }

    /// Replace an existing routine in place.
    ///
    /// # Errors
    ///
    /// Returns [`RoutinesError::NotFound`] for an unknown id, or an error
    /// if persistence fails.
    pub async fn update_routine(&self, routine: Routine) -> Result<(), RoutinesError> {
        let mut routines = self.routines.write().await;
        if !routines.contains_key(&routine.id) {
            return Err(RoutinesError::NotFound(routine.id));
        }
        routines.insert(routine.id.clone(), routine);
        drop(routines);
        self.persist().await
    }

    /// Remove a routine.
    ///
    /// # Errors
    ///
    /// Returns [`RoutinesError::NotFound`] for an unknown id, or an error
    /// if persistence fails.
    pub async fn remove_routine(&self, id: &str) -> Result<(), RoutinesError> {
        let removed = self.routines.write().await.remove(id);
        if removed.is_none() {
            return Err(RoutinesError::NotFound(id.to_owned()));
        }
        self.persist().await
    }

    /// Enable or disable a routine.
    ///
    /// # Errors
    ///
    /// Returns [`RoutinesError::NotFound`] for an unknown id, or an error
    /// if persistence fails.
    pub async fn enable_routine(&self, id: &str, enabled: bool) -> Result<(), RoutinesError> {
        let mut routines = self.routines.write().await;
        let routine = routines.get_mut(id).ok_or_else(|| RoutinesError::NotFound(id.to_owned()))?;
        routine.enabled = enabled;
        drop(routines);
        self.persist().await
    }

    /// List routines, optionally filtered to a scope.
    pub async fn list_routines(&self, scope: Option<crate::types::CronScope>) -> Vec<Routine> {
        let mut routines: Vec<Routine> = self
            .routines
            .read()
            .await
            .values()
            .filter(|r| scope.is_none_or(|s| r.payload.scope == s))
            .cloned()
            .collect();
        routines.sort_by(|a, b| a.state.next_run_at_ms.cmp(&b.state.next_run_at_ms).then_with(|| a.id.cmp(&b.id)));
        routines
    }

    /// Run a routine out of cadence, delivering it exactly as `tick`
    /// would for a due routine.
    ///
    /// # Errors
    ///
    /// Returns [`RoutinesError::NotFound`] for an unknown id.
    pub async fn run_routine(&self, id: &str, force: bool) -> Result<Option<DispatchedEvent>, RoutinesError> {
        let mut routines = self.routines.write().await;
        let routine = routines.get_mut(id).ok_or_else(|| RoutinesError::NotFound(id.to_owned()))?;
        if !routine.enabled && !force {
            return Ok(None);
        }
        let dispatched = dispatch_one(routine);
        let delete_after_run = routine.delete_after_run && matches!(routine.schedule, CronSchedule::At { .. });
        drop(routines);

        self.deliver(&dispatched).await;
        if delete_after_run {
            self.routines.write().await.remove(id);
        }
        self.persist().await?;
        Ok(Some(dispatched))
    }

    /// Run the internal tick loop until stopped.
    pub async fn start(self: Arc<Self>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(TICK_INTERVAL_MS));
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "routines scheduler tick failed");
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Stop the tick loop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Snapshot of scheduler status: total jobs, enabled count, next due.
    pub async fn status(&self) -> String {
        let routines = self.routines.read().await;
        let total = routines.len();
        let enabled = routines.values().filter(|r| r.enabled).count();
        let next = routines
            .values()
            .filter(|r| r.enabled)
            .map(|r| r.state.next_run_at_ms)
            .min();
        format!("total={total} enabled={enabled} next_run_at_ms={next:?}")
    }

    async fn tick(&self) -> Result<(), RoutinesError> {
        let now_ms = now_millis();
        let due_ids: Vec<String> = {
            let routines = self.routines.read().await;
            let mut due: Vec<&Routine> = routines
                .values()
                .filter(|r| r.enabled && r.state.next_run_at_ms <= now_ms)
                .collect();
            due.sort_by(|a, b| a.state.next_run_at_ms.cmp(&b.state.next_run_at_ms).then_with(|| a.id.cmp(&b.id)));
            due.into_iter().map(|r| r.id.clone()).collect()
        };

        if due_ids.is_empty() {
            return Ok(());
        }

        let mut to_remove = Vec::new();
        {
            let mut routines = self.routines.write().await;
            for id in &due_ids {
                let Some(routine) = routines.get_mut(id) else { continue };
                let dispatched = dispatch_one(routine);
                self.deliver(&dispatched).await;
                if routine.delete_after_run && matches!(routine.schedule, CronSchedule::At { .. }) {
                    to_remove.push(id.clone());
                }
            }
            for id in &to_remove {
                routines.remove(id);
            }
        }

        debug!(count = due_ids.len(), "routines dispatched");
        self.persist().await
    }

    async fn deliver(&self, dispatched: &DispatchedEvent) {
        if dispatched.payload.kind == CronPayloadKind::SystemEvent {
            if let Some(name) = &dispatched.payload.routine {
                if let Some(handler) = self.handlers.read().await.get(name) {
                    handler(&dispatched.payload);
                    return;
                }
                warn!(routine = %name, "no handler registered for system_event routine");
            }
        }
        // agent_turn payloads are handled by the bus/channel adapter layer,
        // which subscribes to dispatched events independently.
    }

    async fn persist(&self) -> Result<(), RoutinesError> {
        let jobs: Vec<Routine> = self.routines.read().await.values().cloned().collect();
        let doc = StoreDocument {
            schema_version: SCHEMA_VERSION,
            jobs,
        };
        let serialized = serde_json::to_string_pretty(&doc)?;

        if let Some(parent) = self.store_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.store_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serialized).await?;
        tokio::fs::rename(&tmp_path, &self.store_path).await?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Advance `routine.state` and return the event to dispatch.
fn dispatch_one(routine: &mut Routine) -> DispatchedEvent {
    let now_ms = now_millis();
    routine.state.next_run_at_ms = compute_next_run(&routine.schedule, now_ms);
    routine.state.last_run_at_ms = Some(now_ms);
    routine.state.last_status = Some(RunStatus::Ok);
    routine.state.last_error = None;
    routine.updated_at_ms = now_ms;

    DispatchedEvent {
        routine_id: routine.id.clone(),
        payload: routine.payload.clone(),
    }
}

fn compute_next_run(schedule: &CronSchedule, now_ms: i64) -> i64 {
    match schedule {
        CronSchedule::At { at_ms } => *at_ms,
        CronSchedule::Every { every_ms } => now_ms.saturating_add(*every_ms),
        CronSchedule::Cron { expr, tz } => next_cron_run(expr, tz, now_ms).unwrap_or(now_ms.saturating_add(60_000)),
    }
}

fn next_cron_run(expr: &str, tz: &str, now_ms: i64) -> Option<i64> {
    let schedule = cron::Schedule::from_str(expr).ok()?;
    let zone: chrono_tz::Tz = tz.parse().ok()?;
    let now = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(now_ms)?.with_timezone(&zone);
    let next = schedule.after(&now).next()?;
    Some(next.with_timezone(&chrono::Utc).timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{new_id, CronPayload, CronScope};

    fn every_routine(id: &str, every_ms: i64) -> Routine {
        Routine {
            id: id.to_owned(),
            name: id.to_owned(),
            enabled: true,
            schedule: CronSchedule::Every { every_ms },
            payload: CronPayload {
                kind: CronPayloadKind::SystemEvent,
                message: String::new(),
                deliver: true,
                channel: None,
                to: None,
                scope: CronScope::System,
                routine: Some("team_check_in".to_owned()),
                bot: None,
                metadata: HashMap::new(),
            },
            state: CronJobState {
                next_run_at_ms: 0,
                last_run_at_ms: None,
                last_status: None,
                last_error: None,
            },
            created_at_ms: 0,
            updated_at_ms: 0,
            delete_after_run: false,
        }
    }

    #[tokio::test]
    async fn add_and_list_routine_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = RoutinesScheduler::load(dir.path().join("routines.json")).await.unwrap();
        scheduler.add_routine(every_routine("r1", 60_000)).await.unwrap();
        let routines = scheduler.list_routines(None).await;
        assert_eq!(routines.len(), 1);
        assert_eq!(routines[0].id, "r1");
    }

    #[tokio::test]
    async fn run_routine_dispatches_system_event_to_handler() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = RoutinesScheduler::load(dir.path().join("routines.json")).await.unwrap();
        scheduler.add_routine(every_routine("r1", 60_000)).await.unwrap();

        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        scheduler
            .register_handler(
                "team_check_in",
                Arc::new(move |_payload: &CronPayload| {
                    fired_clone.store(true, std::sync::atomic::Ordering::SeqCst);
                }),
            )
            .await;

        let dispatched = scheduler.run_routine("r1", true).await.unwrap();
        assert!(dispatched.is_some());
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_routine_removes_one_shot_after_firing() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = RoutinesScheduler::load(dir.path().join("routines.json")).await.unwrap();
        let mut routine = every_routine("one-shot", 0);
        routine.schedule = CronSchedule::At { at_ms: now_millis() };
        routine.delete_after_run = true;
        scheduler.add_routine(routine).await.unwrap();

        scheduler.run_routine("one-shot", true).await.unwrap();
        let routines = scheduler.list_routines(None).await;
        assert!(routines.is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_routine_errors() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = RoutinesScheduler::load(dir.path().join("routines.json")).await.unwrap();
        let err = scheduler.remove_routine("ghost").await.unwrap_err();
        assert!(matches!(err, RoutinesError::NotFound(id) if id == "ghost"));
    }

    #[test]
    fn every_schedule_advances_by_interval() {
        let next = compute_next_run(&CronSchedule::Every { every_ms: 5000 }, 1000);
        assert_eq!(next, 6000);
    }
}
