//! SidekickOrchestrator: bounded fan-out of short-lived sub-tasks (spec
//! 4.8).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::types::{SidekickResult, SidekickStatus, SidekickTaskEnvelope};

/// Sidekick orchestration failure modes.
#[derive(Debug, Error)]
pub enum SidekickError {
    /// Fan-out would exceed the parent bot's or room's concurrency cap.
    #[error("sidekick fan-out limit exceeded for parent {parent_bot} in room {room}")]
    LimitExceeded {
        /// Parent bot id.
        parent_bot: String,
        /// Room id.
        room: String,
    },
    /// A sidekick attempted to spawn its own sidekick.
    #[error("sidekick task {0} may not spawn further sidekicks")]
    NoRecursion(String),
}

/// Fan-out limits.
#[derive(Debug, Clone, Copy)]
pub struct SidekickLimits {
    /// Max concurrently-active sidekicks per parent bot.
    pub max_per_bot: usize,
    /// Max concurrently-active sidekicks per room.
    pub max_per_room: usize,
    /// Per-sub-task wall-clock timeout.
    pub timeout: Duration,
}

#[derive(Default)]
struct Counters {
    per_bot: HashMap<String, usize>,
    per_room: HashMap<String, usize>,
}

/// Orchestrates bounded, non-recursive sidekick fan-out.
pub struct SidekickOrchestrator {
    limits: SidekickLimits,
    counters: Arc<Mutex<Counters>>,
}

impl SidekickOrchestrator {
    /// Create an orchestrator with the given limits.
    pub fn new(limits: SidekickLimits) -> Self {
        Self {
            limits,
            counters: Arc::new(Mutex::new(Counters::default())),
        }
    }

    /// Whether `count` more sidekicks could be spawned for `parent_bot`
    /// in `room` without exceeding either cap.
    ///
    /// `count == 0` is always permitted without inspecting either cap.
    pub async fn can_spawn(&self, parent_bot: &str, room: &str, count: usize) -> bool {
        if count == 0 {
            return true;
        }
        let counters = self.counters.lock().await;
        let bot_count = counters.per_bot.get(parent_bot).copied().unwrap_or(0);
        let room_count = counters.per_room.get(room).copied().unwrap_or(0);
        bot_count + count <= self.limits.max_per_bot && room_count + count <= self.limits.max_per_room
    }

    /// Reserve slots for `count` sidekicks, all-or-nothing.
    async fn reserve(&self, parent_bot: &str, room: &str, count: usize) -> Result<(), SidekickError> {
        let mut counters = self.counters.lock().await;
        let bot_count = counters.per_bot.get(parent_bot).copied().unwrap_or(0);
        let room_count = counters.per_room.get(room).copied().unwrap_or(0);

        if bot_count + count > self.limits.max_per_bot || room_count + count > self.limits.max_per_room {
            return Err(SidekickError::LimitExceeded {
                parent_bot: parent_bot.to_owned(),
                room: room.to_owned(),
            });
        }

        *counters.per_bot.entry(parent_bot.to_owned()).or_insert(0) += count;
        *counters.per_room.entry(room.to_owned()).or_insert(0) += count;
        Ok(())
    }

    async fn release(&self, parent_bot: &str, room: &str, count: usize) {
        let mut counters = self.counters.lock().await;
        if let Some(n) = counters.per_bot.get_mut(parent_bot) {
            *n = n.saturating_sub(count);
        }
        if let Some(n) = counters.per_room.get_mut(room) {
            *n = n.saturating_sub(count);
        }
    }

    /// Run every task in `tasks` concurrently via `runner`, honoring the
    /// configured caps and per-task timeout.
    ///
    /// Results are returned in the same order as `tasks`, independent of
    /// completion order. Slot reservations release unconditionally once
    /// every spawned task has settled.
    ///
    /// # Errors
    ///
    /// Returns [`SidekickError::LimitExceeded`] if the fan-out would
    /// exceed either cap; no tasks run in that case. Returns
    /// [`SidekickError::NoRecursion`] if any task envelope has
    /// `parent_is_sidekick == true`.
    pub async fn run<F, Fut>(
        &self,
        tasks: Vec<SidekickTaskEnvelope>,
        runner: F,
    ) -> Result<Vec<SidekickResult>, SidekickError>
    where
        F: Fn(SidekickTaskEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        if let Some(recursive) = tasks.iter().find(|t| t.parent_is_sidekick) {
            return Err(SidekickError::NoRecursion(recursive.task_id.clone()));
        }

        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let parent_bot = tasks[0].parent_bot_id.clone();
        let room = tasks[0].room_id.clone();
        let count = tasks.len();

        self.reserve(&parent_bot, &room, count).await?;

        let runner = Arc::new(runner);
        let mut handles = Vec::with_capacity(count);
        for task in tasks {
            let runner = Arc::clone(&runner);
            let task_id = task.task_id.clone();
            let per_task_timeout = self.limits.timeout;
            handles.push(tokio::spawn(async move {
                let started = chrono::Utc::now();
                let outcome = timeout(per_task_timeout, runner(task)).await;
                let duration_ms = (chrono::Utc::now() - started).num_milliseconds();
                match outcome {
                    Ok(Ok(summary)) => SidekickResult {
                        task_id,
                        status: SidekickStatus::Success,
                        summary,
                        artifacts: Vec::new(),
                        notes: None,
                        duration_ms,
                    },
                    Ok(Err(error)) => SidekickResult {
                        task_id,
                        status: SidekickStatus::Failed,
                        summary: error,
                        artifacts: Vec::new(),
                        notes: None,
                        duration_ms,
                    },
                    Err(_) => SidekickResult {
                        task_id,
                        status: SidekickStatus::Timeout,
                        summary: "sub-task exceeded its wall-clock budget".to_owned(),
                        artifacts: Vec::new(),
                        notes: None,
                        duration_ms,
                    },
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => SidekickResult {
                    task_id: String::new(),
                    status: SidekickStatus::Cancelled,
                    summary: format!("sub-task panicked: {e}"),
                    artifacts: Vec::new(),
                    notes: None,
                    duration_ms: 0,
                },
            };
            results.push(result);
        }

        self.release(&parent_bot, &room, count).await;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SidekickOutputFormat;

    fn envelope(task_id: &str, parent: &str, room: &str) -> SidekickTaskEnvelope {
        SidekickTaskEnvelope {
            task_id: task_id.to_owned(),
            parent_bot_id: parent.to_owned(),
            room_id: room.to_owned(),
            goal: "do the thing".to_owned(),
            input: HashMap::new(),
            constraints: HashMap::new(),
            output_format: SidekickOutputFormat::Text,
            parent_is_sidekick: false,
        }
    }

    #[tokio::test]
    async fn run_respects_order_and_releases_slots() {
        let orchestrator = SidekickOrchestrator::new(SidekickLimits {
            max_per_bot: 2,
            max_per_room: 2,
            timeout: Duration::from_secs(5),
        });

        let tasks = vec![envelope("t1", "coordinator", "room-1"), envelope("t2", "coordinator", "room-1")];
        let results = orchestrator
            .run(tasks, |task| async move { Ok(format!("done {}", task.task_id)) })
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].task_id, "t1");
        assert_eq!(results[1].task_id, "t2");
        assert!(orchestrator.can_spawn("coordinator", "room-1", 2).await);
    }

    #[tokio::test]
    async fn over_cap_fan_out_is_rejected_and_rolled_back() {
        let orchestrator = SidekickOrchestrator::new(SidekickLimits {
            max_per_bot: 1,
            max_per_room: 5,
            timeout: Duration::from_secs(5),
        });

        let tasks = vec![envelope("t1", "coordinator", "room-1"), envelope("t2", "coordinator", "room-1")];
        let err = orchestrator
            .run(tasks, |task| async move { Ok(task.task_id) })
            .await
            .unwrap_err();
        assert!(matches!(err, SidekickError::LimitExceeded { .. }));
        assert!(orchestrator.can_spawn("coordinator", "room-1", 1).await);
    }

    #[tokio::test]
    async fn recursive_sidekick_is_rejected() {
        let orchestrator = SidekickOrchestrator::new(SidekickLimits {
            max_per_bot: 5,
            max_per_room: 5,
            timeout: Duration::from_secs(5),
        });
        let mut task = envelope("t1", "coordinator", "room-1");
        task.parent_is_sidekick = true;
        let err = orchestrator
            .run(vec![task], |t| async move { Ok(t.task_id) })
            .await
            .unwrap_err();
        assert!(matches!(err, SidekickError::NoRecursion(id) if id == "t1"));
    }

    #[tokio::test]
    async fn count_zero_always_permitted() {
        let orchestrator = SidekickOrchestrator::new(SidekickLimits {
            max_per_bot: 0,
            max_per_room: 0,
            timeout: Duration::from_secs(5),
        });
        assert!(orchestrator.can_spawn("coordinator", "room-1", 0).await);
    }
}
