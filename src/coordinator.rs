//! Coordinator — turns a user request into tasks and routes replies
//! (spec 4.2).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::warn;

use crate::bus::MessageBus;
use crate::expertise::BotExpertise;
use crate::types::{new_id, BotMessage, MessageKind, Task, TaskStatus, TEAM_RECIPIENT};

/// Complexity tier assigned to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    /// Simple lookups, short requests.
    Low,
    /// Single non-trivial operation.
    Medium,
    /// Multi-step or judgement-heavy work.
    High,
}

/// Recommended next action for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approach {
    /// No domain matched; ask the user to clarify.
    AskForClarification,
    /// Exactly one domain, non-high complexity; hand off directly.
    RouteToSpecialist,
    /// Exactly one domain, high complexity; break into sub-tasks first.
    DecomposeAndDelegate,
    /// Multiple domains; fan out concurrently.
    ParallelDelegation,
}

/// Result of [`Coordinator::analyze_request`].
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Estimated complexity tier.
    pub complexity: Complexity,
    /// Domains the request touches, in table-iteration order.
    pub domains: Vec<String>,
    /// Whether multiple bots must collaborate.
    pub requires_team: bool,
    /// Recommended next action.
    pub approach: Approach,
}

const HIGH_COMPLEXITY_KEYWORDS: &[&str] =
    &["analyze", "design", "architect", "recommend", "comprehensive"];
const MEDIUM_COMPLEXITY_KEYWORDS: &[&str] = &["implement", "review", "check", "update", "modify"];
const LOW_COMPLEXITY_KEYWORDS: &[&str] = &["fetch", "list", "get", "find"];

const DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "research",
        &["research", "investigate", "analyze", "study", "explore"],
    ),
    (
        "development",
        &["build", "implement", "code", "develop", "create"],
    ),
    (
        "community",
        &["community", "social", "engagement", "communication"],
    ),
    ("design", &["design", "ui", "ux", "interface", "visual"]),
    ("quality", &["test", "review", "audit", "check", "verify"]),
];

/// Estimate complexity by keyword, falling back to content length.
///
/// Keyword tables are scanned high, then medium, then low; the first
/// matching keyword wins. Absent any match, length decides: more than
/// 200 characters is high, more than 100 is medium, otherwise low.
fn estimate_complexity(content: &str) -> Complexity {
    let lower = content.to_lowercase();

    if HIGH_COMPLEXITY_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return Complexity::High;
    }
    if MEDIUM_COMPLEXITY_KEYWORDS
        .iter()
        .any(|kw| lower.contains(kw))
    {
        return Complexity::Medium;
    }
    if LOW_COMPLEXITY_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return Complexity::Low;
    }

    let len = content.len();
    if len > 200 {
        Complexity::High
    } else if len > 100 {
        Complexity::Medium
    } else {
        Complexity::Low
    }
}

/// Extract matching domains, in table-iteration order, each at most once.
fn extract_domains(content: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    DOMAIN_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(domain, _)| (*domain).to_owned())
        .collect()
}

/// Turns user requests into routed, tracked tasks.
pub struct Coordinator {
    id: String,
    bus: MessageBus,
    expertise: BotExpertise,
    active_tasks: Arc<RwLock<HashMap<String, Task>>>,
    waiting_for_response: Arc<RwLock<HashMap<String, String>>>,
}

impl Coordinator {
    /// Create a coordinator identified by `id`, wired to a shared bus and
    /// expertise tracker.
    pub fn new(id: impl Into<String>, bus: MessageBus, expertise: BotExpertise) -> Self {
        Self {
            id: id.into(),
            bus,
            expertise,
            active_tasks: Arc::new(RwLock::new(HashMap::new())),
            waiting_for_response: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Classify a request's complexity, domains, and recommended approach.
    pub fn analyze_request(&self, content: &str) -> Analysis {
        let complexity = estimate_complexity(content);
        let domains = extract_domains(content);

        let approach = if domains.is_empty() {
            Approach::AskForClarification
        } else if domains.len() == 1 {
            if complexity == Complexity::High {
                Approach::DecomposeAndDelegate
            } else {
                Approach::RouteToSpecialist
            }
        } else {
            Approach::ParallelDelegation
        };

        let requires_team =
            matches!(approach, Approach::DecomposeAndDelegate | Approach::ParallelDelegation);

        Analysis {
            complexity,
            domains,
            requires_team,
            approach,
        }
    }

    /// Pick the best-scoring candidate for `domain`.
    ///
    /// An empty candidate list falls back to the coordinator itself.
    pub async fn find_best_bot(
        &self,
        domain: &str,
        candidates: &[String],
        _complexity: Complexity,
    ) -> String {
        if candidates.is_empty() {
            return self.id.clone();
        }
        if candidates.len() == 1 {
            return candidates[0].clone();
        }
        self.expertise
            .get_best_bot_for_domain(domain, candidates)
            .await
            .unwrap_or_else(|| candidates[0].clone())
    }

    /// Create and dispatch a task, recording it as pending a response.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus fails to deliver the request message.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_task(
        &self,
        title: impl Into<String>,
        description: impl Into<String>,
        domain: impl Into<String>,
        assigned_to: impl Into<String>,
        requirements: Vec<String>,
        due_date: Option<chrono::DateTime<chrono::Utc>>,
        parent_task_id: Option<String>,
    ) -> Result<Task, crate::error::OrchestratorError> {
        let assigned_to = assigned_to.into();
        let task = Task {
            id: new_id(),
            title: title.into(),
            description: description.into(),
            domain: domain.into(),
            assigned_to: assigned_to.clone(),
            created_by: self.id.clone(),
            status: TaskStatus::Created,
            created_at: chrono::Utc::now(),
            completed_at: None,
            requirements,
            due_date,
            parent_task_id,
            result: None,
            confidence: None,
            learnings: Vec::new(),
            follow_ups: Vec::new(),
            error: None,
        };

        self.active_tasks
            .write()
            .await
            .insert(task.id.clone(), task.clone());
        self.waiting_for_response
            .write()
            .await
            .insert(task.id.clone(), assigned_to.clone());

        let mut context = HashMap::new();
        context.insert("task_id".to_owned(), task.id.clone());

        self.bus
            .send(BotMessage {
                id: new_id(),
                sender_id: self.id.clone(),
                recipient_id: assigned_to,
                kind: MessageKind::Request,
                content: task.description.clone(),
                context,
                timestamp: chrono::Utc::now(),
            })
            .await?;

        Ok(task)
    }

    /// Record a successful task result.
    ///
    /// Unknown task ids are logged and dropped, never reassigned.
    pub async fn handle_task_result(
        &self,
        task_id: &str,
        result: &str,
        confidence: f64,
        learnings: Vec<String>,
        follow_ups: Vec<String>,
    ) -> bool {
        let mut tasks = self.active_tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else {
            warn!(task_id, "task result for unknown task, dropping");
            return false;
        };
        let domain = task.domain.clone();
        let assigned_to = task.assigned_to.clone();
        task.mark_completed(result.to_owned(), confidence);
        task.learnings = learnings;
        task.follow_ups = follow_ups;
        drop(tasks);

        self.expertise
            .record_interaction(&assigned_to, &domain, true)
            .await;
        self.waiting_for_response.write().await.remove(task_id);
        true
    }

    /// Record a failed task result.
    ///
    /// If `recovery` is present, broadcasts a discussion message carrying
    /// the suggestion to the rest of the team.
    ///
    /// # Errors
    ///
    /// Returns an error if broadcasting the recovery suggestion fails.
    pub async fn handle_task_failure(
        &self,
        task_id: &str,
        error: &str,
        recovery: Option<&str>,
    ) -> Result<bool, crate::error::OrchestratorError> {
        let mut tasks = self.active_tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else {
            warn!(task_id, "task failure for unknown task, dropping");
            return Ok(false);
        };
        let domain = task.domain.clone();
        let assigned_to = task.assigned_to.clone();
        task.mark_failed(error.to_owned());
        drop(tasks);

        self.expertise
            .record_interaction(&assigned_to, &domain, false)
            .await;
        self.waiting_for_response.write().await.remove(task_id);

        if let Some(suggestion) = recovery {
            self.broadcast_to_team(suggestion, MessageKind::Discussion)
                .await?;
        }

        Ok(true)
    }

    /// Broadcast a message to every other bot on the bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus fails to fan the message out.
    pub async fn broadcast_to_team(
        &self,
        content: &str,
        kind: MessageKind,
    ) -> Result<(), crate::error::OrchestratorError> {
        self.bus
            .send(BotMessage {
                id: new_id(),
                sender_id: self.id.clone(),
                recipient_id: TEAM_RECIPIENT.to_owned(),
                kind,
                content: content.to_owned(),
                context: HashMap::new(),
                timestamp: chrono::Utc::now(),
            })
            .await?;
        Ok(())
    }

    /// Aggregated team status: pending/completed/failed counts, the top
    /// three pending tasks, and per-bot message volume on the bus.
    pub async fn get_team_status(&self) -> String {
        let tasks = self.active_tasks.read().await;
        let pending = tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .count();
        let completed = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        let failed = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Failed)
            .count();

        let mut top_pending: Vec<&Task> = tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .collect();
        top_pending.sort_by_key(|t| t.created_at);
        let top: Vec<String> = top_pending
            .into_iter()
            .take(3)
            .map(|t| format!("{} ({})", t.title, t.assigned_to))
            .collect();
        drop(tasks);

        let mut bots = self.bus.list_bots().await.into_iter().collect::<Vec<_>>();
        bots.sort_by(|(a, _), (b, _)| a.cmp(b));
        let volume: Vec<String> = bots
            .into_iter()
            .map(|(id, entry)| format!("{id}={}", entry.message_count))
            .collect();

        format!(
            "pending={pending} completed={completed} failed={failed} top_pending=[{}] message_volume=[{}]",
            top.join(", "),
            volume.join(", ")
        )
    }
}
