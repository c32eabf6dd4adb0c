//! WorkLog persistence: durable record of a bot's reasoning steps for a
//! single turn — decisions, tool calls, corrections, errors (spec 3, 6).
//!
//! Mutations funnel through a single-writer actor task that owns the
//! write handle; reads go directly against the connection pool.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, trace};

use crate::types::{LogLevel, WorkLog, WorkLogEntry};

/// Writer channel capacity — bounded to provide backpressure.
const WRITER_CHANNEL_CAPACITY: usize = 1024;

/// Errors from work log operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkLogError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Write channel is closed (writer actor stopped).
    #[error("work log writer channel closed")]
    WriterClosed,
    /// No session is open under this id.
    #[error("no open work log session: {0}")]
    NoOpenSession(String),
}

/// Formatting detail level for [`WorkLogStore::format_log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    /// Key decisions, tool calls, and errors only.
    Summary,
    /// Every recorded entry with full detail.
    Detailed,
    /// Raw JSON dump.
    Debug,
}

enum WriteOp {
    StartSession { session_id: String, query: String, start_time: DateTime<Utc> },
    AppendEntry { session_id: String, entry: WorkLogEntry },
    EndSession { session_id: String, end_time: DateTime<Utc>, final_output: String },
    CleanupOlderThan { cutoff: DateTime<Utc> },
}

async fn run_writer(db: SqlitePool, mut rx: mpsc::Receiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        if let Err(err) = handle_op(&db, op).await {
            error!(error = %err, "work log write failed");
        }
    }
    trace!("work log writer actor stopped");
}

async fn handle_op(db: &SqlitePool, op: WriteOp) -> Result<(), sqlx::Error> {
    match op {
        WriteOp::StartSession { session_id, query, start_time } => {
            sqlx::query(
                "INSERT OR IGNORE INTO work_logs (session_id, query, start_time, entry_count) \
                 VALUES (?1, ?2, ?3, 0)",
            )
            .bind(&session_id)
            .bind(&query)
            .bind(start_time.to_rfc3339())
            .execute(db)
            .await?;
        }

        WriteOp::AppendEntry { session_id, entry } => {
            let details = serde_value_to_text(&entry.details);
            let tool_input = entry.tool_input.as_ref().map(serde_value_to_text);
            let tool_output = entry.tool_output.as_ref().map(serde_value_to_text);

            sqlx::query(
                "INSERT INTO work_log_entries \
                 (session_id, step, timestamp, level, category, message, details_json, \
                  confidence, duration_ms, tool_name, tool_input_json, tool_output_json, tool_status) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )
            .bind(&session_id)
            .bind(entry.step)
            .bind(entry.timestamp.to_rfc3339())
            .bind(entry.level.as_str())
            .bind(&entry.category)
            .bind(&entry.message)
            .bind(details)
            .bind(entry.confidence)
            .bind(entry.duration_ms)
            .bind(&entry.tool_name)
            .bind(tool_input)
            .bind(tool_output)
            .bind(&entry.tool_status)
            .execute(db)
            .await?;

            sqlx::query("UPDATE work_logs SET entry_count = entry_count + 1 WHERE session_id = ?1")
                .bind(&session_id)
                .execute(db)
                .await?;
        }

        WriteOp::EndSession { session_id, end_time, final_output } => {
            sqlx::query("UPDATE work_logs SET end_time = ?1, final_output = ?2 WHERE session_id = ?3")
                .bind(end_time.to_rfc3339())
                .bind(&final_output)
                .bind(&session_id)
                .execute(db)
                .await?;
        }

        WriteOp::CleanupOlderThan { cutoff } => {
            let cutoff = cutoff.to_rfc3339();
            sqlx::query(
                "DELETE FROM work_log_entries WHERE session_id IN \
                 (SELECT session_id FROM work_logs WHERE start_time < ?1)",
            )
            .bind(&cutoff)
            .execute(db)
            .await?;
            sqlx::query("DELETE FROM work_logs WHERE start_time < ?1").bind(&cutoff).execute(db).await?;
        }
    }
    Ok(())
}

fn serde_value_to_text(value: &Value) -> Option<String> {
    if value.is_null() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Durable store for per-turn reasoning logs.
///
/// All reads query the pool directly; all writes funnel through a
/// single background task so SQLite write contention never surfaces
/// as a caller-visible error.
pub struct WorkLogStore {
    db: SqlitePool,
    writer_tx: mpsc::Sender<WriteOp>,
    writer_handle: JoinHandle<()>,
    enabled: bool,
    open_sessions: Arc<RwLock<HashMap<String, u32>>>,
}

impl std::fmt::Debug for WorkLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkLogStore").field("enabled", &self.enabled).finish_non_exhaustive()
    }
}

impl WorkLogStore {
    /// Create a store backed by `db`, creating its tables if absent.
    ///
    /// # Errors
    ///
    /// Returns [`WorkLogError::Database`] if the schema migration fails.
    pub async fn new(db: SqlitePool, enabled: bool) -> Result<Self, WorkLogError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS work_logs ( \
                session_id TEXT PRIMARY KEY, \
                query TEXT NOT NULL, \
                start_time TEXT NOT NULL, \
                end_time TEXT, \
                final_output TEXT, \
                entry_count INTEGER NOT NULL DEFAULT 0 \
             )",
        )
        .execute(&db)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS work_log_entries ( \
                id INTEGER PRIMARY KEY AUTOINCREMENT, \
                session_id TEXT NOT NULL REFERENCES work_logs(session_id), \
                step INTEGER NOT NULL, \
                timestamp TEXT NOT NULL, \
                level TEXT NOT NULL, \
                category TEXT NOT NULL, \
                message TEXT NOT NULL, \
                details_json TEXT, \
                confidence REAL, \
                duration_ms INTEGER, \
                tool_name TEXT, \
                tool_input_json TEXT, \
                tool_output_json TEXT, \
                tool_status TEXT \
             )",
        )
        .execute(&db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_session ON work_log_entries(session_id)")
            .execute(&db)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_logs_start_time ON work_logs(start_time DESC)")
            .execute(&db)
            .await?;

        let (writer_tx, writer_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let writer_pool = db.clone();
        let writer_handle = tokio::spawn(run_writer(writer_pool, writer_rx));

        Ok(Self { db, writer_tx, writer_handle, enabled, open_sessions: Arc::new(RwLock::new(HashMap::new())) })
    }

    /// Begin a new session log. A no-op when the store is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`WorkLogError::WriterClosed`] if the writer actor has
    /// stopped.
    pub async fn start_session(&self, session_id: &str, query: &str) -> Result<(), WorkLogError> {
        if !self.enabled {
            return Ok(());
        }
        self.open_sessions.write().await.insert(session_id.to_owned(), 0);
        self.writer_tx
            .send(WriteOp::StartSession { session_id: session_id.to_owned(), query: query.to_owned(), start_time: Utc::now() })
            .await
            .map_err(|_| WorkLogError::WriterClosed)
    }

    /// Record a general entry against the session's step counter.
    /// Returns `None` when the store is disabled or the session is not
    /// open; otherwise the entry as it was recorded.
    ///
    /// # Errors
    ///
    /// Returns [`WorkLogError::WriterClosed`] if the writer actor has
    /// stopped.
    #[allow(clippy::too_many_arguments)]
    pub async fn log(
        &self,
        session_id: &str,
        level: LogLevel,
        category: &str,
        message: &str,
        details: Value,
        confidence: Option<f64>,
        duration_ms: Option<i64>,
    ) -> Result<Option<WorkLogEntry>, WorkLogError> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(step) = self.next_step(session_id).await else {
            return Ok(None);
        };

        let entry = WorkLogEntry {
            timestamp: Utc::now(),
            level,
            step,
            category: category.to_owned(),
            message: message.to_owned(),
            details,
            confidence,
            duration_ms,
            tool_name: None,
            tool_input: None,
            tool_output: None,
            tool_status: None,
        };

        self.append(session_id, entry.clone()).await?;
        Ok(Some(entry))
    }

    /// Record a tool execution entry.
    ///
    /// # Errors
    ///
    /// Returns [`WorkLogError::WriterClosed`] if the writer actor has
    /// stopped.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_tool(
        &self,
        session_id: &str,
        tool_name: &str,
        tool_input: Value,
        tool_output: Value,
        tool_status: &str,
        duration_ms: i64,
        message: Option<&str>,
    ) -> Result<Option<WorkLogEntry>, WorkLogError> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(step) = self.next_step(session_id).await else {
            return Ok(None);
        };

        let entry = WorkLogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Tool,
            step,
            category: "tool_execution".to_owned(),
            message: message.map_or_else(|| format!("Executed {tool_name}"), str::to_owned),
            details: Value::Null,
            confidence: None,
            duration_ms: Some(duration_ms),
            tool_name: Some(tool_name.to_owned()),
            tool_input: Some(tool_input),
            tool_output: Some(tool_output),
            tool_status: Some(tool_status.to_owned()),
        };

        self.append(session_id, entry.clone()).await?;
        Ok(Some(entry))
    }

    async fn next_step(&self, session_id: &str) -> Option<u32> {
        let mut sessions = self.open_sessions.write().await;
        let step = sessions.get_mut(session_id)?;
        *step += 1;
        Some(*step)
    }

    async fn append(&self, session_id: &str, entry: WorkLogEntry) -> Result<(), WorkLogError> {
        self.writer_tx
            .send(WriteOp::AppendEntry { session_id: session_id.to_owned(), entry })
            .await
            .map_err(|_| WorkLogError::WriterClosed)
    }

    /// Close out a session with its final output text.
    ///
    /// # Errors
    ///
    /// Returns [`WorkLogError::WriterClosed`] if the writer actor has
    /// stopped.
    pub async fn end_session(&self, session_id: &str, final_output: &str) -> Result<(), WorkLogError> {
        if !self.enabled {
            return Ok(());
        }
        self.open_sessions.write().await.remove(session_id);
        self.writer_tx
            .send(WriteOp::EndSession { session_id: session_id.to_owned(), end_time: Utc::now(), final_output: final_output.to_owned() })
            .await
            .map_err(|_| WorkLogError::WriterClosed)
    }

    /// Fetch the most recently started work log, with its entries.
    ///
    /// # Errors
    ///
    /// Propagates [`WorkLogError::Database`].
    pub async fn get_last_log(&self) -> Result<Option<WorkLog>, WorkLogError> {
        let row: Option<(String, String, String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT session_id, query, start_time, end_time, final_output \
             FROM work_logs ORDER BY start_time DESC LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else { return Ok(None) };
        self.load_log(row).await
    }

    /// Fetch a work log by session id, with its entries.
    ///
    /// # Errors
    ///
    /// Propagates [`WorkLogError::Database`].
    pub async fn get_log_by_session(&self, session_id: &str) -> Result<Option<WorkLog>, WorkLogError> {
        let row: Option<(String, String, String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT session_id, query, start_time, end_time, final_output \
             FROM work_logs WHERE session_id = ?1",
        )
        .bind(session_id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else { return Ok(None) };
        self.load_log(row).await
    }

    async fn load_log(
        &self,
        (session_id, query, start_time, end_time, final_output): (String, String, String, Option<String>, Option<String>),
    ) -> Result<Option<WorkLog>, WorkLogError> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            "SELECT step, timestamp, level, category, message, details_json, confidence, \
                    duration_ms, tool_name, tool_input_json, tool_output_json, tool_status \
             FROM work_log_entries WHERE session_id = ?1 ORDER BY step ASC",
        )
        .bind(&session_id)
        .fetch_all(&self.db)
        .await?;

        let entries = rows.into_iter().map(EntryRow::into_entry).collect();

        Ok(Some(WorkLog {
            session_id,
            query,
            start_time: DateTime::parse_from_rfc3339(&start_time).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
            end_time: end_time.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
            entries,
            final_output,
        }))
    }

    /// Render `log` for display at the requested detail level.
    #[must_use]
    pub fn format_log(log: &WorkLog, mode: FormatMode) -> String {
        match mode {
            FormatMode::Summary => format_summary(log),
            FormatMode::Detailed => format_detailed(log),
            FormatMode::Debug => serde_json::to_string_pretty(log).unwrap_or_else(|_| "{}".to_owned()),
        }
    }

    /// Delete every work log (and its entries) started more than `days`
    /// ago. The cutoff is computed here and bound as a parameter, never
    /// interpolated into SQL text.
    ///
    /// # Errors
    ///
    /// Returns [`WorkLogError::WriterClosed`] if the writer actor has
    /// stopped.
    pub async fn cleanup_older_than(&self, days: i64) -> Result<(), WorkLogError> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        self.writer_tx.send(WriteOp::CleanupOlderThan { cutoff }).await.map_err(|_| WorkLogError::WriterClosed)
    }

    /// Gracefully shut down the writer actor, draining pending writes.
    pub async fn shutdown(self) {
        drop(self.writer_tx);
        let _ = self.writer_handle.await;
    }
}

#[derive(sqlx::FromRow)]
struct EntryRow {
    step: u32,
    timestamp: String,
    level: String,
    category: String,
    message: String,
    details_json: Option<String>,
    confidence: Option<f64>,
    duration_ms: Option<i64>,
    tool_name: Option<String>,
    tool_input_json: Option<String>,
    tool_output_json: Option<String>,
    tool_status: Option<String>,
}

impl EntryRow {
    fn into_entry(self) -> WorkLogEntry {
        WorkLogEntry {
            timestamp: DateTime::parse_from_rfc3339(&self.timestamp).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
            level: LogLevel::parse(&self.level).unwrap_or(LogLevel::Info),
            step: self.step,
            category: self.category,
            message: self.message,
            details: self.details_json.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or(Value::Null),
            confidence: self.confidence,
            duration_ms: self.duration_ms,
            tool_name: self.tool_name,
            tool_input: self.tool_input_json.and_then(|s| serde_json::from_str(&s).ok()),
            tool_output: self.tool_output_json.and_then(|s| serde_json::from_str(&s).ok()),
            tool_status: self.tool_status,
        }
    }
}

fn level_icon(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "\u{2139}\u{fe0f}",
        LogLevel::Thinking => "\u{1f9e0}",
        LogLevel::Decision => "\u{1f3af}",
        LogLevel::Correction => "\u{1f504}",
        LogLevel::Uncertainty => "\u{2753}",
        LogLevel::Warning => "\u{26a0}\u{fe0f}",
        LogLevel::Error => "\u{274c}",
        LogLevel::Tool => "\u{1f527}",
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_duration(log: &WorkLog) -> String {
    let Some(end_time) = log.end_time else {
        return "in progress".to_owned();
    };
    let seconds = (end_time - log.start_time).num_milliseconds().max(0) as f64 / 1000.0;
    if seconds < 60.0 {
        format!("{seconds:.1}s")
    } else {
        format!("{:.1}m", seconds / 60.0)
    }
}

fn format_summary(log: &WorkLog) -> String {
    let mut lines = vec![
        "Work Log Summary".to_owned(),
        format!("Query: {}", truncate_query(&log.query)),
        format!("Steps: {}", log.entries.len()),
        format!("Duration: {}", format_duration(log)),
        String::new(),
        "Key Events:".to_owned(),
    ];

    for entry in &log.entries {
        if matches!(entry.level, LogLevel::Decision | LogLevel::Tool | LogLevel::Error) {
            lines.push(format!("  {} Step {}: {}", level_icon(entry.level), entry.step, entry.message));
        }
    }

    let errors: Vec<&WorkLogEntry> = log.entries.iter().filter(|e| e.level == LogLevel::Error).collect();
    if !errors.is_empty() {
        lines.push(String::new());
        lines.push("Errors:".to_owned());
        for error in errors {
            lines.push(format!("  \u{274c} Step {}: {}", error.step, error.message));
        }
    }

    lines.join("\n")
}

fn truncate_query(query: &str) -> String {
    if query.len() <= 80 {
        query.to_owned()
    } else {
        format!("{}...", &query[..80])
    }
}

fn format_detailed(log: &WorkLog) -> String {
    let mut lines = vec![
        "Detailed Work Log".to_owned(),
        "=".repeat(50),
        format!("Session: {}", log.session_id),
        format!("Query: {}", log.query),
        format!("Started: {}", log.start_time.format("%Y-%m-%d %H:%M:%S")),
        format!("Duration: {}", format_duration(log)),
        String::new(),
        "Steps:".to_owned(),
        "-".repeat(50),
    ];

    for entry in &log.entries {
        lines.push(format!("\n{} Step {} [{}]", level_icon(entry.level), entry.step, entry.level.as_str().to_uppercase()));
        lines.push(format!("   Time: {}", entry.timestamp.format("%H:%M:%S")));
        lines.push(format!("   Category: {}", entry.category));
        lines.push(format!("   Message: {}", entry.message));
        if let Some(confidence) = entry.confidence {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let pct = (confidence * 100.0).round() as i64;
            lines.push(format!("   Confidence: {pct}%"));
        }
        if let Some(duration_ms) = entry.duration_ms {
            lines.push(format!("   Duration: {duration_ms}ms"));
        }
        if let Some(tool_name) = &entry.tool_name {
            lines.push(format!("   Tool: {tool_name} ({})", entry.tool_status.as_deref().unwrap_or("unknown")));
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> WorkLogStore {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        WorkLogStore::new(pool, true).await.unwrap()
    }

    #[tokio::test]
    async fn start_log_and_end_roundtrips() {
        let store = store().await;
        store.start_session("s1", "what is the weather").await.unwrap();
        store.log("s1", LogLevel::Decision, "routing", "picked specialist bot", Value::Null, None, None).await.unwrap();
        store
            .log_tool("s1", "web_search", serde_json::json!({"q": "weather"}), serde_json::json!({"ok": true}), "success", 120, None)
            .await
            .unwrap();
        store.end_session("s1", "It is sunny.").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let log = store.get_log_by_session("s1").await.unwrap().unwrap();
        assert_eq!(log.entries.len(), 2);
        assert_eq!(log.entries[0].step, 1);
        assert_eq!(log.entries[1].tool_name.as_deref(), Some("web_search"));
        assert_eq!(log.final_output.as_deref(), Some("It is sunny."));
    }

    #[tokio::test]
    async fn disabled_store_is_a_no_op() {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let store = WorkLogStore::new(pool, false).await.unwrap();
        store.start_session("s1", "q").await.unwrap();
        let entry = store.log("s1", LogLevel::Info, "cat", "msg", Value::Null, None, None).await.unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn unopened_session_logging_is_silently_skipped() {
        let store = store().await;
        let entry = store.log("never-started", LogLevel::Info, "cat", "msg", Value::Null, None, None).await.unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_sessions() {
        let store = store().await;
        store.start_session("old", "q").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        store.cleanup_older_than(0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(store.get_log_by_session("old").await.unwrap().is_none());
    }

    #[test]
    fn summary_formatting_includes_key_events() {
        let log = WorkLog {
            session_id: "s1".to_owned(),
            query: "do a thing".to_owned(),
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            final_output: Some("done".to_owned()),
            entries: vec![WorkLogEntry {
                timestamp: Utc::now(),
                level: LogLevel::Decision,
                step: 1,
                category: "routing".to_owned(),
                message: "chose specialist".to_owned(),
                details: Value::Null,
                confidence: None,
                duration_ms: None,
                tool_name: None,
                tool_input: None,
                tool_output: None,
                tool_status: None,
            }],
        };
        let summary = WorkLogStore::format_log(&log, FormatMode::Summary);
        assert!(summary.contains("chose specialist"));
    }
}
