//! SessionCompactor: shrinks a session's message list to fit a token
//! budget without splitting tool_use/tool_result pairs (spec 4.6).

use serde::{Deserialize, Serialize};

use crate::config::CompactionConfig;

/// One message as the compactor sees it. Only the fields compaction
/// decisions depend on are modelled; callers map their own message type
/// into this shape at the call site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactableMessage {
    /// "user", "assistant", or "system".
    pub role: String,
    /// Message text.
    pub content: String,
    /// Tool use ids this (assistant) message emitted.
    #[serde(default)]
    pub tool_use_ids: Vec<String>,
    /// Tool result id this (tool) message answers, if any.
    pub tool_result_id: Option<String>,
}

/// Outcome of a compaction pass.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    /// The (possibly shortened) message list.
    pub messages: Vec<CompactableMessage>,
    /// Message count before compaction.
    pub original_count: usize,
    /// Message count after compaction.
    pub compacted_count: usize,
    /// Estimated token count before compaction.
    pub tokens_before: u64,
    /// Estimated token count after compaction.
    pub tokens_after: u64,
    /// `tokens_after / tokens_before`, or `1.0` if `tokens_before == 0`.
    pub compaction_ratio: f64,
    /// Mode that ran.
    pub mode: String,
}

/// Diagnostic read of a session's context pressure, without compacting.
#[derive(Debug, Clone)]
pub struct ContextStatus {
    /// Current estimated token count.
    pub tokens: u64,
    /// `max_tokens * threshold_percent`, in tokens.
    pub threshold_tokens: u64,
    /// Whether compaction would trigger right now.
    pub would_compact: bool,
    /// `tokens / max_tokens`, as a percentage.
    pub percent_used: f64,
}

const MIN_SUMMARY_SOURCE_LEN: usize = 40;
const SUMMARY_TRUNCATE_LEN: usize = 80;
const MAX_SUMMARY_SOURCES: usize = 3;

/// Rough token estimate: one token per four characters of content.
#[allow(clippy::cast_possible_truncation)]
fn count_tokens(messages: &[CompactableMessage]) -> u64 {
    let chars: usize = messages.iter().map(|m| m.content.len()).sum();
    (chars / 4).max(messages.len()) as u64
}

/// Whether compaction should run given the current token count.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn should_compact(messages: &[CompactableMessage], max_tokens: u64, config: &CompactionConfig) -> bool {
    if !config.enabled || config.mode == "off" {
        return false;
    }
    let threshold = (max_tokens as f64 * config.threshold_percent) as u64;
    count_tokens(messages) > threshold
}

/// Diagnostic context-pressure read, without performing compaction.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn context_status(messages: &[CompactableMessage], max_tokens: u64, config: &CompactionConfig) -> ContextStatus {
    let tokens = count_tokens(messages);
    let threshold_tokens = (max_tokens as f64 * config.threshold_percent) as u64;
    #[allow(clippy::cast_precision_loss)]
    let percent_used = if max_tokens == 0 {
        0.0
    } else {
        (tokens as f64 / max_tokens as f64) * 100.0
    };
    ContextStatus {
        tokens,
        threshold_tokens,
        would_compact: config.enabled && config.mode != "off" && tokens > threshold_tokens,
        percent_used,
    }
}

/// Run compaction according to `config.mode`.
///
/// Invokes `on_memory_flush` (if given) before dropping any messages;
/// exceptions from that hook are swallowed — a flush failure logs but
/// never aborts compaction.
pub fn compact(
    messages: &[CompactableMessage],
    max_tokens: u64,
    config: &CompactionConfig,
    on_memory_flush: Option<&dyn Fn(&[CompactableMessage])>,
) -> CompactionResult {
    let tokens_before = count_tokens(messages);

    if !should_compact(messages, max_tokens, config) {
        return CompactionResult {
            messages: messages.to_vec(),
            original_count: messages.len(),
            compacted_count: messages.len(),
            tokens_before,
            tokens_after: tokens_before,
            compaction_ratio: 1.0,
            mode: "off".to_owned(),
        };
    }

    if config.enable_memory_flush {
        if let Some(hook) = on_memory_flush {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(messages)));
            if result.is_err() {
                tracing::warn!("memory flush hook panicked during compaction");
            }
        }
    }

    let compacted = match config.mode.as_str() {
        "summary" => compact_summary(messages, config),
        "token-limit" => compact_token_limit(messages, config),
        _ => messages.to_vec(),
    };

    let tokens_after = count_tokens(&compacted);
    #[allow(clippy::cast_precision_loss)]
    let ratio = if tokens_before == 0 {
        1.0
    } else {
        tokens_after as f64 / tokens_before as f64
    };

    CompactionResult {
        original_count: messages.len(),
        compacted_count: compacted.len(),
        messages: compacted,
        tokens_before,
        tokens_after,
        compaction_ratio: ratio,
        mode: config.mode.clone(),
    }
}

fn compact_summary(messages: &[CompactableMessage], config: &CompactionConfig) -> Vec<CompactableMessage> {
    let preserve_recent = config.preserve_recent.min(messages.len());
    let split_at = messages.len() - preserve_recent;
    let (older, recent) = messages.split_at(split_at);

    let mut result = Vec::new();
    for chunk in older.chunks(config.summary_chunk_size.max(1)) {
        result.push(CompactableMessage {
            role: "system".to_owned(),
            content: format!("[Earlier conversation summary]: {}", summarize_chunk(chunk)),
            tool_use_ids: Vec::new(),
            tool_result_id: None,
        });
    }
    result.extend_from_slice(recent);
    result
}

fn summarize_chunk(chunk: &[CompactableMessage]) -> String {
    let sources: Vec<&str> = chunk
        .iter()
        .filter(|m| m.role == "user" && m.content.len() >= MIN_SUMMARY_SOURCE_LEN)
        .map(|m| m.content.as_str())
        .take(MAX_SUMMARY_SOURCES)
        .collect();

    if sources.is_empty() {
        let user_count = chunk.iter().filter(|m| m.role == "user").count();
        let assistant_count = chunk.iter().filter(|m| m.role == "assistant").count();
        return format!("{user_count} user messages, {assistant_count} assistant replies");
    }

    sources
        .into_iter()
        .map(|s| truncate(s, SUMMARY_TRUNCATE_LEN))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", &s[..max_len])
    }
}

fn compact_token_limit(messages: &[CompactableMessage], config: &CompactionConfig) -> Vec<CompactableMessage> {
    let min_messages = config.min_messages.min(messages.len());
    let scan_limit = messages.len().saturating_sub(min_messages);

    let boundary = (0..scan_limit)
        .rev()
        .find(|&i| messages[i].role == "assistant" && is_safe_boundary(messages, i));

    let cut = boundary.unwrap_or(scan_limit);
    messages[cut..].to_vec()
}

/// An assistant message at `index` is a safe truncation boundary when
/// every tool_use id it emitted has a matching tool_result later in the
/// message list.
fn is_safe_boundary(messages: &[CompactableMessage], index: usize) -> bool {
    let emitted = &messages[index].tool_use_ids;
    if emitted.is_empty() {
        return true;
    }
    emitted.iter().all(|id| {
        messages[index + 1..]
            .iter()
            .any(|m| m.tool_result_id.as_deref() == Some(id.as_str()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: &str, content: &str) -> CompactableMessage {
        CompactableMessage {
            role: role.to_owned(),
            content: content.to_owned(),
            tool_use_ids: Vec::new(),
            tool_result_id: None,
        }
    }

    #[test]
    fn should_compact_respects_disabled_mode() {
        let config = CompactionConfig {
            enabled: false,
            ..CompactionConfig::default()
        };
        let messages = vec![msg("user", &"x".repeat(10_000))];
        assert!(!should_compact(&messages, 100, &config));
    }

    #[test]
    fn summary_mode_preserves_recent_verbatim() {
        let config = CompactionConfig {
            mode: "summary".to_owned(),
            preserve_recent: 2,
            summary_chunk_size: 5,
            threshold_percent: 0.0,
            ..CompactionConfig::default()
        };
        let mut messages = Vec::new();
        for i in 0..10 {
            messages.push(msg("user", &format!("message number {i} is long enough to summarize")));
        }
        let result = compact(&messages, 100, &config, None);
        assert_eq!(result.messages.len(), 2 + 2);
        assert_eq!(result.messages[2].role, "user");
    }

    #[test]
    fn token_limit_mode_respects_tool_chains() {
        let config = CompactionConfig {
            mode: "token-limit".to_owned(),
            min_messages: 1,
            threshold_percent: 0.0,
            ..CompactionConfig::default()
        };
        let messages = vec![
            msg("user", "do a thing"),
            CompactableMessage {
                role: "assistant".to_owned(),
                content: "calling tool".to_owned(),
                tool_use_ids: vec!["call-1".to_owned()],
                tool_result_id: None,
            },
            CompactableMessage {
                role: "tool".to_owned(),
                content: "result".to_owned(),
                tool_use_ids: Vec::new(),
                tool_result_id: Some("call-1".to_owned()),
            },
            msg("assistant", "done"),
        ];
        let result = compact(&messages, 100, &config, None);
        assert!(result.compacted_count <= messages.len());
        assert!(!result.messages.is_empty());
    }

    #[test]
    fn context_status_reports_percentage() {
        let config = CompactionConfig::default();
        let messages = vec![msg("user", &"x".repeat(400))];
        let status = context_status(&messages, 1000, &config);
        assert!(status.percent_used > 0.0);
    }
}
