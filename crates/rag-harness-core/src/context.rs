//! Character-budgeted context assembly for answer generation.
//!
//! The context has up to two parts:
//!
//! ```text
//! Conversation Context:
//! User: ...
//! Assistant: ...
//!
//! Relevant Documents:
//! [Document 1] - q3.pdf (PDF) - 2 days ago
//! chunk text...
//! ```
//!
//! Sources are added in ranked order. Each is deduplicated by a hash of its
//! text and capped at `max_source_chars`. Assembly stops at the first
//! source that would push the total past `max_chars - reserve_chars`, so
//! the result never exceeds the budget.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::address::content_hash;
use crate::models::{ChatMessage, ChunkPayload, Role};
use crate::query::HISTORY_LIMIT;
use crate::rerank::RankedResult;

const CHAT_MIN_CHARS: usize = 10;
const CHAT_MAX_CHARS: usize = 500;
const CHAT_MESSAGES: usize = 3;
const CHAT_PREVIEW_CHARS: usize = 200;

/// Character budget for a built context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub max_chars: usize,
    pub max_source_chars: usize,
    /// Room kept free for the prompt skeleton and generation headroom.
    pub reserve_chars: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_chars: 6000,
            max_source_chars: 1500,
            reserve_chars: 500,
        }
    }
}

impl ContextBudget {
    pub fn available(&self) -> usize {
        self.max_chars.saturating_sub(self.reserve_chars)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuiltContext {
    pub text: String,
    pub sources_used: usize,
    pub duplicates_skipped: usize,
    /// Some source was left out because the budget ran out.
    pub budget_exhausted: bool,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Last three user/assistant turns of moderate length, from the last
/// [`HISTORY_LIMIT`] messages.
pub fn relevant_history(history: &[ChatMessage]) -> Vec<&ChatMessage> {
    let recent = &history[history.len().saturating_sub(HISTORY_LIMIT)..];
    let relevant: Vec<&ChatMessage> = recent
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .filter(|m| {
            let len = char_len(m.content.trim());
            len > CHAT_MIN_CHARS && len < CHAT_MAX_CHARS
        })
        .collect();
    relevant[relevant.len().saturating_sub(CHAT_MESSAGES)..].to_vec()
}

/// `Role: content` lines, each capped at 200 characters.
pub fn format_chat_context(messages: &[&ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let content = m.content.trim();
            let content = if char_len(content) > CHAT_PREVIEW_CHARS {
                format!("{}...", truncate_chars(content, CHAT_PREVIEW_CHARS))
            } else {
                content.to_string()
            };
            format!("{}: {}", m.role.label(), content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Human-readable age of a document.
pub fn describe_age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let days = (now - created_at).num_days();
    match days {
        d if d <= 0 => "Today".to_string(),
        1 => "Yesterday".to_string(),
        d if d < 7 => format!("{d} days ago"),
        d if d < 30 => format!("{} weeks ago", d / 7),
        _ => created_at.format("%Y-%m-%d").to_string(),
    }
}

fn document_header(n: usize, payload: &ChunkPayload, now: DateTime<Utc>) -> String {
    format!(
        "[Document {}] - {} ({}) - {}",
        n,
        payload.filename,
        payload.file_type.as_str().to_uppercase(),
        describe_age(payload.created_at, now)
    )
}

/// Build the generation context from ranked results and recent history.
pub fn build_context(
    results: &[RankedResult],
    history: &[ChatMessage],
    budget: &ContextBudget,
    now: DateTime<Utc>,
) -> BuiltContext {
    let available = budget.available();
    let mut built = BuiltContext::default();
    let mut parts: Vec<String> = Vec::new();
    let mut used = 0usize;

    let chat = format_chat_context(&relevant_history(history));
    if !chat.is_empty() {
        let section = format!("Conversation Context:\n{chat}\n");
        if char_len(&section) <= available {
            used += char_len(&section);
            parts.push(section);
        }
    }

    const DOCS_HEADING: &str = "Relevant Documents:\n";
    const SEPARATOR: &str = "\n\n";
    let mut seen = HashSet::new();
    let mut documents: Vec<String> = Vec::new();

    for result in results {
        let Some(text) = result.point.payload.text.as_deref() else {
            continue;
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        if !seen.insert(content_hash(text.as_bytes())) {
            built.duplicates_skipped += 1;
            continue;
        }

        let chunk = truncate_chars(text, budget.max_source_chars);
        let entry = format!(
            "{}\n{}",
            document_header(documents.len() + 1, &result.point.payload, now),
            chunk
        );
        // Separator before this part and heading before the first document.
        let overhead = if documents.is_empty() {
            char_len(DOCS_HEADING) + if parts.is_empty() { 0 } else { SEPARATOR.len() }
        } else {
            SEPARATOR.len()
        };
        let cost = overhead + char_len(&entry);
        if used + cost > available {
            built.budget_exhausted = true;
            break;
        }
        used += cost;
        documents.push(entry);
    }

    built.sources_used = documents.len();
    if !documents.is_empty() {
        parts.push(format!("{DOCS_HEADING}{}", documents.join(SEPARATOR)));
    }
    built.text = parts.join(SEPARATOR);
    debug!(
        chars = char_len(&built.text),
        sources = built.sources_used,
        duplicates = built.duplicates_skipped,
        "context built"
    );
    built
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileType, NewMessage, ScoredPoint};
    use chrono::{Duration, TimeZone};

    fn result(id: &str, text: &str, now: DateTime<Utc>) -> RankedResult {
        RankedResult::unscored(ScoredPoint {
            id: id.into(),
            score: 0.9,
            payload: ChunkPayload {
                document_id: id.into(),
                chunk_id: 0,
                project_name: "p".into(),
                user_id: "u".into(),
                session_id: "s".into(),
                filename: format!("{id}.pdf"),
                file_type: FileType::Pdf,
                doc_type: None,
                embedding_model: "m".into(),
                tags: vec![],
                ingest_source: "user_upload".into(),
                created_at: now - Duration::days(2),
                text: Some(text.into()),
            },
        })
    }

    fn msg(role: Role, content: &str) -> ChatMessage {
        NewMessage::new("p", "u", "s", role, content).into_message(Utc::now())
    }

    #[test]
    fn test_sources_in_rank_order_with_headers() {
        let now = Utc::now();
        let results = vec![result("a", "alpha text", now), result("b", "beta text", now)];
        let built = build_context(&results, &[], &ContextBudget::default(), now);
        assert_eq!(built.sources_used, 2);
        assert!(built.text.starts_with("Relevant Documents:\n[Document 1] - a.pdf (PDF) - 2 days ago\nalpha text"));
        let a = built.text.find("alpha").unwrap();
        let b = built.text.find("beta").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_duplicate_text_included_once() {
        let now = Utc::now();
        let results = vec![
            result("a", "same chunk", now),
            result("b", "same chunk", now),
            result("c", "other chunk", now),
        ];
        let built = build_context(&results, &[], &ContextBudget::default(), now);
        assert_eq!(built.sources_used, 2);
        assert_eq!(built.duplicates_skipped, 1);
        assert_eq!(built.text.matches("same chunk").count(), 1);
    }

    #[test]
    fn test_budget_never_exceeded() {
        let now = Utc::now();
        let budget = ContextBudget {
            max_chars: 900,
            max_source_chars: 300,
            reserve_chars: 100,
        };
        let results: Vec<_> = (0..10)
            .map(|i| result(&format!("d{i}"), &format!("{i} {}", "w".repeat(400)), now))
            .collect();
        let history = vec![msg(Role::User, "what happened in the third quarter?")];
        let built = build_context(&results, &history, &budget, now);
        assert!(built.text.chars().count() <= budget.available());
        assert!(built.budget_exhausted);
        assert!(built.sources_used >= 1 && built.sources_used < 10);
        assert!(built.text.contains("[Document 1] - d0.pdf"));
    }

    #[test]
    fn test_per_source_cap() {
        let now = Utc::now();
        let budget = ContextBudget {
            max_source_chars: 5,
            ..ContextBudget::default()
        };
        let built = build_context(&[result("a", "abcdefghij", now)], &[], &budget, now);
        assert!(built.text.ends_with("\nabcde"));
    }

    #[test]
    fn test_relevant_history_filters() {
        let long = "x".repeat(600);
        let history = vec![
            msg(Role::User, "first real question here"),
            msg(Role::System, "ingestion finished ok"),
            msg(Role::User, "short"),
            msg(Role::Assistant, &long),
            msg(Role::User, "second real question here"),
            msg(Role::Assistant, "an answer of decent length"),
        ];
        let relevant = relevant_history(&history);
        let contents: Vec<&str> = relevant.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["second real question here", "an answer of decent length"]
        );
    }

    #[test]
    fn test_conversation_section() {
        let now = Utc::now();
        let history = vec![msg(Role::User, "tell me about refunds")];
        let built = build_context(&[], &history, &ContextBudget::default(), now);
        assert_eq!(built.text, "Conversation Context:\nUser: tell me about refunds\n");
    }

    #[test]
    fn test_describe_age() {
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap();
        assert_eq!(describe_age(now, now), "Today");
        assert_eq!(describe_age(now - Duration::days(1), now), "Yesterday");
        assert_eq!(describe_age(now - Duration::days(3), now), "3 days ago");
        assert_eq!(describe_age(now - Duration::days(15), now), "2 weeks ago");
        assert_eq!(describe_age(now - Duration::days(45), now), "2024-05-16");
    }
}
