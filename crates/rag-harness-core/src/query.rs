//! Query preprocessing: rewrite, intent, history-aware embedding, and
//! conversational context.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{RagError, Result};
use crate::model::{Embedder, Embedding, GenerationParams, Generator};
use crate::models::{ChatMessage, Role};

/// Messages scanned by [`analyze_context`].
pub const HISTORY_LIMIT: usize = 5;
/// Hard cap on a rewritten query, in characters.
pub const MAX_REWRITTEN_LENGTH: usize = 200;
/// Hard cap on the text sent to the embedder for a query, in characters.
pub const MAX_EMBED_INPUT_CHARS: usize = 1000;
const REWRITE_MAX_TOKENS: u32 = 80;
const REWRITE_CONTEXT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Summarization,
    Analysis,
    Comparison,
    FactCheck,
    RagQuery,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Summarization => "summarization",
            Intent::Analysis => "analysis",
            Intent::Comparison => "comparison",
            Intent::FactCheck => "fact_check",
            Intent::RagQuery => "rag_query",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phrase lists checked in order; the first hit decides the intent.
const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
    (
        Intent::Summarization,
        &["summarize", "summary", "overview", "key points", "tl;dr"],
    ),
    (
        Intent::Analysis,
        &["analyze", "analysis", "insights", "trends", "interpret"],
    ),
    (
        Intent::Comparison,
        &["compare", "comparison", "versus", " vs ", "difference between"],
    ),
    (
        Intent::FactCheck,
        &["fact check", "fact-check", "is it true", "verify that"],
    ),
];

/// Coarse topics tracked across a conversation.
const TOPIC_TERMS: &[(&str, &[&str])] = &[
    ("manual", &["manual", "guide"]),
    ("report", &["report", "analysis"]),
];

/// Keyword-membership intent classification. Never fails.
pub fn classify_intent(query: &str) -> Intent {
    let text = query.to_lowercase();
    INTENT_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::RagQuery)
}

/// Conversational signals derived from recent history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextAnalysis {
    pub has_context: bool,
    pub recent_topics: Vec<String>,
    pub last_query_time: Option<DateTime<Utc>>,
}

/// Scan the last [`HISTORY_LIMIT`] messages for topic keywords.
pub fn analyze_context(history: &[ChatMessage]) -> ContextAnalysis {
    if history.is_empty() {
        return ContextAnalysis::default();
    }
    let recent = &history[history.len().saturating_sub(HISTORY_LIMIT)..];
    let mut topics: Vec<String> = Vec::new();
    for msg in recent {
        let content = msg.content.to_lowercase();
        for (topic, terms) in TOPIC_TERMS {
            if terms.iter().any(|t| content.contains(t)) && !topics.iter().any(|x| x == topic) {
                topics.push(topic.to_string());
            }
        }
    }
    ContextAnalysis {
        has_context: true,
        recent_topics: topics,
        last_query_time: recent.last().map(|m| m.timestamp),
    }
}

/// The last two user turns joined with `" | "`, if any.
pub fn recent_user_context(history: &[ChatMessage]) -> Option<String> {
    let user_msgs: Vec<&str> = history
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .collect();
    if user_msgs.is_empty() {
        return None;
    }
    Some(user_msgs[user_msgs.len().saturating_sub(2)..].join(" | "))
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Prompt asking a generator for a keyword-dense retrieval variant.
pub fn rewrite_prompt(query: &str, history: &[ChatMessage]) -> String {
    let history_section = recent_user_context(history)
        .map(|ctx| format!("UserContext: {}\n", truncate_chars(&ctx, REWRITE_CONTEXT_CHARS)))
        .unwrap_or_default();
    format!(
        "Rewrite this user query to be more effective for document retrieval. \
         Focus on key terms and concepts, remove conversational words. \
         Make it concise and keyword-focused for semantic search.\n\n\
         {}User query: {}\n\nRewritten query (keywords only):",
        history_section, query
    )
}

/// Clean a raw rewrite; fall back to `original` when it is near-empty.
pub fn clean_rewrite(raw: &str, original: &str) -> String {
    let mut rewritten = raw.trim().to_string();

    if rewritten.starts_with("```") {
        let fence_end = rewritten[3..]
            .find(|c: char| !c.is_ascii_alphanumeric())
            .map(|i| i + 3)
            .unwrap_or(rewritten.len());
        rewritten = rewritten[fence_end..].to_string();
    }
    rewritten = rewritten.trim_end_matches("```").trim().to_string();

    if rewritten.to_lowercase().contains("original query:") && rewritten.lines().count() > 1 {
        if let Some(line) = rewritten
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.to_lowercase().starts_with("original query:"))
            .last()
        {
            rewritten = line.trim().to_string();
        }
    }

    if rewritten.chars().count() > MAX_REWRITTEN_LENGTH {
        rewritten = truncate_chars(&rewritten, MAX_REWRITTEN_LENGTH)
            .trim_end()
            .to_string();
    }

    if rewritten.is_empty() || rewritten.matches(' ').count() <= 1 {
        debug!("rewrite too short; using original query");
        return original.to_string();
    }
    rewritten
}

/// Text actually embedded for a query: recent user turns, then the query.
pub fn embed_input(query: &str, history: &[ChatMessage]) -> String {
    match recent_user_context(history) {
        Some(ctx) => truncate_chars(&format!("{} || {}", ctx, query), MAX_EMBED_INPUT_CHARS),
        None => query.to_string(),
    }
}

/// Rewrites and embeds queries against the configured models.
pub struct QueryProcessor {
    embedder: Arc<dyn Embedder>,
    generator: Option<Arc<dyn Generator>>,
}

impl QueryProcessor {
    pub fn new(embedder: Arc<dyn Embedder>, generator: Option<Arc<dyn Generator>>) -> Self {
        Self {
            embedder,
            generator,
        }
    }

    /// Retrieval-oriented rewrite. Falls back to `query` without a
    /// generator, on generation failure, or on a near-empty result.
    pub async fn rewrite_query(&self, query: &str, history: &[ChatMessage]) -> String {
        let Some(generator) = &self.generator else {
            return query.to_string();
        };
        let params = GenerationParams {
            max_tokens: REWRITE_MAX_TOKENS,
            ..GenerationParams::default()
        };
        match generator
            .generate(&rewrite_prompt(query, history), params)
            .await
        {
            Ok(generation) => {
                let rewritten = clean_rewrite(&generation.text, query);
                info!(original = query, rewritten = %rewritten, "query rewritten");
                rewritten
            }
            Err(e) => {
                warn!(error = %e, "query rewrite failed; using original");
                query.to_string()
            }
        }
    }

    pub fn classify_intent(&self, query: &str) -> Intent {
        classify_intent(query)
    }

    /// Embed the query, prefixed with recent user turns.
    pub async fn embed_query(&self, query: &str, history: &[ChatMessage]) -> Result<Embedding> {
        let input = embed_input(query, history);
        let embedding = self.embedder.embed(&input).await?;
        if embedding.vector.is_empty() {
            return Err(RagError::Embedding("empty query embedding".to_string()));
        }
        debug!(dim = embedding.vector.len(), "query embedded");
        Ok(embedding)
    }

    pub fn analyze_context(&self, history: &[ChatMessage]) -> ContextAnalysis {
        analyze_context(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMessage;

    fn msg(role: Role, content: &str) -> ChatMessage {
        NewMessage::new("p", "u", "s", role, content).into_message(Utc::now())
    }

    #[test]
    fn test_classify_intent() {
        assert_eq!(classify_intent("Summarize the Q3 report"), Intent::Summarization);
        assert_eq!(classify_intent("give me an overview"), Intent::Summarization);
        assert_eq!(classify_intent("analyze sales trends"), Intent::Analysis);
        assert_eq!(classify_intent("compare plan A and plan B"), Intent::Comparison);
        assert_eq!(classify_intent("what is the refund policy?"), Intent::RagQuery);
    }

    #[test]
    fn test_analyze_context_topics() {
        let history = vec![
            msg(Role::User, "where is the install guide"),
            msg(Role::Assistant, "see the manual"),
            msg(Role::User, "and the quarterly report?"),
        ];
        let ctx = analyze_context(&history);
        assert!(ctx.has_context);
        assert_eq!(ctx.recent_topics, vec!["manual", "report"]);
        assert_eq!(ctx.last_query_time, Some(history[2].timestamp));
    }

    #[test]
    fn test_analyze_context_only_scans_recent() {
        let mut history = vec![msg(Role::User, "manual please")];
        for _ in 0..HISTORY_LIMIT {
            history.push(msg(Role::User, "hello"));
        }
        assert!(analyze_context(&history).recent_topics.is_empty());
        assert_eq!(analyze_context(&[]), ContextAnalysis::default());
    }

    #[test]
    fn test_recent_user_context_takes_last_two() {
        let history = vec![
            msg(Role::User, "one"),
            msg(Role::Assistant, "reply"),
            msg(Role::User, "two"),
            msg(Role::User, "three"),
        ];
        assert_eq!(recent_user_context(&history).as_deref(), Some("two | three"));
        assert_eq!(recent_user_context(&[msg(Role::System, "x")]), None);
    }

    #[test]
    fn test_embed_input_prefix_and_cap() {
        let history = vec![msg(Role::User, "earlier question")];
        assert_eq!(
            embed_input("new question", &history),
            "earlier question || new question"
        );
        assert_eq!(embed_input("q", &[]), "q");
        let long = "x".repeat(2000);
        assert_eq!(
            embed_input(&long, &history).chars().count(),
            MAX_EMBED_INPUT_CHARS
        );
    }

    #[test]
    fn test_rewrite_prompt_includes_context() {
        let history = vec![msg(Role::User, "vacation policy")];
        let prompt = rewrite_prompt("how many days?", &history);
        assert!(prompt.contains("UserContext: vacation policy\n"));
        assert!(prompt.ends_with("Rewritten query (keywords only):"));
        assert!(!rewrite_prompt("q", &[]).contains("UserContext"));
    }

    #[test]
    fn test_clean_rewrite_strips_fences() {
        let cleaned = clean_rewrite("```text\nvacation policy days allowance\n```", "orig");
        assert_eq!(cleaned, "vacation policy days allowance");
    }

    #[test]
    fn test_clean_rewrite_echoed_instructions() {
        let raw = "Original query: how many days\nvacation days allowance policy";
        assert_eq!(clean_rewrite(raw, "orig"), "vacation days allowance policy");
    }

    #[test]
    fn test_clean_rewrite_falls_back_on_short_output() {
        assert_eq!(clean_rewrite("", "original q"), "original q");
        assert_eq!(clean_rewrite("two words", "original q"), "original q");
    }

    #[test]
    fn test_clean_rewrite_truncates() {
        let raw = "word ".repeat(100);
        assert!(clean_rewrite(&raw, "o").chars().count() <= MAX_REWRITTEN_LENGTH);
    }
}
