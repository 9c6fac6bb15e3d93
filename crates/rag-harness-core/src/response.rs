//! Query response payloads and answer cleanup.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::RagError;
use crate::filter::FilterSet;
use crate::models::Usage;
use crate::query::{ContextAnalysis, Intent};
use crate::rerank::RankedResult;

pub const NO_RESULTS_MESSAGE: &str =
    "No relevant documents found. Try rephrasing or check if documents are available in your project.";
pub const EMPTY_GENERATION_MESSAGE: &str = "No response generated.";
const UNCLEAR_ANSWER_MESSAGE: &str =
    "I found relevant information but couldn't generate a clear answer. Please check the sources below.";
const GENERATION_FAILED_MESSAGE: &str =
    "Sorry, I encountered an error generating the answer. Here's the relevant context I found:";

const PREVIEW_CHARS: usize = 200;
const FALLBACK_CONTEXT_CHARS: usize = 1000;
const MAX_SENTENCES: usize = 15;
const MIN_SENTENCE_CHARS: usize = 10;
const SIMILARITY_THRESHOLD: f64 = 0.8;

// ============ Payload types ============

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub summary: String,
    /// Retrieved context, returned when generation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Answer {
    pub fn text(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            context: None,
            error: None,
        }
    }

    /// Answer used when generation fails: an apology plus the context.
    pub fn generation_failed(context: &str, error: &RagError) -> Self {
        let context = if context.chars().count() > FALLBACK_CONTEXT_CHARS {
            format!(
                "{}...",
                context.chars().take(FALLBACK_CONTEXT_CHARS).collect::<String>()
            )
        } else {
            context.to_string()
        };
        Self {
            summary: GENERATION_FAILED_MESSAGE.to_string(),
            context: Some(context),
            error: Some(error.to_string()),
        }
    }
}

/// One ranked source as shown to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceInfo {
    pub doc_id: String,
    pub document_name: String,
    pub document_type: String,
    pub score: f32,
    pub adjusted_score: Option<f32>,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    pub preview: String,
}

impl From<&RankedResult> for SourceInfo {
    fn from(result: &RankedResult) -> Self {
        let payload = &result.point.payload;
        let text = payload.text.as_deref().unwrap_or("");
        let preview = if text.chars().count() > PREVIEW_CHARS {
            format!("{}...", text.chars().take(PREVIEW_CHARS).collect::<String>())
        } else {
            text.to_string()
        };
        Self {
            doc_id: payload.document_id.clone(),
            document_name: payload.filename.clone(),
            document_type: payload.file_type.as_str().to_string(),
            score: result.point.score,
            adjusted_score: result.adjusted_score,
            created_at: payload.created_at,
            user_id: payload.user_id.clone(),
            preview,
        }
    }
}

/// Predicate counts per bucket; displays as `"1 must, 2 should"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterSummary {
    pub must: usize,
    pub should: usize,
    pub not: usize,
}

impl From<&FilterSet> for FilterSummary {
    fn from(filters: &FilterSet) -> Self {
        Self {
            must: filters.must.len(),
            should: filters.should.len(),
            not: filters.must_not.len(),
        }
    }
}

impl fmt::Display for FilterSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} must, {} should", self.must, self.should)?;
        if self.not > 0 {
            write!(f, ", {} not", self.not)?;
        }
        Ok(())
    }
}

/// Which enhancements actually ran for a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnhancementFeatures {
    pub metadata_filtering: bool,
    pub smart_chat_history: bool,
    pub enhanced_context: bool,
    pub metadata_scoring: bool,
    pub negation_filters: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_results: bool,
}

/// Final payload of the query pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagResponse {
    pub answer: Answer,
    pub sources: Vec<SourceInfo>,
    pub query: String,
    pub rewritten_query: String,
    pub intent: Intent,
    pub context_info: ContextAnalysis,
    pub num_sources: usize,
    pub metadata_filters_applied: String,
    pub enhancement_features: EnhancementFeatures,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Technical error detail; `answer` carries the user-facing text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RagResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Everything the formatter echoes back besides answer and sources.
#[derive(Debug, Clone)]
pub struct QueryEcho<'a> {
    pub query: &'a str,
    pub rewritten_query: &'a str,
    pub intent: Intent,
    pub context_info: &'a ContextAnalysis,
    pub filters: FilterSummary,
}

// ============ Formatting ============

pub fn format_response(
    answer: Answer,
    results: &[RankedResult],
    echo: &QueryEcho<'_>,
    features: EnhancementFeatures,
    usage: Option<Usage>,
) -> RagResponse {
    let sources: Vec<SourceInfo> = results.iter().map(SourceInfo::from).collect();
    RagResponse {
        answer,
        num_sources: sources.len(),
        sources,
        query: echo.query.to_string(),
        rewritten_query: echo.rewritten_query.to_string(),
        intent: echo.intent,
        context_info: echo.context_info.clone(),
        metadata_filters_applied: echo.filters.to_string(),
        enhancement_features: features,
        usage,
        error: None,
    }
}

/// Payload when retrieval found nothing, even without filters.
pub fn no_results_response(echo: &QueryEcho<'_>) -> RagResponse {
    let features = EnhancementFeatures {
        no_results: true,
        ..EnhancementFeatures::default()
    };
    format_response(Answer::text(NO_RESULTS_MESSAGE), &[], echo, features, None)
}

/// User-facing explanation for a pipeline failure.
pub fn user_message(error: &RagError) -> String {
    match error {
        RagError::Embedding(_) => {
            "I had trouble understanding your question. Please rephrase it.".to_string()
        }
        RagError::Index(_) | RagError::DimensionMismatch { .. } => {
            "I couldn't search your documents right now. Try again shortly.".to_string()
        }
        RagError::Generation(_) => {
            "The AI service is temporarily unavailable. Please try again later.".to_string()
        }
        RagError::Validation(msg) => format!("Invalid request: {msg}"),
        other => format!("I encountered an error processing your query: {other}"),
    }
}

/// Payload when the pipeline failed; the raw error goes in `error`.
pub fn error_response(query: &str, error: &RagError) -> RagResponse {
    RagResponse {
        answer: Answer::text(user_message(error)),
        sources: Vec::new(),
        query: query.to_string(),
        rewritten_query: query.to_string(),
        intent: Intent::RagQuery,
        context_info: ContextAnalysis::default(),
        num_sources: 0,
        metadata_filters_applied: FilterSummary::default().to_string(),
        enhancement_features: EnhancementFeatures::default(),
        usage: None,
        error: Some(error.to_string()),
    }
}

// ============ Answer cleanup ============

fn jaccard(a: &str, b: &str) -> f64 {
    let wa: HashSet<&str> = a.split_whitespace().collect();
    let wb: HashSet<&str> = b.split_whitespace().collect();
    if wa.len() < 3 || wb.len() < 3 {
        return 0.0;
    }
    let inter = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    inter as f64 / union as f64
}

fn remove_repeated_sentences(text: &str) -> String {
    let mut seen: Vec<String> = Vec::new();
    let mut kept: Vec<&str> = Vec::new();
    for sentence in text.split('.').map(str::trim).filter(|s| !s.is_empty()) {
        let normalized = sentence.to_lowercase();
        if normalized.chars().count() < MIN_SENTENCE_CHARS {
            continue;
        }
        if seen
            .iter()
            .any(|s| *s == normalized || jaccard(s, &normalized) > SIMILARITY_THRESHOLD)
        {
            continue;
        }
        seen.push(normalized);
        kept.push(sentence);
        if kept.len() >= MAX_SENTENCES {
            break;
        }
    }
    let mut out = kept.join(". ");
    if !out.is_empty() && !out.ends_with('.') {
        out.push('.');
    }
    out
}

fn remove_repeated_lines(text: &str) -> String {
    let mut seen = HashSet::new();
    text.lines()
        .map(str::trim)
        .filter(|line| {
            let key = line.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
            key.chars().count() > 5 && seen.insert(key)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip repetition from a generated answer.
pub fn clean_llm_response(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return EMPTY_GENERATION_MESSAGE.to_string();
    }
    let mut clean = trimmed.to_string();
    while clean.contains("\n\n\n") {
        clean = clean.replace("\n\n\n", "\n\n");
    }
    while clean.contains("  ") {
        clean = clean.replace("  ", " ");
    }
    let clean = remove_repeated_lines(&remove_repeated_sentences(&clean));
    if clean.chars().count() < MIN_SENTENCE_CHARS {
        return UNCLEAR_ANSWER_MESSAGE.to_string();
    }
    clean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Predicate;
    use crate::models::{ChunkPayload, FileType, ScoredPoint};

    fn ranked(text: &str) -> RankedResult {
        RankedResult {
            point: ScoredPoint {
                id: "pt".into(),
                score: 0.8,
                payload: ChunkPayload {
                    document_id: "doc".into(),
                    chunk_id: 0,
                    project_name: "p".into(),
                    user_id: "alice".into(),
                    session_id: "s".into(),
                    filename: "q3.pdf".into(),
                    file_type: FileType::Pdf,
                    doc_type: Some("report".into()),
                    embedding_model: "m".into(),
                    tags: vec![],
                    ingest_source: "user_upload".into(),
                    created_at: Utc::now(),
                    text: Some(text.into()),
                },
            },
            adjusted_score: Some(0.9),
        }
    }

    #[test]
    fn test_source_preview_truncated() {
        let source = SourceInfo::from(&ranked(&"a".repeat(300)));
        assert_eq!(source.preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(source.preview.ends_with("..."));
        assert_eq!(source.document_name, "q3.pdf");
        assert_eq!(source.document_type, "pdf");
        assert_eq!(source.adjusted_score, Some(0.9));
        assert_eq!(SourceInfo::from(&ranked("short")).preview, "short");
    }

    #[test]
    fn test_filter_summary_display() {
        let mut filters = FilterSet::default();
        filters.must.push(Predicate::matching("project_name", "p"));
        assert_eq!(FilterSummary::from(&filters).to_string(), "1 must, 0 should");
        filters.must_not.push(Predicate::matching("doc_type", "report"));
        assert_eq!(
            FilterSummary::from(&filters).to_string(),
            "1 must, 0 should, 1 not"
        );
    }

    #[test]
    fn test_format_response_counts_sources() {
        let ctx = ContextAnalysis::default();
        let echo = QueryEcho {
            query: "q",
            rewritten_query: "q rewritten here",
            intent: Intent::Summarization,
            context_info: &ctx,
            filters: FilterSummary::default(),
        };
        let resp = format_response(
            Answer::text("answer"),
            &[ranked("x"), ranked("y")],
            &echo,
            EnhancementFeatures::default(),
            None,
        );
        assert_eq!(resp.num_sources, 2);
        assert_eq!(resp.rewritten_query, "q rewritten here");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["intent"], "summarization");
        assert!(json.get("error").is_none());
        assert!(json["enhancement_features"].get("no_results").is_none());
    }

    #[test]
    fn test_no_results_response() {
        let ctx = ContextAnalysis::default();
        let echo = QueryEcho {
            query: "q",
            rewritten_query: "q",
            intent: Intent::RagQuery,
            context_info: &ctx,
            filters: FilterSummary::default(),
        };
        let resp = no_results_response(&echo);
        assert_eq!(resp.answer.summary, NO_RESULTS_MESSAGE);
        assert!(resp.sources.is_empty());
        assert!(resp.enhancement_features.no_results);
        assert!(!resp.is_error());
    }

    #[test]
    fn test_error_response_keeps_technical_detail() {
        let err = RagError::Embedding("timeout after 3 retries".into());
        let resp = error_response("q", &err);
        assert!(resp.is_error());
        assert!(resp.error.as_deref().unwrap().contains("timeout after 3 retries"));
        assert!(!resp.answer.summary.contains("timeout"));
    }

    #[test]
    fn test_generation_failed_answer() {
        let err = RagError::Generation("boom".into());
        let answer = Answer::generation_failed(&"c".repeat(1500), &err);
        assert_eq!(answer.context.as_deref().unwrap().chars().count(), 1003);
        assert!(answer.error.is_some());
    }

    #[test]
    fn test_clean_llm_response() {
        assert_eq!(clean_llm_response("   "), EMPTY_GENERATION_MESSAGE);
        let repeated = "The refund window is thirty days. The refund window is thirty days. \
                        Contact support for exceptions.";
        assert_eq!(
            clean_llm_response(repeated),
            "The refund window is thirty days. Contact support for exceptions."
        );
        assert_eq!(clean_llm_response("ok."), UNCLEAR_ANSWER_MESSAGE);
    }
}
