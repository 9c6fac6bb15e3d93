//! Answer prompt templates, selected by query intent.
//!
//! | Key | Intent |
//! |-----|--------|
//! | `rag_query` | [`Intent::RagQuery`] (fallback) |
//! | `rag_summary` | [`Intent::Summarization`] |
//! | `rag_analysis` | [`Intent::Analysis`] |
//! | `rag_comparison` | [`Intent::Comparison`] |
//! | `rag_factcheck` | [`Intent::FactCheck`] |
//!
//! Templates use `{context}` and `{query}` placeholders.

use crate::query::Intent;

pub const RAG_QA_PROMPT: &str = "You are a helpful assistant.
Answer the following question using the context.
If the answer is not in the context, say \"I don't know\".
Context:
{context}
Question:
{query}
Answer:";

pub const RAG_SUMMARY_PROMPT: &str = "You are a summarization assistant.
Summarize the following context into key points and a short summary.
Context:
{context}
Request:
{query}
Summary:";

pub const RAG_ANALYSIS_PROMPT: &str = "You are an analysis assistant.
Using only the context, identify trends, patterns and notable insights relevant to the request.
Context:
{context}
Request:
{query}
Analysis:";

pub const RAG_COMPARISON_PROMPT: &str = "Based on the retrieved information below, provide a thorough comparison.
Focus on:
- Key similarities
- Important differences
- Advantages and disadvantages
Retrieved Information:
{context}
User Request: {query}
Comparison:";

pub const RAG_FACTCHECK_PROMPT: &str = "You are a fact-checking assistant.
Given the context, determine if the following statement is supported or not.
Context:
{context}
Statement:
{query}
Answer with \"Supported\", \"Not Supported\", or \"Insufficient Information\".";

/// Registry key for an intent.
pub fn prompt_key(intent: Intent) -> &'static str {
    match intent {
        Intent::RagQuery => "rag_query",
        Intent::Summarization => "rag_summary",
        Intent::Analysis => "rag_analysis",
        Intent::Comparison => "rag_comparison",
        Intent::FactCheck => "rag_factcheck",
    }
}

/// Template by registry key, `None` for unknown keys.
pub fn template(key: &str) -> Option<&'static str> {
    match key {
        "rag_query" => Some(RAG_QA_PROMPT),
        "rag_summary" => Some(RAG_SUMMARY_PROMPT),
        "rag_analysis" => Some(RAG_ANALYSIS_PROMPT),
        "rag_comparison" => Some(RAG_COMPARISON_PROMPT),
        "rag_factcheck" => Some(RAG_FACTCHECK_PROMPT),
        _ => None,
    }
}

/// Fill the template for `intent`.
pub fn build_prompt(intent: Intent, context: &str, query: &str) -> String {
    let tmpl = template(prompt_key(intent)).unwrap_or(RAG_QA_PROMPT);
    render(tmpl, context, query)
}

/// Substitute placeholders. Context is inserted last so braces inside
/// retrieved text are never interpreted.
pub fn render(template: &str, context: &str, query: &str) -> String {
    template
        .replace("{query}", query)
        .replacen("{context}", context, 1)
}
