//! Result reranking.
//!
//! Two stages, both optional:
//!
//! 1. **LLM coarse rerank** ([`llm_rerank`]): a generator is asked for a
//!    comma-separated chunk ordering. Unranked results fill the tail.
//! 2. **Metadata scoring** ([`rerank_with_metadata`]): similarity score plus
//!    additive boosts, clamped to `[0, 1]`:
//!
//! | Signal | Boost |
//! |--------|-------|
//! | age < 7 days | +0.25 |
//! | age < 30 days | +0.15 |
//! | age < 90 days | +0.10 |
//! | doc type named by a recent topic | +0.20 |
//! | chunk owned by the caller | +0.10 |
//! | ingest source `upload` or `api` | +0.05 |

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::model::{GenerationParams, Generator};
use crate::models::ScoredPoint;

const PREVIEW_CHARS: usize = 200;
const RERANK_MAX_TOKENS: u32 = 100;
const CREDIBLE_SOURCES: &[&str] = &["upload", "api"];

/// A search hit with its metadata-adjusted score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    #[serde(flatten)]
    pub point: ScoredPoint,
    /// Set once metadata scoring ran.
    pub adjusted_score: Option<f32>,
}

impl RankedResult {
    pub fn unscored(point: ScoredPoint) -> Self {
        Self {
            point,
            adjusted_score: None,
        }
    }

    /// Adjusted score when present, else raw similarity.
    pub fn effective_score(&self) -> f32 {
        self.adjusted_score.unwrap_or(self.point.score)
    }
}

/// Signals available to the metadata scorer.
#[derive(Debug, Clone)]
pub struct RerankContext<'a> {
    pub recent_topics: &'a [String],
    pub user_id: Option<&'a str>,
    pub now: DateTime<Utc>,
}

// ============ LLM coarse rerank ============

pub fn rerank_prompt(query: &str, results: &[ScoredPoint]) -> String {
    let mut chunks = String::new();
    for (i, r) in results.iter().enumerate() {
        let text = r.payload.text.as_deref().unwrap_or("");
        let preview: String = text.chars().take(PREVIEW_CHARS).collect();
        chunks.push_str(&format!("Chunk {}: {}...\n", i + 1, preview));
    }
    format!(
        "Rank these document chunks by relevance to the query: \"{}\"\n{}\
         Return the ranking as a comma-separated list of chunk numbers (e.g., \"3,1,5,2,4\"):",
        query, chunks
    )
}

/// Parse `"3,1,2"` into 0-based, in-range, unique indices.
pub fn parse_ranking(text: &str, len: usize) -> Vec<usize> {
    let mut ranking = Vec::new();
    for part in text.trim().split(',') {
        let part = part.trim();
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let Ok(n) = part.parse::<usize>() else {
            continue;
        };
        if n >= 1 && n <= len && !ranking.contains(&(n - 1)) {
            ranking.push(n - 1);
        }
    }
    ranking
}

/// Order `results` by `ranking`, then append unranked ones, up to `limit`.
pub fn apply_ranking(results: Vec<ScoredPoint>, ranking: &[usize], limit: usize) -> Vec<ScoredPoint> {
    let mut slots: Vec<Option<ScoredPoint>> = results.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(limit.min(slots.len()));
    for &i in ranking {
        if out.len() >= limit {
            break;
        }
        if let Some(point) = slots.get_mut(i).and_then(Option::take) {
            out.push(point);
        }
    }
    for point in slots.into_iter().flatten() {
        if out.len() >= limit {
            break;
        }
        out.push(point);
    }
    out
}

/// Coarse reorder by a generator. Skipped when `results` already fit in
/// `limit`; a failed generation keeps the similarity order.
pub async fn llm_rerank(
    generator: &dyn Generator,
    query: &str,
    results: Vec<ScoredPoint>,
    limit: usize,
) -> Vec<ScoredPoint> {
    if results.len() <= limit {
        return results;
    }
    let params = GenerationParams {
        max_tokens: RERANK_MAX_TOKENS,
        ..GenerationParams::default()
    };
    match generator.generate(&rerank_prompt(query, &results), params).await {
        Ok(generation) => {
            let ranking = parse_ranking(&generation.text, results.len());
            debug!(ranked = ranking.len(), "llm rerank parsed");
            apply_ranking(results, &ranking, limit)
        }
        Err(e) => {
            warn!(error = %e, "llm rerank failed; keeping similarity order");
            results.into_iter().take(limit).collect()
        }
    }
}

// ============ Metadata scoring ============

fn recency_boost(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let age_days = (now - created_at).num_days();
    if age_days < 7 {
        0.25
    } else if age_days < 30 {
        0.15
    } else if age_days < 90 {
        0.1
    } else {
        0.0
    }
}

/// Adjusted score for one hit, in `[0, 1]`.
pub fn score_result(point: &ScoredPoint, ctx: &RerankContext<'_>) -> f32 {
    let payload = &point.payload;
    let mut score = if point.score.is_finite() {
        point.score
    } else {
        0.5
    };

    score += recency_boost(payload.created_at, ctx.now);

    let category = payload
        .doc_type
        .clone()
        .unwrap_or_else(|| payload.file_type.as_str().to_string());
    if ctx
        .recent_topics
        .iter()
        .any(|t| t.to_lowercase().contains(&category))
    {
        score += 0.2;
    }

    if ctx.user_id == Some(payload.user_id.as_str()) {
        score += 0.1;
    }

    if CREDIBLE_SOURCES.contains(&payload.ingest_source.to_lowercase().as_str()) {
        score += 0.05;
    }

    score.clamp(0.0, 1.0)
}

/// Score, sort descending by adjusted score and keep `top_k`.
pub fn rerank_with_metadata(
    results: Vec<ScoredPoint>,
    ctx: &RerankContext<'_>,
    top_k: usize,
) -> Vec<RankedResult> {
    let mut ranked: Vec<RankedResult> = results
        .into_iter()
        .map(|point| {
            let adjusted = score_result(&point, ctx);
            RankedResult {
                point,
                adjusted_score: Some(adjusted),
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.effective_score().total_cmp(&a.effective_score()));
    ranked.truncate(top_k);
    ranked
}
