//! Query pipeline orchestration.
//!
//! ```text
//! history → analyze → intent → rewrite → embed → filters
//!         → retrieve (filtered, then unfiltered) → rerank → context
//!         → generate → format → history
//! ```
//!
//! [`RagPipeline::query`] never returns an error: failures become a
//! [`RagResponse`] whose `answer` explains the problem in plain words and
//! whose `error` keeps the technical detail.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, info, warn};

use rag_harness_core::context::{build_context, ContextBudget};
use rag_harness_core::error::{RagError, Result};
use rag_harness_core::filter::{build_filters, FilterRequest, FilterSet};
use rag_harness_core::model::{Embedder, GenerationParams, Generator};
use rag_harness_core::models::{ChatMessage, NewMessage, Role, ScoredPoint, Usage};
use rag_harness_core::prompt::build_prompt;
use rag_harness_core::query::QueryProcessor;
use rag_harness_core::rerank::{llm_rerank, rerank_with_metadata, RankedResult, RerankContext};
use rag_harness_core::response::{
    clean_llm_response, error_response, format_response, no_results_response, Answer,
    EnhancementFeatures, FilterSummary, QueryEcho, RagResponse, EMPTY_GENERATION_MESSAGE,
};
use rag_harness_core::store::{ChatHistoryStore, VectorIndex};

use crate::config::Config;

const NO_RESULTS_LOG: &str = "No relevant documents found for your query.";

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub query: String,
    pub project_name: String,
    pub user_id: String,
    pub session_id: String,
    /// Overrides the configured `top_k`.
    pub top_k: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct QuerySettings {
    pub top_k: usize,
    pub rerank: bool,
    pub llm_rerank: bool,
    pub fetch_multiplier: usize,
    pub rerank_fetch_multiplier: usize,
    pub history_limit: usize,
    pub budget: ContextBudget,
    pub generation: GenerationParams,
}

impl QuerySettings {
    pub fn from_config(config: &Config) -> Self {
        let r = &config.retrieval;
        Self {
            top_k: r.top_k,
            rerank: r.rerank,
            llm_rerank: r.llm_rerank,
            fetch_multiplier: r.fetch_multiplier,
            rerank_fetch_multiplier: r.rerank_fetch_multiplier,
            history_limit: r.history_limit,
            budget: config.context.budget(),
            generation: GenerationParams {
                max_tokens: config.generation.max_tokens,
                temperature: config.generation.temperature,
            },
        }
    }

    /// Candidates fetched before reranking and truncation.
    pub fn fetch_count(&self, top_k: usize) -> usize {
        if self.rerank {
            top_k * self.rerank_fetch_multiplier
        } else {
            top_k * self.fetch_multiplier
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        let r = crate::config::RetrievalConfig::default();
        Self {
            top_k: r.top_k,
            rerank: r.rerank,
            llm_rerank: r.llm_rerank,
            fetch_multiplier: r.fetch_multiplier,
            rerank_fetch_multiplier: r.rerank_fetch_multiplier,
            history_limit: r.history_limit,
            budget: ContextBudget::default(),
            generation: GenerationParams::default(),
        }
    }
}

pub struct RagPipeline {
    processor: QueryProcessor,
    index: Arc<dyn VectorIndex>,
    generator: Option<Arc<dyn Generator>>,
    history: Option<Arc<dyn ChatHistoryStore>>,
    settings: QuerySettings,
}

impl RagPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        generator: Option<Arc<dyn Generator>>,
        index: Arc<dyn VectorIndex>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            processor: QueryProcessor::new(embedder, generator.clone()),
            index,
            generator,
            history: None,
            settings,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn ChatHistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub async fn query(&self, req: &QueryRequest) -> RagResponse {
        match self.run(req).await {
            Ok(response) => response,
            Err(e) => {
                error!(query = %req.query, error = %e, "query pipeline failed");
                self.log(
                    req,
                    Role::System,
                    format!("Error processing query: {}", e),
                    None,
                    json!({ "action": "rag_error", "error": e.to_string() }),
                )
                .await;
                error_response(&req.query, &e)
            }
        }
    }

    async fn run(&self, req: &QueryRequest) -> Result<RagResponse> {
        let query = req.query.trim();
        if query.is_empty() {
            return Err(RagError::Validation("Query cannot be empty".to_string()));
        }
        let top_k = req.top_k.unwrap_or(self.settings.top_k).max(1);
        let now = Utc::now();

        // Read before logging so the current question is not its own context.
        let history = self.recent_history(req).await;
        let user_message_id = self
            .log(
                req,
                Role::User,
                query.to_string(),
                None,
                json!({ "action": "rag_query_start" }),
            )
            .await;

        let context_info = self.processor.analyze_context(&history);
        let intent = self.processor.classify_intent(query);
        let rewritten = self.processor.rewrite_query(query, &history).await;
        let embedding = self.processor.embed_query(&rewritten, &history).await?;
        let mut usage = embedding.usage;

        let user_id = Some(req.user_id.as_str()).filter(|u| !u.is_empty());
        let filters = build_filters(
            &FilterRequest {
                query,
                project_name: &req.project_name,
                user_id,
                recent_topics: &context_info.recent_topics,
            },
            now,
        );
        let echo = QueryEcho {
            query,
            rewritten_query: &rewritten,
            intent,
            context_info: &context_info,
            filters: FilterSummary::from(&filters),
        };
        info!(
            intent = %intent,
            filters = %echo.filters,
            topics = context_info.recent_topics.len(),
            "processing query"
        );

        let fetch = self.settings.fetch_count(top_k);
        let candidates = self.retrieve(&embedding.vector, fetch, &filters).await?;
        if candidates.is_empty() {
            self.log(
                req,
                Role::Assistant,
                NO_RESULTS_LOG.to_string(),
                user_message_id.clone(),
                json!({ "action": "rag_no_results" }),
            )
            .await;
            return Ok(no_results_response(&echo));
        }

        let reranked = self.settings.rerank && candidates.len() > top_k;
        let ranked = if reranked {
            self.rerank(query, candidates, &context_info.recent_topics, user_id, top_k)
                .await
        } else {
            candidates
                .into_iter()
                .take(top_k)
                .map(RankedResult::unscored)
                .collect()
        };

        let built = build_context(&ranked, &history, &self.settings.budget, now);
        debug!(
            sources = built.sources_used,
            duplicates = built.duplicates_skipped,
            chars = built.text.chars().count(),
            "context built"
        );

        let answer = match self.generate(intent, &built.text, query).await {
            Ok((text, gen_usage)) => {
                usage += gen_usage;
                Answer::text(text)
            }
            Err(e) => {
                warn!(error = %e, "generation failed; returning context");
                Answer::generation_failed(&built.text, &e)
            }
        };

        let features = EnhancementFeatures {
            metadata_filtering: true,
            smart_chat_history: !history.is_empty(),
            enhanced_context: true,
            metadata_scoring: reranked,
            negation_filters: !filters.must_not.is_empty(),
            no_results: false,
        };
        let response = format_response(answer, &ranked, &echo, features, Some(usage));

        self.log(
            req,
            Role::Assistant,
            response.answer.summary.clone(),
            user_message_id,
            json!({
                "action": "rag_query_complete",
                "intent": intent,
                "sources_count": response.num_sources,
            }),
        )
        .await;
        Ok(response)
    }

    /// Filtered search, falling back to an unfiltered one when it finds nothing.
    async fn retrieve(
        &self,
        vector: &[f32],
        limit: usize,
        filters: &FilterSet,
    ) -> Result<Vec<ScoredPoint>> {
        if !filters.is_empty() {
            let hits = self.index.search(vector, limit, Some(filters)).await?;
            if !hits.is_empty() {
                debug!(hits = hits.len(), "filtered search");
                return Ok(hits);
            }
            info!("filtered search returned nothing; retrying without filters");
        }
        self.index.search(vector, limit, None).await
    }

    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<ScoredPoint>,
        recent_topics: &[String],
        user_id: Option<&str>,
        top_k: usize,
    ) -> Vec<RankedResult> {
        let candidates = match (&self.generator, self.settings.llm_rerank) {
            (Some(generator), true) => {
                llm_rerank(generator.as_ref(), query, candidates, top_k * 2).await
            }
            _ => candidates,
        };
        let ctx = RerankContext {
            recent_topics,
            user_id,
            now: Utc::now(),
        };
        rerank_with_metadata(candidates, &ctx, top_k)
    }

    async fn generate(
        &self,
        intent: rag_harness_core::query::Intent,
        context: &str,
        query: &str,
    ) -> Result<(String, Usage)> {
        let generator = self
            .generator
            .as_ref()
            .ok_or_else(|| RagError::Generation("no generation model configured".to_string()))?;
        let prompt = build_prompt(intent, context, query);
        let generation = generator.generate(&prompt, self.settings.generation).await?;
        let text = if generation.text.trim().is_empty() {
            EMPTY_GENERATION_MESSAGE.to_string()
        } else {
            clean_llm_response(&generation.text)
        };
        Ok((text, generation.usage))
    }

    async fn recent_history(&self, req: &QueryRequest) -> Vec<ChatMessage> {
        let Some(history) = &self.history else {
            return Vec::new();
        };
        if req.session_id.is_empty() {
            return Vec::new();
        }
        match history
            .get_recent_history(&req.session_id, self.settings.history_limit)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(session = %req.session_id, error = %e, "failed to read chat history");
                Vec::new()
            }
        }
    }

    /// Append to the session log; returns the stored message id.
    async fn log(
        &self,
        req: &QueryRequest,
        role: Role,
        content: String,
        reply_to: Option<String>,
        metadata: serde_json::Value,
    ) -> Option<String> {
        let history = self.history.as_ref()?;
        if req.session_id.is_empty() {
            return None;
        }
        let mut message = NewMessage::new(
            &req.project_name,
            &req.user_id,
            &req.session_id,
            role,
            content,
        )
        .metadata(metadata);
        if let Some(id) = reply_to {
            message = message.reply_to(id);
        }
        match history.append_message(message).await {
            Ok(stored) => Some(stored.message_id),
            Err(e) => {
                warn!(session = %req.session_id, error = %e, "failed to log chat message");
                None
            }
        }
    }
}
