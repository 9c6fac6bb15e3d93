//! Query pipeline tests against an in-memory index and scripted models.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use rag_harness::rag::{QueryRequest, QuerySettings, RagPipeline};
use rag_harness_core::error::{RagError, Result};
use rag_harness_core::model::{Embedder, Embedding, Generation, GenerationParams, Generator};
use rag_harness_core::models::{ChunkPayload, FileType, Role, Usage, VectorRecord};
use rag_harness_core::response::NO_RESULTS_MESSAGE;
use rag_harness_core::store::memory::{InMemoryChatHistory, InMemoryVectorIndex};
use rag_harness_core::store::{ChatHistoryStore, VectorIndex};

const ANSWER: &str = "The quarterly report is due next Friday according to the project plan.";

struct FixedEmbedder;

#[async_trait]
impl Embedder for FixedEmbedder {
    fn provider_name(&self) -> &str {
        "fake"
    }

    fn model_name(&self) -> &str {
        "fake-embed"
    }

    async fn embed(&self, _text: &str) -> Result<Embedding> {
        Ok(Embedding {
            vector: vec![1.0, 0.0, 0.0],
            usage: Usage {
                tokens_in: 4,
                ..Default::default()
            },
        })
    }
}

/// Answers rewrite prompts with keywords and everything else with [`ANSWER`].
struct ScriptedGenerator {
    fail: bool,
    answers: AtomicUsize,
}

impl ScriptedGenerator {
    fn ok() -> Self {
        Self {
            fail: false,
            answers: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            answers: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "fake-llm"
    }

    async fn generate(&self, prompt: &str, _params: GenerationParams) -> Result<Generation> {
        if self.fail {
            return Err(RagError::Generation("model unavailable".to_string()));
        }
        let text = if prompt.starts_with("Rewrite this user query") {
            "quarterly report deadline".to_string()
        } else {
            self.answers.fetch_add(1, Ordering::SeqCst);
            ANSWER.to_string()
        };
        Ok(Generation {
            text,
            usage: Usage {
                tokens_in: 100,
                tokens_out: 20,
                cost: 0.001,
            },
        })
    }
}

fn record(id: usize, project: &str, vector: Vec<f32>, text: &str) -> VectorRecord {
    VectorRecord {
        id: format!("00000000-0000-0000-0000-{:012}", id),
        vector,
        payload: Some(ChunkPayload {
            document_id: format!("doc{}", id),
            chunk_id: 0,
            project_name: project.to_string(),
            user_id: "alice".to_string(),
            session_id: "s0".to_string(),
            filename: format!("file{}.txt", id),
            file_type: FileType::Txt,
            doc_type: None,
            embedding_model: "fake-embed".to_string(),
            tags: Vec::new(),
            ingest_source: "user_upload".to_string(),
            created_at: Utc::now(),
            text: Some(text.to_string()),
        }),
    }
}

async fn seeded_index(project: &str, n: usize) -> Arc<InMemoryVectorIndex> {
    let index = Arc::new(InMemoryVectorIndex::new());
    let records: Vec<VectorRecord> = (0..n)
        .map(|i| {
            record(
                i,
                project,
                vec![1.0, i as f32 * 0.1, 0.0],
                &format!("Chunk {} says the quarterly report is due on Friday.", i),
            )
        })
        .collect();
    if !records.is_empty() {
        index.upsert(&records).await.unwrap();
    }
    index
}

fn pipeline(
    index: Arc<InMemoryVectorIndex>,
    generator: Option<Arc<ScriptedGenerator>>,
    history: Arc<InMemoryChatHistory>,
) -> RagPipeline {
    let generator = generator.map(|g| g as Arc<dyn Generator>);
    RagPipeline::new(
        Arc::new(FixedEmbedder),
        generator,
        index,
        QuerySettings::default(),
    )
    .with_history(history)
}

fn request(query: &str) -> QueryRequest {
    QueryRequest {
        query: query.to_string(),
        project_name: "acme".to_string(),
        user_id: "alice".to_string(),
        session_id: "s1".to_string(),
        top_k: None,
    }
}

#[tokio::test]
async fn test_answer_with_sources() {
    let history = Arc::new(InMemoryChatHistory::new());
    let generator = Arc::new(ScriptedGenerator::ok());
    let rag = pipeline(
        seeded_index("acme", 3).await,
        Some(generator.clone()),
        history.clone(),
    );

    let response = rag.query(&request("When is the quarterly report due?")).await;

    assert!(response.error.is_none());
    assert_eq!(response.answer.summary, ANSWER);
    assert_eq!(response.num_sources, 3);
    assert_eq!(response.rewritten_query, "quarterly report deadline");
    assert_eq!(generator.answers.load(Ordering::SeqCst), 1);

    let usage = response.usage.unwrap();
    assert_eq!(usage.tokens_in, 4 + 100);
    assert!(response.enhancement_features.metadata_filtering);
    assert!(!response.enhancement_features.no_results);
}

#[tokio::test]
async fn test_turns_are_logged_with_reply_link() {
    let history = Arc::new(InMemoryChatHistory::new());
    let rag = pipeline(
        seeded_index("acme", 2).await,
        Some(Arc::new(ScriptedGenerator::ok())),
        history.clone(),
    );

    rag.query(&request("When is the quarterly report due?")).await;

    let log = history.get_recent_history("s1", 10).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].role, Role::User);
    assert_eq!(log[0].content, "When is the quarterly report due?");
    assert_eq!(log[1].role, Role::Assistant);
    assert_eq!(log[1].reply_to.as_deref(), Some(log[0].message_id.as_str()));
    let meta = log[1].metadata.as_ref().unwrap();
    assert_eq!(meta["action"], "rag_query_complete");
    assert_eq!(meta["sources_count"], 2);
}

#[tokio::test]
async fn test_empty_index_gives_no_results() {
    let history = Arc::new(InMemoryChatHistory::new());
    let generator = Arc::new(ScriptedGenerator::ok());
    let rag = pipeline(
        seeded_index("acme", 0).await,
        Some(generator.clone()),
        history.clone(),
    );

    let response = rag.query(&request("anything about budgets?")).await;

    assert_eq!(response.answer.summary, NO_RESULTS_MESSAGE);
    assert_eq!(response.num_sources, 0);
    assert!(response.enhancement_features.no_results);
    assert_eq!(generator.answers.load(Ordering::SeqCst), 0);

    let log = history.get_recent_history("s1", 10).await.unwrap();
    let last = log.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.metadata.as_ref().unwrap()["action"], "rag_no_results");
}

#[tokio::test]
async fn test_filtered_miss_falls_back_to_unfiltered_search() {
    let rag = pipeline(
        seeded_index("other-project", 2).await,
        Some(Arc::new(ScriptedGenerator::ok())),
        Arc::new(InMemoryChatHistory::new()),
    );

    let response = rag.query(&request("When is the quarterly report due?")).await;

    assert_eq!(response.num_sources, 2);
    assert_eq!(response.answer.summary, ANSWER);
}

#[tokio::test]
async fn test_results_are_cut_to_top_k() {
    let rag = pipeline(
        seeded_index("acme", 12).await,
        Some(Arc::new(ScriptedGenerator::ok())),
        Arc::new(InMemoryChatHistory::new()),
    );

    let mut req = request("When is the quarterly report due?");
    req.top_k = Some(2);
    let response = rag.query(&req).await;

    assert_eq!(response.num_sources, 2);
    assert!(response.enhancement_features.metadata_scoring);
    assert!(response.sources.iter().all(|s| s.adjusted_score.is_some()));
}

#[tokio::test]
async fn test_generation_failure_returns_context() {
    let rag = pipeline(
        seeded_index("acme", 2).await,
        Some(Arc::new(ScriptedGenerator::failing())),
        Arc::new(InMemoryChatHistory::new()),
    );

    let response = rag.query(&request("When is the quarterly report due?")).await;

    assert_eq!(response.num_sources, 2);
    let context = response.answer.context.as_deref().unwrap();
    assert!(context.contains("quarterly report"));
    assert!(response.answer.error.is_some());
    // The original query is used when the rewrite fails.
    assert_eq!(response.rewritten_query, "When is the quarterly report due?");
}

#[tokio::test]
async fn test_without_generator_context_is_still_returned() {
    let rag = pipeline(
        seeded_index("acme", 1).await,
        None,
        Arc::new(InMemoryChatHistory::new()),
    );

    let response = rag.query(&request("When is the quarterly report due?")).await;

    assert_eq!(response.num_sources, 1);
    assert!(response.answer.context.is_some());
}

#[tokio::test]
async fn test_empty_query_is_an_error_response() {
    let history = Arc::new(InMemoryChatHistory::new());
    let rag = pipeline(
        seeded_index("acme", 1).await,
        Some(Arc::new(ScriptedGenerator::ok())),
        history.clone(),
    );

    let response = rag.query(&request("   ")).await;

    assert!(response.is_error());
    assert_eq!(response.num_sources, 0);
    let log = history.get_recent_history("s1", 10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].role, Role::System);
    assert_eq!(log[0].metadata.as_ref().unwrap()["action"], "rag_error");
}
