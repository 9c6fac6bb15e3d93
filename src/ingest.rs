//! Ingestion pipeline orchestration.
//!
//! Moves staged uploads through hash → duplicate check → extract → chunk →
//! embed → index → metadata → move, one document at a time. Each document
//! ends in exactly one [`DocumentResult`] with an HTTP-style status code:
//!
//! | Code | Outcome | File left in |
//! |------|---------|--------------|
//! | 201 | ingested | permanent prefix |
//! | 409 | exact duplicate with verified vectors | temp prefix |
//! | 413 | file larger than `max_file_size_mb` | temp prefix |
//! | 415 | extension not allowed (nothing downloaded) | temp prefix |
//! | 422 | no extractable text | temp prefix |
//! | 500 | embedding, index or unexpected failure | temp prefix |
//!
//! One document's failure never aborts its siblings. Progress is also
//! appended to the session's chat history as `system` messages; a failure
//! to log is a warning and never changes an outcome.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use rag_harness_core::address::{self, content_hash};
use rag_harness_core::chunk::split_into_chunks;
use rag_harness_core::dedup::check_exists;
use rag_harness_core::error::{RagError, Result};
use rag_harness_core::filter::infer_doc_type;
use rag_harness_core::model::Embedder;
use rag_harness_core::models::{
    ChunkPayload, DocumentMetadata, DocumentStatus, NewMessage, Role, Usage, VectorRecord,
};
use rag_harness_core::store::{move_object, ChatHistoryStore, MetadataStore, ObjectStore, VectorIndex};

use crate::config::Config;
use crate::extract::{detect_file_type_with_header, extension_of, extract_text};

/// Bytes handed to content sniffing when the extension is not conclusive.
const HEADER_LEN: usize = 512;

/// One batch of staged files for a project.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub project_name: String,
    pub user_id: String,
    pub session_id: String,
    /// File names relative to the project's temp prefix.
    pub doc_locs: Vec<String>,
    pub ingest_source: Option<String>,
    pub source_path: Option<String>,
}

/// Embedding usage summed over every chunk of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmbeddingStats {
    pub total_chunks: usize,
    pub total_tokens_in: u64,
    pub total_tokens_out: u64,
    pub total_cost: f64,
}

impl EmbeddingStats {
    fn add(&mut self, usage: Usage) {
        self.total_chunks += 1;
        self.total_tokens_in += usage.tokens_in;
        self.total_tokens_out += usage.tokens_out;
        self.total_cost += usage.cost;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResult {
    pub status_code: u16,
    pub message: String,
    /// Bucket or root directory of the object store.
    pub location: String,
    pub storage_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    pub embedding_provider: String,
    pub embedding_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingStats>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub duplicates: usize,
    pub unsupported: usize,
    pub errors: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[DocumentResult]) -> Self {
        let count = |pred: &dyn Fn(u16) -> bool| {
            results.iter().filter(|r| pred(r.status_code)).count()
        };
        Self {
            total: results.len(),
            succeeded: count(&|c| c == 200 || c == 201),
            duplicates: count(&|c| c == 409),
            unsupported: count(&|c| c == 415),
            errors: count(&|c| c >= 500),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub results: Vec<DocumentResult>,
    pub summary: BatchSummary,
}

/// Pipeline knobs, taken from [`Config`] once at construction.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub temp_prefix: String,
    pub documents_prefix: String,
    pub chunk_size_words: usize,
    pub allowed_extensions: Vec<String>,
    pub max_file_bytes: u64,
    pub default_ingest_source: String,
    pub default_source_path: String,
    pub verify_embeddings: bool,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temp_prefix: config.storage.temp_prefix.clone(),
            documents_prefix: config.storage.documents_prefix.clone(),
            chunk_size_words: config.chunking.chunk_size_words,
            allowed_extensions: config.ingestion.allowed_extensions.clone(),
            max_file_bytes: config.ingestion.max_file_bytes(),
            default_ingest_source: config.ingestion.default_ingest_source.clone(),
            default_source_path: config.ingestion.default_source_path.clone(),
            verify_embeddings: config.ingestion.verify_embeddings,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        let ingestion = crate::config::IngestionConfig::default();
        let storage = crate::config::StorageConfig::default();
        Self {
            temp_prefix: storage.temp_prefix,
            documents_prefix: storage.documents_prefix,
            chunk_size_words: rag_harness_core::chunk::DEFAULT_CHUNK_SIZE,
            max_file_bytes: ingestion.max_file_bytes(),
            allowed_extensions: ingestion.allowed_extensions,
            default_ingest_source: ingestion.default_ingest_source,
            default_source_path: ingestion.default_source_path,
            verify_embeddings: ingestion.verify_embeddings,
        }
    }
}

pub struct IngestionPipeline {
    metadata: Arc<dyn MetadataStore>,
    index: Arc<dyn VectorIndex>,
    objects: Arc<dyn ObjectStore>,
    embedder: Arc<dyn Embedder>,
    history: Option<Arc<dyn ChatHistoryStore>>,
    settings: IngestSettings,
}

/// Per-document values shared by every step.
struct DocContext<'a> {
    req: &'a IngestRequest,
    doc_loc: &'a str,
    temp_key: String,
    doc_key: String,
    ingest_source: String,
    source_path: String,
}

impl IngestionPipeline {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        index: Arc<dyn VectorIndex>,
        objects: Arc<dyn ObjectStore>,
        embedder: Arc<dyn Embedder>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            metadata,
            index,
            objects,
            embedder,
            history: None,
            settings,
        }
    }

    /// Log progress to this chat history.
    pub fn with_history(mut self, history: Arc<dyn ChatHistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Ingest every file of the request and summarize the outcomes.
    pub async fn ingest(&self, req: &IngestRequest) -> Result<BatchResult> {
        if req.project_name.trim().is_empty() || req.user_id.trim().is_empty() {
            return Err(RagError::Validation(
                "project_name and user_id are required".to_string(),
            ));
        }
        if req.doc_locs.is_empty() {
            return Err(RagError::Validation("no documents to ingest".to_string()));
        }

        let provider = self.embedder.provider_name().to_string();
        let model = self.embedder.model_name().to_string();
        info!(
            project = %req.project_name,
            files = req.doc_locs.len(),
            provider = %provider,
            model = %model,
            "starting ingestion"
        );
        self.log(
            req,
            format!(
                "Starting document ingestion for: {} (provider={}, model={})",
                req.doc_locs.join(", "),
                provider,
                model
            ),
            json!({
                "action": "ingestion_start",
                "files": req.doc_locs,
                "embedding_provider": provider,
                "embedding_model": model,
            }),
        )
        .await;

        let mut results = Vec::with_capacity(req.doc_locs.len());
        for doc_loc in &req.doc_locs {
            results.push(self.ingest_one(req, doc_loc).await);
        }

        let summary = BatchSummary::from_results(&results);
        info!(?summary, "ingestion finished");
        self.log(
            req,
            format!(
                "Document ingestion completed! Total: {}, Succeeded: {}, Duplicates: {}, Unsupported: {}, Errors: {}",
                summary.total, summary.succeeded, summary.duplicates, summary.unsupported, summary.errors
            ),
            json!({
                "action": "ingestion_summary",
                "summary": summary,
                "embedding_provider": provider,
                "embedding_model": model,
            }),
        )
        .await;

        Ok(BatchResult { results, summary })
    }

    async fn ingest_one(&self, req: &IngestRequest, doc_loc: &str) -> DocumentResult {
        let project = &req.project_name;
        let cx = DocContext {
            req,
            doc_loc,
            temp_key: address::storage_key(&self.settings.temp_prefix, project, doc_loc),
            doc_key: address::storage_key(&self.settings.documents_prefix, project, doc_loc),
            ingest_source: non_empty(&req.ingest_source, &self.settings.default_ingest_source),
            source_path: non_empty(&req.source_path, &self.settings.default_source_path),
        };

        match self.process(&cx).await {
            Ok(result) => result,
            Err(e) => {
                error!(doc = doc_loc, error = %e, "unexpected ingestion error");
                self.log(
                    req,
                    format!("Unexpected error occurred while ingesting: {} - {}", doc_loc, e),
                    json!({ "action": "unexpected_error", "filename": doc_loc, "error": e.to_string() }),
                )
                .await;
                self.result(
                    500,
                    format!("Unexpected error ingesting {}: {}", doc_loc, e),
                    cx.temp_key.clone(),
                )
            }
        }
    }

    async fn process(&self, cx: &DocContext<'_>) -> Result<DocumentResult> {
        let doc_loc = cx.doc_loc;
        let model = self.embedder.model_name().to_string();
        let provider = self.embedder.provider_name().to_string();

        // Extension gate runs before any download.
        let ext = extension_of(doc_loc);
        if !self.settings.allowed_extensions.contains(&ext) {
            warn!(doc = doc_loc, "skipping unsupported file type");
            self.log(
                cx.req,
                format!(
                    "Unsupported file type: {} (allowed: {})",
                    doc_loc,
                    self.settings.allowed_extensions.join(", ")
                ),
                json!({ "action": "unsupported_file_type", "filename": doc_loc }),
            )
            .await;
            return Ok(self.result(
                415,
                format!("Unsupported file type: {}", doc_loc),
                cx.temp_key.clone(),
            ));
        }

        let bytes = self.objects.get(&cx.temp_key).await?;
        debug!(key = %cx.temp_key, size = bytes.len(), "downloaded staged file");
        if bytes.len() as u64 > self.settings.max_file_bytes {
            warn!(doc = doc_loc, size = bytes.len(), "file exceeds size limit");
            return Ok(self.result(
                413,
                format!(
                    "File too large: {} ({} bytes, limit {})",
                    doc_loc,
                    bytes.len(),
                    self.settings.max_file_bytes
                ),
                cx.temp_key.clone(),
            ));
        }

        let file_type =
            detect_file_type_with_header(doc_loc, &bytes[..bytes.len().min(HEADER_LEN)]);
        let hash = content_hash(&bytes);
        let check = check_exists(
            self.metadata.as_ref(),
            Some(self.index.as_ref()),
            &hash,
            Some(&model),
            self.settings.verify_embeddings,
        )
        .await?;

        if check.should_skip() {
            warn!(doc = doc_loc, "document already fully processed");
            self.log(
                cx.req,
                format!(
                    "Document already fully processed: {} (metadata and embeddings exist in the vector index)",
                    doc_loc
                ),
                json!({
                    "action": "fully_processed_skip",
                    "filename": doc_loc,
                    "embedding_model": model,
                    "embedding_provider": provider,
                }),
            )
            .await;
            return Ok(self.result(
                409,
                format!("Document already fully processed: {}", doc_loc),
                cx.temp_key.clone(),
            ));
        }

        let now = Utc::now();
        let mut document_id =
            address::document_id(&cx.req.project_name, &cx.req.user_id, &cx.temp_key, &hash);
        let mut created = now;
        let mut status = DocumentStatus::Uploaded;

        if check.needs_reprocess() {
            warn!(doc = doc_loc, "metadata exists but embeddings are missing; reprocessing");
            self.log(
                cx.req,
                format!(
                    "Incomplete processing detected for: {} (metadata exists but embeddings are missing, will reprocess)",
                    doc_loc
                ),
                json!({
                    "action": "incomplete_reprocess",
                    "filename": doc_loc,
                    "embedding_model": model,
                    "embedding_provider": provider,
                }),
            )
            .await;
            if let Some(existing) = &check.existing {
                // Repair the existing row rather than forking a new id.
                document_id = existing.document_id.clone();
                created = existing.created_timestamp;
                self.metadata
                    .update_status(&document_id, &model, DocumentStatus::Reprocessing)
                    .await?;
                status = DocumentStatus::Reprocessing;
            }
        } else if check.any_exists {
            info!(doc = doc_loc, "content exists under another model; continuing");
        }

        let text = extract_text(&bytes, file_type);
        if text.trim().is_empty() {
            warn!(doc = doc_loc, "no text extracted");
            if status == DocumentStatus::Reprocessing {
                self.metadata
                    .update_status(&document_id, &model, DocumentStatus::Failed)
                    .await?;
            }
            return Ok(self.result(
                422,
                format!("No extractable text: {}", doc_loc),
                cx.temp_key.clone(),
            ));
        }

        let chunks = split_into_chunks(&text, self.settings.chunk_size_words);
        info!(doc = doc_loc, document_id = %document_id, chunks = chunks.len(), "chunked document");

        let doc_type = infer_doc_type(doc_loc);
        let mut stats = EmbeddingStats::default();
        let mut records = Vec::with_capacity(chunks.len());
        let mut failure = None;
        for (idx, chunk) in chunks.iter().enumerate() {
            match self.embedder.embed(chunk).await {
                Ok(embedding) => {
                    stats.add(embedding.usage);
                    records.push(VectorRecord {
                        id: address::point_id(&document_id, &model, idx),
                        vector: embedding.vector,
                        payload: Some(ChunkPayload {
                            document_id: document_id.clone(),
                            chunk_id: idx,
                            project_name: cx.req.project_name.clone(),
                            user_id: cx.req.user_id.clone(),
                            session_id: cx.req.session_id.clone(),
                            filename: doc_loc.to_string(),
                            file_type,
                            doc_type: doc_type.clone(),
                            embedding_model: model.clone(),
                            tags: doc_type.iter().cloned().collect(),
                            ingest_source: cx.ingest_source.clone(),
                            created_at: now,
                            text: Some(chunk.clone()),
                        }),
                    });
                }
                Err(e) => {
                    error!(doc = doc_loc, chunk = idx, error = %e, "chunk embedding failed");
                    failure = Some(e);
                    break;
                }
            }
        }

        // All or nothing: a failed chunk means no upsert at all.
        let upserted = match failure {
            Some(e) => Err(e),
            None => self.index.upsert(&records).await,
        };
        if let Err(e) = upserted {
            if status == DocumentStatus::Reprocessing {
                self.metadata
                    .update_status(&document_id, &model, DocumentStatus::Failed)
                    .await?;
            }
            self.log(
                cx.req,
                format!("Failed to process embeddings for: {}", doc_loc),
                json!({
                    "action": "embedding_error",
                    "filename": doc_loc,
                    "embedding_model": model,
                    "embedding_provider": provider,
                    "error": e.to_string(),
                    "emb_meta": stats,
                }),
            )
            .await;
            return Ok(self.result(
                500,
                format!("Embedding pipeline failed: {}: {}", doc_loc, e),
                cx.temp_key.clone(),
            ));
        }
        info!(doc = doc_loc, points = records.len(), cost = stats.total_cost, "indexed chunks");

        let mut metadata = DocumentMetadata {
            document_id: document_id.clone(),
            content_hash: hash.clone(),
            project_name: cx.req.project_name.clone(),
            user_id: cx.req.user_id.clone(),
            session_id: cx.req.session_id.clone(),
            filename: doc_loc.to_string(),
            file_type,
            file_size: bytes.len() as u64,
            embedding_provider: provider.clone(),
            embedding_model: model.clone(),
            ingest_source: cx.ingest_source.clone(),
            source_path: cx.source_path.clone(),
            status,
            created_timestamp: created,
            updated_timestamp: now,
        };
        self.metadata.save(&metadata).await?;
        self.metadata
            .update_status(&document_id, &model, DocumentStatus::Ingested)
            .await?;
        metadata.status = DocumentStatus::Ingested;

        // The index is not rolled back if the move fails.
        let (message, final_key) =
            match move_object(self.objects.as_ref(), &cx.temp_key, &cx.doc_key).await {
                Ok(()) => (
                    format!("Document ingested successfully: {}", doc_loc),
                    cx.doc_key.clone(),
                ),
                Err(e) => {
                    warn!(doc = doc_loc, error = %e, "ingested but file move failed");
                    (
                        format!(
                            "Document ingested successfully: {} (file move pending: {})",
                            doc_loc, e
                        ),
                        cx.temp_key.clone(),
                    )
                }
            };

        self.log(
            cx.req,
            format!("Successfully ingested document: {}", doc_loc),
            json!({
                "action": "ingestion_success",
                "filename": doc_loc,
                "storage_key": final_key,
                "embedding_model": model,
                "embedding_provider": provider,
                "content_hash": hash,
                "emb_meta": stats,
            }),
        )
        .await;

        let mut result = self.result(201, message, final_key);
        result.ingest_source = Some(cx.ingest_source.clone());
        result.source_path = Some(cx.source_path.clone());
        result.metadata = Some(metadata);
        result.embedding = Some(stats);
        Ok(result)
    }

    fn result(
        &self,
        status_code: u16,
        message: String,
        storage_key: String,
    ) -> DocumentResult {
        DocumentResult {
            status_code,
            message,
            location: self.objects.location(),
            storage_key,
            ingest_source: None,
            source_path: None,
            embedding_provider: self.embedder.provider_name().to_string(),
            embedding_model: self.embedder.model_name().to_string(),
            metadata: None,
            embedding: None,
        }
    }

    async fn log(&self, req: &IngestRequest, content: String, metadata: serde_json::Value) {
        let Some(history) = &self.history else {
            return;
        };
        if req.session_id.is_empty() {
            return;
        }
        let message = NewMessage::new(
            &req.project_name,
            &req.user_id,
            &req.session_id,
            Role::System,
            content,
        )
        .metadata(metadata);
        if let Err(e) = history.append_message(message).await {
            warn!(session = %req.session_id, error = %e, "failed to log ingestion event");
        }
    }
}

fn non_empty(value: &Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v.clone(),
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(code: u16) -> DocumentResult {
        DocumentResult {
            status_code: code,
            message: String::new(),
            location: "mem".into(),
            storage_key: "k".into(),
            ingest_source: None,
            source_path: None,
            embedding_provider: "p".into(),
            embedding_model: "m".into(),
            metadata: None,
            embedding: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let results: Vec<_> = [201, 200, 409, 415, 422, 413, 500, 503]
            .into_iter()
            .map(result)
            .collect();
        let s = BatchSummary::from_results(&results);
        assert_eq!(
            s,
            BatchSummary {
                total: 8,
                succeeded: 2,
                duplicates: 1,
                unsupported: 1,
                errors: 2,
            }
        );
    }

    #[test]
    fn test_non_empty_defaults() {
        assert_eq!(non_empty(&None, "UI"), "UI");
        assert_eq!(non_empty(&Some("  ".into()), "UI"), "UI");
        assert_eq!(non_empty(&Some("api".into()), "UI"), "api");
    }

    #[test]
    fn test_stats_accumulate() {
        let mut stats = EmbeddingStats::default();
        stats.add(Usage { tokens_in: 10, tokens_out: 0, cost: 0.5 });
        stats.add(Usage { tokens_in: 5, tokens_out: 1, cost: 0.25 });
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.total_tokens_in, 15);
        assert_eq!(stats.total_tokens_out, 1);
        assert!((stats.total_cost - 0.75).abs() < 1e-12);
    }
}
