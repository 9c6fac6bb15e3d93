//! Core data models shared by the ingestion and query pipelines.
//!
//! Field names and the [`DocumentStatus`] wire values are part of the
//! persisted format: metadata rows, vector payloads, and chat messages
//! written by one version must stay readable by the next.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// Lifecycle state of one (content, embedding model) record.
///
/// Transitions move forward (`uploaded → reprocessing → ingested | failed`).
/// The only backward edge is the demotion to `embeddings_missing`, applied
/// when the vector index no longer holds the record's vectors; from there
/// the record re-enters the forward path via `reprocessing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    EmbeddingsMissing,
    Reprocessing,
    Ingested,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::EmbeddingsMissing => "embeddings_missing",
            DocumentStatus::Reprocessing => "reprocessing",
            DocumentStatus::Ingested => "ingested",
            DocumentStatus::Failed => "failed",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            DocumentStatus::Uploaded => 0,
            DocumentStatus::EmbeddingsMissing => 1,
            DocumentStatus::Reprocessing => 2,
            DocumentStatus::Ingested | DocumentStatus::Failed => 3,
        }
    }

    /// Whether a record in `self` may move to `next`.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        *self == next || next == DocumentStatus::EmbeddingsMissing || next.rank() > self.rank()
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(DocumentStatus::Uploaded),
            "embeddings_missing" => Ok(DocumentStatus::EmbeddingsMissing),
            "reprocessing" => Ok(DocumentStatus::Reprocessing),
            "ingested" => Ok(DocumentStatus::Ingested),
            "failed" => Ok(DocumentStatus::Failed),
            other => Err(RagError::Validation(format!(
                "unknown document status: {}",
                other
            ))),
        }
    }
}

/// Detected type of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Txt,
    Unknown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Txt => "txt",
            FileType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(FileType::Pdf),
            "docx" => Ok(FileType::Docx),
            "txt" => Ok(FileType::Txt),
            "unknown" => Ok(FileType::Unknown),
            other => Err(RagError::Validation(format!("unknown file type: {}", other))),
        }
    }
}

/// One row per (content, embedding model) combination actually processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub document_id: String,
    pub content_hash: String,
    pub project_name: String,
    pub user_id: String,
    pub session_id: String,
    pub filename: String,
    pub file_type: FileType,
    pub file_size: u64,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub ingest_source: String,
    pub source_path: String,
    pub status: DocumentStatus,
    pub created_timestamp: DateTime<Utc>,
    pub updated_timestamp: DateTime<Utc>,
}

/// Aggregate view of a project's metadata records.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProjectSummary {
    pub project_name: String,
    pub total_documents: usize,
    pub total_size: u64,
    pub status_breakdown: BTreeMap<String, usize>,
    pub file_types: BTreeMap<String, usize>,
}

impl ProjectSummary {
    pub fn from_records(project_name: &str, records: &[DocumentMetadata]) -> Self {
        let mut summary = ProjectSummary {
            project_name: project_name.to_string(),
            total_documents: records.len(),
            ..Default::default()
        };
        for record in records {
            summary.total_size += record.file_size;
            *summary
                .status_breakdown
                .entry(record.status.to_string())
                .or_insert(0) += 1;
            *summary
                .file_types
                .entry(record.file_type.to_string())
                .or_insert(0) += 1;
        }
        summary
    }
}

/// Payload stored next to every chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: String,
    /// 0-based offset of the chunk within its document.
    pub chunk_id: usize,
    pub project_name: String,
    pub user_id: String,
    pub session_id: String,
    pub filename: String,
    pub file_type: FileType,
    /// Coarse document category inferred from the filename (`report`, `manual`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    pub embedding_model: String,
    #[serde(default, rename = "content_tags")]
    pub tags: Vec<String>,
    pub ingest_source: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Upsert input for the vector index.
///
/// Records with an empty vector or without a payload are skipped by
/// [`VectorIndex::upsert`](crate::store::VectorIndex::upsert).
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Option<ChunkPayload>,
}

/// A nearest-neighbor hit returned by the vector index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Display label used in prompts (`User`, `Assistant`, `System`).
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        }
    }
}

impl FromStr for Role {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(RagError::Validation(format!("unknown role: {}", other))),
        }
    }
}

/// Maximum characters kept from a single chat message.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Input for [`ChatHistoryStore::append_message`](crate::store::ChatHistoryStore::append_message).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub project_id: String,
    pub user_id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub message_id: Option<String>,
    pub reply_to: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewMessage {
    pub fn new(
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            message_id: None,
            reply_to: None,
            metadata: None,
        }
    }

    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Materialize the stored message, bounding content length.
    pub fn into_message(self, timestamp: DateTime<Utc>) -> ChatMessage {
        let content = if self.content.chars().count() > MAX_MESSAGE_CHARS {
            self.content.chars().take(MAX_MESSAGE_CHARS).collect()
        } else {
            self.content
        };
        ChatMessage {
            message_id: self
                .message_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            timestamp,
            role: self.role,
            content,
            reply_to: self.reply_to,
            metadata: self.metadata,
        }
    }
}

/// Token usage and cost reported by a model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Usage) {
        self.tokens_in += other.tokens_in;
        self.tokens_out += other.tokens_out;
        self.cost += other.cost;
    }
}
