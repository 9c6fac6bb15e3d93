//! Storage abstractions for RAG Harness.
//!
//! Four external collaborators sit behind traits so the pipelines can run
//! against real services or the in-memory backends in [`memory`]:
//!
//! | Trait | Holds | Production backend |
//! |-------|-------|--------------------|
//! | [`MetadataStore`] | one [`DocumentMetadata`] row per (document, model) | SQLite |
//! | [`VectorIndex`] | chunk vectors with [`ChunkPayload`](crate::models::ChunkPayload) | Qdrant |
//! | [`ObjectStore`] | raw uploaded bytes by key | local directory or S3 |
//! | [`ChatHistoryStore`] | append-only per-session messages | SQLite |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::{RagError, Result};
use crate::filter::FilterSet;
use crate::models::{
    ChatMessage, DocumentMetadata, DocumentStatus, NewMessage, ProjectSummary, ScoredPoint,
    VectorRecord,
};

/// Document metadata with a secondary lookup by content hash.
///
/// Rows are keyed by `(document_id, embedding_model)`: the same content
/// embedded with two models yields two rows under one document id.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace the row for `(document_id, embedding_model)`.
    async fn save(&self, metadata: &DocumentMetadata) -> Result<bool>;

    /// Most recently updated row for a document, across models.
    async fn get(&self, document_id: &str) -> Result<Option<DocumentMetadata>>;

    /// The row for one embedding model of a document.
    async fn get_variant(
        &self,
        document_id: &str,
        embedding_model: &str,
    ) -> Result<Option<DocumentMetadata>>;

    /// Move a row to `status`. Returns `false` when the row is missing or
    /// the transition is not allowed.
    async fn update_status(
        &self,
        document_id: &str,
        embedding_model: &str,
        status: DocumentStatus,
    ) -> Result<bool>;

    /// Index lookup by content hash, all models.
    async fn find_by_content_hash(&self, content_hash: &str) -> Result<Vec<DocumentMetadata>>;

    async fn find_by_project(&self, project_name: &str) -> Result<Vec<DocumentMetadata>>;

    async fn find_by_session(&self, session_id: &str) -> Result<Vec<DocumentMetadata>>;

    /// Delete every row of a document. Returns the number of rows removed.
    async fn delete(&self, document_id: &str) -> Result<usize>;

    async fn project_summary(&self, project_name: &str) -> Result<ProjectSummary> {
        let records = self.find_by_project(project_name).await?;
        Ok(ProjectSummary::from_records(project_name, &records))
    }
}

/// Outcome of [`VectorIndex::ensure_collection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionState {
    Existing,
    Created,
    /// Dropped and recreated with a new dimension (explicit opt-in only).
    Recreated,
}

/// Nearest-neighbor index over chunk vectors.
///
/// Every vector in a collection shares one dimensionality. A mismatch is
/// reported as [`RagError::DimensionMismatch`] and never coerced.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if absent and check its dimension.
    async fn ensure_collection(&self, required_dim: usize) -> Result<CollectionState>;

    /// Upsert a batch. Records without a vector or payload are skipped with a
    /// warning; the call fails only when no valid record remains. Returns the
    /// number of points written.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize>;

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&FilterSet>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Number of points stored for a document, optionally for one model only.
    async fn count_for_document(
        &self,
        document_id: &str,
        embedding_model: Option<&str>,
    ) -> Result<usize>;

    async fn delete_by_id(&self, id: &str) -> Result<bool>;

    async fn delete_by_document(&self, document_id: &str) -> Result<usize>;

    async fn clear_collection(&self) -> Result<()>;
}

/// Byte blobs addressed by key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket name or root directory, reported back to callers.
    fn location(&self) -> String;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Move a blob by copying it and then deleting the source.
///
/// If the delete fails the copy is left in place; the caller decides
/// whether that is fatal.
pub async fn move_object(store: &dyn ObjectStore, from: &str, to: &str) -> Result<()> {
    store.copy(from, to).await?;
    store.delete(from).await
}

/// Append-only per-session conversation log.
#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    /// Append a message, creating the session on first use.
    async fn append_message(&self, message: NewMessage) -> Result<ChatMessage>;

    /// The last `limit` messages of a session, oldest first.
    async fn get_recent_history(&self, session_id: &str, limit: usize)
        -> Result<Vec<ChatMessage>>;

    async fn clear_session(&self, session_id: &str) -> Result<usize>;
}

/// Timestamp for a new message that keeps a session strictly increasing.
pub fn next_timestamp(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match last {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

/// Keep records that carry both a vector and a payload, and check they
/// share one dimension. Returns the valid records and their dimension.
pub fn valid_records(records: &[VectorRecord]) -> Result<(Vec<&VectorRecord>, usize)> {
    let mut valid = Vec::with_capacity(records.len());
    for record in records {
        if record.vector.is_empty() {
            warn!(id = %record.id, "skipping vector record without embedding");
            continue;
        }
        if record.payload.is_none() {
            warn!(id = %record.id, "skipping vector record without metadata");
            continue;
        }
        valid.push(record);
    }

    let dim = match valid.first() {
        Some(first) => first.vector.len(),
        None => return Err(RagError::Index("no valid records to upsert".to_string())),
    };
    if let Some(bad) = valid.iter().find(|r| r.vector.len() != dim) {
        return Err(RagError::DimensionMismatch {
            expected: dim,
            actual: bad.vector.len(),
        });
    }
    Ok((valid, dim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkPayload, FileType};
    use chrono::TimeZone;

    fn payload() -> ChunkPayload {
        ChunkPayload {
            document_id: "d".into(),
            chunk_id: 0,
            project_name: "p".into(),
            user_id: "u".into(),
            session_id: "s".into(),
            filename: "f.txt".into(),
            file_type: FileType::Txt,
            doc_type: None,
            embedding_model: "m".into(),
            tags: vec![],
            ingest_source: "user_upload".into(),
            created_at: Utc::now(),
            text: None,
        }
    }

    #[test]
    fn test_valid_records_skips_incomplete() {
        let records = vec![
            VectorRecord {
                id: "a".into(),
                vector: vec![1.0, 2.0],
                payload: Some(payload()),
            },
            VectorRecord {
                id: "b".into(),
                vector: vec![],
                payload: Some(payload()),
            },
            VectorRecord {
                id: "c".into(),
                vector: vec![1.0, 2.0],
                payload: None,
            },
        ];
        let (valid, dim) = valid_records(&records).unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(dim, 2);
    }

    #[test]
    fn test_valid_records_all_invalid_is_error() {
        let records = vec![VectorRecord {
            id: "a".into(),
            vector: vec![],
            payload: None,
        }];
        assert!(matches!(valid_records(&records), Err(RagError::Index(_))));
    }

    #[test]
    fn test_valid_records_mixed_dims_is_error() {
        let records = vec![
            VectorRecord {
                id: "a".into(),
                vector: vec![1.0, 2.0],
                payload: Some(payload()),
            },
            VectorRecord {
                id: "b".into(),
                vector: vec![1.0],
                payload: Some(payload()),
            },
        ];
        assert!(matches!(
            valid_records(&records),
            Err(RagError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_next_timestamp_is_strictly_increasing() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(next_timestamp(None, t), t);
        assert!(next_timestamp(Some(t), t) > t);
        let later = t + Duration::seconds(5);
        assert_eq!(next_timestamp(Some(t), later), later);
    }
}
