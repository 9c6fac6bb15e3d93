//! Duplicate detection over the metadata store and the vector index.
//!
//! [`check_exists`] yields one of three outcomes that drive ingestion:
//!
//! | `exact_exists` | `embeddings_verified` | Meaning | Pipeline action |
//! |----------------|-----------------------|---------|-----------------|
//! | `true` | `true` | fully processed duplicate | skip (409) |
//! | `true` | `false` | metadata without vectors | demote, reprocess |
//! | `false` | n/a | novel for this model | process |

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::models::{DocumentMetadata, DocumentStatus};
use crate::store::{MetadataStore, VectorIndex};

/// Result of a duplicate check.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExistenceCheck {
    /// Some record has this content hash, under any model.
    pub any_exists: bool,
    /// A record has this content hash under the requested model.
    pub exact_exists: bool,
    /// The exact record's vectors are present in the index.
    pub embeddings_verified: bool,
    /// The exact record, when one exists.
    #[serde(skip)]
    pub existing: Option<DocumentMetadata>,
}

impl ExistenceCheck {
    pub fn should_skip(&self) -> bool {
        self.exact_exists && self.embeddings_verified
    }

    /// Metadata exists for this model but its vectors do not.
    pub fn needs_reprocess(&self) -> bool {
        self.exact_exists && !self.embeddings_verified
    }
}

/// Check whether `content_hash` was already ingested with `embedding_model`.
///
/// When `verify_index` is set and an index is available, an exact match is
/// confirmed against the index. A failed confirmation demotes the record to
/// `embeddings_missing`. Without an index, or with `verify_index` unset, an
/// exact match counts as verified. An index error counts as not verified.
pub async fn check_exists(
    store: &dyn MetadataStore,
    index: Option<&dyn VectorIndex>,
    content_hash: &str,
    embedding_model: Option<&str>,
    verify_index: bool,
) -> Result<ExistenceCheck> {
    let matches = store.find_by_content_hash(content_hash).await?;
    let mut check = ExistenceCheck {
        any_exists: !matches.is_empty(),
        ..Default::default()
    };

    let Some(model) = embedding_model else {
        debug!(content_hash, any = check.any_exists, "duplicate check without model");
        return Ok(check);
    };

    let Some(existing) = matches.into_iter().find(|m| m.embedding_model == model) else {
        return Ok(check);
    };
    check.exact_exists = true;

    check.embeddings_verified = match (verify_index, index) {
        (true, Some(index)) => {
            match index
                .count_for_document(&existing.document_id, Some(model))
                .await
            {
                Ok(n) => n > 0,
                Err(e) => {
                    warn!(document_id = %existing.document_id, error = %e, "vector index check failed");
                    false
                }
            }
        }
        _ => true,
    };

    if !check.embeddings_verified {
        info!(
            document_id = %existing.document_id,
            model,
            "metadata present but embeddings missing; marking for reprocess"
        );
        store
            .update_status(
                &existing.document_id,
                model,
                DocumentStatus::EmbeddingsMissing,
            )
            .await?;
    }

    check.existing = Some(existing);
    Ok(check)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkPayload, FileType, VectorRecord};
    use crate::store::memory::{InMemoryMetadataStore, InMemoryVectorIndex};
    use chrono::Utc;

    fn metadata(model: &str) -> DocumentMetadata {
        let now = Utc::now();
        DocumentMetadata {
            document_id: "doc1".into(),
            content_hash: "hash1".into(),
            project_name: "acme".into(),
            user_id: "alice".into(),
            session_id: "s".into(),
            filename: "a.txt".into(),
            file_type: FileType::Txt,
            file_size: 3,
            embedding_provider: "bedrock".into(),
            embedding_model: model.into(),
            ingest_source: "user_upload".into(),
            source_path: "UI".into(),
            status: DocumentStatus::Ingested,
            created_timestamp: now,
            updated_timestamp: now,
        }
    }

    async fn index_with_vectors(model: &str) -> InMemoryVectorIndex {
        let index = InMemoryVectorIndex::new();
        index
            .upsert(&[VectorRecord {
                id: "p".into(),
                vector: vec![1.0, 0.0],
                payload: Some(ChunkPayload {
                    document_id: "doc1".into(),
                    chunk_id: 0,
                    project_name: "acme".into(),
                    user_id: "alice".into(),
                    session_id: "s".into(),
                    filename: "a.txt".into(),
                    file_type: FileType::Txt,
                    doc_type: None,
                    embedding_model: model.into(),
                    tags: vec![],
                    ingest_source: "user_upload".into(),
                    created_at: Utc::now(),
                    text: None,
                }),
            }])
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_novel_content() {
        let store = InMemoryMetadataStore::new();
        let check = check_exists(&store, None, "hash1", Some("titan"), true)
            .await
            .unwrap();
        assert_eq!(check, ExistenceCheck::default());
        assert!(!check.should_skip());
    }

    #[tokio::test]
    async fn test_verified_duplicate_is_skipped() {
        let store = InMemoryMetadataStore::new();
        store.save(&metadata("titan")).await.unwrap();
        let index = index_with_vectors("titan").await;
        let check = check_exists(&store, Some(&index), "hash1", Some("titan"), true)
            .await
            .unwrap();
        assert!(check.any_exists && check.exact_exists && check.embeddings_verified);
        assert!(check.should_skip());
    }

    #[tokio::test]
    async fn test_other_model_is_not_exact() {
        let store = InMemoryMetadataStore::new();
        store.save(&metadata("titan")).await.unwrap();
        let check = check_exists(&store, None, "hash1", Some("cohere"), true)
            .await
            .unwrap();
        assert!(check.any_exists);
        assert!(!check.exact_exists);
        assert!(!check.should_skip());
    }

    #[tokio::test]
    async fn test_missing_vectors_demotes_status() {
        let store = InMemoryMetadataStore::new();
        store.save(&metadata("titan")).await.unwrap();
        let index = InMemoryVectorIndex::new();
        let check = check_exists(&store, Some(&index), "hash1", Some("titan"), true)
            .await
            .unwrap();
        assert!(check.needs_reprocess());
        let row = store.get_variant("doc1", "titan").await.unwrap().unwrap();
        assert_eq!(row.status, DocumentStatus::EmbeddingsMissing);
    }

    #[tokio::test]
    async fn test_vectors_of_other_model_do_not_verify() {
        let store = InMemoryMetadataStore::new();
        store.save(&metadata("titan")).await.unwrap();
        let index = index_with_vectors("cohere").await;
        let check = check_exists(&store, Some(&index), "hash1", Some("titan"), true)
            .await
            .unwrap();
        assert!(!check.embeddings_verified);
    }

    #[tokio::test]
    async fn test_without_index_or_verification_exact_is_verified() {
        let store = InMemoryMetadataStore::new();
        store.save(&metadata("titan")).await.unwrap();
        let empty = InMemoryVectorIndex::new();

        let no_index = check_exists(&store, None, "hash1", Some("titan"), true)
            .await
            .unwrap();
        assert!(no_index.should_skip());

        let no_verify = check_exists(&store, Some(&empty), "hash1", Some("titan"), false)
            .await
            .unwrap();
        assert!(no_verify.should_skip());
    }
}
