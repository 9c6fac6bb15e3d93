//! In-memory store implementations for tests and local runs.
//!
//! Maps and vectors behind `parking_lot::RwLock`. Vector search is
//! brute-force cosine similarity over every stored point, with filters
//! evaluated against the JSON form of each payload.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{RagError, Result};
use crate::filter::FilterSet;
use crate::model::cosine_similarity;
use crate::models::{
    ChatMessage, ChunkPayload, DocumentMetadata, DocumentStatus, NewMessage, ScoredPoint,
    VectorRecord,
};

use super::{
    next_timestamp, valid_records, ChatHistoryStore, CollectionState, MetadataStore, ObjectStore,
    VectorIndex,
};

// ============ Metadata ============

type RowKey = (String, String);

#[derive(Default)]
struct MetadataTables {
    rows: HashMap<RowKey, DocumentMetadata>,
    by_hash: HashMap<String, Vec<RowKey>>,
}

/// In-memory [`MetadataStore`] with a content-hash index.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    tables: RwLock<MetadataTables>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect<F>(&self, pred: F) -> Vec<DocumentMetadata>
    where
        F: Fn(&DocumentMetadata) -> bool,
    {
        let tables = self.tables.read();
        let mut out: Vec<DocumentMetadata> =
            tables.rows.values().filter(|m| pred(m)).cloned().collect();
        out.sort_by(|a, b| {
            a.created_timestamp
                .cmp(&b.created_timestamp)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        out
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn save(&self, metadata: &DocumentMetadata) -> Result<bool> {
        let key = (
            metadata.document_id.clone(),
            metadata.embedding_model.clone(),
        );
        let mut tables = self.tables.write();
        let index = tables
            .by_hash
            .entry(metadata.content_hash.clone())
            .or_default();
        if !index.contains(&key) {
            index.push(key.clone());
        }
        tables.rows.insert(key, metadata.clone());
        Ok(true)
    }

    async fn get(&self, document_id: &str) -> Result<Option<DocumentMetadata>> {
        let tables = self.tables.read();
        Ok(tables
            .rows
            .values()
            .filter(|m| m.document_id == document_id)
            .max_by_key(|m| m.updated_timestamp)
            .cloned())
    }

    async fn get_variant(
        &self,
        document_id: &str,
        embedding_model: &str,
    ) -> Result<Option<DocumentMetadata>> {
        let tables = self.tables.read();
        Ok(tables
            .rows
            .get(&(document_id.to_string(), embedding_model.to_string()))
            .cloned())
    }

    async fn update_status(
        &self,
        document_id: &str,
        embedding_model: &str,
        status: DocumentStatus,
    ) -> Result<bool> {
        let mut tables = self.tables.write();
        let key = (document_id.to_string(), embedding_model.to_string());
        let Some(row) = tables.rows.get_mut(&key) else {
            return Ok(false);
        };
        if !row.status.can_transition_to(status) {
            warn!(
                document_id,
                from = %row.status,
                to = %status,
                "rejected status transition"
            );
            return Ok(false);
        }
        row.status = status;
        row.updated_timestamp = Utc::now();
        Ok(true)
    }

    async fn find_by_content_hash(&self, content_hash: &str) -> Result<Vec<DocumentMetadata>> {
        let tables = self.tables.read();
        Ok(tables
            .by_hash
            .get(content_hash)
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| tables.rows.get(k).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_by_project(&self, project_name: &str) -> Result<Vec<DocumentMetadata>> {
        Ok(self.collect(|m| m.project_name == project_name))
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Vec<DocumentMetadata>> {
        Ok(self.collect(|m| m.session_id == session_id))
    }

    async fn delete(&self, document_id: &str) -> Result<usize> {
        let mut tables = self.tables.write();
        let before = tables.rows.len();
        tables.rows.retain(|(id, _), _| id != document_id);
        for keys in tables.by_hash.values_mut() {
            keys.retain(|(id, _)| id != document_id);
        }
        tables.by_hash.retain(|_, keys| !keys.is_empty());
        Ok(before - tables.rows.len())
    }
}

// ============ Vector index ============

#[derive(Default)]
struct Collection {
    dim: Option<usize>,
    points: BTreeMap<String, (Vec<f32>, ChunkPayload)>,
}

/// In-memory [`VectorIndex`] holding a single collection.
pub struct InMemoryVectorIndex {
    collection: RwLock<Collection>,
    auto_fix_dimension_mismatch: bool,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            collection: RwLock::new(Collection::default()),
            auto_fix_dimension_mismatch: false,
        }
    }

    /// Recreate the collection on a dimension mismatch instead of failing.
    pub fn with_auto_fix(mut self, enabled: bool) -> Self {
        self.auto_fix_dimension_mismatch = enabled;
        self
    }

    /// Current dimension, or `None` if the collection was never created.
    pub fn dimension(&self) -> Option<usize> {
        self.collection.read().dim
    }

    pub fn len(&self) -> usize {
        self.collection.read().points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn ensure_collection(&self, required_dim: usize) -> Result<CollectionState> {
        let mut collection = self.collection.write();
        match collection.dim {
            None => {
                collection.dim = Some(required_dim);
                info!(dim = required_dim, "created in-memory collection");
                Ok(CollectionState::Created)
            }
            Some(dim) if dim == required_dim => Ok(CollectionState::Existing),
            Some(dim) if self.auto_fix_dimension_mismatch => {
                warn!(
                    from = dim,
                    to = required_dim,
                    dropped = collection.points.len(),
                    "recreating collection with new dimension"
                );
                collection.points.clear();
                collection.dim = Some(required_dim);
                Ok(CollectionState::Recreated)
            }
            Some(dim) => Err(RagError::DimensionMismatch {
                expected: dim,
                actual: required_dim,
            }),
        }
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<usize> {
        let (valid, dim) = valid_records(records)?;
        self.ensure_collection(dim).await?;
        let mut collection = self.collection.write();
        for record in &valid {
            if let Some(payload) = &record.payload {
                collection
                    .points
                    .insert(record.id.clone(), (record.vector.clone(), payload.clone()));
            }
        }
        Ok(valid.len())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&FilterSet>,
    ) -> Result<Vec<ScoredPoint>> {
        let collection = self.collection.read();
        let Some(dim) = collection.dim else {
            return Ok(Vec::new());
        };
        if query.len() != dim {
            return Err(RagError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }

        let mut hits = Vec::new();
        for (id, (vector, payload)) in &collection.points {
            if let Some(f) = filter {
                if !f.matches(&serde_json::to_value(payload)?) {
                    continue;
                }
            }
            hits.push(ScoredPoint {
                id: id.clone(),
                score: cosine_similarity(query, vector),
                payload: payload.clone(),
            });
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count_for_document(
        &self,
        document_id: &str,
        embedding_model: Option<&str>,
    ) -> Result<usize> {
        let collection = self.collection.read();
        Ok(collection
            .points
            .values()
            .filter(|(_, p)| {
                p.document_id == document_id
                    && embedding_model.map_or(true, |m| p.embedding_model == m)
            })
            .count())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        Ok(self.collection.write().points.remove(id).is_some())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let mut collection = self.collection.write();
        let before = collection.points.len();
        collection
            .points
            .retain(|_, (_, p)| p.document_id != document_id);
        Ok(before - collection.points.len())
    }

    async fn clear_collection(&self) -> Result<()> {
        let mut collection = self.collection.write();
        collection.points.clear();
        collection.dim = None;
        Ok(())
    }
}

// ============ Object storage ============

/// In-memory [`ObjectStore`].
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn location(&self) -> String {
        "memory".to_string()
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| RagError::NotFound(format!("object {}", key)))
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.objects.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let bytes = self.get(from).await?;
        self.put(to, &bytes).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

// ============ Chat history ============

/// In-memory [`ChatHistoryStore`].
#[derive(Default)]
pub struct InMemoryChatHistory {
    sessions: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryChatHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatHistoryStore for InMemoryChatHistory {
    async fn append_message(&self, message: NewMessage) -> Result<ChatMessage> {
        let mut sessions = self.sessions.write();
        let log = sessions.entry(message.session_id.clone()).or_default();
        let timestamp = next_timestamp(log.last().map(|m| m.timestamp), Utc::now());
        let stored = message.into_message(timestamp);
        log.push(stored.clone());
        Ok(stored)
    }

    async fn get_recent_history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let sessions = self.sessions.read();
        Ok(sessions
            .get(session_id)
            .map(|log| log[log.len().saturating_sub(limit)..].to_vec())
            .unwrap_or_default())
    }

    async fn clear_session(&self, session_id: &str) -> Result<usize> {
        Ok(self
            .sessions
            .write()
            .remove(session_id)
            .map(|log| log.len())
            .unwrap_or(0))
    }
}
