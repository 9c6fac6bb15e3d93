//! Qdrant-backed [`VectorIndex`] over the HTTP REST API.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | describe collection | `GET /collections/{c}` |
//! | create collection | `PUT /collections/{c}` |
//! | upsert | `PUT /collections/{c}/points?wait=true` |
//! | search | `POST /collections/{c}/points/search` |
//! | count | `POST /collections/{c}/points/count` |
//! | delete | `POST /collections/{c}/points/delete?wait=true` |
//! | clear | `DELETE /collections/{c}` |
//!
//! [`FilterSet`] buckets map directly onto Qdrant's `must` / `should` /
//! `must_not` clauses. The collection dimension is cached after the first
//! describe so searches can be checked without a round trip.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use rag_harness_core::error::{RagError, Result};
use rag_harness_core::filter::{Condition, FilterSet, Predicate, KEY_DOCUMENT_ID, KEY_EMBEDDING_MODEL};
use rag_harness_core::models::{ChunkPayload, ScoredPoint, VectorRecord};
use rag_harness_core::store::{valid_records, CollectionState, VectorIndex};

use crate::config::VectorIndexConfig;

fn index_err(e: impl std::fmt::Display) -> RagError {
    RagError::Index(e.to_string())
}

pub struct QdrantIndex {
    http: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    distance: String,
    store_text: bool,
    auto_fix_dimension_mismatch: bool,
    dim: RwLock<Option<usize>>,
}

impl QdrantIndex {
    pub fn from_config(config: &VectorIndexConfig) -> Result<Self> {
        let base_url = config
            .url
            .as_deref()
            .ok_or_else(|| RagError::Validation("vector_index.url is not set".to_string()))?
            .trim_end_matches('/')
            .to_string();
        let api_key = match &config.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                RagError::Validation(format!("{} environment variable not set", var))
            })?),
            None => None,
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(index_err)?;
        Ok(Self {
            http,
            base_url,
            collection: config.collection.clone(),
            api_key,
            distance: config.distance.clone(),
            store_text: config.store_text,
            auto_fix_dimension_mismatch: config.auto_fix_dimension_mismatch,
            dim: RwLock::new(None),
        })
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    /// Send a request and return `(status, json body)`; transport errors are
    /// index errors, non-2xx statuses are left to the caller.
    async fn send(
        &self,
        method: reqwest::Method,
        suffix: &str,
        body: Option<&Value>,
    ) -> Result<(reqwest::StatusCode, Value)> {
        let mut req = self.http.request(method, self.url(suffix));
        if let Some(ref key) = self.api_key {
            req = req.header("api-key", key);
        }
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(index_err)?;
        let status = resp.status();
        let text = resp.text().await.map_err(index_err)?;
        let json = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok((status, json))
    }

    async fn send_ok(
        &self,
        method: reqwest::Method,
        suffix: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let (status, json) = self.send(method, suffix, body).await?;
        if !status.is_success() {
            return Err(RagError::Index(format!(
                "Qdrant {} on {}: {}",
                status, self.collection, json
            )));
        }
        Ok(json)
    }

    /// Dimension of the live collection, or `None` when it does not exist.
    async fn describe(&self) -> Result<Option<usize>> {
        let (status, json) = self.send(reqwest::Method::GET, "", None).await?;
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(RagError::Index(format!("Qdrant describe {}: {}", status, json)));
        }
        parse_collection_dim(&json)
            .map(Some)
            .ok_or_else(|| RagError::Index("collection info has no vector size".to_string()))
    }

    async fn create(&self, dim: usize) -> Result<()> {
        let body = json!({ "vectors": { "size": dim, "distance": self.distance } });
        self.send_ok(reqwest::Method::PUT, "", Some(&body)).await?;
        *self.dim.write().await = Some(dim);
        Ok(())
    }

    async fn known_dim(&self) -> Result<Option<usize>> {
        if let Some(dim) = *self.dim.read().await {
            return Ok(Some(dim));
        }
        let dim = self.describe().await?;
        *self.dim.write().await = dim;
        Ok(dim)
    }

    async fn count(&self, filter: Value) -> Result<usize> {
        let body = json!({ "filter": filter, "exact": true });
        let json = self
            .send_ok(reqwest::Method::POST, "/points/count", Some(&body))
            .await?;
        json.pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .ok_or_else(|| RagError::Index("count response missing result.count".to_string()))
    }
}

// ============ Wire shapes ============

fn condition_json(p: &Predicate) -> Value {
    match &p.condition {
        Condition::Match { value } => json!({ "key": p.key, "match": { "value": value } }),
        Condition::Range { gte, lte } => {
            let mut range = serde_json::Map::new();
            if let Some(g) = gte {
                range.insert("gte".into(), json!(g.to_rfc3339()));
            }
            if let Some(l) = lte {
                range.insert("lte".into(), json!(l.to_rfc3339()));
            }
            json!({ "key": p.key, "range": range })
        }
    }
}

/// Qdrant filter object for a [`FilterSet`]. Empty buckets are omitted.
pub fn filter_to_qdrant(filters: &FilterSet) -> Value {
    let mut out = serde_json::Map::new();
    for (name, bucket) in [
        ("must", &filters.must),
        ("should", &filters.should),
        ("must_not", &filters.must_not),
    ] {
        if !bucket.is_empty() {
            out.insert(
                name.to_string(),
                Value::Array(bucket.iter().map(condition_json).collect()),
            );
        }
    }
    Value::Object(out)
}

fn document_filter(document_id: &str, embedding_model: Option<&str>) -> Value {
    let mut filters = FilterSet::default();
    filters.must.push(Predicate::matching(KEY_DOCUMENT_ID, document_id));
    if let Some(model) = embedding_model {
        filters.must.push(Predicate::matching(KEY_EMBEDDING_MODEL, model));
    }
    filter_to_qdrant(&filters)
}

/// Vector size from a collection info response. Handles both the single
/// unnamed vector layout and a map of named vectors (first entry).
pub fn parse_collection_dim(json: &Value) -> Option<usize> {
    let vectors = json.pointer("/result/config/params/vectors")?;
    if let Some(size) = vectors.get("size").and_then(Value::as_u64) {
        return Some(size as usize);
    }
    vectors
        .as_object()?
        .values()
        .find_map(|v| v.get("size").and_then(Value::as_u64))
        .map(|s| s as usize)
}

/// Hits from a search response. Points whose payload does not parse are
/// skipped with a warning.
pub fn parse_search_response(json: &Value) -> Result<Vec<ScoredPoint>> {
    let hits = json
        .get("result")
        .and_then(Value::as_array)
        .ok_or_else(|| RagError::Index("search response missing result".to_string()))?;
    let mut out = Vec::with_capacity(hits.len());
    for hit in hits {
        let id = match hit.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => continue,
        };
        let score = hit.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
        let Some(raw) = hit.get("payload") else {
            warn!(id = %id, "search hit without payload");
            continue;
        };
        match serde_json::from_value::<ChunkPayload>(raw.clone()) {
            Ok(payload) => out.push(ScoredPoint { id, score, payload }),
            Err(e) => warn!(id = %id, error = %e, "skipping hit with unreadable payload"),
        }
    }
    Ok(out)
}

fn point_json(record: &VectorRecord, store_text: bool) -> Result<Option<Value>> {
    let Some(payload) = &record.payload else {
        return Ok(None);
    };
    let mut payload = payload.clone();
    if !store_text {
        payload.text = None;
    }
    Ok(Some(json!({
        "id": record.id,
        "vector": record.vector,
        "payload": serde_json::to_value(&payload)?,
    })))
}

// ============ VectorIndex ============

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn ensure_collection(&self, required_dim: usize) -> Result<CollectionState> {
        match self.describe().await? {
            None => {
                self.create(required_dim).await?;
                info!(collection = %self.collection, dim = required_dim, "created Qdrant collection");
                Ok(CollectionState::Created)
            }
            Some(dim) if dim == required_dim => {
                *self.dim.write().await = Some(dim);
                Ok(CollectionState::Existing)
            }
            Some(dim) if self.auto_fix_dimension_mismatch => {
                warn!(
                    collection = %self.collection,
                    from = dim,
                    to = required_dim,
                    "recreating Qdrant collection with new dimension"
                );
                self.send_ok(reqwest::Method::DELETE, "", None).await?;
                self.create(required_dim).await?;
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

        let mut points = Vec::with_capacity(valid.len());
        for record in &valid {
            if let Some(point) = point_json(record, self.store_text)? {
                points.push(point);
            }
        }
        let count = points.len();
        let body = json!({ "points": points });
        self.send_ok(reqwest::Method::PUT, "/points?wait=true", Some(&body))
            .await?;
        debug!(collection = %self.collection, points = count, "upserted points");
        Ok(count)
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&FilterSet>,
    ) -> Result<Vec<ScoredPoint>> {
        let Some(dim) = self.known_dim().await? else {
            return Ok(Vec::new());
        };
        if query.len() != dim {
            return Err(RagError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }

        let mut body = json!({
            "vector": query,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = filter_to_qdrant(f);
        }
        let json = self
            .send_ok(reqwest::Method::POST, "/points/search", Some(&body))
            .await?;
        parse_search_response(&json)
    }

    async fn count_for_document(
        &self,
        document_id: &str,
        embedding_model: Option<&str>,
    ) -> Result<usize> {
        if self.known_dim().await?.is_none() {
            return Ok(0);
        }
        self.count(document_filter(document_id, embedding_model)).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        if self.known_dim().await?.is_none() {
            return Ok(false);
        }
        let body = json!({ "points": [id] });
        self.send_ok(reqwest::Method::POST, "/points/delete?wait=true", Some(&body))
            .await?;
        Ok(true)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        if self.known_dim().await?.is_none() {
            return Ok(0);
        }
        let filter = document_filter(document_id, None);
        let n = self.count(filter.clone()).await?;
        if n > 0 {
            let body = json!({ "filter": filter });
            self.send_ok(reqwest::Method::POST, "/points/delete?wait=true", Some(&body))
                .await?;
        }
        Ok(n)
    }

    async fn clear_collection(&self) -> Result<()> {
        let (status, json) = self.send(reqwest::Method::DELETE, "", None).await?;
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(RagError::Index(format!("Qdrant delete {}: {}", status, json)));
        }
        *self.dim.write().await = None;
        info!(collection = %self.collection, "cleared Qdrant collection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rag_harness_core::filter::{KEY_CREATED_AT, KEY_DOC_TYPE, KEY_PROJECT};
    use rag_harness_core::models::FileType;

    #[test]
    fn test_filter_translation() {
        let since = Utc.with_ymd_and_hms(2024, 6, 8, 0, 0, 0).unwrap();
        let mut f = FilterSet::default();
        f.must.push(Predicate::matching(KEY_PROJECT, "acme"));
        f.should.push(Predicate::range(KEY_CREATED_AT, Some(since), None));
        f.must_not.push(Predicate::matching(KEY_DOC_TYPE, "policy"));

        let q = filter_to_qdrant(&f);
        assert_eq!(q["must"][0], json!({ "key": "project_name", "match": { "value": "acme" } }));
        assert_eq!(q["should"][0]["range"]["gte"], "2024-06-08T00:00:00+00:00");
        assert!(q["should"][0]["range"].get("lte").is_none());
        assert_eq!(q["must_not"][0]["match"]["value"], "policy");
    }

    #[test]
    fn test_empty_buckets_omitted() {
        let q = filter_to_qdrant(&FilterSet::default());
        assert_eq!(q, json!({}));
        let q = document_filter("doc1", Some("m"));
        assert_eq!(q["must"].as_array().unwrap().len(), 2);
        assert!(q.get("should").is_none());
    }

    #[test]
    fn test_parse_collection_dim() {
        let single = json!({ "result": { "config": { "params": { "vectors": { "size": 1024, "distance": "Cosine" } } } } });
        assert_eq!(parse_collection_dim(&single), Some(1024));
        let named = json!({ "result": { "config": { "params": { "vectors": { "text": { "size": 384 } } } } } });
        assert_eq!(parse_collection_dim(&named), Some(384));
        assert_eq!(parse_collection_dim(&json!({})), None);
    }

    #[test]
    fn test_parse_search_response_skips_bad_payloads() {
        let good = json!({
            "document_id": "d", "chunk_id": 2, "project_name": "p", "user_id": "u",
            "session_id": "s", "filename": "f.pdf", "file_type": "pdf",
            "embedding_model": "m", "content_tags": [], "ingest_source": "user_upload",
            "created_at": "2024-01-01T00:00:00Z", "text": "hello"
        });
        let resp = json!({ "result": [
            { "id": "a", "score": 0.9, "payload": good },
            { "id": 7, "score": 0.5, "payload": { "nope": true } },
            { "id": "c", "score": 0.1 }
        ]});
        let hits = parse_search_response(&resp).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].payload.chunk_id, 2);
        assert_eq!(hits[0].payload.file_type, FileType::Pdf);
        assert!(parse_search_response(&json!({ "status": "error" })).is_err());
    }

    #[test]
    fn test_point_json_strips_text_when_disabled() {
        let payload: ChunkPayload = serde_json::from_value(json!({
            "document_id": "d", "chunk_id": 0, "project_name": "p", "user_id": "u",
            "session_id": "s", "filename": "f.txt", "file_type": "txt",
            "embedding_model": "m", "ingest_source": "api",
            "created_at": "2024-01-01T00:00:00Z", "text": "secret"
        }))
        .unwrap();
        let record = VectorRecord {
            id: "x".into(),
            vector: vec![1.0],
            payload: Some(payload),
        };
        let with = point_json(&record, true).unwrap().unwrap();
        assert_eq!(with["payload"]["text"], "secret");
        let without = point_json(&record, false).unwrap().unwrap();
        assert!(without["payload"].get("text").is_none());
    }
}
