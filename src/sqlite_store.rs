//! SQLite-backed [`MetadataStore`] and [`ChatHistoryStore`].
//!
//! Schema is created by [`crate::migrate::apply_schema`]. Timestamps are
//! stored as fixed-width RFC 3339 UTC strings so they sort lexically.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use rag_harness_core::error::{RagError, Result};
use rag_harness_core::models::{ChatMessage, DocumentMetadata, DocumentStatus, NewMessage};
use rag_harness_core::store::{next_timestamp, ChatHistoryStore, MetadataStore};

fn db_err(e: sqlx::Error) -> RagError {
    RagError::Metadata(e.to_string())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RagError::Metadata(format!("bad timestamp '{}': {}", s, e)))
}

const DOCUMENT_COLUMNS: &str = "document_id, embedding_model, content_hash, project_name, \
     user_id, session_id, filename, file_type, file_size, embedding_provider, ingest_source, \
     source_path, status, created_timestamp, updated_timestamp";

fn row_to_metadata(row: &SqliteRow) -> Result<DocumentMetadata> {
    let file_type: String = row.try_get("file_type").map_err(db_err)?;
    let status: String = row.try_get("status").map_err(db_err)?;
    let file_size: i64 = row.try_get("file_size").map_err(db_err)?;
    let created: String = row.try_get("created_timestamp").map_err(db_err)?;
    let updated: String = row.try_get("updated_timestamp").map_err(db_err)?;
    Ok(DocumentMetadata {
        document_id: row.try_get("document_id").map_err(db_err)?,
        content_hash: row.try_get("content_hash").map_err(db_err)?,
        project_name: row.try_get("project_name").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        session_id: row.try_get("session_id").map_err(db_err)?,
        filename: row.try_get("filename").map_err(db_err)?,
        file_type: file_type.parse()?,
        file_size: file_size.max(0) as u64,
        embedding_provider: row.try_get("embedding_provider").map_err(db_err)?,
        embedding_model: row.try_get("embedding_model").map_err(db_err)?,
        ingest_source: row.try_get("ingest_source").map_err(db_err)?,
        source_path: row.try_get("source_path").map_err(db_err)?,
        status: status.parse()?,
        created_timestamp: parse_ts(&created)?,
        updated_timestamp: parse_ts(&updated)?,
    })
}

// ============ Metadata ============

/// Document metadata rows in the `documents` table.
pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_where(&self, clause: &str, value: &str) -> Result<Vec<DocumentMetadata>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE {} = ? ORDER BY created_timestamp, embedding_model",
            DOCUMENT_COLUMNS, clause
        );
        let rows = sqlx::query(&sql)
            .bind(value)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_metadata).collect()
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn save(&self, m: &DocumentMetadata) -> Result<bool> {
        sqlx::query(
            r#"
            INSERT INTO documents (document_id, embedding_model, content_hash, project_name,
                                   user_id, session_id, filename, file_type, file_size,
                                   embedding_provider, ingest_source, source_path, status,
                                   created_timestamp, updated_timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id, embedding_model) DO UPDATE SET
                content_hash = excluded.content_hash,
                project_name = excluded.project_name,
                user_id = excluded.user_id,
                session_id = excluded.session_id,
                filename = excluded.filename,
                file_type = excluded.file_type,
                file_size = excluded.file_size,
                embedding_provider = excluded.embedding_provider,
                ingest_source = excluded.ingest_source,
                source_path = excluded.source_path,
                status = excluded.status,
                updated_timestamp = excluded.updated_timestamp
            "#,
        )
        .bind(&m.document_id)
        .bind(&m.embedding_model)
        .bind(&m.content_hash)
        .bind(&m.project_name)
        .bind(&m.user_id)
        .bind(&m.session_id)
        .bind(&m.filename)
        .bind(m.file_type.as_str())
        .bind(m.file_size as i64)
        .bind(&m.embedding_provider)
        .bind(&m.ingest_source)
        .bind(&m.source_path)
        .bind(m.status.as_str())
        .bind(format_ts(m.created_timestamp))
        .bind(format_ts(m.updated_timestamp))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(document_id = %m.document_id, model = %m.embedding_model, "metadata saved");
        Ok(true)
    }

    async fn get(&self, document_id: &str) -> Result<Option<DocumentMetadata>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE document_id = ? \
             ORDER BY updated_timestamp DESC LIMIT 1",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_metadata).transpose()
    }

    async fn get_variant(
        &self,
        document_id: &str,
        embedding_model: &str,
    ) -> Result<Option<DocumentMetadata>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE document_id = ? AND embedding_model = ?",
            DOCUMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(document_id)
            .bind(embedding_model)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_metadata).transpose()
    }

    async fn update_status(
        &self,
        document_id: &str,
        embedding_model: &str,
        status: DocumentStatus,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let current: Option<String> = sqlx::query_scalar(
            "SELECT status FROM documents WHERE document_id = ? AND embedding_model = ?",
        )
        .bind(document_id)
        .bind(embedding_model)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(current) = current else {
            return Ok(false);
        };
        let current: DocumentStatus = current.parse()?;
        if !current.can_transition_to(status) {
            warn!(document_id, from = %current, to = %status, "rejected status transition");
            return Ok(false);
        }

        sqlx::query(
            "UPDATE documents SET status = ?, updated_timestamp = ? \
             WHERE document_id = ? AND embedding_model = ?",
        )
        .bind(status.as_str())
        .bind(format_ts(Utc::now()))
        .bind(document_id)
        .bind(embedding_model)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn find_by_content_hash(&self, content_hash: &str) -> Result<Vec<DocumentMetadata>> {
        self.fetch_where("content_hash", content_hash).await
    }

    async fn find_by_project(&self, project_name: &str) -> Result<Vec<DocumentMetadata>> {
        self.fetch_where("project_name", project_name).await
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Vec<DocumentMetadata>> {
        self.fetch_where("session_id", session_id).await
    }

    async fn delete(&self, document_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM documents WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() as usize)
    }
}

// ============ Chat history ============

/// Per-session append-only log in the `chat_messages` table.
pub struct SqliteChatHistory {
    pool: SqlitePool,
}

impl SqliteChatHistory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_message(row: &SqliteRow) -> Result<ChatMessage> {
    let role: String = row.try_get("role").map_err(db_err)?;
    let timestamp: String = row.try_get("timestamp").map_err(db_err)?;
    let metadata: Option<String> = row.try_get("metadata_json").map_err(db_err)?;
    Ok(ChatMessage {
        message_id: row.try_get("message_id").map_err(db_err)?,
        timestamp: parse_ts(&timestamp)?,
        role: role.parse()?,
        content: row.try_get("content").map_err(db_err)?,
        reply_to: row.try_get("reply_to").map_err(db_err)?,
        metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
    })
}

#[async_trait]
impl ChatHistoryStore for SqliteChatHistory {
    async fn append_message(&self, message: NewMessage) -> Result<ChatMessage> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let last: Option<(i64, String)> = sqlx::query_as(
            "SELECT seq, timestamp FROM chat_messages WHERE session_id = ? \
             ORDER BY seq DESC LIMIT 1",
        )
        .bind(&message.session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let (seq, last_ts) = match last {
            Some((seq, ts)) => (seq + 1, Some(parse_ts(&ts)?)),
            None => (0, None),
        };

        let session_id = message.session_id.clone();
        let project_id = message.project_id.clone();
        let user_id = message.user_id.clone();
        let stored = message.into_message(next_timestamp(last_ts, Utc::now()));
        let metadata_json = stored
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO chat_messages (session_id, seq, message_id, project_id, user_id,
                                       timestamp, role, content, reply_to, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session_id)
        .bind(seq)
        .bind(&stored.message_id)
        .bind(&project_id)
        .bind(&user_id)
        .bind(format_ts(stored.timestamp))
        .bind(stored.role.as_str())
        .bind(&stored.content)
        .bind(&stored.reply_to)
        .bind(&metadata_json)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(stored)
    }

    async fn get_recent_history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, timestamp, role, content, reply_to, metadata_json FROM (
                SELECT * FROM chat_messages WHERE session_id = ?
                ORDER BY seq DESC LIMIT ?
            ) ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_message).collect()
    }

    async fn clear_session(&self, session_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() as usize)
    }
}
