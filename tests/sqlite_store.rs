//! SQLite metadata and chat history stores against a temporary database.

use chrono::{Duration, Utc};
use serde_json::json;
use tempfile::TempDir;

use rag_harness::sqlite_store::{SqliteChatHistory, SqliteMetadataStore};
use rag_harness::{db, migrate};
use rag_harness_core::models::{
    DocumentMetadata, DocumentStatus, FileType, NewMessage, Role, MAX_MESSAGE_CHARS,
};
use rag_harness_core::store::{ChatHistoryStore, MetadataStore};

async fn pool(tmp: &TempDir) -> sqlx::SqlitePool {
    let pool = db::connect_path(&tmp.path().join("data/rag.sqlite"))
        .await
        .unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    pool
}

fn metadata(id: &str, hash: &str, model: &str) -> DocumentMetadata {
    let now = Utc::now();
    DocumentMetadata {
        document_id: id.to_string(),
        content_hash: hash.to_string(),
        project_name: "acme".to_string(),
        user_id: "alice".to_string(),
        session_id: "s1".to_string(),
        filename: "report.pdf".to_string(),
        file_type: FileType::Pdf,
        file_size: 2048,
        embedding_provider: "bedrock".to_string(),
        embedding_model: model.to_string(),
        ingest_source: "user_upload".to_string(),
        source_path: "UI".to_string(),
        status: DocumentStatus::Uploaded,
        created_timestamp: now - Duration::minutes(5),
        updated_timestamp: now,
    }
}

#[tokio::test]
async fn test_schema_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let pool = pool(&tmp).await;
    migrate::apply_schema(&pool).await.unwrap();
}

#[tokio::test]
async fn test_metadata_round_trip_and_hash_lookup() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteMetadataStore::new(pool(&tmp).await);

    let m = metadata("doc1", "hash-a", "titan-v2");
    assert!(store.save(&m).await.unwrap());
    store
        .save(&metadata("doc1", "hash-a", "titan-v1"))
        .await
        .unwrap();
    store
        .save(&metadata("doc2", "hash-b", "titan-v2"))
        .await
        .unwrap();

    let loaded = store.get_variant("doc1", "titan-v2").await.unwrap().unwrap();
    assert_eq!(loaded.filename, "report.pdf");
    assert_eq!(loaded.file_type, FileType::Pdf);
    assert_eq!(loaded.file_size, 2048);
    assert_eq!(loaded.status, DocumentStatus::Uploaded);

    let by_hash = store.find_by_content_hash("hash-a").await.unwrap();
    assert_eq!(by_hash.len(), 2);
    assert!(by_hash.iter().all(|m| m.document_id == "doc1"));
    assert!(store.find_by_content_hash("nope").await.unwrap().is_empty());
    assert_eq!(store.find_by_project("acme").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_status_only_moves_forward() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteMetadataStore::new(pool(&tmp).await);
    store
        .save(&metadata("doc1", "hash-a", "titan-v2"))
        .await
        .unwrap();

    assert!(store
        .update_status("doc1", "titan-v2", DocumentStatus::Ingested)
        .await
        .unwrap());
    // Terminal state cannot go back to uploaded.
    assert!(!store
        .update_status("doc1", "titan-v2", DocumentStatus::Uploaded)
        .await
        .unwrap());
    // Missing embeddings are always reportable.
    assert!(store
        .update_status("doc1", "titan-v2", DocumentStatus::EmbeddingsMissing)
        .await
        .unwrap());
    assert!(store
        .update_status("doc1", "titan-v2", DocumentStatus::Reprocessing)
        .await
        .unwrap());
    assert!(!store
        .update_status("doc1", "other-model", DocumentStatus::Ingested)
        .await
        .unwrap());

    let row = store.get_variant("doc1", "titan-v2").await.unwrap().unwrap();
    assert_eq!(row.status, DocumentStatus::Reprocessing);
}

#[tokio::test]
async fn test_project_summary_and_delete() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteMetadataStore::new(pool(&tmp).await);
    store
        .save(&metadata("doc1", "hash-a", "titan-v2"))
        .await
        .unwrap();
    store
        .save(&metadata("doc2", "hash-b", "titan-v2"))
        .await
        .unwrap();
    store
        .update_status("doc2", "titan-v2", DocumentStatus::Ingested)
        .await
        .unwrap();

    let summary = store.project_summary("acme").await.unwrap();
    assert_eq!(summary.total_documents, 2);
    assert_eq!(summary.total_size, 4096);
    assert_eq!(summary.status_breakdown.get("ingested"), Some(&1));
    assert_eq!(summary.status_breakdown.get("uploaded"), Some(&1));

    assert_eq!(store.delete("doc1").await.unwrap(), 1);
    assert!(store.get("doc1").await.unwrap().is_none());
    assert_eq!(store.delete("doc1").await.unwrap(), 0);
}

#[tokio::test]
async fn test_history_returns_newest_in_order() {
    let tmp = TempDir::new().unwrap();
    let history = SqliteChatHistory::new(pool(&tmp).await);

    let first = history
        .append_message(NewMessage::new("acme", "alice", "s1", Role::User, "m1"))
        .await
        .unwrap();
    history
        .append_message(
            NewMessage::new("acme", "alice", "s1", Role::Assistant, "m2")
                .reply_to(first.message_id.clone())
                .metadata(json!({ "action": "rag_query_complete" })),
        )
        .await
        .unwrap();
    history
        .append_message(NewMessage::new("acme", "alice", "s1", Role::User, "m3"))
        .await
        .unwrap();
    history
        .append_message(NewMessage::new("acme", "bob", "s2", Role::User, "other"))
        .await
        .unwrap();

    let all = history.get_recent_history("s1", 10).await.unwrap();
    let contents: Vec<&str> = all.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m1", "m2", "m3"]);
    assert!(all.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    assert_eq!(all[1].reply_to.as_deref(), Some(first.message_id.as_str()));
    assert_eq!(all[1].metadata.as_ref().unwrap()["action"], "rag_query_complete");

    let recent = history.get_recent_history("s1", 2).await.unwrap();
    let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m2", "m3"]);

    assert_eq!(history.clear_session("s1").await.unwrap(), 3);
    assert!(history.get_recent_history("s1", 10).await.unwrap().is_empty());
    assert_eq!(history.get_recent_history("s2", 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_long_messages_are_truncated() {
    let tmp = TempDir::new().unwrap();
    let history = SqliteChatHistory::new(pool(&tmp).await);
    let long = "x".repeat(MAX_MESSAGE_CHARS + 50);

    let stored = history
        .append_message(NewMessage::new("acme", "alice", "s1", Role::System, long))
        .await
        .unwrap();
    assert_eq!(stored.content.chars().count(), MAX_MESSAGE_CHARS);

    let loaded = history.get_recent_history("s1", 1).await.unwrap();
    assert_eq!(loaded[0].content.chars().count(), MAX_MESSAGE_CHARS);
}
