//! Content addressing: stable hashes and derived identifiers.
//!
//! A document's identity is a pure function of where it was uploaded and
//! what bytes it contains, so reprocessing the same input always recomputes
//! the same id and lands on the same metadata row.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Hex characters kept from the digest when deriving a document id.
const DOCUMENT_ID_LEN: usize = 16;

/// SHA-256 of raw file bytes as lowercase hex. Empty input is valid.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Derive the document id from project, user, storage key and content hash.
///
/// Uses the `{project}_{user}_{storage_key}_{content_hash}` layout and a
/// 16-hex-char prefix of its digest, matching ids already present in
/// existing metadata tables.
pub fn document_id(project: &str, user: &str, storage_key: &str, hash: &str) -> String {
    let raw = format!("{}_{}_{}_{}", project, user, storage_key, hash);
    let mut digest = content_hash(raw.as_bytes());
    digest.truncate(DOCUMENT_ID_LEN);
    digest
}

/// Deterministic vector point id for one chunk of one model's embedding.
///
/// Re-upserting the same chunk overwrites its point; the same chunk under a
/// different model gets a different point so both sets coexist.
pub fn point_id(document_id: &str, embedding_model: &str, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", document_id, embedding_model, chunk_index).as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Object storage key: `<prefix>/<project>/<filename>`.
pub fn storage_key(prefix: &str, project: &str, filename: &str) -> String {
    format!(
        "{}/{}/{}",
        prefix.trim_end_matches('/'),
        project.trim_matches('/'),
        filename.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_known_value() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash(b"abc").len(), 64);
    }

    #[test]
    fn test_document_id_deterministic() {
        let a = document_id("proj", "alice", "temp/proj/a.txt", "abc");
        let b = document_id("proj", "alice", "temp/proj/a.txt", "abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), DOCUMENT_ID_LEN);
    }

    #[test]
    fn test_document_id_changes_with_inputs() {
        let base = document_id("proj", "alice", "k", "h1");
        assert_ne!(base, document_id("proj", "alice", "k", "h2"));
        assert_ne!(base, document_id("proj", "bob", "k", "h1"));
        assert_ne!(base, document_id("other", "alice", "k", "h1"));
    }

    #[test]
    fn test_point_id_is_uuid_and_model_scoped() {
        let a = point_id("doc", "titan", 0);
        assert!(Uuid::parse_str(&a).is_ok());
        assert_eq!(a, point_id("doc", "titan", 0));
        assert_ne!(a, point_id("doc", "titan", 1));
        assert_ne!(a, point_id("doc", "cohere", 0));
    }

    #[test]
    fn test_storage_key_trims_slashes() {
        assert_eq!(
            storage_key("project-data/uploads/temp/", "acme", "a.pdf"),
            "project-data/uploads/temp/acme/a.pdf"
        );
    }
}
