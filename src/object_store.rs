//! [`ObjectStore`] backends: a local directory and S3.
//!
//! | Backend | Config | Keys map to |
//! |---------|--------|-------------|
//! | [`LocalObjectStore`] | `storage.root` | files below the root directory |
//! | [`S3ObjectStore`] | `storage.bucket`, `storage.region`, `storage.endpoint_url` | objects in the bucket |
//!
//! S3 requests are signed with SigV4 (see [`crate::aws`]). With a custom
//! `endpoint_url` (MinIO, LocalStack) path-style addressing is used.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Method, StatusCode};
use tracing::debug;

use rag_harness_core::error::{RagError, Result};
use rag_harness_core::store::ObjectStore;

use crate::aws::{self, AwsCredentials, SigV4Request};
use crate::config::{StorageBackend, StorageConfig};

/// Build the configured backend.
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.backend {
        StorageBackend::Local => Ok(Arc::new(LocalObjectStore::new(&config.root))),
        StorageBackend::S3 => {
            let bucket = config
                .bucket
                .clone()
                .ok_or_else(|| RagError::Validation("storage.bucket is not set".to_string()))?;
            Ok(Arc::new(S3ObjectStore::new(
                bucket,
                config.region.clone(),
                config.endpoint_url.clone(),
                AwsCredentials::from_env()?,
            )))
        }
    }
}

// ============ Local directory ============

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key below the root, rejecting absolute and `..` paths.
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if key.is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(RagError::Validation(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(rel))
    }
}

fn io_err(key: &str, e: std::io::Error) -> RagError {
    if e.kind() == std::io::ErrorKind::NotFound {
        RagError::NotFound(format!("object {}", key))
    } else {
        RagError::Storage(format!("{}: {}", key, e))
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| RagError::Storage(format!("{}: {}", parent.display(), e)))?;
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path).await.map_err(|e| io_err(key, e))
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        ensure_parent(&path).await?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_err(key, e))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let src = self.path_for(from)?;
        let dst = self.path_for(to)?;
        ensure_parent(&dst).await?;
        tokio::fs::copy(&src, &dst)
            .await
            .map_err(|e| io_err(from, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(key, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_err(key, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in walkdir::WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| RagError::Storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

// ============ S3 ============

pub struct S3ObjectStore {
    client: reqwest::Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
}

/// Where a request goes: the URL, the signed host and the raw path.
struct Target {
    url: String,
    host: String,
    path: String,
}

impl S3ObjectStore {
    pub fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
        creds: AwsCredentials,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            bucket,
            region,
            endpoint_url,
            creds,
        }
    }

    fn target(&self, key: &str) -> Target {
        match &self.endpoint_url {
            Some(endpoint) => {
                let base = endpoint.trim_end_matches('/');
                let host = base
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .to_string();
                let path = if key.is_empty() {
                    format!("/{}", self.bucket)
                } else {
                    format!("/{}/{}", self.bucket, key)
                };
                Target {
                    url: format!("{}{}", base, aws::encode_path(&path)),
                    host,
                    path,
                }
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let path = format!("/{}", key);
                Target {
                    url: format!("https://{}{}", host, aws::encode_path(&path)),
                    host,
                    path,
                }
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(String, String)],
        body: Vec<u8>,
        extra_headers: &[(String, String)],
    ) -> Result<reqwest::Response> {
        let target = self.target(key);
        let headers = aws::sign(
            &SigV4Request {
                method: method.as_str(),
                host: &target.host,
                path: &target.path,
                query,
                payload: &body,
                service: "s3",
                region: &self.region,
                extra_headers,
            },
            &self.creds,
            Utc::now(),
        );

        let url = if query.is_empty() {
            target.url
        } else {
            format!("{}?{}", target.url, aws::canonical_query(query))
        };
        let mut req = self.client.request(method.clone(), &url);
        for (k, v) in &headers {
            req = req.header(k.as_str(), v.as_str());
        }
        if !body.is_empty() {
            req = req.body(body);
        }
        debug!(%method, key, "s3 request");
        req.send()
            .await
            .map_err(|e| RagError::Storage(format!("s3://{}/{}: {}", self.bucket, key, e)))
    }

    async fn check(&self, resp: reqwest::Response, op: &str, key: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RagError::NotFound(format!("s3://{}/{}", self.bucket, key)));
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RagError::Storage(format!(
            "S3 {} failed (HTTP {}) for key '{}': {}",
            op,
            status,
            key,
            body.chars().take(500).collect::<String>()
        )))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn location(&self) -> String {
        self.bucket.clone()
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self.send(Method::GET, key, &[], Vec::new(), &[]).await?;
        let resp = self.check(resp, "GetObject", key).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| RagError::Storage(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let resp = self
            .send(Method::PUT, key, &[], bytes.to_vec(), &[])
            .await?;
        self.check(resp, "PutObject", key).await?;
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let source = aws::encode_path(&format!("/{}/{}", self.bucket, from));
        let extra = [("x-amz-copy-source".to_string(), source)];
        let resp = self.send(Method::PUT, to, &[], Vec::new(), &extra).await?;
        self.check(resp, "CopyObject", from).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self.send(Method::DELETE, key, &[], Vec::new(), &[]).await?;
        match self.check(resp, "DeleteObject", key).await {
            Ok(_) | Err(RagError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let resp = self.send(Method::HEAD, key, &[], Vec::new(), &[]).await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(RagError::Storage(format!(
                "S3 HeadObject failed (HTTP {}) for key '{}'",
                s, key
            ))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
            ];
            if !prefix.is_empty() {
                query.push(("prefix".to_string(), prefix.to_string()));
            }
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token".to_string(), token.clone()));
            }
            let resp = self.send(Method::GET, "", &query, Vec::new(), &[]).await?;
            let resp = self.check(resp, "ListObjectsV2", prefix).await?;
            let xml = resp
                .text()
                .await
                .map_err(|e| RagError::Storage(e.to_string()))?;
            let (batch, truncated, next) = parse_list_objects_response(&xml);
            keys.extend(batch);
            if truncated && next.is_some() {
                continuation_token = next;
            } else {
                break;
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Keys, truncation flag and continuation token of a `ListObjectsV2` page.
fn parse_list_objects_response(xml: &str) -> (Vec<String>, bool, Option<String>) {
    let truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken");

    let mut keys = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        if let Some(key) = extract_xml_value(block, "Key") {
            if !key.is_empty() && !key.ends_with('/') {
                keys.push(key.replace("&amp;", "&"));
            }
        }
        remaining = &remaining[block_start + end + "</Contents>".len()..];
    }
    (keys, truncated, next_token)
}

/// Text content of a simple, non-nested XML tag.
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let value_start = xml.find(&open)? + open.len();
    let end = xml[value_start..].find(&close)?;
    Some(xml[value_start..value_start + end].to_string())
}
