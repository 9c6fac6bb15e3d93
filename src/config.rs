//! TOML configuration.
//!
//! Every section except `[db]` is optional; missing keys take the defaults
//! below. [`load_config`] is the single normalization step: downstream code
//! receives fully-typed, validated values.
//!
//! ```toml
//! [db]
//! path = "./data/rag.sqlite"
//!
//! [storage]
//! backend = "local"          # local | s3
//! root = "./data/objects"
//!
//! [vector_index]
//! backend = "qdrant"         # memory | qdrant
//! url = "http://localhost:6333"
//!
//! [embedding]
//! provider = "bedrock"       # disabled | bedrock | openai | ollama
//! model = "amazon.titan-embed-text-v2:0"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use rag_harness_core::context::ContextBudget;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vector_index: VectorIndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

// ============ Storage ============

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the local backend.
    pub root: PathBuf,
    pub bucket: Option<String>,
    pub region: String,
    /// Custom endpoint for S3-compatible services.
    pub endpoint_url: Option<String>,
    pub temp_prefix: String,
    pub documents_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            root: PathBuf::from("./data/objects"),
            bucket: None,
            region: default_region(),
            endpoint_url: None,
            temp_prefix: "project-data/uploads/temp".to_string(),
            documents_prefix: "project-data/documents".to_string(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

// ============ Vector index ============

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// Process-local index; contents do not survive the process.
    #[default]
    Memory,
    Qdrant,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VectorIndexConfig {
    pub backend: VectorBackend,
    pub url: Option<String>,
    pub collection: String,
    /// Environment variable holding the Qdrant API key, if any.
    pub api_key_env: Option<String>,
    pub distance: String,
    /// Store chunk text in the point payload.
    pub store_text: bool,
    /// Drop and recreate a collection whose dimension differs from the
    /// embedding model. Destroys every vector in the collection.
    pub auto_fix_dimension_mismatch: bool,
    pub timeout_secs: u64,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            backend: VectorBackend::Memory,
            url: None,
            collection: "documents".to_string(),
            api_key_env: None,
            distance: "Cosine".to_string(),
            store_text: true,
            auto_fix_dimension_mismatch: false,
            timeout_secs: 30,
        }
    }
}

// ============ Models ============

/// The closed set of model providers.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Disabled,
    Bedrock,
    Openai,
    Ollama,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Disabled => "disabled",
            ProviderKind::Bedrock => "bedrock",
            ProviderKind::Openai => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub region: String,
    /// Base URL override (OpenAI-compatible gateways, Ollama host).
    pub url: Option<String>,
    pub api_key_env: Option<String>,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub price_per_1k_input_tokens: f64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Disabled,
            model: "amazon.titan-embed-text-v2:0".to_string(),
            region: default_region(),
            url: None,
            api_key_env: None,
            max_retries: 3,
            timeout_secs: 30,
            price_per_1k_input_tokens: 0.0,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != ProviderKind::Disabled
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub region: String,
    pub url: Option<String>,
    pub api_key_env: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub price_per_1k_input_tokens: f64,
    pub price_per_1k_output_tokens: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Disabled,
            model: "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            region: default_region(),
            url: None,
            api_key_env: None,
            max_tokens: 900,
            temperature: 0.7,
            max_retries: 3,
            timeout_secs: 60,
            price_per_1k_input_tokens: 0.0,
            price_per_1k_output_tokens: 0.0,
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != ProviderKind::Disabled
    }
}

// ============ Pipelines ============

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size_words: rag_harness_core::chunk::DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub rerank: bool,
    pub llm_rerank: bool,
    /// Over-fetch factor without reranking.
    pub fetch_multiplier: usize,
    /// Over-fetch factor with reranking.
    pub rerank_fetch_multiplier: usize,
    /// Chat messages read per query.
    pub history_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            rerank: true,
            llm_rerank: false,
            fetch_multiplier: 2,
            rerank_fetch_multiplier: 4,
            history_limit: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ContextConfig {
    pub max_chars: usize,
    pub max_source_chars: usize,
    pub reserve_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        let budget = ContextBudget::default();
        Self {
            max_chars: budget.max_chars,
            max_source_chars: budget.max_source_chars,
            reserve_chars: budget.reserve_chars,
        }
    }
}

impl ContextConfig {
    pub fn budget(&self) -> ContextBudget {
        ContextBudget {
            max_chars: self.max_chars,
            max_source_chars: self.max_source_chars,
            reserve_chars: self.reserve_chars,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestionConfig {
    /// Lowercase extensions including the dot.
    pub allowed_extensions: Vec<String>,
    pub max_file_size_mb: u64,
    pub default_ingest_source: String,
    pub default_source_path: String,
    /// Confirm an existing record's vectors before skipping it.
    pub verify_embeddings: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: vec![".pdf".into(), ".docx".into(), ".txt".into()],
            max_file_size_mb: 25,
            default_ingest_source: "user_upload".to_string(),
            default_source_path: "UI".to_string(),
            verify_embeddings: true,
        }
    }
}

impl IngestionConfig {
    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

// ============ Loading ============

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size_words == 0 {
        anyhow::bail!("chunking.chunk_size_words must be > 0");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.fetch_multiplier < 1 || config.retrieval.rerank_fetch_multiplier < 1 {
        anyhow::bail!("retrieval fetch multipliers must be >= 1");
    }

    if config.context.max_chars <= config.context.reserve_chars {
        anyhow::bail!("context.max_chars must be greater than context.reserve_chars");
    }
    if config.context.max_source_chars == 0 {
        anyhow::bail!("context.max_source_chars must be > 0");
    }

    if config.storage.backend == StorageBackend::S3 && config.storage.bucket.is_none() {
        anyhow::bail!("storage.bucket must be set when storage.backend is 's3'");
    }

    if config.vector_index.backend == VectorBackend::Qdrant && config.vector_index.url.is_none() {
        anyhow::bail!("vector_index.url must be set when vector_index.backend is 'qdrant'");
    }

    if config.embedding.is_enabled() && config.embedding.model.trim().is_empty() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider.as_str()
        );
    }
    if config.generation.is_enabled() && config.generation.model.trim().is_empty() {
        anyhow::bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider.as_str()
        );
    }

    if config.ingestion.allowed_extensions.is_empty() {
        anyhow::bail!("ingestion.allowed_extensions must not be empty");
    }
    config.ingestion.allowed_extensions = config
        .ingestion
        .allowed_extensions
        .iter()
        .map(|ext| {
            let ext = ext.trim().to_lowercase();
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{ext}")
            }
        })
        .collect();

    Ok(config)
}
