//! Backend wiring: builds every collaborator named in [`Config`] once, at
//! the entry point, and hands them to the pipelines as trait objects.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use rag_harness_core::model::{Embedder, Generator};
use rag_harness_core::store::memory::InMemoryVectorIndex;
use rag_harness_core::store::{ChatHistoryStore, MetadataStore, ObjectStore, VectorIndex};

use crate::config::{Config, VectorBackend};
use crate::db;
use crate::ingest::{IngestSettings, IngestionPipeline};
use crate::object_store;
use crate::providers::ModelProvider;
use crate::qdrant::QdrantIndex;
use crate::rag::{QuerySettings, RagPipeline};
use crate::sqlite_store::{SqliteChatHistory, SqliteMetadataStore};

pub struct App {
    pub config: Config,
    pub metadata: Arc<dyn MetadataStore>,
    pub history: Arc<dyn ChatHistoryStore>,
    pub index: Arc<dyn VectorIndex>,
    pub objects: Arc<dyn ObjectStore>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Option<Arc<dyn Generator>>,
}

impl App {
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;

        let index: Arc<dyn VectorIndex> = match config.vector_index.backend {
            VectorBackend::Memory => {
                warn!("using in-memory vector index; vectors are lost when the process exits");
                Arc::new(
                    InMemoryVectorIndex::new()
                        .with_auto_fix(config.vector_index.auto_fix_dimension_mismatch),
                )
            }
            VectorBackend::Qdrant => Arc::new(
                QdrantIndex::from_config(&config.vector_index)
                    .context("Failed to configure Qdrant")?,
            ),
        };

        let objects = object_store::from_config(&config.storage)?;

        let embedder: Arc<dyn Embedder> = Arc::new(
            ModelProvider::for_embedding(&config.embedding)
                .context("Failed to configure embedding provider")?,
        );
        let generator: Option<Arc<dyn Generator>> = if config.generation.is_enabled() {
            Some(Arc::new(
                ModelProvider::for_generation(&config.generation)
                    .context("Failed to configure generation provider")?,
            ))
        } else {
            None
        };

        info!(
            embedding = config.embedding.provider.as_str(),
            generation = config.generation.provider.as_str(),
            storage = %objects.location(),
            "backends ready"
        );

        Ok(Self {
            config: config.clone(),
            metadata: Arc::new(SqliteMetadataStore::new(pool.clone())),
            history: Arc::new(SqliteChatHistory::new(pool)),
            index,
            objects,
            embedder,
            generator,
        })
    }

    pub fn ingestion(&self) -> IngestionPipeline {
        IngestionPipeline::new(
            self.metadata.clone(),
            self.index.clone(),
            self.objects.clone(),
            self.embedder.clone(),
            IngestSettings::from_config(&self.config),
        )
        .with_history(self.history.clone())
    }

    pub fn rag(&self) -> RagPipeline {
        RagPipeline::new(
            self.embedder.clone(),
            self.generator.clone(),
            self.index.clone(),
            QuerySettings::from_config(&self.config),
        )
        .with_history(self.history.clone())
    }
}
