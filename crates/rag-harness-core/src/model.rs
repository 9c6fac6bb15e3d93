//! Model capability traits and vector utilities.
//!
//! [`Embedder`] and [`Generator`] are the only seams through which the
//! pipelines reach a model endpoint. Concrete providers (Bedrock, OpenAI,
//! Ollama) live in the `rag-harness` app crate and are selected once from
//! configuration; tests plug in scripted fakes.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::Usage;

/// A vector plus the usage it cost to produce.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub usage: Usage,
}

/// Generated text plus the usage it cost to produce.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: Usage,
}

/// Sampling parameters for a single generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 900,
            temperature: 0.7,
        }
    }
}

/// Text embedding capability.
///
/// Implementations fail with [`RagError::Embedding`](crate::RagError::Embedding)
/// on empty input, on a response without a vector, or once their retry
/// budget for transient failures is spent.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Provider family (e.g. `"bedrock"`).
    fn provider_name(&self) -> &str;
    /// Model identifier (e.g. `"amazon.titan-embed-text-v2:0"`).
    fn model_name(&self) -> &str;
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Text generation capability.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &str, params: GenerationParams) -> Result<Generation>;
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
