//! Embedding and generation model providers.
//!
//! [`ModelProvider`] is a closed set of backends selected from config and
//! implements both [`Embedder`] and [`Generator`]:
//!
//! | Provider | Embedding endpoint | Generation endpoint | Auth |
//! |----------|--------------------|---------------------|------|
//! | `bedrock` | `POST /model/{id}/invoke` | `POST /model/{id}/invoke` | SigV4 |
//! | `openai` | `POST /v1/embeddings` | `POST /v1/chat/completions` | Bearer key |
//! | `ollama` | `POST /api/embeddings` | `POST /api/generate` | none |
//! | `disabled` | error | error | n/a |
//!
//! Bedrock request and response shapes differ per model family (Titan,
//! Cohere, Anthropic, Llama); the family is derived from the model id.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use rag_harness_core::error::{RagError, Result};
use rag_harness_core::model::{Embedder, Embedding, Generation, GenerationParams, Generator};
use rag_harness_core::models::Usage;

use crate::aws::{self, AwsCredentials, SigV4Request};
use crate::config::{EmbeddingConfig, GenerationConfig, ProviderKind};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const ANTHROPIC_BEDROCK_VERSION: &str = "bedrock-2023-05-31";

/// Per-1k-token prices used to compute [`Usage::cost`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Pricing {
    pub fn usage(&self, tokens_in: u64, tokens_out: u64) -> Usage {
        Usage {
            tokens_in,
            tokens_out,
            cost: tokens_in as f64 / 1000.0 * self.input_per_1k
                + tokens_out as f64 / 1000.0 * self.output_per_1k,
        }
    }
}

/// Rough token count for responses that do not report usage.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

#[derive(Debug)]
enum Backend {
    Disabled,
    Bedrock {
        region: String,
        creds: AwsCredentials,
    },
    OpenAi {
        base_url: String,
        api_key: String,
    },
    Ollama {
        base_url: String,
    },
}

/// A configured model endpoint.
#[derive(Debug)]
pub struct ModelProvider {
    backend: Backend,
    kind: ProviderKind,
    model: String,
    http: reqwest::Client,
    max_retries: u32,
    pricing: Pricing,
}

struct Settings<'a> {
    kind: ProviderKind,
    model: &'a str,
    region: &'a str,
    url: Option<&'a str>,
    api_key_env: Option<&'a str>,
    timeout_secs: u64,
    max_retries: u32,
    pricing: Pricing,
}

impl ModelProvider {
    pub fn for_embedding(config: &EmbeddingConfig) -> Result<Self> {
        Self::build(Settings {
            kind: config.provider,
            model: &config.model,
            region: &config.region,
            url: config.url.as_deref(),
            api_key_env: config.api_key_env.as_deref(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
            pricing: Pricing {
                input_per_1k: config.price_per_1k_input_tokens,
                output_per_1k: 0.0,
            },
        })
    }

    pub fn for_generation(config: &GenerationConfig) -> Result<Self> {
        Self::build(Settings {
            kind: config.provider,
            model: &config.model,
            region: &config.region,
            url: config.url.as_deref(),
            api_key_env: config.api_key_env.as_deref(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
            pricing: Pricing {
                input_per_1k: config.price_per_1k_input_tokens,
                output_per_1k: config.price_per_1k_output_tokens,
            },
        })
    }

    fn build(s: Settings<'_>) -> Result<Self> {
        let backend = match s.kind {
            ProviderKind::Disabled => Backend::Disabled,
            ProviderKind::Bedrock => Backend::Bedrock {
                region: s.region.to_string(),
                creds: AwsCredentials::from_env()?,
            },
            ProviderKind::Openai => {
                let var = s.api_key_env.unwrap_or("OPENAI_API_KEY");
                let api_key = std::env::var(var).map_err(|_| {
                    RagError::Validation(format!("{} environment variable not set", var))
                })?;
                Backend::OpenAi {
                    base_url: s.url.unwrap_or(OPENAI_DEFAULT_URL).trim_end_matches('/').to_string(),
                    api_key,
                }
            }
            ProviderKind::Ollama => Backend::Ollama {
                base_url: s.url.unwrap_or(OLLAMA_DEFAULT_URL).trim_end_matches('/').to_string(),
            },
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(s.timeout_secs))
            .build()
            .map_err(|e| RagError::Validation(format!("HTTP client: {}", e)))?;
        Ok(Self {
            backend,
            kind: s.kind,
            model: s.model.to_string(),
            http,
            max_retries: s.max_retries,
            pricing: s.pricing,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, Backend::Disabled)
    }

    /// POST `body` and return the JSON response, retrying transient failures.
    async fn call(&self, endpoint: Endpoint<'_>, body: &Value) -> std::result::Result<Value, String> {
        let payload = serde_json::to_vec(body).map_err(|e| e.to_string())?;
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.request(&endpoint, &payload).send().await;
            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<Value>().await.map_err(|e| e.to_string());
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    let message = format!(
                        "{} API error {}: {}",
                        self.kind.as_str(),
                        status,
                        body_text.chars().take(500).collect::<String>()
                    );
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(attempt, %status, "transient model error; retrying");
                        last_err = Some(message);
                        continue;
                    }
                    return Err(message);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "model request failed; retrying");
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| "model call failed after retries".to_string()))
    }

    fn request(&self, endpoint: &Endpoint<'_>, payload: &[u8]) -> reqwest::RequestBuilder {
        match (&self.backend, endpoint) {
            (Backend::Bedrock { region, creds }, _) => {
                let host = format!("bedrock-runtime.{}.amazonaws.com", region);
                let path = format!("/model/{}/invoke", self.model);
                let extra = [
                    ("content-type".to_string(), "application/json".to_string()),
                    ("accept".to_string(), "application/json".to_string()),
                ];
                let headers = aws::sign(
                    &SigV4Request {
                        method: "POST",
                        host: &host,
                        path: &path,
                        query: &[],
                        payload,
                        service: "bedrock",
                        region,
                        extra_headers: &extra,
                    },
                    creds,
                    Utc::now(),
                );
                let url = format!("https://{}{}", host, aws::encode_path(&path));
                let mut req = self.http.post(url).body(payload.to_vec());
                for (k, v) in &headers {
                    req = req.header(k.as_str(), v.as_str());
                }
                req
            }
            (Backend::OpenAi { base_url, api_key }, ep) => self
                .http
                .post(format!("{}{}", base_url, ep.openai_path()))
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .body(payload.to_vec()),
            (Backend::Ollama { base_url }, ep) => self
                .http
                .post(format!("{}{}", base_url, ep.ollama_path()))
                .header("Content-Type", "application/json")
                .body(payload.to_vec()),
            // Unreachable: callers check for Disabled first.
            (Backend::Disabled, _) => self.http.post("http://disabled.invalid"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Endpoint<'a> {
    Embed,
    Generate(&'a GenerationParams),
}

impl Endpoint<'_> {
    fn openai_path(&self) -> &'static str {
        match self {
            Endpoint::Embed => "/v1/embeddings",
            Endpoint::Generate(_) => "/v1/chat/completions",
        }
    }

    fn ollama_path(&self) -> &'static str {
        match self {
            Endpoint::Embed => "/api/embeddings",
            Endpoint::Generate(_) => "/api/generate",
        }
    }
}

// ============ Request shaping ============

/// Bedrock model family, derived from the model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BedrockFamily {
    Titan,
    Cohere,
    Anthropic,
    Llama,
}

impl BedrockFamily {
    pub fn of(model: &str) -> Option<Self> {
        let m = model.to_lowercase();
        if m.contains("anthropic.") {
            Some(Self::Anthropic)
        } else if m.contains("cohere.") {
            Some(Self::Cohere)
        } else if m.contains("meta.llama") {
            Some(Self::Llama)
        } else if m.contains("amazon.titan") {
            Some(Self::Titan)
        } else {
            None
        }
    }
}

fn family_or_err(model: &str) -> std::result::Result<BedrockFamily, String> {
    BedrockFamily::of(model).ok_or_else(|| format!("unsupported Bedrock model family: {}", model))
}

pub fn embed_request(kind: ProviderKind, model: &str, text: &str) -> std::result::Result<Value, String> {
    match kind {
        ProviderKind::Bedrock => match family_or_err(model)? {
            BedrockFamily::Titan => Ok(json!({ "inputText": text })),
            BedrockFamily::Cohere => Ok(json!({
                "texts": [text],
                "input_type": "search_document",
            })),
            other => Err(format!("{:?} models do not produce embeddings", other)),
        },
        ProviderKind::Openai => Ok(json!({ "model": model, "input": text })),
        ProviderKind::Ollama => Ok(json!({ "model": model, "prompt": text })),
        ProviderKind::Disabled => Err("embedding provider is disabled".to_string()),
    }
}

fn as_vector(value: Option<&Value>) -> std::result::Result<Vec<f32>, String> {
    let arr = value
        .and_then(|v| v.as_array())
        .ok_or_else(|| "response has no embedding array".to_string())?;
    arr.iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| "non-numeric embedding value".to_string())
        })
        .collect()
}

/// Vector and input token count, when reported.
pub fn parse_embedding(
    kind: ProviderKind,
    model: &str,
    json: &Value,
) -> std::result::Result<(Vec<f32>, Option<u64>), String> {
    match kind {
        ProviderKind::Bedrock => match family_or_err(model)? {
            BedrockFamily::Cohere => Ok((
                as_vector(json.pointer("/embeddings/0"))?,
                None,
            )),
            _ => Ok((
                as_vector(json.get("embedding"))?,
                json.get("inputTextTokenCount").and_then(Value::as_u64),
            )),
        },
        ProviderKind::Openai => Ok((
            as_vector(json.pointer("/data/0/embedding"))?,
            json.pointer("/usage/prompt_tokens").and_then(Value::as_u64),
        )),
        ProviderKind::Ollama => Ok((as_vector(json.get("embedding"))?, None)),
        ProviderKind::Disabled => Err("embedding provider is disabled".to_string()),
    }
}

pub fn generate_request(
    kind: ProviderKind,
    model: &str,
    prompt: &str,
    params: &GenerationParams,
) -> std::result::Result<Value, String> {
    match kind {
        ProviderKind::Bedrock => match family_or_err(model)? {
            BedrockFamily::Anthropic => Ok(json!({
                "anthropic_version": ANTHROPIC_BEDROCK_VERSION,
                "max_tokens": params.max_tokens,
                "temperature": params.temperature,
                "messages": [{ "role": "user", "content": prompt }],
            })),
            BedrockFamily::Titan => Ok(json!({
                "inputText": prompt,
                "textGenerationConfig": {
                    "maxTokenCount": params.max_tokens,
                    "temperature": params.temperature,
                },
            })),
            BedrockFamily::Llama => Ok(json!({
                "prompt": prompt,
                "max_gen_len": params.max_tokens,
                "temperature": params.temperature,
            })),
            BedrockFamily::Cohere => Err("Cohere generation models are not supported".to_string()),
        },
        ProviderKind::Openai => Ok(json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        })),
        ProviderKind::Ollama => Ok(json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": params.temperature,
                "num_predict": params.max_tokens,
            },
        })),
        ProviderKind::Disabled => Err("generation provider is disabled".to_string()),
    }
}

/// Text plus input and output token counts, when reported.
pub fn parse_generation(
    kind: ProviderKind,
    model: &str,
    json: &Value,
) -> std::result::Result<(String, Option<u64>, Option<u64>), String> {
    let text_at = |ptr: &str| {
        json.pointer(ptr)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| format!("response missing {}", ptr))
    };
    let u64_at = |ptr: &str| json.pointer(ptr).and_then(Value::as_u64);
    match kind {
        ProviderKind::Bedrock => match family_or_err(model)? {
            BedrockFamily::Anthropic => {
                let text = json
                    .get("content")
                    .and_then(Value::as_array)
                    .map(|blocks| {
                        blocks
                            .iter()
                            .filter_map(|b| b.get("text").and_then(Value::as_str))
                            .collect::<Vec<_>>()
                            .join("")
                    })
                    .ok_or_else(|| "response missing content".to_string())?;
                Ok((text, u64_at("/usage/input_tokens"), u64_at("/usage/output_tokens")))
            }
            BedrockFamily::Titan => Ok((
                text_at("/results/0/outputText")?,
                u64_at("/inputTextTokenCount"),
                u64_at("/results/0/tokenCount"),
            )),
            BedrockFamily::Llama => Ok((
                text_at("/generation")?,
                u64_at("/prompt_token_count"),
                u64_at("/generation_token_count"),
            )),
            BedrockFamily::Cohere => Err("Cohere generation models are not supported".to_string()),
        },
        ProviderKind::Openai => Ok((
            text_at("/choices/0/message/content")?,
            u64_at("/usage/prompt_tokens"),
            u64_at("/usage/completion_tokens"),
        )),
        ProviderKind::Ollama => Ok((
            text_at("/response")?,
            u64_at("/prompt_eval_count"),
            u64_at("/eval_count"),
        )),
        ProviderKind::Disabled => Err("generation provider is disabled".to_string()),
    }
}

// ============ Capability traits ============

#[async_trait]
impl Embedder for ModelProvider {
    fn provider_name(&self) -> &str {
        self.kind.as_str()
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            return Err(RagError::Embedding("empty input".to_string()));
        }
        if !self.is_enabled() {
            return Err(RagError::Embedding("embedding provider is disabled".to_string()));
        }
        let body = embed_request(self.kind, &self.model, text).map_err(RagError::Embedding)?;
        let json = self
            .call(Endpoint::Embed, &body)
            .await
            .map_err(RagError::Embedding)?;
        let (vector, tokens_in) =
            parse_embedding(self.kind, &self.model, &json).map_err(RagError::Embedding)?;
        if vector.is_empty() {
            return Err(RagError::Embedding("empty embedding returned".to_string()));
        }
        let tokens_in = tokens_in.unwrap_or_else(|| estimate_tokens(text));
        debug!(model = %self.model, dim = vector.len(), tokens_in, "embedded text");
        Ok(Embedding {
            vector,
            usage: self.pricing.usage(tokens_in, 0),
        })
    }
}

#[async_trait]
impl Generator for ModelProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, params: GenerationParams) -> Result<Generation> {
        if !self.is_enabled() {
            return Err(RagError::Generation("generation provider is disabled".to_string()));
        }
        let body = generate_request(self.kind, &self.model, prompt, &params)
            .map_err(RagError::Generation)?;
        let json = self
            .call(Endpoint::Generate(&params), &body)
            .await
            .map_err(RagError::Generation)?;
        let (text, tokens_in, tokens_out) =
            parse_generation(self.kind, &self.model, &json).map_err(RagError::Generation)?;
        let usage = self.pricing.usage(
            tokens_in.unwrap_or_else(|| estimate_tokens(prompt)),
            tokens_out.unwrap_or_else(|| estimate_tokens(&text)),
        );
        debug!(model = %self.model, tokens_out = usage.tokens_out, "generated text");
        Ok(Generation { text, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `status` with `body` to every request; returns the base URL and a request counter.
    async fn canned_server(status: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    // Read headers, then as much body as Content-Length announces.
                    loop {
                        let n = match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        buf.extend_from_slice(&chunk[..n]);
                        let text = String::from_utf8_lossy(&buf).to_string();
                        if let Some(end) = text.find("\r\n\r\n") {
                            let len = text[..end]
                                .lines()
                                .find_map(|l| {
                                    let (k, v) = l.split_once(':')?;
                                    k.eq_ignore_ascii_case("content-length")
                                        .then(|| v.trim().parse::<usize>().ok())
                                        .flatten()
                                })
                                .unwrap_or(0);
                            if buf.len() >= end + 4 + len {
                                break;
                            }
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        (format!("http://{}", addr), hits)
    }

    fn ollama(url: &str, max_retries: u32) -> ModelProvider {
        ModelProvider::for_embedding(&EmbeddingConfig {
            provider: ProviderKind::Ollama,
            model: "nomic-embed-text".to_string(),
            url: Some(url.to_string()),
            max_retries,
            timeout_secs: 5,
            ..EmbeddingConfig::default()
        })
        .unwrap()
    }

    const TITAN: &str = "amazon.titan-embed-text-v2:0";

    #[test]
    fn test_family_detection() {
        assert_eq!(BedrockFamily::of(TITAN), Some(BedrockFamily::Titan));
        assert_eq!(
            BedrockFamily::of("us.anthropic.claude-3-haiku-20240307-v1:0"),
            Some(BedrockFamily::Anthropic)
        );
        assert_eq!(BedrockFamily::of("cohere.embed-english-v3"), Some(BedrockFamily::Cohere));
        assert_eq!(BedrockFamily::of("meta.llama3-8b-instruct-v1:0"), Some(BedrockFamily::Llama));
        assert_eq!(BedrockFamily::of("mystery"), None);
    }

    #[test]
    fn test_titan_embedding_shapes() {
        let body = embed_request(ProviderKind::Bedrock, TITAN, "hello").unwrap();
        assert_eq!(body, json!({ "inputText": "hello" }));
        let resp = json!({ "embedding": [0.5, -1.0], "inputTextTokenCount": 3 });
        let (vector, tokens) = parse_embedding(ProviderKind::Bedrock, TITAN, &resp).unwrap();
        assert_eq!(vector, vec![0.5, -1.0]);
        assert_eq!(tokens, Some(3));
    }

    #[test]
    fn test_cohere_embedding_shapes() {
        let model = "cohere.embed-english-v3";
        let body = embed_request(ProviderKind::Bedrock, model, "hi").unwrap();
        assert_eq!(body["texts"], json!(["hi"]));
        let resp = json!({ "embeddings": [[1.0, 2.0]] });
        let (vector, tokens) = parse_embedding(ProviderKind::Bedrock, model, &resp).unwrap();
        assert_eq!(vector, vec![1.0, 2.0]);
        assert_eq!(tokens, None);
    }

    #[test]
    fn test_anthropic_generation_shapes() {
        let model = "anthropic.claude-3-haiku-20240307-v1:0";
        let params = GenerationParams::default();
        let body = generate_request(ProviderKind::Bedrock, model, "Q", &params).unwrap();
        assert_eq!(body["anthropic_version"], ANTHROPIC_BEDROCK_VERSION);
        assert_eq!(body["max_tokens"], 900);
        assert_eq!(body["messages"][0]["content"], "Q");

        let resp = json!({
            "content": [{ "type": "text", "text": "Hello" }, { "type": "text", "text": " world" }],
            "usage": { "input_tokens": 10, "output_tokens": 2 }
        });
        let (text, tin, tout) = parse_generation(ProviderKind::Bedrock, model, &resp).unwrap();
        assert_eq!(text, "Hello world");
        assert_eq!((tin, tout), (Some(10), Some(2)));
    }

    #[test]
    fn test_llama_and_titan_generation() {
        let params = GenerationParams {
            max_tokens: 50,
            temperature: 0.1,
        };
        let llama = "meta.llama3-8b-instruct-v1:0";
        let body = generate_request(ProviderKind::Bedrock, llama, "p", &params).unwrap();
        assert_eq!(body["max_gen_len"], 50);
        let resp = json!({ "generation": "ok", "prompt_token_count": 4, "generation_token_count": 1 });
        assert_eq!(
            parse_generation(ProviderKind::Bedrock, llama, &resp).unwrap(),
            ("ok".to_string(), Some(4), Some(1))
        );

        let titan = "amazon.titan-text-express-v1";
        let body = generate_request(ProviderKind::Bedrock, titan, "p", &params).unwrap();
        assert_eq!(body["textGenerationConfig"]["maxTokenCount"], 50);
        let resp = json!({ "inputTextTokenCount": 4, "results": [{ "outputText": "t", "tokenCount": 1 }] });
        assert_eq!(
            parse_generation(ProviderKind::Bedrock, titan, &resp).unwrap().0,
            "t"
        );
    }

    #[test]
    fn test_openai_and_ollama_shapes() {
        let resp = json!({ "data": [{ "embedding": [0.1] }], "usage": { "prompt_tokens": 7 } });
        let (v, t) = parse_embedding(ProviderKind::Openai, "text-embedding-3-small", &resp).unwrap();
        assert_eq!((v.len(), t), (1, Some(7)));

        let resp = json!({ "response": "hi", "prompt_eval_count": 5, "eval_count": 1 });
        assert_eq!(
            parse_generation(ProviderKind::Ollama, "llama3", &resp).unwrap(),
            ("hi".to_string(), Some(5), Some(1))
        );
        let body = generate_request(ProviderKind::Ollama, "llama3", "p", &GenerationParams::default()).unwrap();
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_malformed_response_is_error() {
        assert!(parse_embedding(ProviderKind::Bedrock, TITAN, &json!({})).is_err());
        assert!(parse_embedding(ProviderKind::Bedrock, TITAN, &json!({ "embedding": ["x"] })).is_err());
        assert!(parse_generation(ProviderKind::Openai, "gpt", &json!({ "choices": [] })).is_err());
    }

    #[test]
    fn test_pricing() {
        let pricing = Pricing {
            input_per_1k: 0.02,
            output_per_1k: 0.1,
        };
        let usage = pricing.usage(500, 2000);
        assert!((usage.cost - (0.01 + 0.2)).abs() < 1e-12);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens("abcdefghi"), 3);
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let provider = ModelProvider::for_embedding(&EmbeddingConfig::default()).unwrap();
        assert!(!provider.is_enabled());
        assert!(matches!(provider.embed("x").await, Err(RagError::Embedding(_))));
        let gen = ModelProvider::for_generation(&GenerationConfig::default()).unwrap();
        assert!(matches!(
            gen.generate("x", GenerationParams::default()).await,
            Err(RagError::Generation(_))
        ));
    }

    #[tokio::test]
    async fn test_embed_rejects_empty_input() {
        let (url, hits) = canned_server("200 OK", r#"{"embedding":[0.1,0.2]}"#).await;
        let provider = ollama(&url, 0);

        assert!(matches!(provider.embed("").await, Err(RagError::Embedding(_))));
        assert!(matches!(provider.embed("  \n\t").await, Err(RagError::Embedding(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let ok = provider.embed("hello").await.unwrap();
        assert_eq!(ok.vector, vec![0.1, 0.2]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (url, hits) = canned_server("400 Bad Request", r#"{"error":"bad model"}"#).await;
        let provider = ollama(&url, 3);

        let err = provider.embed("hello").await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(ref m) if m.contains("400")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_retried_up_to_limit() {
        let (url, hits) = canned_server("503 Service Unavailable", r#"{"error":"busy"}"#).await;
        let provider = ollama(&url, 1);

        let err = provider.embed("hello").await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(ref m) if m.contains("503")));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
