//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **`LocalProvider`**: fastembed ONNX inference, offline after the first
//!   model download (feature `local-embeddings-fastembed`, on by default).
//! - **[`OpenAIProvider`]**: calls an OpenAI-compatible embeddings API.
//! - **[`OllamaProvider`]**: calls a local Ollama instance.
//!
//! Every provider returns L2-normalized vectors of exactly [`EmbeddingProvider::dims`] entries,
//! so cosine similarity and dot product rank identically. Batch calls are
//! split into `batch_size` requests and produce the same vectors as
//! embedding each text on its own.
//!
//! Also provides vector utilities shared with the index backends:
//! - [`cosine_similarity`] and [`dot_product`]
//! - [`vec_to_blob`] / [`blob_to_vec`] for SQLite BLOB storage
//!
//! # Retry Strategy
//!
//! The remote providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! [`dims`]: EmbeddingProvider::dims

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{PipelineError, Result};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";

/// Maps text to fixed-dimension unit vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Embed many texts, returning one vector per input in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::embedding(self.model_name(), "empty embedding response"))
    }
}

/// Create the configured [`EmbeddingProvider`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"local"` | `LocalProvider` (requires `local-embeddings-fastembed`) |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(PipelineError::Config(
            "local embedding provider requires --features local-embeddings-fastembed".to_string(),
        )),
        other => Err(PipelineError::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Check count and dimensionality of a provider response, then normalize.
fn finish(
    provider: &str,
    dims: usize,
    expected: usize,
    mut vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(PipelineError::embedding(
            provider,
            format!("expected {} vectors, got {}", expected, vectors.len()),
        ));
    }
    for v in &mut vectors {
        if v.len() != dims {
            return Err(PipelineError::embedding(
                provider,
                format!("expected dimension {}, got {}", dims, v.len()),
            ));
        }
        normalize(v);
    }
    Ok(vectors)
}

fn http_client(provider: &str, timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::embedding(provider, e))
}

/// POST `body` to `url`, retrying transient failures with backoff.
async fn post_json(
    provider: &str,
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| PipelineError::embedding(provider, e));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(provider, %status, attempt, "embedding request failed, retrying");
                    last_err = Some(PipelineError::embedding(
                        provider,
                        format!("API error {}: {}", status, body_text),
                    ));
                    continue;
                }

                return Err(PipelineError::embedding(
                    provider,
                    format!("API error {}: {}", status, body_text),
                ));
            }
            Err(e) => {
                warn!(provider, error = %e, attempt, "embedding request failed, retrying");
                last_err = Some(PipelineError::embedding(
                    provider,
                    format!("connection error ({}): {}", url, e),
                ));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| PipelineError::embedding(provider, "failed after retries")))
}

fn json_vector(provider: &str, value: &serde_json::Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| PipelineError::embedding(provider, "embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| PipelineError::embedding(provider, "embedding value is not a number"))
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider for OpenAI-compatible `POST {url}/embeddings`.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            PipelineError::Config("embedding.model required for OpenAI provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            PipelineError::Config("embedding.dims required for OpenAI provider".to_string())
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            PipelineError::Config("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        Ok(Self {
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            api_key,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client: http_client("openai", config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.url.trim_end_matches('/'));
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({ "model": self.model, "input": batch });
            let json = post_json(
                "openai",
                &self.client,
                &url,
                Some(&self.api_key),
                &body,
                self.max_retries,
            )
            .await?;
            let vectors = parse_openai_response(&json)?;
            out.extend(finish("openai", self.dims, batch.len(), vectors)?);
        }

        debug!(count = out.len(), model = %self.model, "embedded texts");
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| PipelineError::embedding("openai", "invalid response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item.get("embedding").ok_or_else(|| {
            PipelineError::embedding("openai", "invalid response: missing embedding")
        })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, json_vector("openai", embedding)?));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            PipelineError::Config("embedding.model required for Ollama provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            PipelineError::Config("embedding.dims required for Ollama provider".to_string())
        })?;

        Ok(Self {
            model,
            dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client: http_client("ollama", config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({ "model": self.model, "input": batch });
            let json =
                post_json("ollama", &self.client, &url, None, &body, self.max_retries).await?;
            let vectors = parse_ollama_response(&json)?;
            out.extend(finish("ollama", self.dims, batch.len(), vectors)?);
        }

        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            PipelineError::embedding("ollama", "invalid response: missing embeddings array")
        })?
        .iter()
        .map(|embedding| json_vector("ollama", embedding))
        .collect()
}

// ============ Local Provider (fastembed) ============

/// Local ONNX inference through fastembed.
///
/// The model is loaded on the first call and kept for the lifetime of the
/// provider. Inference runs on the blocking thread pool.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    fastembed_model: fastembed::EmbeddingModel,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        let key = local_model_key(&model_name);
        let fastembed_model = config_to_fastembed_model(&key)?;
        let dims = config.dims.unwrap_or_else(|| local_model_dims(&key));

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size.max(1),
            fastembed_model,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let slot = Arc::clone(&self.model);
        let fastembed_model = self.fastembed_model.clone();
        let batch_size = self.batch_size;
        let input = texts.to_vec();

        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = slot
                .lock()
                .map_err(|_| PipelineError::embedding("local", "model lock poisoned"))?;
            if guard.is_none() {
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
                )
                .map_err(|e| {
                    PipelineError::embedding(
                        "local",
                        format!("failed to initialize local embedding model: {}", e),
                    )
                })?;
                *guard = Some(model);
            }
            let Some(model) = guard.as_mut() else {
                return Err(PipelineError::embedding("local", "model not initialized"));
            };
            model
                .embed(input, Some(batch_size))
                .map_err(|e| PipelineError::embedding("local", e))
        })
        .await
        .map_err(|e| PipelineError::embedding("local", e))??;

        finish("local", self.dims, texts.len(), vectors)
    }
}

/// Lower-cased model name without the `sentence-transformers/` prefix.
#[cfg(feature = "local-embeddings-fastembed")]
fn local_model_key(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    lower
        .strip_prefix("sentence-transformers/")
        .map(str::to_string)
        .unwrap_or(lower)
}

#[cfg(feature = "local-embeddings-fastembed")]
fn local_model_dims(name: &str) -> usize {
    match name {
        "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(PipelineError::Config(format!(
            "unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}

/// Scale `v` to unit length in place. Zero vectors are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing bytes that do not form
/// a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Dot product; `0.0` for vectors of different lengths.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different
/// lengths.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let v = vec![1.0f32, -2.5, 3.125, 0.0];
        let blob = vec_to_blob(&v);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_vec(&blob), v);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_finish_checks_count_and_dims() {
        let ok = finish("test", 2, 1, vec![vec![0.0, 2.0]]).unwrap();
        assert_eq!(ok, vec![vec![0.0, 1.0]]);

        let wrong_dims = finish("test", 3, 1, vec![vec![0.0, 2.0]]).unwrap_err();
        assert!(matches!(wrong_dims, PipelineError::EmbeddingService { .. }));

        let wrong_count = finish("test", 2, 2, vec![vec![0.0, 2.0]]).unwrap_err();
        assert!(wrong_count.to_string().contains("expected 2 vectors"));
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(parse_openai_response(&serde_json::json!({"error": "x"})).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[0.5, 0.5], [1.0, 0.0]] });
        assert_eq!(parse_ollama_response(&json).unwrap().len(), 2);
        let bad = serde_json::json!({ "embeddings": [["a"]] });
        assert!(parse_ollama_response(&bad).is_err());
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(768),
            url: Some("http://127.0.0.1:9".to_string()),
            ..EmbeddingConfig::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.dims(), 768);
        assert!(provider.embed_batch(&[]).await.unwrap().is_empty());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let config = EmbeddingConfig {
            provider: "magic".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            create_provider(&config),
            Err(PipelineError::Config(_))
        ));
    }

    #[cfg(feature = "local-embeddings-fastembed")]
    #[test]
    fn test_local_model_names() {
        let key = local_model_key("sentence-transformers/all-MiniLM-L6-v2");
        assert_eq!(key, "all-minilm-l6-v2");
        assert!(config_to_fastembed_model(&key).is_ok());
        assert!(config_to_fastembed_model("not-a-model").is_err());
        assert_eq!(local_model_dims("all-minilm-l6-v2"), 384);
        assert_eq!(local_model_dims("bge-base-en-v1.5"), 768);
    }

    #[cfg(feature = "local-embeddings-fastembed")]
    #[test]
    fn test_local_dims_follow_normalized_name() {
        let config = EmbeddingConfig {
            model: Some("BGE-base-en-v1.5".to_string()),
            ..EmbeddingConfig::default()
        };
        let provider = LocalProvider::new(&config).unwrap();
        assert_eq!(provider.dims(), 768);
        assert_eq!(provider.model_name(), "BGE-base-en-v1.5");
    }
}
