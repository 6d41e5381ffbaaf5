//! Pluggable embedding providers.
//!
//! Embedding calls are high-latency I/O in production (network or model
//! inference), so the trait is async and fallible. A local hashed
//! bag-of-words embedder is always available for offline use and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::error::{Collaborator, CollaboratorError, ConfigError, FinragError};

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;

    /// Return the dimensionality of embeddings.
    fn dimensions(&self) -> usize;

    /// Return the provider name.
    fn provider_name(&self) -> &str;
}

/// Configuration for embedding providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider name: "local" (default) or "openai".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Provider-specific model name.
    #[serde(default)]
    pub model: Option<String>,
    /// Dimensions for the local embedder.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// API base URL for remote providers.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "local".into()
}

fn default_dimensions() -> usize {
    256
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dimensions: default_dimensions(),
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Local hashed term-frequency embedder (no external dependencies).
#[derive(Debug, Clone)]
pub struct LocalEmbedder {
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Synchronous embedding; the async trait method delegates here.
    ///
    /// Each lowercase alphanumeric word is hashed into a dimension, its term
    /// frequency accumulated, and the vector L2-normalised.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        let lowered = text.to_lowercase();
        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *tf.entry(word).or_insert(0) += 1;
        }

        if tf.is_empty() {
            return vector;
        }

        for (term, count) in &tf {
            let idx = simple_hash(term) % self.dimensions;
            vector[idx] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

/// OpenAI-compatible embeddings API client (text-embedding-3-small by default).
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    base_url: String,
    timeout_secs: u64,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, CollaboratorError> {
        let model = model.unwrap_or_else(|| "text-embedding-3-small".into());
        let dims = match model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CollaboratorError::Unavailable {
                source_kind: Collaborator::Embedder,
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            api_key,
            model,
            dims,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".into()),
            timeout_secs,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                CollaboratorError::from_transport(Collaborator::Embedder, &e, self.timeout_secs)
            })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| {
            CollaboratorError::from_transport(Collaborator::Embedder, &e, self.timeout_secs)
        })?;

        if !status.is_success() {
            return Err(CollaboratorError::from_http_status(
                Collaborator::Embedder,
                status.as_u16(),
                &response_body,
            ));
        }

        let json: serde_json::Value = serde_json::from_str(&response_body).map_err(|e| {
            CollaboratorError::InvalidResponse {
                source_kind: Collaborator::Embedder,
                message: format!("Invalid JSON: {}", e),
            }
        })?;

        let embedding = json["data"][0]["embedding"].as_array().ok_or_else(|| {
            CollaboratorError::InvalidResponse {
                source_kind: Collaborator::Embedder,
                message: "missing data[0].embedding".into(),
            }
        })?;

        Ok(embedding
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}

/// Build the embedder named by `config.provider`.
///
/// `"openai"` reads its key from `config.api_key_env`; anything else falls
/// back to the local hashed embedder.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, FinragError> {
    match config.provider.as_str() {
        "openai" => {
            let api_key =
                std::env::var(&config.api_key_env).map_err(|_| ConfigError::EnvVarMissing {
                    var: config.api_key_env.clone(),
                })?;
            let embedder = OpenAiEmbedder::new(
                api_key,
                config.model.clone(),
                config.base_url.clone(),
                config.timeout_secs,
            )?;
            Ok(Arc::new(embedder))
        }
        "local" => Ok(Arc::new(LocalEmbedder::new(config.dimensions))),
        other => {
            warn!(provider = other, "Unknown embedding provider, falling back to local");
            Ok(Arc::new(LocalEmbedder::new(config.dimensions)))
        }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 for mismatched lengths, empty input or a zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Euclidean (L2) distance; lower means closer.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (*x as f64 - *y as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}
