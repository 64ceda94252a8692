use crate::error::EmbeddingError;
use crate::traits::Embedder;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Hashes character trigrams into a fixed number of buckets. Fully offline,
/// used for snapshots built without an embedding service.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_sync(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude == 0.0 {
            return Err(EmbeddingError::Unavailable(format!(
                "text too short to embed: {:?}",
                text
            )));
        }

        for value in &mut vector {
            *value /= magnitude;
        }
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_sync(text)
    }
}

/// Embeddings from an Ollama server (`POST /api/embeddings`).
pub struct OllamaEmbedder {
    endpoint: String,
    model: String,
    dimensions: usize,
    client: Client,
}

impl OllamaEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.endpoint))
            .json(&json!({ "model": self.model, "prompt": text }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Unavailable(format!(
                "ollama returned {}",
                response.status()
            )));
        }

        let body: Value = response.json().await?;
        let vector = parse_embedding(&body)?;
        if vector.len() != self.dimensions {
            return Err(EmbeddingError::Unavailable(format!(
                "embedding dimension {} != {}",
                vector.len(),
                self.dimensions
            )));
        }
        Ok(vector)
    }
}

fn parse_embedding(body: &Value) -> Result<Vec<f32>, EmbeddingError> {
    let values = body
        .pointer("/embedding")
        .and_then(Value::as_array)
        .ok_or_else(|| EmbeddingError::Unavailable("response has no embedding".to_string()))?;

    let vector = values
        .iter()
        .map(|value| value.as_f64().map(|number| number as f32))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| EmbeddingError::Unavailable("embedding has non-numeric values".to_string()))?;

    if vector.is_empty() || vector.iter().all(|value| *value == 0.0) {
        return Err(EmbeddingError::Unavailable(
            "backend returned an empty or zero embedding".to_string(),
        ));
    }
    Ok(vector)
}
