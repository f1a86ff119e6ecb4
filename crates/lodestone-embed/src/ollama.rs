//! Ollama embedding provider (per-item).

use ollama_rs::Ollama;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};

use crate::error::{EmbedError, Result};
use crate::provider::EmbeddingProvider;
use crate::retry::{RetryPolicy, with_retry};

/// Per-item provider backed by a local Ollama instance. The caller's
/// bounded-concurrency pool drives one call per text.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Ollama,
    model: String,
    dimension: usize,
    retry: RetryPolicy,
}

impl OllamaEmbedder {
    #[must_use]
    pub fn new(base_url: &str, model: String, dimension: usize) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
            dimension,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let request =
            GenerateEmbeddingsRequest::new(self.model.clone(), EmbeddingsInput::from(text));

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| EmbedError::Other(format!("Ollama embedding request failed: {e}")))?;

        let vector = response
            .embeddings
            .into_iter()
            .next()
            .ok_or(EmbedError::EmptyResponse { provider: "ollama" })?;

        if vector.len() != self.dimension {
            return Err(EmbedError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }
        Ok(vector)
    }
}

impl EmbeddingProvider for OllamaEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn supports_batch(&self) -> bool {
        false
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        with_retry("ollama", self.retry, || self.request_embedding(text)).await
    }

    /// Sequential fallback; batch-aware callers should check
    /// [`supports_batch`](EmbeddingProvider::supports_batch) first.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon_pos) = url.rfind(':') {
        let port_str = &url[colon_pos + 1..];
        if let Ok(port) = port_str.parse::<u16>() {
            return (url[..colon_pos].to_string(), port);
        }
    }
    (url.to_string(), 11434)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port_with_port() {
        let (host, port) = parse_host_port("http://localhost:11434");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_without_port() {
        let (host, port) = parse_host_port("http://localhost");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_custom_port() {
        let (host, port) = parse_host_port("http://example.com:8080");
        assert_eq!(host, "http://example.com");
        assert_eq!(port, 8080);
    }

    #[test]
    fn parse_host_port_trailing_slash() {
        let (host, port) = parse_host_port("http://localhost:11434/");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_invalid_port_falls_back() {
        let (host, port) = parse_host_port("http://localhost:notaport");
        assert_eq!(host, "http://localhost:notaport");
        assert_eq!(port, 11434);
    }

    #[test]
    fn new_stores_model_and_dimension() {
        let provider = OllamaEmbedder::new("http://localhost:11434", "nomic-embed-text".into(), 768);
        assert_eq!(provider.model(), "nomic-embed-text");
        assert_eq!(provider.dimension(), 768);
        assert_eq!(provider.name(), "ollama");
        assert!(!provider.supports_batch());
    }

    #[test]
    fn clone_keeps_configuration() {
        let provider = OllamaEmbedder::new("http://localhost:11434", "m".into(), 768);
        let cloned = provider.clone();
        assert_eq!(cloned.model(), provider.model());
        assert_eq!(cloned.dimension(), provider.dimension());
    }

    #[tokio::test]
    async fn embed_unreachable_host_errors() {
        let provider = OllamaEmbedder::new("http://127.0.0.1:1", "m".into(), 4)
            .with_retry_policy(RetryPolicy { max_retries: 0 });
        assert!(provider.embed("test").await.is_err());
    }
}
