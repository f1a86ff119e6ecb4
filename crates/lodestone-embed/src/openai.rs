//! OpenAI-compatible embeddings endpoint (batch-capable).

use serde::{Deserialize, Serialize};

use crate::error::{EmbedError, Result};
use crate::http::default_client;
use crate::provider::EmbeddingProvider;
use crate::retry::{RetryPolicy, with_retry};

/// Batch-capable provider for any `/embeddings` endpoint speaking the OpenAI
/// wire format (OpenAI, Azure, LiteLLM, vLLM, ...).
#[derive(Debug, Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    #[must_use]
    pub fn new(api_key: String, base_url: String, model: String, dimension: usize) -> Self {
        Self {
            client: default_client(),
            api_key,
            base_url,
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

    /// Missing credentials are detected per call so the enclosing operation can
    /// abort without burning retry budget.
    fn ensure_configured(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(EmbedError::MissingEndpoint { provider: "openai" });
        }
        if self.api_key.trim().is_empty() {
            return Err(EmbedError::MissingApiKey { provider: "openai" });
        }
        Ok(())
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(EmbedError::RateLimited {
                provider: "openai",
                retry_after_secs,
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(EmbedError::InvalidApiKey { provider: "openai" });
        }
        if !status.is_success() {
            return Err(EmbedError::Upstream {
                provider: "openai",
                status: status.as_u16(),
            });
        }

        let body: EmbeddingResponse = response.json().await?;
        if body.data.len() != texts.len() {
            return Err(EmbedError::Other(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.data.len()
            )));
        }

        let mut data = body.data;
        data.sort_by_key(|d| d.index);

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            if item.embedding.len() != self.dimension {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.dimension,
                    got: item.embedding.len(),
                });
            }
            vectors.push(item.embedding);
        }
        Ok(vectors)
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn supports_batch(&self) -> bool {
        true
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = [text.to_owned()];
        let mut vectors = self.embed_batch(&input).await?;
        vectors.pop().ok_or(EmbedError::EmptyResponse {
            provider: "openai",
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.ensure_configured()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        with_retry("openai", self.retry, || self.request_embeddings(texts)).await
    }
}
