//! Test-only mock embedding provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{EmbedError, Result};
use crate::provider::EmbeddingProvider;

/// Failure script applied per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// Every call fails with a retryable upstream error.
    Always,
    /// The first N calls fail with a retryable upstream error.
    FirstN(usize),
    /// Every call fails with a configuration error.
    Config,
}

/// Scriptable embedding provider for tests. Vectors are a deterministic
/// function of the input text, so equal texts embed identically.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dimension: usize,
    pub batch: bool,
    pub failure: Option<MockFailure>,
    /// Milliseconds to sleep before each call returns.
    pub delay_ms: u64,
    calls: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self {
            dimension: 4,
            batch: true,
            failure: None,
            delay_ms: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Batch-incapable variant, driven one text per call.
    #[must_use]
    pub fn per_item(dimension: usize) -> Self {
        Self {
            dimension,
            batch: false,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing(failure: MockFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Provider calls observed so far (embed and batch calls both count once).
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    #[allow(clippy::cast_precision_loss)]
    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut state = 0u32;
        for byte in text.bytes() {
            state = state.wrapping_mul(31).wrapping_add(u32::from(byte));
        }
        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            // [1, 2): keeps norms nonzero.
            vector.push(1.0 + (state >> 8) as f32 / (1u32 << 24) as f32);
        }
        vector
    }

    async fn before_call(&self) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        match self.failure {
            Some(MockFailure::Always) => Err(EmbedError::Upstream {
                provider: "mock",
                status: 503,
            }),
            Some(MockFailure::FirstN(n)) if call < n => Err(EmbedError::Upstream {
                provider: "mock",
                status: 503,
            }),
            Some(MockFailure::Config) => Err(EmbedError::MissingApiKey { provider: "mock" }),
            _ => Ok(()),
        }
    }
}

impl EmbeddingProvider for MockEmbedder {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn model(&self) -> &str {
        "mock-embed"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.before_call().await?;
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.before_call().await?;
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}
