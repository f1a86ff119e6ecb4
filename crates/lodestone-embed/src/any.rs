#[cfg(feature = "mock")]
use crate::mock::MockEmbedder;
use crate::ollama::OllamaEmbedder;
use crate::openai::OpenAiEmbedder;
use crate::provider::EmbeddingProvider;

/// Generates a match over all `AnyEmbedder` variants, binding the inner
/// provider and evaluating the given closure for each arm.
macro_rules! delegate_embedder {
    ($self:expr, |$p:ident| $expr:expr) => {
        match $self {
            AnyEmbedder::OpenAi($p) => $expr,
            AnyEmbedder::Ollama($p) => $expr,
            #[cfg(feature = "mock")]
            AnyEmbedder::Mock($p) => $expr,
        }
    };
}

/// Concrete enum over all embedding providers, selected once from config.
#[derive(Debug, Clone)]
pub enum AnyEmbedder {
    OpenAi(OpenAiEmbedder),
    Ollama(OllamaEmbedder),
    #[cfg(feature = "mock")]
    Mock(MockEmbedder),
}

impl EmbeddingProvider for AnyEmbedder {
    fn name(&self) -> &str {
        delegate_embedder!(self, |p| p.name())
    }

    fn model(&self) -> &str {
        delegate_embedder!(self, |p| p.model())
    }

    fn dimension(&self) -> usize {
        delegate_embedder!(self, |p| p.dimension())
    }

    fn supports_batch(&self) -> bool {
        delegate_embedder!(self, |p| p.supports_batch())
    }

    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        delegate_embedder!(self, |p| p.embed(text).await)
    }

    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        delegate_embedder!(self, |p| p.embed_batch(texts).await)
    }
}
