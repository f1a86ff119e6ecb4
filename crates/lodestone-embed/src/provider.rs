use crate::error::Result;

/// A vector embedding provider with a fixed model and output dimension.
///
/// Capability is declared once via [`supports_batch`](Self::supports_batch):
/// batch-capable providers accept many inputs per call, per-item providers are
/// driven one text at a time by the caller's concurrency pool.
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model identifier sent to the provider.
    fn model(&self) -> &str;

    /// Output vector width for the configured model.
    fn dimension(&self) -> usize;

    /// Whether a single call may carry multiple inputs.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Embed one text.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to respond or returns no vector.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;

    /// Embed a batch of texts, preserving input order in the output.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails or the response is incomplete.
    fn embed_batch(&self, texts: &[String]) -> impl Future<Output = Result<Vec<Vec<f32>>>> + Send;
}
