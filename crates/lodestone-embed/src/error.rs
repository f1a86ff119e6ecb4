//! Error types for lodestone-embed.

/// Errors that can occur while talking to an embedding provider.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// HTTP transport failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Provider answered 429; `retry_after_secs` carries its `Retry-After` hint.
    #[error("rate limited by {provider}")]
    RateLimited {
        provider: &'static str,
        retry_after_secs: Option<u64>,
    },

    /// No API key configured.
    #[error("missing API key for {provider}")]
    MissingApiKey { provider: &'static str },

    /// Provider rejected the configured API key (401/403).
    #[error("invalid API key for {provider}")]
    InvalidApiKey { provider: &'static str },

    /// No endpoint/base URL configured.
    #[error("missing endpoint for {provider}")]
    MissingEndpoint { provider: &'static str },

    /// Server-side failure (5xx and friends).
    #[error("{provider} returned status {status}")]
    Upstream { provider: &'static str, status: u16 },

    /// Provider returned no embedding for a non-empty input.
    #[error("empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    /// Returned vector width disagrees with the configured dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

impl EmbedError {
    /// Configuration failures abort the whole operation without retrying.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::MissingApiKey { .. }
                | Self::InvalidApiKey { .. }
                | Self::MissingEndpoint { .. }
                | Self::DimensionMismatch { .. }
        )
    }

    /// Failures worth another attempt within the backoff budget.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Upstream { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Result type alias using `EmbedError`.
pub type Result<T> = std::result::Result<T, EmbedError>;
