//! Error types for indexing, storage, and query operations.

/// Errors produced by the indexing and retrieval layer.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Failed to read a corpus document.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Postgres operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Embedding provider failed.
    #[error("embedding error: {0}")]
    Embed(#[from] lodestone_embed::EmbedError),

    /// Invalid include/exclude glob pattern.
    #[error("glob error: {0}")]
    Pattern(#[from] glob::PatternError),

    /// Numeric field does not fit the storage column.
    #[error("integer conversion error: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),

    /// A store operation ran before `init`.
    #[error("chunk store is not initialized")]
    NotInitialized,

    /// The embedding dimension has no backing table.
    #[error("unsupported embedding dimension {dimension}")]
    UnsupportedDimension { dimension: usize },

    /// Vector width disagrees with the active table.
    #[error("dimension mismatch: store expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Text search language outside the accepted set.
    #[error("unknown text search language {language:?}")]
    UnknownLanguage { language: String },

    /// The operation observed a cancellation request and stopped.
    #[error("operation aborted")]
    Aborted,

    /// Catch-all for backend-specific failures.
    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// True for configuration and lifecycle failures that no amount of
    /// retrying can fix.
    #[must_use]
    pub fn is_config(&self) -> bool {
        match self {
            Self::NotInitialized
            | Self::UnsupportedDimension { .. }
            | Self::DimensionMismatch { .. }
            | Self::UnknownLanguage { .. }
            | Self::Pattern(_) => true,
            Self::Embed(e) => e.is_config(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_flagged() {
        assert!(IndexError::NotInitialized.is_config());
        assert!(IndexError::UnsupportedDimension { dimension: 7 }.is_config());
        assert!(
            IndexError::DimensionMismatch {
                expected: 768,
                got: 4
            }
            .is_config()
        );
        assert!(
            IndexError::UnknownLanguage {
                language: "klingon".into()
            }
            .is_config()
        );
    }

    #[test]
    fn transient_errors_are_not_config() {
        assert!(!IndexError::Aborted.is_config());
        assert!(!IndexError::Other("boom".into()).is_config());
        let io = IndexError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(!io.is_config());
    }

    #[test]
    fn embed_config_errors_pass_through() {
        let err = IndexError::Embed(lodestone_embed::EmbedError::MissingApiKey { provider: "openai" });
        assert!(err.is_config());

        let err = IndexError::Embed(lodestone_embed::EmbedError::Upstream {
            provider: "openai",
            status: 503,
        });
        assert!(!err.is_config());
    }

    #[test]
    fn display_formats() {
        let err = IndexError::UnsupportedDimension { dimension: 999 };
        assert_eq!(err.to_string(), "unsupported embedding dimension 999");

        let err = IndexError::UnknownLanguage {
            language: "xx".into(),
        };
        assert!(err.to_string().contains("\"xx\""));
    }
}
