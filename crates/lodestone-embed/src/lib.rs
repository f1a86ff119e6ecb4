//! Embedding provider abstraction.
//!
//! One capability-tagged trait ([`provider::EmbeddingProvider`]) over a
//! batch-capable OpenAI-compatible HTTP backend and a per-item Ollama backend,
//! with shared retry/backoff and a scriptable mock behind the `mock` feature.

pub mod any;
pub mod error;
pub(crate) mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod retry;

pub use error::{EmbedError, Result};
