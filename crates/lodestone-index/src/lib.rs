//! Chunking, incremental indexing, and hybrid retrieval.
//!
//! Documents from a [`corpus::Corpus`] are split into overlapping chunks,
//! embedded through a [`pipeline::EmbeddingPipeline`], and stored in a
//! [`store::ChunkStore`] (Postgres with pgvector, or in memory). The
//! [`indexer::Indexer`] keeps the store in sync using an mtime watermark;
//! the [`query::QueryEngine`] serves vector, full-text, and rank-fused
//! hybrid queries.

pub mod chunker;
pub mod corpus;
pub mod error;
pub mod in_memory_store;
pub mod indexer;
pub mod lexical;
pub mod pipeline;
pub mod postgres;
pub mod query;
pub mod sanitize;
pub mod scope;
pub mod store;
pub mod types;

pub use error::{IndexError, Result};
