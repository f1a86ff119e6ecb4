//! Persistence contract shared by the Postgres and in-memory backends.

use crate::error::{IndexError, Result};
use crate::lexical::LexicalQuery;
use crate::scope::ScopeSet;
use crate::types::{ChunkInsert, SearchHit};

/// Text search configurations accepted for lexical queries. Names are
/// interpolated into SQL, so everything outside this list is rejected.
pub const LANGUAGES: &[&str] = &[
    "simple",
    "english",
    "french",
    "german",
    "portuguese",
    "russian",
    "spanish",
];

pub(crate) fn validate_language(language: &str) -> Result<()> {
    if LANGUAGES.contains(&language) {
        Ok(())
    } else {
        Err(IndexError::UnknownLanguage {
            language: language.to_owned(),
        })
    }
}

/// Options shared by both search channels.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Strictly-greater-than floor on cosine similarity. Applies to the
    /// vector channel only.
    pub min_similarity: f32,
    pub scope: ScopeSet,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            min_similarity: 0.0,
            scope: ScopeSet::default(),
        }
    }
}

/// Storage backend for embedded chunks.
///
/// Implementations must be initialized with the embedding dimension before
/// any other call; everything else returns [`IndexError::NotInitialized`]
/// until then.
pub trait ChunkStore: Send + Sync {
    /// Validate `dimension` and prepare the backing storage for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimension is unsupported or storage cannot be
    /// prepared.
    fn init(&self, dimension: usize) -> impl Future<Output = Result<()>> + Send;

    /// Insert chunk records, returning how many were written.
    ///
    /// # Errors
    ///
    /// Returns an error if any embedding width disagrees with the active
    /// dimension or the write fails.
    fn insert_chunks(&self, chunks: &[ChunkInsert<'_>]) -> impl Future<Output = Result<usize>> + Send;

    /// Delete every chunk for one document path. Returns the removed count.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete_by_path(&self, path: &str) -> impl Future<Output = Result<u64>> + Send;

    /// Delete every chunk for the given paths. Returns the removed count.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn delete_by_paths(&self, paths: &[String]) -> impl Future<Output = Result<u64>> + Send;

    /// Delete everything. Returns the removed count.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    fn clear_all(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Highest stored document mtime, or `None` when nothing is indexed.
    /// This is the incremental-reindex watermark.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn max_mtime(&self) -> impl Future<Output = Result<Option<i64>>> + Send;

    /// Distinct document paths currently indexed.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn indexed_paths(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Number of stored chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    fn count_chunks(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Nearest chunks by cosine similarity, descending. Hits score strictly
    /// above `min_similarity` and inside the scope.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector width is wrong or the query fails.
    fn similarity_search(
        &self,
        vector: &[f32],
        opts: &SearchOptions,
    ) -> impl Future<Output = Result<Vec<SearchHit>>> + Send;

    /// Full-text matches ranked by the backend's relevance score,
    /// descending.
    ///
    /// # Errors
    ///
    /// Returns an error if the language is unknown or the query fails.
    fn fulltext_search(
        &self,
        query: &LexicalQuery,
        language: &str,
        opts: &SearchOptions,
    ) -> impl Future<Output = Result<Vec<SearchHit>>> + Send;
}
