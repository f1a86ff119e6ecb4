//! Brute-force in-memory [`ChunkStore`] for tests and ephemeral indexes.
//!
//! Vector scoring is exact cosine similarity; lexical ranking counts query
//! tokens present in the chunk. Semantics mirror the Postgres backend
//! closely enough that the indexer, pipeline, and query engine can be
//! exercised without a database.

use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{IndexError, Result};
use crate::lexical::{self, LexicalQuery};
use crate::store::{ChunkStore, SearchOptions, validate_language};
use crate::types::{ChunkInsert, SearchHit};

#[derive(Debug, Clone)]
struct StoredChunk {
    id: i64,
    path: String,
    mtime: i64,
    content: String,
    start_line: usize,
    end_line: usize,
    embedding: Vec<f32>,
}

impl StoredChunk {
    fn hit(&self, score: f32) -> SearchHit {
        SearchHit {
            id: self.id,
            path: self.path.clone(),
            mtime: self.mtime,
            content: self.content.clone(),
            start_line: self.start_line,
            end_line: self.end_line,
            score,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    dimension: Option<usize>,
    next_id: i64,
    rows: Vec<StoredChunk>,
}

#[derive(Debug, Default)]
pub struct InMemoryChunkStore {
    inner: RwLock<Inner>,
}

impl InMemoryChunkStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_inner(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| IndexError::Other(format!("store lock poisoned: {e}")))
    }

    fn write_inner(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| IndexError::Other(format!("store lock poisoned: {e}")))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Token-overlap rank: for OR queries, the number of query tokens present;
/// for raw queries, 1.0 when every raw token is present.
fn lexical_rank(content: &str, query: &LexicalQuery) -> f32 {
    let tokens: HashSet<String> = lexical::raw_tokens(content).into_iter().collect();
    match query {
        LexicalQuery::Or(q) => {
            let matched = q.split(" | ").filter(|t| tokens.contains(*t)).count();
            #[allow(clippy::cast_precision_loss)]
            {
                matched as f32
            }
        }
        LexicalQuery::Raw(text) => {
            let raw = lexical::raw_tokens(text);
            if !raw.is_empty() && raw.iter().all(|t| tokens.contains(t)) {
                1.0
            } else {
                0.0
            }
        }
    }
}

impl ChunkStore for InMemoryChunkStore {
    async fn init(&self, dimension: usize) -> Result<()> {
        if dimension == 0 {
            return Err(IndexError::UnsupportedDimension { dimension });
        }
        let mut inner = self.write_inner()?;
        if let Some(active) = inner.dimension
            && active != dimension
        {
            return Err(IndexError::Other(format!(
                "store already initialized with dimension {active}"
            )));
        }
        inner.dimension = Some(dimension);
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[ChunkInsert<'_>]) -> Result<usize> {
        let mut inner = self.write_inner()?;
        let dimension = inner.dimension.ok_or(IndexError::NotInitialized)?;
        for chunk in chunks {
            if chunk.embedding.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    got: chunk.embedding.len(),
                });
            }
        }
        for chunk in chunks {
            inner.next_id += 1;
            let id = inner.next_id;
            inner.rows.push(StoredChunk {
                id,
                path: chunk.path.to_owned(),
                mtime: chunk.mtime,
                content: chunk.content.to_owned(),
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                embedding: chunk.embedding.to_vec(),
            });
        }
        Ok(chunks.len())
    }

    async fn delete_by_path(&self, path: &str) -> Result<u64> {
        let mut inner = self.write_inner()?;
        inner.dimension.ok_or(IndexError::NotInitialized)?;
        let before = inner.rows.len();
        inner.rows.retain(|row| row.path != path);
        Ok((before - inner.rows.len()) as u64)
    }

    async fn delete_by_paths(&self, paths: &[String]) -> Result<u64> {
        let mut inner = self.write_inner()?;
        inner.dimension.ok_or(IndexError::NotInitialized)?;
        let doomed: HashSet<&str> = paths.iter().map(String::as_str).collect();
        let before = inner.rows.len();
        inner.rows.retain(|row| !doomed.contains(row.path.as_str()));
        Ok((before - inner.rows.len()) as u64)
    }

    async fn clear_all(&self) -> Result<u64> {
        let mut inner = self.write_inner()?;
        inner.dimension.ok_or(IndexError::NotInitialized)?;
        let removed = inner.rows.len() as u64;
        inner.rows.clear();
        Ok(removed)
    }

    async fn max_mtime(&self) -> Result<Option<i64>> {
        let inner = self.read_inner()?;
        inner.dimension.ok_or(IndexError::NotInitialized)?;
        Ok(inner.rows.iter().map(|row| row.mtime).max())
    }

    async fn indexed_paths(&self) -> Result<Vec<String>> {
        let inner = self.read_inner()?;
        inner.dimension.ok_or(IndexError::NotInitialized)?;
        let mut paths: Vec<String> = inner
            .rows
            .iter()
            .map(|row| row.path.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        paths.sort();
        Ok(paths)
    }

    async fn count_chunks(&self) -> Result<u64> {
        let inner = self.read_inner()?;
        inner.dimension.ok_or(IndexError::NotInitialized)?;
        Ok(inner.rows.len() as u64)
    }

    async fn similarity_search(
        &self,
        vector: &[f32],
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let inner = self.read_inner()?;
        let dimension = inner.dimension.ok_or(IndexError::NotInitialized)?;
        if vector.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                got: vector.len(),
            });
        }

        let mut hits: Vec<SearchHit> = inner
            .rows
            .iter()
            .filter(|row| opts.scope.matches(&row.path))
            .map(|row| row.hit(cosine_similarity(vector, &row.embedding)))
            .filter(|hit| hit.score > opts.min_similarity)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(opts.limit);
        Ok(hits)
    }

    async fn fulltext_search(
        &self,
        query: &LexicalQuery,
        language: &str,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        validate_language(language)?;
        let inner = self.read_inner()?;
        inner.dimension.ok_or(IndexError::NotInitialized)?;

        let mut hits: Vec<SearchHit> = inner
            .rows
            .iter()
            .filter(|row| opts.scope.matches(&row.path))
            .map(|row| row.hit(lexical_rank(&row.content, query)))
            .filter(|hit| hit.score > 0.0)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(opts.limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::build_query;
    use crate::scope::ScopeSet;

    async fn insert_one(
        store: &InMemoryChunkStore,
        path: &str,
        mtime: i64,
        content: &str,
        embedding: &[f32],
    ) {
        let chunk = ChunkInsert {
            path,
            mtime,
            content,
            start_line: 1,
            end_line: 1,
            embedding,
        };
        store
            .insert_chunks(std::slice::from_ref(&chunk))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn operations_require_init() {
        let store = InMemoryChunkStore::new();
        let err = store.max_mtime().await.unwrap_err();
        assert!(matches!(err, IndexError::NotInitialized));

        let err = store.clear_all().await.unwrap_err();
        assert!(matches!(err, IndexError::NotInitialized));
    }

    #[tokio::test]
    async fn init_rejects_zero_dimension() {
        let store = InMemoryChunkStore::new();
        let err = store.init(0).await.unwrap_err();
        assert!(matches!(err, IndexError::UnsupportedDimension { dimension: 0 }));
    }

    #[tokio::test]
    async fn reinit_with_same_dimension_is_idempotent() {
        let store = InMemoryChunkStore::new();
        store.init(4).await.unwrap();
        store.init(4).await.unwrap();
        assert!(store.init(8).await.is_err());
    }

    #[tokio::test]
    async fn insert_validates_dimension() {
        let store = InMemoryChunkStore::new();
        store.init(4).await.unwrap();

        let chunk = ChunkInsert {
            path: "a.md",
            mtime: 1,
            content: "x",
            start_line: 1,
            end_line: 1,
            embedding: &[1.0, 2.0],
        };
        let err = store.insert_chunks(&[chunk]).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch { expected: 4, got: 2 }
        ));
    }

    #[tokio::test]
    async fn max_mtime_tracks_inserts() {
        let store = InMemoryChunkStore::new();
        store.init(2).await.unwrap();
        assert_eq!(store.max_mtime().await.unwrap(), None);

        insert_one(&store, "a.md", 100, "alpha", &[1.0, 0.0]).await;
        insert_one(&store, "b.md", 250, "beta", &[0.0, 1.0]).await;
        assert_eq!(store.max_mtime().await.unwrap(), Some(250));
    }

    #[tokio::test]
    async fn delete_by_paths_and_clear() {
        let store = InMemoryChunkStore::new();
        store.init(2).await.unwrap();
        insert_one(&store, "a.md", 1, "alpha", &[1.0, 0.0]).await;
        insert_one(&store, "a.md", 1, "alpha two", &[1.0, 0.0]).await;
        insert_one(&store, "b.md", 2, "beta", &[0.0, 1.0]).await;

        assert_eq!(store.delete_by_paths(&["a.md".into()]).await.unwrap(), 2);
        assert_eq!(store.indexed_paths().await.unwrap(), vec!["b.md"]);
        assert_eq!(store.clear_all().await.unwrap(), 1);
        assert_eq!(store.count_chunks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn similarity_orders_by_cosine() {
        let store = InMemoryChunkStore::new();
        store.init(2).await.unwrap();
        insert_one(&store, "far.md", 1, "far", &[0.0, 1.0]).await;
        insert_one(&store, "near.md", 1, "near", &[1.0, 0.1]).await;
        insert_one(&store, "exact.md", 1, "exact", &[1.0, 0.0]).await;

        let hits = store
            .similarity_search(&[1.0, 0.0], &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "exact.md");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].path, "near.md");
    }

    #[tokio::test]
    async fn min_similarity_is_strict() {
        let store = InMemoryChunkStore::new();
        store.init(2).await.unwrap();
        insert_one(&store, "orth.md", 1, "orthogonal", &[0.0, 1.0]).await;

        // Cosine here is exactly 0.0; a floor of 0.0 must exclude it.
        let hits = store
            .similarity_search(&[1.0, 0.0], &SearchOptions::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn similarity_respects_scope_and_limit() {
        let store = InMemoryChunkStore::new();
        store.init(2).await.unwrap();
        insert_one(&store, "keep/a.md", 1, "a", &[1.0, 0.0]).await;
        insert_one(&store, "keep/b.md", 1, "b", &[1.0, 0.05]).await;
        insert_one(&store, "skip/c.md", 1, "c", &[1.0, 0.01]).await;

        let mut scope = ScopeSet::default();
        scope.insert_folder("keep");
        let opts = SearchOptions {
            limit: 1,
            scope,
            ..SearchOptions::default()
        };
        let hits = store.similarity_search(&[1.0, 0.0], &opts).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "keep/a.md");
    }

    #[tokio::test]
    async fn fulltext_ranks_by_matched_tokens() {
        let store = InMemoryChunkStore::new();
        store.init(2).await.unwrap();
        insert_one(&store, "both.md", 1, "quick brown fox", &[1.0, 0.0]).await;
        insert_one(&store, "one.md", 1, "quick turtle", &[1.0, 0.0]).await;
        insert_one(&store, "none.md", 1, "slow snail", &[1.0, 0.0]).await;

        let hits = store
            .fulltext_search(&build_query("the quick fox"), "simple", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "both.md");
        assert_eq!(hits[1].path, "one.md");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn fulltext_raw_query_requires_all_tokens() {
        let store = InMemoryChunkStore::new();
        store.init(2).await.unwrap();
        insert_one(&store, "a.md", 1, "the cat and the hat", &[1.0, 0.0]).await;
        insert_one(&store, "b.md", 1, "a cat alone", &[1.0, 0.0]).await;

        let hits = store
            .fulltext_search(
                &LexicalQuery::Raw("the and".into()),
                "simple",
                &SearchOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "a.md");
    }

    #[tokio::test]
    async fn fulltext_rejects_unknown_language() {
        let store = InMemoryChunkStore::new();
        store.init(2).await.unwrap();
        let err = store
            .fulltext_search(&build_query("x y"), "klingon", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::UnknownLanguage { .. }));
    }
}
