//! Query execution: vector, lexical, and fused hybrid search.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use lodestone_embed::provider::EmbeddingProvider;

use crate::error::Result;
use crate::lexical::build_query;
use crate::scope::ScopeSet;
use crate::store::{ChunkStore, SearchOptions, validate_language};
use crate::types::SearchHit;

/// Reciprocal rank fusion constant. Dampens the gap between neighboring
/// ranks so that agreement between channels outweighs a single channel's
/// top position.
const RRF_K: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub limit: usize,
    /// Vector hits at or below this cosine similarity are dropped.
    pub min_similarity: f32,
    /// Text search language for the lexical channel.
    pub language: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            min_similarity: 0.0,
            language: "simple".to_owned(),
        }
    }
}

/// Runs queries against an initialized chunk store. Borrows the store;
/// construct one per command.
pub struct QueryEngine<'a, S, P> {
    store: &'a S,
    provider: Arc<P>,
    config: QueryConfig,
}

impl<'a, S, P> QueryEngine<'a, S, P>
where
    S: ChunkStore,
    P: EmbeddingProvider,
{
    /// # Errors
    ///
    /// Returns an error if the configured language is unknown.
    pub fn new(store: &'a S, provider: Arc<P>, config: QueryConfig) -> Result<Self> {
        validate_language(&config.language)?;
        Ok(Self {
            store,
            provider,
            config,
        })
    }

    /// Nearest chunks by embedding similarity. Empty queries return no hits.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the search fails.
    pub async fn similarity_query(&self, text: &str, scope: ScopeSet) -> Result<Vec<SearchHit>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.provider.embed(text).await?;
        self.store
            .similarity_search(&vector, &self.options(scope))
            .await
    }

    /// Full-text matches for `text`. Empty queries return no hits.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    pub async fn fulltext_query(&self, text: &str, scope: ScopeSet) -> Result<Vec<SearchHit>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = build_query(text);
        self.store
            .fulltext_search(&query, &self.config.language, &self.options(scope))
            .await
    }

    /// Vector and lexical search fused with reciprocal rank fusion. Both
    /// channels run concurrently; scores are normalized so the top hit is
    /// exactly 1.0. Empty queries return no hits.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or either search fails.
    pub async fn hybrid_query(&self, text: &str, scope: ScopeSet) -> Result<Vec<SearchHit>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.provider.embed(text).await?;
        let query = build_query(text);
        let opts = self.options(scope);
        let (vector_hits, lexical_hits) = tokio::join!(
            self.store.similarity_search(&vector, &opts),
            self.store.fulltext_search(&query, &self.config.language, &opts),
        );
        let (vector_hits, lexical_hits) = (vector_hits?, lexical_hits?);
        debug!(
            vector = vector_hits.len(),
            lexical = lexical_hits.len(),
            "fusing channels"
        );
        Ok(fuse(vector_hits, lexical_hits, self.config.limit))
    }

    fn options(&self, scope: ScopeSet) -> SearchOptions {
        SearchOptions {
            limit: self.config.limit,
            min_similarity: self.config.min_similarity,
            scope,
        }
    }
}

/// Merge the two ranked lists with RRF and normalize by the best fused
/// score. When one channel is empty the other passes through: vector hits
/// keep their cosine scores, lexical hits get their ranks remapped into
/// (0, 1].
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn fuse(vector: Vec<SearchHit>, lexical: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    if lexical.is_empty() {
        let mut hits = vector;
        hits.truncate(limit);
        return hits;
    }
    if vector.is_empty() {
        let total = lexical.len();
        let mut hits = lexical;
        for (idx, hit) in hits.iter_mut().enumerate() {
            hit.score = ((total - idx) as f64 / total as f64) as f32;
        }
        hits.truncate(limit);
        return hits;
    }

    let mut fused: HashMap<(String, i64), (SearchHit, f64)> = HashMap::new();
    // Vector ranks are 1-based, lexical ranks 0-based.
    for (idx, hit) in vector.into_iter().enumerate() {
        let rrf = 1.0 / (RRF_K + (idx + 1) as f64);
        fused
            .entry((hit.path.clone(), hit.id))
            .and_modify(|(_, score)| *score += rrf)
            .or_insert((hit, rrf));
    }
    for (idx, hit) in lexical.into_iter().enumerate() {
        let rrf = 1.0 / (RRF_K + idx as f64);
        fused
            .entry((hit.path.clone(), hit.id))
            .and_modify(|(_, score)| *score += rrf)
            .or_insert((hit, rrf));
    }

    let mut merged: Vec<(SearchHit, f64)> = fused.into_values().collect();
    merged.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (a.0.path.as_str(), a.0.id).cmp(&(b.0.path.as_str(), b.0.id)))
    });
    let max = merged.first().map_or(0.0, |(_, score)| *score);

    merged
        .into_iter()
        .take(limit)
        .map(|(mut hit, score)| {
            hit.score = if max > 0.0 { (score / max) as f32 } else { 0.0 };
            hit
        })
        .collect()
}


#[cfg(test)]
mod proptest_fusion {
    use proptest::prelude::*;

    use super::{SearchHit, fuse};

    fn hits_from(ids: &[usize]) -> Vec<SearchHit> {
        ids.iter()
            .map(|&id| SearchHit {
                id: i64::try_from(id).unwrap(),
                path: format!("doc{id}.md"),
                mtime: 0,
                content: String::new(),
                start_line: 1,
                end_line: 1,
                score: 0.5,
            })
            .collect()
    }

    proptest! {
        #[test]
        fn top_fused_hit_scores_exactly_one(
            vector_ids in proptest::collection::hash_set(0usize..8, 1..6),
            lexical_ids in proptest::collection::hash_set(0usize..8, 1..6),
        ) {
            let vector: Vec<usize> = vector_ids.into_iter().collect();
            let lexical: Vec<usize> = lexical_ids.into_iter().collect();
            let fused = fuse(hits_from(&vector), hits_from(&lexical), 10);

            prop_assert!(!fused.is_empty());
            prop_assert_eq!(fused[0].score, 1.0);
        }

        #[test]
        fn fused_scores_are_sorted_and_bounded(
            vector_ids in proptest::collection::hash_set(0usize..8, 1..6),
            lexical_ids in proptest::collection::hash_set(0usize..8, 1..6),
        ) {
            let vector: Vec<usize> = vector_ids.into_iter().collect();
            let lexical: Vec<usize> = lexical_ids.into_iter().collect();
            let fused = fuse(hits_from(&vector), hits_from(&lexical), 10);

            prop_assert!(fused.windows(2).all(|w| w[0].score >= w[1].score));
            prop_assert!(fused.iter().all(|h| h.score > 0.0 && h.score <= 1.0));
        }
    }
}
