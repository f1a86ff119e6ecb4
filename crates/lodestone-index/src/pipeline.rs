//! Embedding pipeline: strictly sequential batches, bounded per-item
//! concurrency, one store write per batch.
//!
//! Memory stays proportional to the batch size because embeddings are
//! persisted and dropped as soon as their batch completes. Batch-capable
//! providers get one call per batch; the rest are driven one text at a time
//! under a concurrency limit.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use lodestone_embed::provider::EmbeddingProvider;

use crate::error::{IndexError, Result};
use crate::store::ChunkStore;
use crate::types::{ChunkInsert, IndexProgress, ProgressTx};

/// Batches processed between cooperative pauses.
const PAUSE_EVERY_BATCHES: usize = 10;
const PAUSE: Duration = Duration::from_millis(100);

/// One chunk waiting on an embedding. `embed_text` is the cleaned text sent
/// to the provider; `content` is persisted verbatim. Chunks with empty
/// `embed_text` are skipped but still counted in progress.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub path: String,
    pub mtime: i64,
    pub content: String,
    pub embed_text: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Chunks per provider batch and per store write.
    pub batch_size: usize,
    /// Concurrent provider calls for batch-incapable providers.
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            concurrency: 8,
        }
    }
}

/// Counters for one pipeline run. When `aborted` is set the run was cut
/// short by cancellation and the counters cover only the batches that
/// completed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub embedded_chunks: usize,
    pub skipped_chunks: usize,
    pub persisted_chunks: usize,
    pub aborted: bool,
}

#[derive(Debug)]
pub struct EmbeddingPipeline<P> {
    provider: Arc<P>,
    config: PipelineConfig,
}

impl<P: EmbeddingProvider + 'static> EmbeddingPipeline<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: PipelineConfig) -> Self {
        Self { provider, config }
    }

    /// Embed and persist `chunks` batch by batch. Progress is reported after
    /// every persisted batch. Cancellation is observed between batches and
    /// before each per-item call; it ends the run with `aborted` set in the
    /// returned stats and leaves already-persisted batches in place.
    ///
    /// # Errors
    ///
    /// Returns the first embedding or storage error. Provider configuration
    /// errors are never retried.
    pub async fn run<S: ChunkStore>(
        &self,
        store: &S,
        chunks: Vec<PendingChunk>,
        total_files: usize,
        cancel: &CancellationToken,
        progress: Option<&ProgressTx>,
    ) -> Result<PipelineStats> {
        let total_chunks = chunks.len();
        let completed = Arc::new(AtomicUsize::new(0));
        let batch_size = self.config.batch_size.max(1);
        let mut stats = PipelineStats::default();

        for (batch_index, batch) in chunks.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                stats.aborted = true;
                return Ok(stats);
            }
            if batch_index > 0 && batch_index % PAUSE_EVERY_BATCHES == 0 {
                tokio::time::sleep(PAUSE).await;
            }

            let vectors = if self.provider.supports_batch() {
                self.embed_batch(batch).await?
            } else {
                match self.embed_each(batch, cancel, &completed).await {
                    Ok(vectors) => vectors,
                    Err(IndexError::Aborted) => {
                        stats.aborted = true;
                        return Ok(stats);
                    }
                    Err(e) => return Err(e),
                }
            };

            let mut records = Vec::with_capacity(batch.len());
            let mut skipped_in_batch = 0;
            for (chunk, vector) in batch.iter().zip(&vectors) {
                match vector {
                    Some(v) => records.push(ChunkInsert {
                        path: &chunk.path,
                        mtime: chunk.mtime,
                        content: &chunk.content,
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        embedding: v,
                    }),
                    None => skipped_in_batch += 1,
                }
            }

            if !records.is_empty() {
                stats.persisted_chunks += store.insert_chunks(&records).await?;
            }
            stats.embedded_chunks += records.len();
            stats.skipped_chunks += skipped_in_batch;

            if self.provider.supports_batch() {
                completed.fetch_add(batch.len(), Ordering::SeqCst);
            } else {
                // Per-item workers already counted their own successes.
                completed.fetch_add(skipped_in_batch, Ordering::SeqCst);
            }
            if let Some(tx) = progress {
                let _ = tx.send(IndexProgress {
                    completed_chunks: completed.load(Ordering::SeqCst),
                    total_chunks,
                    total_files,
                });
            }
        }
        Ok(stats)
    }

    /// One provider call for the whole batch. Empty texts keep their slot as
    /// `None`.
    async fn embed_batch(&self, batch: &[PendingChunk]) -> Result<Vec<Option<Vec<f32>>>> {
        let texts: Vec<String> = batch
            .iter()
            .filter(|c| !c.embed_text.is_empty())
            .map(|c| c.embed_text.clone())
            .collect();
        if texts.is_empty() {
            return Ok(vec![None; batch.len()]);
        }

        let vectors = self.provider.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(IndexError::Other(format!(
                "provider returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }

        let mut supplied = vectors.into_iter();
        Ok(batch
            .iter()
            .map(|c| {
                if c.embed_text.is_empty() {
                    None
                } else {
                    supplied.next()
                }
            })
            .collect())
    }

    /// One provider call per chunk, bounded by the configured concurrency.
    async fn embed_each(
        &self,
        batch: &[PendingChunk],
        cancel: &CancellationToken,
        completed: &Arc<AtomicUsize>,
    ) -> Result<Vec<Option<Vec<f32>>>> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut join_set: JoinSet<Result<(usize, Vec<f32>)>> = JoinSet::new();

        for (slot, chunk) in batch.iter().enumerate() {
            if chunk.embed_text.is_empty() {
                continue;
            }
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let completed = Arc::clone(completed);
            let text = chunk.embed_text.clone();
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| IndexError::Other("semaphore closed".to_owned()))?;
                if cancel.is_cancelled() {
                    return Err(IndexError::Aborted);
                }
                let vector = provider.embed(&text).await?;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok((slot, vector))
            });
        }

        let mut slots: Vec<Option<Vec<f32>>> = vec![None; batch.len()];
        let mut first_err: Option<IndexError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok((slot, vector))) => slots[slot] = Some(vector),
                Ok(Err(e)) => {
                    if first_err.is_none() {
                        join_set.abort_all();
                        first_err = Some(e);
                    }
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(IndexError::Other(format!("embed task failed: {e}")));
                    }
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use lodestone_embed::mock::{MockEmbedder, MockFailure};
    use tokio::sync::mpsc;

    use super::*;
    use crate::in_memory_store::InMemoryChunkStore;

    fn pending(path: &str, content: &str) -> PendingChunk {
        PendingChunk {
            path: path.to_owned(),
            mtime: 100,
            content: content.to_owned(),
            embed_text: content.to_owned(),
            start_line: 1,
            end_line: 1,
        }
    }

    fn chunks(n: usize) -> Vec<PendingChunk> {
        (0..n).map(|i| pending(&format!("doc{i}.md"), &format!("content {i}"))).collect()
    }

    async fn ready_store() -> InMemoryChunkStore {
        let store = InMemoryChunkStore::new();
        store.init(4).await.unwrap();
        store
    }

    #[tokio::test]
    async fn batch_mode_one_call_per_batch() {
        let provider = Arc::new(MockEmbedder::new(4));
        let pipeline = EmbeddingPipeline::new(
            Arc::clone(&provider),
            PipelineConfig {
                batch_size: 2,
                concurrency: 4,
            },
        );
        let store = ready_store().await;
        let cancel = CancellationToken::new();

        let stats = pipeline
            .run(&store, chunks(5), 5, &cancel, None)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 3);
        assert_eq!(stats.persisted_chunks, 5);
        assert_eq!(stats.skipped_chunks, 0);
        assert_eq!(store.count_chunks().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn per_item_mode_one_call_per_chunk() {
        let provider = Arc::new(MockEmbedder::per_item(4));
        let pipeline = EmbeddingPipeline::new(Arc::clone(&provider), PipelineConfig::default());
        let store = ready_store().await;
        let cancel = CancellationToken::new();

        let stats = pipeline
            .run(&store, chunks(3), 3, &cancel, None)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 3);
        assert_eq!(stats.persisted_chunks, 3);
    }

    #[tokio::test]
    async fn progress_reported_after_each_batch() {
        let provider = Arc::new(MockEmbedder::new(4));
        let pipeline = EmbeddingPipeline::new(
            provider,
            PipelineConfig {
                batch_size: 2,
                concurrency: 4,
            },
        );
        let store = ready_store().await;
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        pipeline
            .run(&store, chunks(5), 2, &cancel, Some(&tx))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert_eq!(
            events.last().unwrap(),
            &IndexProgress {
                completed_chunks: 5,
                total_chunks: 5,
                total_files: 2,
            }
        );
        assert!(events.windows(2).all(|w| w[0].completed_chunks < w[1].completed_chunks));
    }

    #[tokio::test]
    async fn empty_embed_text_skipped_but_counted() {
        let provider = Arc::new(MockEmbedder::new(4));
        let pipeline = EmbeddingPipeline::new(Arc::clone(&provider), PipelineConfig::default());
        let store = ready_store().await;
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut input = chunks(3);
        input[1].embed_text = String::new();
        let stats = pipeline
            .run(&store, input, 3, &cancel, Some(&tx))
            .await
            .unwrap();

        assert_eq!(stats.persisted_chunks, 2);
        assert_eq!(stats.skipped_chunks, 1);
        assert_eq!(store.count_chunks().await.unwrap(), 2);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.completed_chunks, 3);
    }

    #[tokio::test]
    async fn config_error_aborts_without_retry() {
        let provider = Arc::new(MockEmbedder::failing(MockFailure::Config));
        let pipeline = EmbeddingPipeline::new(Arc::clone(&provider), PipelineConfig::default());
        let store = ready_store().await;
        let cancel = CancellationToken::new();

        let err = pipeline
            .run(&store, chunks(3), 3, &cancel, None)
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert_eq!(provider.calls(), 1);
        assert_eq!(store.count_chunks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upstream_failure_propagates() {
        let provider = Arc::new(MockEmbedder::failing(MockFailure::Always));
        let pipeline = EmbeddingPipeline::new(provider, PipelineConfig::default());
        let store = ready_store().await;
        let cancel = CancellationToken::new();

        let err = pipeline
            .run(&store, chunks(2), 2, &cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Embed(_)));
        assert_eq!(store.count_chunks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pre_cancelled_token_stops_before_any_call() {
        let provider = Arc::new(MockEmbedder::new(4));
        let pipeline = EmbeddingPipeline::new(Arc::clone(&provider), PipelineConfig::default());
        let store = ready_store().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = pipeline
            .run(&store, chunks(3), 3, &cancel, None)
            .await
            .unwrap();
        assert!(stats.aborted);
        assert_eq!(stats.persisted_chunks, 0);
        assert_eq!(provider.calls(), 0);
        assert_eq!(store.count_chunks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancellation_keeps_persisted_batches() {
        let provider = Arc::new(MockEmbedder::new(4).with_delay(20));
        let pipeline = EmbeddingPipeline::new(
            Arc::clone(&provider),
            PipelineConfig {
                batch_size: 1,
                concurrency: 1,
            },
        );
        let store = ready_store().await;
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Cancel as soon as the first batch lands. On a current-thread
        // runtime the watcher runs during the second batch's embed sleep, so
        // exactly two batches persist.
        let watcher_cancel = cancel.clone();
        let watcher = tokio::spawn(async move {
            let _ = rx.recv().await;
            watcher_cancel.cancel();
        });

        let stats = pipeline
            .run(&store, chunks(4), 4, &cancel, Some(&tx))
            .await
            .unwrap();
        watcher.await.unwrap();

        assert!(stats.aborted);
        assert_eq!(stats.persisted_chunks, 2);
        assert_eq!(store.count_chunks().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_input_is_a_noop() {
        let provider = Arc::new(MockEmbedder::new(4));
        let pipeline = EmbeddingPipeline::new(Arc::clone(&provider), PipelineConfig::default());
        let store = ready_store().await;
        let cancel = CancellationToken::new();

        let stats = pipeline
            .run(&store, Vec::new(), 0, &cancel, None)
            .await
            .unwrap();
        assert_eq!(stats, PipelineStats::default());
        assert_eq!(provider.calls(), 0);
    }
}
