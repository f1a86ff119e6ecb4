//! Incremental reindexing: discovery, tombstone cleanup, watermark
//! filtering, chunking, and the embedding pipeline, in that order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use glob::Pattern;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lodestone_embed::provider::EmbeddingProvider;

use crate::chunker::{Chunker, ChunkerConfig};
use crate::corpus::{Corpus, DocumentMeta};
use crate::error::{IndexError, Result};
use crate::pipeline::{EmbeddingPipeline, PendingChunk, PipelineConfig};
use crate::sanitize::{strip_markdown, strip_null_bytes};
use crate::scope::{ScopeSpec, resolve_scope};
use crate::store::ChunkStore;
use crate::types::ProgressTx;

#[derive(Debug, Clone, Default)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    pub pipeline: PipelineConfig,
    /// Glob patterns a path must match to be indexable. Empty keeps
    /// everything the corpus lists.
    pub include: Vec<String>,
    /// Glob patterns that drop a path even when it is included.
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReindexOptions {
    /// Restrict the run to these files, folders, and tags. Empty means the
    /// whole corpus.
    pub scope: ScopeSpec,
    /// Re-embed everything in scope instead of only files newer than the
    /// stored watermark.
    pub reindex_all: bool,
}

/// A document that could not be read. The run continues without it and its
/// previously indexed rows are left in place.
#[derive(Debug)]
pub struct FileFailure {
    pub path: String,
    pub error: IndexError,
}

#[derive(Debug, Default)]
pub struct IndexReport {
    /// Corpus documents that passed the include and exclude patterns.
    pub files_discovered: usize,
    /// Files whose chunks were submitted for embedding.
    pub files_indexed: usize,
    /// Chunks persisted by this run.
    pub chunks_indexed: usize,
    /// Chunks deleted by this run: tombstones plus replaced rows.
    pub chunks_removed: u64,
    pub aborted: bool,
    pub failures: Vec<FileFailure>,
    pub duration_ms: u64,
}

/// Synchronizes a chunk store with a corpus. Borrows its collaborators for
/// the duration of a run; construct one per command.
///
/// Runs take no internal lock. Two overlapping reindex runs against the same
/// table will interleave deletes and inserts; callers serialize them.
#[derive(Debug)]
pub struct Indexer<'a, S, C, P> {
    store: &'a S,
    corpus: &'a C,
    provider: Arc<P>,
    chunker: Chunker,
    pipeline: EmbeddingPipeline<P>,
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl<'a, S, C, P> Indexer<'a, S, C, P>
where
    S: ChunkStore,
    C: Corpus,
    P: EmbeddingProvider + 'static,
{
    /// # Errors
    ///
    /// Returns an error if an include or exclude pattern does not parse.
    pub fn new(
        store: &'a S,
        corpus: &'a C,
        provider: Arc<P>,
        config: IndexerConfig,
    ) -> Result<Self> {
        let include = compile_globs(&config.include)?;
        let exclude = compile_globs(&config.exclude)?;
        let pipeline = EmbeddingPipeline::new(Arc::clone(&provider), config.pipeline);
        Ok(Self {
            store,
            corpus,
            provider,
            chunker: Chunker::new(config.chunker),
            pipeline,
            include,
            exclude,
        })
    }

    fn keeps(&self, path: &str) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(path)) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(path))
    }

    /// Bring the store in sync with the corpus.
    ///
    /// Tombstoned paths are removed first, always against the full corpus
    /// listing, so a scoped run never deletes rows that merely fall outside
    /// its scope. Candidates are then selected: files newer than the stored
    /// mtime watermark by default, everything in scope with
    /// [`ReindexOptions::reindex_all`]. Each candidate that reads cleanly
    /// has its old rows deleted before its new chunks are inserted, so an
    /// interrupted run never leaves a path with two generations of chunks.
    ///
    /// Cancellation ends the run with `aborted` set in the report; work
    /// already persisted stays in place.
    ///
    /// # Errors
    ///
    /// Returns an error on discovery, storage, or embedding failure.
    /// Unreadable documents do not fail the run; they are recorded in
    /// [`IndexReport::failures`].
    pub async fn reindex(
        &self,
        options: &ReindexOptions,
        cancel: &CancellationToken,
        progress: Option<&ProgressTx>,
    ) -> Result<IndexReport> {
        let started = Instant::now();
        let mut report = IndexReport::default();
        if cancel.is_cancelled() {
            report.aborted = true;
            return Ok(report);
        }

        self.store.init(self.provider.dimension()).await?;

        let listing = self.corpus.list().await?;
        let indexable: Vec<DocumentMeta> = listing
            .into_iter()
            .filter(|meta| self.keeps(&meta.path))
            .collect();
        report.files_discovered = indexable.len();

        let stored = self.store.indexed_paths().await?;
        let present: HashSet<&str> = indexable.iter().map(|m| m.path.as_str()).collect();
        let stale: Vec<String> = stored
            .iter()
            .filter(|path| !present.contains(path.as_str()))
            .cloned()
            .collect();
        if !stale.is_empty() {
            let removed = self.store.delete_by_paths(&stale).await?;
            debug!(paths = stale.len(), chunks = removed, "removed tombstoned paths");
            report.chunks_removed += removed;
        }

        let scope = resolve_scope(self.corpus, &options.scope).await?;
        let mut candidates: Vec<&DocumentMeta> = indexable
            .iter()
            .filter(|meta| scope.matches(&meta.path))
            .collect();

        if options.reindex_all {
            if scope.is_empty() {
                report.chunks_removed += self.store.clear_all().await?;
            } else {
                let scoped: Vec<String> = stored
                    .iter()
                    .filter(|path| scope.matches(path))
                    .cloned()
                    .collect();
                if !scoped.is_empty() {
                    report.chunks_removed += self.store.delete_by_paths(&scoped).await?;
                }
            }
        } else if let Some(watermark) = self.store.max_mtime().await? {
            candidates.retain(|meta| meta.mtime > watermark);
        }

        if candidates.is_empty() {
            debug!(files = report.files_discovered, "index up to date");
            report.duration_ms = elapsed_ms(started);
            return Ok(report);
        }
        info!(files = candidates.len(), "reindexing");

        let mut pending: Vec<PendingChunk> = Vec::new();
        let mut replace: Vec<String> = Vec::new();
        for meta in &candidates {
            if cancel.is_cancelled() {
                report.aborted = true;
                report.duration_ms = elapsed_ms(started);
                return Ok(report);
            }
            let raw = match self.corpus.read(&meta.path).await {
                Ok(text) => text,
                Err(error) => {
                    warn!(path = %meta.path, %error, "skipping unreadable document");
                    report.failures.push(FileFailure {
                        path: meta.path.clone(),
                        error,
                    });
                    continue;
                }
            };
            replace.push(meta.path.clone());
            let text = strip_null_bytes(&raw);
            let chunks = self.chunker.split(&text);
            if chunks.is_empty() {
                continue;
            }
            report.files_indexed += 1;
            for chunk in chunks {
                pending.push(PendingChunk {
                    path: meta.path.clone(),
                    mtime: meta.mtime,
                    embed_text: strip_markdown(&chunk.content),
                    content: chunk.content,
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                });
            }
        }

        if !replace.is_empty() {
            report.chunks_removed += self.store.delete_by_paths(&replace).await?;
        }
        let stats = self
            .pipeline
            .run(self.store, pending, report.files_indexed, cancel, progress)
            .await?;
        report.chunks_indexed = stats.persisted_chunks;
        report.aborted = stats.aborted;
        report.duration_ms = elapsed_ms(started);
        info!(
            files = report.files_indexed,
            chunks = report.chunks_indexed,
            removed = report.chunks_removed,
            aborted = report.aborted,
            "reindex finished"
        );
        Ok(report)
    }
}

fn compile_globs(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns.iter().map(|p| Ok(Pattern::new(p)?)).collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
