//! Record types shared across the store, pipeline, and query layers.

/// One embedded chunk ready for insertion.
#[derive(Debug, Clone)]
pub struct ChunkInsert<'a> {
    pub path: &'a str,
    /// Source document modification time, epoch seconds.
    pub mtime: i64,
    pub content: &'a str,
    /// 1-based inclusive line span within the source document.
    pub start_line: usize,
    pub end_line: usize,
    pub embedding: &'a [f32],
}

/// A ranked search result. `score` is cosine similarity for the vector
/// channel, the backend rank value for the lexical channel, and the
/// normalized fused score for hybrid queries.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: i64,
    pub path: String,
    pub mtime: i64,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f32,
}

/// Progress snapshot emitted after each persisted batch. `completed_chunks`
/// counts embedded and skipped chunks alike, so it reaches `total_chunks`
/// exactly when the run finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexProgress {
    pub completed_chunks: usize,
    pub total_chunks: usize,
    pub total_files: usize,
}

/// Channel on which the pipeline streams [`IndexProgress`] updates.
pub type ProgressTx = tokio::sync::mpsc::UnboundedSender<IndexProgress>;
