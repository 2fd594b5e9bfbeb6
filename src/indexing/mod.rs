//! Indexers that turn files into vector-store points and summary index entries.

mod embedding_indexer;
mod summary_indexer;
pub mod summary_store;

pub use embedding_indexer::{EmbeddingIndexer, IndexingError, IndexingOutcome};
pub use summary_indexer::{
    COLLECTION_SUMMARY_PROMPT, DOCUMENT_SUMMARY_PROMPT, NO_SUMMARY, SummaryIndexError,
    SummaryIndexer, SummarySettings,
};

/// Batching and concurrency knobs for the embedding indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexerSettings {
    /// Chunks per embedding request.
    pub embed_batch_size: usize,
    /// Upper bound on concurrent embedding requests.
    pub max_workers: usize,
    /// Chunks per vector-store upsert.
    pub upsert_batch_size: usize,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            embed_batch_size: 100,
            max_workers: 20,
            upsert_batch_size: 1000,
        }
    }
}
