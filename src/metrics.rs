use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing indexing activity.
#[derive(Debug, Default)]
pub struct IndexingMetrics {
    documents_indexed: AtomicU64,
    chunks_embedded: AtomicU64,
    embedding_batches: AtomicU64,
    documents_summarized: AtomicU64,
    documents_deleted: AtomicU64,
}

impl IndexingMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an embedded document with its chunk and batch counts.
    pub fn record_embedded_document(&self, chunk_count: u64, batch_count: u64) {
        self.documents_indexed.fetch_add(1, Ordering::Relaxed);
        self.chunks_embedded
            .fetch_add(chunk_count, Ordering::Relaxed);
        self.embedding_batches
            .fetch_add(batch_count, Ordering::Relaxed);
    }

    /// Record a document folded into the summary indexes.
    pub fn record_summarized_document(&self) {
        self.documents_summarized.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a document removed from an index.
    pub fn record_deleted_document(&self) {
        self.documents_deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            chunks_embedded: self.chunks_embedded.load(Ordering::Relaxed),
            embedding_batches: self.embedding_batches.load(Ordering::Relaxed),
            documents_summarized: self.documents_summarized.load(Ordering::Relaxed),
            documents_deleted: self.documents_deleted.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of indexing counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Documents embedded and upserted since startup.
    pub documents_indexed: u64,
    /// Chunks embedded across all documents.
    pub chunks_embedded: u64,
    /// Embedding batches sent to the provider.
    pub embedding_batches: u64,
    /// Documents folded into summary indexes.
    pub documents_summarized: u64,
    /// Documents removed from an index.
    pub documents_deleted: u64,
}
