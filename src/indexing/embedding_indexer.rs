use super::IndexerSettings;
use crate::chunking::Splitter;
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::metrics::IndexingMetrics;
use crate::readers::{EnhancedPdfConfig, ReaderContext, ReaderError, ReaderKind};
use crate::types::{Chunk, DataSourceId};
use crate::vector_store::{VectorStore, VectorStoreError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

/// Errors surfaced while embedding and upserting a document.
#[derive(Debug, Error)]
pub enum IndexingError {
    /// Reader resolution or extraction failed.
    #[error(transparent)]
    Reader(#[from] ReaderError),
    /// The embedding provider failed for one batch.
    #[error("Embedding batch {batch} failed: {source}")]
    Embedding {
        /// Position of the failing batch.
        batch: usize,
        /// Provider error.
        #[source]
        source: EmbeddingClientError,
    },
    /// The provider returned a different number of vectors than texts.
    #[error("Embedding batch {batch} returned {actual} vectors for {expected} chunks")]
    EmbeddingCountMismatch {
        /// Position of the offending batch.
        batch: usize,
        /// Chunks sent.
        expected: usize,
        /// Vectors received.
        actual: usize,
    },
    /// The vector store rejected an operation.
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    /// A background task failed to run to completion.
    #[error("Indexing worker failed: {0}")]
    Worker(String),
    /// The caller-imposed deadline elapsed before indexing finished.
    #[error("Indexing did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

/// Result of indexing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingOutcome {
    /// Document that was indexed.
    pub document_id: String,
    /// Chunks produced by the reader.
    pub chunks: usize,
    /// Embedding batches sent.
    pub batches: usize,
    /// Points written to the vector store.
    pub upserted: usize,
}

/// Reads a file, embeds its chunks concurrently and bulk-upserts them into one collection.
pub struct EmbeddingIndexer {
    data_source_id: DataSourceId,
    splitter: Arc<dyn Splitter>,
    embedding_client: Arc<dyn EmbeddingClient>,
    vector_store: Arc<dyn VectorStore>,
    settings: IndexerSettings,
    enhanced_pdf: EnhancedPdfConfig,
    metrics: Arc<IndexingMetrics>,
}

impl EmbeddingIndexer {
    /// Build an indexer for `data_source_id` with default batching.
    pub fn new(
        data_source_id: DataSourceId,
        splitter: Arc<dyn Splitter>,
        embedding_client: Arc<dyn EmbeddingClient>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            data_source_id,
            splitter,
            embedding_client,
            vector_store,
            settings: IndexerSettings::default(),
            enhanced_pdf: EnhancedPdfConfig::default(),
            metrics: Arc::new(IndexingMetrics::new()),
        }
    }

    /// Override batching and concurrency.
    pub fn with_settings(mut self, settings: IndexerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Enable or configure external PDF conversion.
    pub fn with_enhanced_pdf(mut self, enhanced_pdf: EnhancedPdfConfig) -> Self {
        self.enhanced_pdf = enhanced_pdf;
        self
    }

    /// Share a metrics registry with other indexers.
    pub fn with_metrics(mut self, metrics: Arc<IndexingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Metrics registry updated by this indexer.
    pub fn metrics(&self) -> &Arc<IndexingMetrics> {
        &self.metrics
    }

    /// Read, embed and upsert one file.
    ///
    /// Nothing is written unless every batch embedded successfully. Upserts happen in document
    /// order after all batches complete.
    pub async fn index_file(
        &self,
        path: &Path,
        document_id: &str,
    ) -> Result<IndexingOutcome, IndexingError> {
        let kind = ReaderKind::for_path(path)?;
        let ctx = ReaderContext::new(self.splitter.clone(), document_id, self.data_source_id)
            .with_enhanced_pdf(self.enhanced_pdf.clone());
        let chunks = read_chunks(kind, ctx, path).await?;
        let chunk_count = chunks.len();

        tracing::debug!(
            document_id,
            data_source_id = self.data_source_id,
            chunks = chunk_count,
            "Embedding document chunks"
        );
        let batch_count = chunk_count.div_ceil(self.settings.embed_batch_size.max(1));
        let embedded = embed_in_batches(
            self.embedding_client.clone(),
            chunks,
            self.settings.embed_batch_size,
            self.settings.max_workers,
        )
        .await?;

        let upserted = self.upsert_in_batches(embedded).await?;
        self.metrics
            .record_embedded_document(chunk_count as u64, batch_count as u64);
        tracing::info!(
            document_id,
            data_source_id = self.data_source_id,
            chunks = chunk_count,
            batches = batch_count,
            upserted,
            "Indexed document"
        );

        Ok(IndexingOutcome {
            document_id: document_id.to_string(),
            chunks: chunk_count,
            batches: batch_count,
            upserted,
        })
    }

    /// [`Self::index_file`] bounded by `deadline`; on expiry all workers are cancelled.
    pub async fn index_file_within(
        &self,
        path: &Path,
        document_id: &str,
        deadline: Duration,
    ) -> Result<IndexingOutcome, IndexingError> {
        match tokio::time::timeout(deadline, self.index_file(path, document_id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(document_id, ?deadline, "Indexing deadline exceeded");
                Err(IndexingError::DeadlineExceeded(deadline))
            }
        }
    }

    /// Remove every vector of `document_id` from the collection.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), IndexingError> {
        self.vector_store.delete_document(document_id).await?;
        self.metrics.record_deleted_document();
        tracing::info!(
            document_id,
            data_source_id = self.data_source_id,
            "Deleted document vectors"
        );
        Ok(())
    }

    /// Drop the collection backing this data source.
    pub async fn delete_data_source(&self) -> Result<(), IndexingError> {
        self.vector_store.delete_collection().await?;
        tracing::info!(data_source_id = self.data_source_id, "Deleted vector collection");
        Ok(())
    }

    /// Number of stored vectors, `None` when the collection does not exist.
    pub async fn size(&self) -> Result<Option<u64>, IndexingError> {
        Ok(self.vector_store.count().await?)
    }

    async fn upsert_in_batches(&self, chunks: Vec<Chunk>) -> Result<usize, IndexingError> {
        let batch_size = self.settings.upsert_batch_size.max(1);
        let mut remaining = chunks.into_iter().peekable();
        let mut upserted = 0;
        while remaining.peek().is_some() {
            let group: Vec<Chunk> = remaining.by_ref().take(batch_size).collect();
            upserted += self.vector_store.upsert(group).await?;
        }
        Ok(upserted)
    }
}

/// Run a reader on the blocking pool.
pub(crate) async fn read_chunks(
    kind: ReaderKind,
    ctx: ReaderContext,
    path: &Path,
) -> Result<Vec<Chunk>, ReaderError> {
    let path = path.to_path_buf();
    match tokio::task::spawn_blocking(move || kind.load_chunks(&ctx, &path)).await {
        Ok(result) => result,
        Err(error) => Err(ReaderError::Task(error.to_string())),
    }
}

type BatchResult = (usize, Result<Vec<Vec<f32>>, EmbeddingClientError>);

/// Embed `chunks` in fixed-size batches on a bounded worker pool.
///
/// Workers pull `(position, texts)` tasks from a shared queue and report completions in any
/// order. Each result lands in a slot indexed by its batch position, so vectors are attached to
/// the chunks they were computed for regardless of scheduling. The first failure cancels every
/// worker.
pub(crate) async fn embed_in_batches(
    client: Arc<dyn EmbeddingClient>,
    chunks: Vec<Chunk>,
    batch_size: usize,
    max_workers: usize,
) -> Result<Vec<Chunk>, IndexingError> {
    let chunk_count = chunks.len();
    let batches = partition(chunks, batch_size.max(1));
    let batch_count = batches.len();
    if batch_count == 0 {
        return Ok(Vec::new());
    }

    let (task_tx, task_rx) = mpsc::channel::<(usize, Vec<String>)>(batch_count);
    for (position, batch) in batches.iter().enumerate() {
        let texts = batch.iter().map(|chunk| chunk.text.clone()).collect();
        task_tx
            .send((position, texts))
            .await
            .map_err(|error| IndexingError::Worker(error.to_string()))?;
    }
    drop(task_tx);

    let queue = Arc::new(Mutex::new(task_rx));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<BatchResult>();
    let worker_count = max_workers.clamp(1, batch_count);
    let mut workers = JoinSet::new();
    for _ in 0..worker_count {
        let queue = queue.clone();
        let client = client.clone();
        let result_tx = result_tx.clone();
        workers.spawn(async move {
            loop {
                let next = queue.lock().await.recv().await;
                let Some((position, texts)) = next else {
                    break;
                };
                let result = client.generate_embeddings(texts).await;
                let failed = result.is_err();
                if result_tx.send((position, result)).is_err() || failed {
                    break;
                }
            }
        });
    }
    drop(result_tx);
    tracing::debug!(batches = batch_count, workers = worker_count, "Embedding batches");

    let mut slots: Vec<Option<Vec<Vec<f32>>>> = (0..batch_count).map(|_| None).collect();
    while let Some((position, result)) = result_rx.recv().await {
        match result {
            Ok(vectors) => slots[position] = Some(vectors),
            Err(source) => {
                workers.abort_all();
                tracing::error!(batch = position, error = %source, "Embedding batch failed");
                return Err(IndexingError::Embedding {
                    batch: position,
                    source,
                });
            }
        }
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(error) = joined
            && error.is_panic()
        {
            return Err(IndexingError::Worker(error.to_string()));
        }
    }

    let mut embedded = Vec::with_capacity(chunk_count);
    for (position, (batch, slot)) in batches.into_iter().zip(slots).enumerate() {
        let vectors = slot.ok_or_else(|| {
            IndexingError::Worker(format!("embedding batch {position} never completed"))
        })?;
        if vectors.len() != batch.len() {
            return Err(IndexingError::EmbeddingCountMismatch {
                batch: position,
                expected: batch.len(),
                actual: vectors.len(),
            });
        }
        for (mut chunk, vector) in batch.into_iter().zip(vectors) {
            chunk.embedding = Some(vector);
            embedded.push(chunk);
        }
    }

    Ok(embedded)
}

fn partition(chunks: Vec<Chunk>, batch_size: usize) -> Vec<Vec<Chunk>> {
    let mut batches = Vec::with_capacity(chunks.len().div_ceil(batch_size));
    let mut remaining = chunks.into_iter().peekable();
    while remaining.peek().is_some() {
        batches.push(remaining.by_ref().take(batch_size).collect());
    }
    batches
}
