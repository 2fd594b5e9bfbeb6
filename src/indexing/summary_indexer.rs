use super::embedding_indexer::read_chunks;
use super::summary_store::{
    self, CollectionRollup, CollectionSummaryIndex, DocumentSummary, GlobalSummaryIndex, Loaded,
    RollupEntry,
};
use crate::chunking::Splitter;
use crate::metrics::IndexingMetrics;
use crate::readers::{EnhancedPdfConfig, ReaderContext, ReaderError, ReaderKind, file_name_of};
use crate::summarization::{SummarizationClient, SummarizationClientError, SummarizationRequest};
use crate::types::{Chunk, DataSourceId};
use futures_util::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Instruction used for per-document summaries.
pub const DOCUMENT_SUMMARY_PROMPT: &str = "Summarize the document into a single sentence. If an adequate summary is not possible, please return \"No summary available.\".";

/// Instruction used for collection roll-ups.
pub const COLLECTION_SUMMARY_PROMPT: &str = "I have summarized a list of documents that may or may not be related to each other. Please provide an overview of the document corpus as an executive summary.  Do not start with \"Here is...\".  The summary should be concise and not be frivolous";

/// Summary recorded for documents without any text.
pub const NO_SUMMARY: &str = "No summary available.";

const DEFAULT_GROUP_CHAR_BUDGET: usize = 8_000;
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 4;

// Serializes every read-modify-write of the per-collection and global summary indexes in this
// process, across all data sources.
static SUMMARY_INDEX_LOCK: Mutex<()> = Mutex::const_new(());

/// Errors surfaced by the summary indexer.
#[derive(Debug, Error)]
pub enum SummaryIndexError {
    /// Reader resolution or extraction failed.
    #[error(transparent)]
    Reader(#[from] ReaderError),
    /// The summarization provider failed.
    #[error(transparent)]
    Summarization(#[from] SummarizationClientError),
    /// An index file could not be read or written.
    #[error("Summary index I/O failed for {path}: {source}")]
    Io {
        /// File or directory involved.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A persisted index exists but cannot be parsed.
    #[error("Summary index at {path} is corrupt: {reason}")]
    CorruptIndex {
        /// Offending index file.
        path: String,
        /// Parser message.
        reason: String,
    },
}

impl SummaryIndexError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Storage location and summarization knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarySettings {
    /// Root directory holding every summary index.
    pub databases_dir: PathBuf,
    /// Characters of source text summarized per provider call.
    pub group_char_budget: usize,
    /// Optional length cap forwarded to the provider.
    pub max_words: Option<usize>,
    /// Upper bound on summarization calls in flight for one layer.
    pub max_concurrent_requests: usize,
}

impl SummarySettings {
    /// Settings rooted at `databases_dir` with the default grouping budget.
    pub fn new(databases_dir: impl Into<PathBuf>) -> Self {
        Self {
            databases_dir: databases_dir.into(),
            group_char_budget: DEFAULT_GROUP_CHAR_BUDGET,
            max_words: None,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

/// Maintains one-sentence document summaries for a collection and the collection's entry in the
/// global roll-up index.
pub struct SummaryIndexer {
    data_source_id: DataSourceId,
    splitter: Arc<dyn Splitter>,
    summarizer: Arc<dyn SummarizationClient>,
    settings: SummarySettings,
    enhanced_pdf: EnhancedPdfConfig,
    metrics: Arc<IndexingMetrics>,
}

impl SummaryIndexer {
    /// Build an indexer for `data_source_id`.
    pub fn new(
        data_source_id: DataSourceId,
        splitter: Arc<dyn Splitter>,
        summarizer: Arc<dyn SummarizationClient>,
        settings: SummarySettings,
    ) -> Self {
        Self {
            data_source_id,
            splitter,
            summarizer,
            settings,
            enhanced_pdf: EnhancedPdfConfig::default(),
            metrics: Arc::new(IndexingMetrics::new()),
        }
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

    /// Summarize `path` into the collection index and rebuild the collection roll-up.
    ///
    /// Re-indexing replaces the document's previous summary. Content identical to what was
    /// summarized before reuses the stored summary without calling the provider.
    pub async fn index_file(&self, path: &Path, document_id: &str) -> Result<(), SummaryIndexError> {
        let kind = ReaderKind::for_path(path)?;
        let ctx = ReaderContext::new(self.splitter.clone(), document_id, self.data_source_id)
            .with_enhanced_pdf(self.enhanced_pdf.clone());
        let chunks = read_chunks(kind, ctx, path).await?;
        let file_name = file_name_of(path);
        let content_hash = content_hash(&chunks);

        let cached = {
            let _guard = SUMMARY_INDEX_LOCK.lock().await;
            self.load_collection().await?.and_then(|index| {
                index
                    .documents
                    .get(document_id)
                    .filter(|existing| existing.content_hash == content_hash)
                    .map(|existing| existing.summary.clone())
            })
        };

        let summary = match cached {
            Some(summary) => {
                tracing::debug!(document_id, "Content unchanged; reusing stored summary");
                summary
            }
            None => {
                let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect();
                self.tree_summarize(DOCUMENT_SUMMARY_PROMPT, texts).await?
            }
        };

        let _guard = SUMMARY_INDEX_LOCK.lock().await;
        let mut index = self.load_collection().await?.unwrap_or_default();
        index.documents.insert(
            document_id.to_string(),
            DocumentSummary {
                summary,
                file_name,
                chunk_count: chunks.len(),
                content_hash,
                updated_at: summary_store::current_timestamp_rfc3339(),
            },
        );
        self.commit(&index).await?;

        self.metrics.record_summarized_document();
        tracing::info!(
            document_id,
            data_source_id = self.data_source_id,
            chunks = chunks.len(),
            "Summarized document"
        );
        Ok(())
    }

    /// Stored summary of `document_id`, `None` when the document or the collection is unknown.
    pub async fn get_summary(&self, document_id: &str) -> Result<Option<String>, SummaryIndexError> {
        let _guard = SUMMARY_INDEX_LOCK.lock().await;
        Ok(self.load_collection().await?.and_then(|index| {
            index
                .documents
                .get(document_id)
                .map(|document| document.summary.clone())
        }))
    }

    /// Executive summary of the whole collection, `None` when it has no documents.
    pub async fn get_full_summary(&self) -> Result<Option<String>, SummaryIndexError> {
        let _guard = SUMMARY_INDEX_LOCK.lock().await;
        Ok(self.load_global().await?.and_then(|mut global| {
            global
                .collections
                .remove(&self.data_source_id)
                .map(|rollup| rollup.summary)
        }))
    }

    /// Remove `document_id` and rebuild the roll-up; unknown documents are a no-op.
    pub async fn delete_document(&self, document_id: &str) -> Result<(), SummaryIndexError> {
        let _guard = SUMMARY_INDEX_LOCK.lock().await;
        let Some(mut index) = self.load_collection().await? else {
            return Ok(());
        };
        if index.documents.remove(document_id).is_none() {
            tracing::debug!(document_id, "Document not in summary index");
            return Ok(());
        }
        self.commit(&index).await?;

        self.metrics.record_deleted_document();
        tracing::info!(
            document_id,
            data_source_id = self.data_source_id,
            "Deleted document summary"
        );
        Ok(())
    }

    /// Remove the collection's summary index and its roll-up.
    pub async fn delete_data_source(&self) -> Result<(), SummaryIndexError> {
        let _guard = SUMMARY_INDEX_LOCK.lock().await;
        let dir = summary_store::collection_dir(&self.settings.databases_dir, self.data_source_id);
        summary_store::remove_dir(&dir)
            .await
            .map_err(|source| SummaryIndexError::io(&dir, source))?;

        if let Some(mut global) = self.load_global().await?
            && global.collections.remove(&self.data_source_id).is_some()
        {
            store(&self.global_path(), &global).await?;
        }
        tracing::info!(data_source_id = self.data_source_id, "Deleted summary index");
        Ok(())
    }

    fn collection_path(&self) -> PathBuf {
        summary_store::index_file(&summary_store::collection_dir(
            &self.settings.databases_dir,
            self.data_source_id,
        ))
    }

    fn global_path(&self) -> PathBuf {
        summary_store::index_file(&summary_store::global_dir(&self.settings.databases_dir))
    }

    async fn load_collection(&self) -> Result<Option<CollectionSummaryIndex>, SummaryIndexError> {
        load_index(&self.collection_path()).await
    }

    async fn load_global(&self) -> Result<Option<GlobalSummaryIndex>, SummaryIndexError> {
        load_index(&self.global_path()).await
    }

    /// Persist `collection` together with a roll-up covering exactly its documents.
    ///
    /// The roll-up is computed before anything is written, so a provider failure leaves both
    /// files as they were. Caller must hold the summary index lock.
    async fn commit(&self, collection: &CollectionSummaryIndex) -> Result<(), SummaryIndexError> {
        let global = self.rebuild_rollup(collection).await?;
        store(&self.collection_path(), collection).await?;
        if let Some(global) = global {
            store(&self.global_path(), &global).await?;
        }
        Ok(())
    }

    /// Global index with this collection's roll-up replaced, `None` when it is already current.
    async fn rebuild_rollup(
        &self,
        collection: &CollectionSummaryIndex,
    ) -> Result<Option<GlobalSummaryIndex>, SummaryIndexError> {
        let mut global = self.load_global().await?.unwrap_or_default();
        let previous = global.collections.remove(&self.data_source_id);
        let entries = merge_entries(
            previous.as_ref().map(|rollup| rollup.entries.as_slice()).unwrap_or_default(),
            collection,
        );

        if let Some(previous) = previous.as_ref()
            && previous.entries == entries
        {
            return Ok(None);
        }

        if entries.is_empty() {
            tracing::debug!(data_source_id = self.data_source_id, "Dropping empty roll-up");
        } else {
            let texts: Vec<String> = entries.iter().map(|entry| entry.summary.clone()).collect();
            let body = texts.join("\n");
            let summary = self.tree_summarize(COLLECTION_SUMMARY_PROMPT, texts).await?;
            tracing::debug!(
                data_source_id = self.data_source_id,
                documents = entries.len(),
                "Rebuilt collection roll-up"
            );
            global.collections.insert(
                self.data_source_id,
                CollectionRollup {
                    entries,
                    body,
                    summary,
                    updated_at: summary_store::current_timestamp_rfc3339(),
                },
            );
        }
        Ok(Some(global))
    }

    /// Summarize `texts` bottom-up: groups that fit the character budget are summarized with at
    /// most `max_concurrent_requests` calls in flight, then their summaries are grouped again
    /// until one remains.
    async fn tree_summarize(
        &self,
        instruction: &str,
        texts: Vec<String>,
    ) -> Result<String, SummaryIndexError> {
        let mut layer: Vec<String> = texts
            .into_iter()
            .filter(|text| !text.trim().is_empty())
            .collect();
        if layer.is_empty() {
            return Ok(NO_SUMMARY.to_string());
        }

        loop {
            let groups = group_by_budget(&layer, self.settings.group_char_budget);
            let mut summaries: Vec<String> = stream::iter(groups)
                .map(|context| self.summarize_group(instruction, context))
                .buffered(self.settings.max_concurrent_requests.max(1))
                .try_collect()
                .await?;
            if summaries.len() == 1 {
                return Ok(summaries.remove(0));
            }
            tracing::debug!(groups = summaries.len(), "Summarizing next layer");
            layer = summaries;
        }
    }

    async fn summarize_group(
        &self,
        instruction: &str,
        context: String,
    ) -> Result<String, SummaryIndexError> {
        let request = SummarizationRequest {
            prompt: format!("{instruction}\n\n{context}"),
            max_words: self.settings.max_words,
        };
        let summary = self.summarizer.generate_summary(request).await?;
        Ok(summary.trim().to_string())
    }
}

/// Keep surviving entries in their original order with fresh summaries, then append documents
/// that were not folded in yet.
fn merge_entries(previous: &[RollupEntry], collection: &CollectionSummaryIndex) -> Vec<RollupEntry> {
    let mut entries: Vec<RollupEntry> = previous
        .iter()
        .filter_map(|entry| {
            collection
                .documents
                .get(&entry.document_id)
                .map(|document| RollupEntry {
                    document_id: entry.document_id.clone(),
                    summary: document.summary.clone(),
                })
        })
        .collect();
    let folded: BTreeSet<String> = entries.iter().map(|entry| entry.document_id.clone()).collect();
    for (document_id, document) in &collection.documents {
        if !folded.contains(document_id) {
            entries.push(RollupEntry {
                document_id: document_id.clone(),
                summary: document.summary.clone(),
            });
        }
    }
    entries
}

/// Join texts into groups of at most `budget` characters. Every group except possibly the last
/// holds at least two texts, so each summarization layer shrinks.
fn group_by_budget(texts: &[String], budget: usize) -> Vec<String> {
    let mut groups = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0;
    for text in texts {
        let len = text.chars().count();
        if current.len() >= 2 && current_len + len > budget {
            groups.push(current.join("\n\n"));
            current.clear();
            current_len = 0;
        }
        current.push(text);
        current_len += len;
    }
    if !current.is_empty() {
        groups.push(current.join("\n\n"));
    }
    groups
}

fn content_hash(chunks: &[Chunk]) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.text.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

async fn load_index<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, SummaryIndexError> {
    match summary_store::load(path)
        .await
        .map_err(|source| SummaryIndexError::io(path, source))?
    {
        Loaded::Absent => Ok(None),
        Loaded::Present(index) => Ok(Some(index)),
        Loaded::Corrupt(reason) => {
            tracing::error!(path = %path.display(), %reason, "Summary index is corrupt");
            Err(SummaryIndexError::CorruptIndex {
                path: path.display().to_string(),
                reason,
            })
        }
    }
}

async fn store<T: Serialize>(path: &Path, value: &T) -> Result<(), SummaryIndexError> {
    summary_store::persist(path, value)
        .await
        .map_err(|source| SummaryIndexError::io(path, source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::SemanticSplitter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedSummarizer {
        calls: AtomicUsize,
        offline: bool,
        rollup_offline: AtomicBool,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl ScriptedSummarizer {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SummarizationClient for ScriptedSummarizer {
        async fn generate_summary(
            &self,
            request: SummarizationRequest,
        ) -> Result<String, SummarizationClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.offline {
                return Err(SummarizationClientError::GenerationFailed("offline".into()));
            }
            if let Some(body) = request.prompt.strip_prefix(COLLECTION_SUMMARY_PROMPT) {
                if self.rollup_offline.load(Ordering::SeqCst) {
                    return Err(SummarizationClientError::GenerationFailed(
                        "rollup down".into(),
                    ));
                }
                let lines = body.lines().filter(|line| !line.trim().is_empty()).count();
                return Ok(format!("Overview of {lines} summaries."));
            }
            let body = request
                .prompt
                .strip_prefix(DOCUMENT_SUMMARY_PROMPT)
                .unwrap_or(&request.prompt);
            Ok(format!("Document of {} words.", body.split_whitespace().count()))
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        summarizer: Arc<ScriptedSummarizer>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_summarizer(ScriptedSummarizer::default())
        }

        fn with_summarizer(summarizer: ScriptedSummarizer) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                summarizer: Arc::new(summarizer),
            }
        }

        fn indexer(&self, data_source_id: DataSourceId) -> SummaryIndexer {
            let splitter = SemanticSplitter::whitespace(50, 0).unwrap();
            SummaryIndexer::new(
                data_source_id,
                Arc::new(splitter),
                self.summarizer.clone(),
                SummarySettings::new(self.dir.path().join("databases")),
            )
        }

        fn write(&self, name: &str, body: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            path
        }

        async fn global(&self) -> GlobalSummaryIndex {
            let path = summary_store::index_file(&summary_store::global_dir(
                &self.dir.path().join("databases"),
            ));
            match summary_store::load(&path).await.unwrap() {
                Loaded::Present(global) => global,
                other => panic!("unexpected global index state: {other:?}"),
            }
        }
    }

    fn rollup_ids(global: &GlobalSummaryIndex, data_source_id: DataSourceId) -> Vec<String> {
        global.collections[&data_source_id]
            .entries
            .iter()
            .map(|entry| entry.document_id.clone())
            .collect()
    }

    #[tokio::test]
    async fn indexes_documents_and_rolls_them_up() {
        let fixture = Fixture::new();
        let indexer = fixture.indexer(1);
        let a = fixture.write("a.txt", "alpha beta gamma");
        let b = fixture.write("b.md", "delta epsilon");

        indexer.index_file(&a, "doc-a").await.unwrap();
        indexer.index_file(&b, "doc-b").await.unwrap();

        assert_eq!(
            indexer.get_summary("doc-a").await.unwrap().as_deref(),
            Some("Document of 3 words.")
        );
        assert_eq!(
            indexer.get_full_summary().await.unwrap().as_deref(),
            Some("Overview of 2 summaries.")
        );
        let global = fixture.global().await;
        assert_eq!(rollup_ids(&global, 1), vec!["doc-a", "doc-b"]);
        assert_eq!(
            global.collections[&1].body,
            "Document of 3 words.\nDocument of 2 words."
        );
        assert_eq!(indexer.metrics().snapshot().documents_summarized, 2);
    }

    #[tokio::test]
    async fn unknown_collection_has_no_summaries() {
        let fixture = Fixture::new();
        let indexer = fixture.indexer(9);

        assert_eq!(indexer.get_summary("missing").await.unwrap(), None);
        assert_eq!(indexer.get_full_summary().await.unwrap(), None);
        indexer.delete_document("missing").await.unwrap();
        assert_eq!(fixture.summarizer.calls(), 0);
    }

    #[tokio::test]
    async fn deleting_documents_shrinks_the_rollup() {
        let fixture = Fixture::new();
        let indexer = fixture.indexer(2);
        indexer
            .index_file(&fixture.write("a.txt", "one two"), "doc-a")
            .await
            .unwrap();
        indexer
            .index_file(&fixture.write("b.txt", "three"), "doc-b")
            .await
            .unwrap();

        indexer.delete_document("doc-a").await.unwrap();
        assert_eq!(indexer.get_summary("doc-a").await.unwrap(), None);
        assert_eq!(
            indexer.get_full_summary().await.unwrap().as_deref(),
            Some("Overview of 1 summaries.")
        );
        assert_eq!(rollup_ids(&fixture.global().await, 2), vec!["doc-b"]);

        indexer.delete_document("doc-b").await.unwrap();
        assert_eq!(indexer.get_full_summary().await.unwrap(), None);
        assert!(!fixture.global().await.collections.contains_key(&2));
    }

    #[tokio::test]
    async fn reindexing_replaces_without_duplicating() {
        let fixture = Fixture::new();
        let indexer = fixture.indexer(3);
        let path = fixture.write("a.txt", "one two");
        indexer.index_file(&path, "doc-a").await.unwrap();

        std::fs::write(&path, "one two three four").unwrap();
        indexer.index_file(&path, "doc-a").await.unwrap();

        assert_eq!(
            indexer.get_summary("doc-a").await.unwrap().as_deref(),
            Some("Document of 4 words.")
        );
        let global = fixture.global().await;
        assert_eq!(rollup_ids(&global, 3), vec!["doc-a"]);
        assert_eq!(global.collections[&3].body, "Document of 4 words.");
    }

    #[tokio::test]
    async fn unchanged_content_skips_the_provider() {
        let fixture = Fixture::new();
        let indexer = fixture.indexer(4);
        let path = fixture.write("a.txt", "stable content");
        indexer.index_file(&path, "doc-a").await.unwrap();
        let calls = fixture.summarizer.calls();

        indexer.index_file(&path, "doc-a").await.unwrap();

        assert_eq!(fixture.summarizer.calls(), calls);
    }

    #[tokio::test]
    async fn provider_failure_leaves_indexes_untouched() {
        let fixture = Fixture::with_summarizer(ScriptedSummarizer {
            offline: true,
            ..Default::default()
        });
        let indexer = fixture.indexer(5);

        let error = indexer
            .index_file(&fixture.write("a.txt", "words"), "doc-a")
            .await
            .unwrap_err();

        assert!(matches!(error, SummaryIndexError::Summarization(_)));
        assert!(!indexer.collection_path().exists());
    }

    #[tokio::test]
    async fn corrupt_collection_index_is_reported() {
        let fixture = Fixture::new();
        let indexer = fixture.indexer(6);
        let path = indexer.collection_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        let error = indexer.get_summary("doc").await.unwrap_err();
        assert!(matches!(error, SummaryIndexError::CorruptIndex { .. }));
    }

    #[tokio::test]
    async fn deleting_data_source_keeps_other_collections() {
        let fixture = Fixture::new();
        let first = fixture.indexer(7);
        let second = fixture.indexer(8);
        first
            .index_file(&fixture.write("a.txt", "first source"), "doc-a")
            .await
            .unwrap();
        second
            .index_file(&fixture.write("b.txt", "second source"), "doc-b")
            .await
            .unwrap();

        first.delete_data_source().await.unwrap();

        assert!(!first.collection_path().exists());
        assert_eq!(first.get_full_summary().await.unwrap(), None);
        assert!(second.get_full_summary().await.unwrap().is_some());
        assert_eq!(rollup_ids(&fixture.global().await, 8), vec!["doc-b"]);
    }

    #[tokio::test]
    async fn concurrent_writers_both_land() {
        let fixture = Fixture::new();
        let left = fixture.indexer(10);
        let right = fixture.indexer(10);
        let a = fixture.write("a.txt", "left side");
        let b = fixture.write("b.txt", "right side");

        let (first, second) = tokio::join!(left.index_file(&a, "doc-a"), right.index_file(&b, "doc-b"));
        first.unwrap();
        second.unwrap();

        let mut ids = rollup_ids(&fixture.global().await, 10);
        ids.sort();
        assert_eq!(ids, vec!["doc-a", "doc-b"]);
    }

    #[tokio::test]
    async fn empty_document_gets_placeholder_summary() {
        let fixture = Fixture::new();
        let indexer = fixture.indexer(11);
        indexer
            .index_file(&fixture.write("empty.txt", ""), "doc-empty")
            .await
            .unwrap();

        assert_eq!(
            indexer.get_summary("doc-empty").await.unwrap().as_deref(),
            Some(NO_SUMMARY)
        );
    }

    #[tokio::test]
    async fn failed_rollup_on_index_commits_nothing() {
        let fixture = Fixture::new();
        let indexer = fixture.indexer(13);
        indexer
            .index_file(&fixture.write("a.txt", "kept document"), "doc-a")
            .await
            .unwrap();
        fixture.summarizer.rollup_offline.store(true, Ordering::SeqCst);

        let error = indexer
            .index_file(&fixture.write("b.txt", "rejected document"), "doc-b")
            .await
            .unwrap_err();

        assert!(matches!(error, SummaryIndexError::Summarization(_)));
        assert_eq!(indexer.get_summary("doc-b").await.unwrap(), None);
        assert_eq!(
            indexer.get_summary("doc-a").await.unwrap().as_deref(),
            Some("Document of 2 words.")
        );
        assert_eq!(rollup_ids(&fixture.global().await, 13), vec!["doc-a"]);
    }

    #[tokio::test]
    async fn failed_rollup_on_delete_keeps_document() {
        let fixture = Fixture::new();
        let indexer = fixture.indexer(14);
        indexer
            .index_file(&fixture.write("a.txt", "first one"), "doc-a")
            .await
            .unwrap();
        indexer
            .index_file(&fixture.write("b.txt", "second one"), "doc-b")
            .await
            .unwrap();
        fixture.summarizer.rollup_offline.store(true, Ordering::SeqCst);

        let error = indexer.delete_document("doc-a").await.unwrap_err();

        assert!(matches!(error, SummaryIndexError::Summarization(_)));
        assert!(indexer.get_summary("doc-a").await.unwrap().is_some());
        assert_eq!(
            rollup_ids(&fixture.global().await, 14),
            vec!["doc-a", "doc-b"]
        );
        assert_eq!(indexer.metrics().snapshot().documents_deleted, 0);
    }

    #[tokio::test]
    async fn layer_requests_respect_concurrency_limit() {
        let fixture = Fixture::new();
        let mut indexer = fixture.indexer(15);
        indexer.settings.group_char_budget = 1;
        indexer.settings.max_concurrent_requests = 2;
        let texts = (0..20).map(|n| format!("text {n}")).collect();

        indexer
            .tree_summarize(DOCUMENT_SUMMARY_PROMPT, texts)
            .await
            .unwrap();

        assert!(fixture.summarizer.peak_in_flight.load(Ordering::SeqCst) <= 2);
        assert!(fixture.summarizer.calls() >= 10);
    }

    #[test]
    fn groups_hold_at_least_two_texts() {
        let texts: Vec<String> = ["aaaa", "bbbb", "cccc"].map(String::from).to_vec();
        assert_eq!(
            group_by_budget(&texts, 5),
            vec!["aaaa\n\nbbbb".to_string(), "cccc".to_string()]
        );
        assert_eq!(group_by_budget(&texts, 100), vec!["aaaa\n\nbbbb\n\ncccc".to_string()]);
    }

    #[tokio::test]
    async fn small_budget_summarizes_in_layers() {
        let fixture = Fixture::new();
        let mut indexer = fixture.indexer(12);
        indexer.settings.group_char_budget = 10;
        let texts = (0..5).map(|n| format!("text number {n}")).collect();

        let summary = indexer
            .tree_summarize(DOCUMENT_SUMMARY_PROMPT, texts)
            .await
            .unwrap();

        assert!(summary.starts_with("Document of"));
        // 3 groups, then 2, then 1.
        assert_eq!(fixture.summarizer.calls(), 6);
    }

    #[test]
    fn merge_keeps_order_and_refreshes_summaries() {
        let mut collection = CollectionSummaryIndex::default();
        for (id, summary) in [("b", "new b"), ("a", "a"), ("c", "c")] {
            collection.documents.insert(
                id.to_string(),
                DocumentSummary {
                    summary: summary.to_string(),
                    file_name: format!("{id}.txt"),
                    chunk_count: 1,
                    content_hash: String::new(),
                    updated_at: String::new(),
                },
            );
        }
        let previous = vec![
            RollupEntry {
                document_id: "b".into(),
                summary: "old b".into(),
            },
            RollupEntry {
                document_id: "gone".into(),
                summary: "gone".into(),
            },
        ];

        let merged = merge_entries(&previous, &collection);
        let pairs: Vec<(&str, &str)> = merged
            .iter()
            .map(|entry| (entry.document_id.as_str(), entry.summary.as_str()))
            .collect();
        assert_eq!(pairs, vec![("b", "new b"), ("a", "a"), ("c", "c")]);
    }
}
