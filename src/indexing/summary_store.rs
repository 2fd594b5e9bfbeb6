//! On-disk layout and persistence of the summary indexes.
//!
//! ```text
//! <databases_dir>/doc_summary_index_<data_source_id>/index.json   per-collection summaries
//! <databases_dir>/doc_summary_index_global/index.json             cross-collection roll-up
//! ```
//!
//! Files are written to a temporary sibling and renamed into place. Loading distinguishes a
//! missing file from an unreadable one so that corruption is never mistaken for "empty".

use crate::types::DataSourceId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const INDEX_FILE: &str = "index.json";

/// Directory holding the per-collection summary index.
pub fn collection_dir(root: &Path, data_source_id: DataSourceId) -> PathBuf {
    root.join(format!("doc_summary_index_{data_source_id}"))
}

/// Directory holding the global roll-up index.
pub fn global_dir(root: &Path) -> PathBuf {
    root.join("doc_summary_index_global")
}

/// Index file inside a summary index directory.
pub fn index_file(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE)
}

/// Summary of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    /// Generated single-sentence summary.
    pub summary: String,
    /// File the document was read from.
    pub file_name: String,
    /// Chunks the summary was built from.
    pub chunk_count: usize,
    /// SHA-256 of the chunk texts; unchanged content reuses the summary.
    pub content_hash: String,
    /// RFC 3339 timestamp of the last update.
    pub updated_at: String,
}

/// Per-collection map of document id to summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSummaryIndex {
    /// Summaries keyed by document id.
    pub documents: BTreeMap<String, DocumentSummary>,
}

/// One document summary folded into a collection roll-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupEntry {
    /// Source document.
    pub document_id: String,
    /// The document's summary at roll-up time.
    pub summary: String,
}

/// Summary of summaries for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRollup {
    /// Folded document summaries, in insertion order.
    pub entries: Vec<RollupEntry>,
    /// Newline-joined entry summaries that were summarized.
    pub body: String,
    /// Executive summary of the collection.
    pub summary: String,
    /// RFC 3339 timestamp of the last rebuild.
    pub updated_at: String,
}

/// Roll-ups for every collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSummaryIndex {
    /// Roll-ups keyed by data source id.
    pub collections: BTreeMap<DataSourceId, CollectionRollup>,
}

/// Result of reading a persisted index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loaded<T> {
    /// Nothing has been persisted yet.
    Absent,
    /// The index was read successfully.
    Present(T),
    /// The file exists but cannot be parsed.
    Corrupt(String),
}

/// Read and parse `path`.
pub async fn load<T: DeserializeOwned>(path: &Path) -> std::io::Result<Loaded<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Loaded::Absent),
        Err(error) => return Err(error),
    };
    Ok(match serde_json::from_slice(&bytes) {
        Ok(value) => Loaded::Present(value),
        Err(error) => Loaded::Corrupt(error.to_string()),
    })
}

/// Serialize `value` to `path`, replacing any previous file atomically.
pub async fn persist<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    let staging = path.with_extension("json.tmp");
    tokio::fs::write(&staging, bytes).await?;
    tokio::fs::rename(&staging, path).await
}

/// Remove a directory tree; a missing directory is not an error.
pub async fn remove_dir(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Current UTC time in RFC 3339.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}
