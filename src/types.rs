//! Core data carried through ingestion: chunks and their provenance metadata.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a collection ("data source") that owns a set of documents.
pub type DataSourceId = i64;

/// Provenance attached to every chunk before it leaves a reader.
///
/// Serialized keys are stable and land verbatim in vector-store payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Caller-supplied identifier of the source document.
    pub document_id: String,
    /// Collection the document belongs to.
    pub data_source_id: DataSourceId,
    /// Base name of the file the chunk was read from.
    pub file_name: String,
    /// Zero-based position of the chunk within its document.
    pub chunk_number: usize,
    /// Page label of the chunk start, only set for natively extracted PDFs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<String>,
}

impl ChunkMetadata {
    /// Metadata with only the owning document known; readers fill in the rest.
    pub fn for_document(document_id: &str, data_source_id: DataSourceId, file_name: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            data_source_id,
            file_name: file_name.to_string(),
            chunk_number: 0,
            page_number: None,
        }
    }
}

/// A retrieval-sized unit of document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier, used as the vector-store point id.
    pub id: Uuid,
    /// Chunk text.
    pub text: String,
    /// Character offset of the chunk within the reconstructed document body.
    pub start_char: Option<usize>,
    /// Provenance metadata.
    pub metadata: ChunkMetadata,
    /// Embedding vector, attached by the embedding indexer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Chunk {
    /// Create an unstamped chunk with a fresh identifier.
    pub fn new(text: impl Into<String>, start_char: Option<usize>, metadata: ChunkMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            start_char,
            metadata,
            embedding: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_omits_absent_page_number() {
        let metadata = ChunkMetadata::for_document("doc-1", 7, "notes.txt");
        let value = serde_json::to_value(&metadata).expect("serialize");
        assert_eq!(
            value,
            json!({
                "document_id": "doc-1",
                "data_source_id": 7,
                "file_name": "notes.txt",
                "chunk_number": 0
            })
        );
    }

    #[test]
    fn chunk_ids_are_unique() {
        let metadata = ChunkMetadata::for_document("doc-1", 1, "a.txt");
        let first = Chunk::new("a", Some(0), metadata.clone());
        let second = Chunk::new("a", Some(0), metadata);
        assert_ne!(first.id, second.id);
    }
}
