//! Vector store capability: one instance manages the chunk vectors of one collection.

mod memory;
mod qdrant;

pub use memory::InMemoryVectorStore;
pub use qdrant::QdrantVectorStore;

use crate::types::{Chunk, ChunkMetadata, DataSourceId};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by vector store backends.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid vector store URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend responded with an unexpected status code.
    #[error("Unexpected vector store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the backend.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// A chunk reached the store without an embedding.
    #[error("Chunk {0} has no embedding")]
    MissingEmbedding(Uuid),
    /// A stored point could not be mapped back to a chunk.
    #[error("Invalid stored payload: {0}")]
    InvalidPayload(String),
}

/// Storage for embedded chunks of a single collection.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace the given embedded chunks; returns how many were written.
    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<usize, VectorStoreError>;

    /// Remove every chunk belonging to `document_id`. Missing documents are not an error.
    async fn delete_document(&self, document_id: &str) -> Result<(), VectorStoreError>;

    /// Number of stored chunks, `None` when the collection does not exist yet.
    async fn count(&self) -> Result<Option<u64>, VectorStoreError>;

    /// Fetch one stored chunk, including its vector.
    async fn fetch(&self, id: Uuid) -> Result<Option<Chunk>, VectorStoreError>;

    /// Drop the whole collection. Missing collections are not an error.
    async fn delete_collection(&self) -> Result<(), VectorStoreError>;
}

/// Name of the vector collection backing a data source.
pub fn collection_name(data_source_id: DataSourceId) -> String {
    format!("index_{data_source_id}")
}

/// Payload stored next to each vector: the chunk text plus all metadata keys.
pub(crate) fn chunk_payload(chunk: &Chunk) -> Result<Map<String, Value>, VectorStoreError> {
    let mut payload = match serde_json::to_value(&chunk.metadata) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(VectorStoreError::InvalidPayload(format!(
                "metadata serialized to {other}"
            )));
        }
        Err(error) => return Err(VectorStoreError::InvalidPayload(error.to_string())),
    };
    payload.insert("text".into(), Value::String(chunk.text.clone()));
    if let Some(start) = chunk.start_char {
        payload.insert("start_char_idx".into(), Value::from(start));
    }
    Ok(payload)
}

/// Rebuild a chunk from a stored payload.
pub(crate) fn chunk_from_payload(
    id: Uuid,
    vector: Option<Vec<f32>>,
    mut payload: Map<String, Value>,
) -> Result<Chunk, VectorStoreError> {
    let text = match payload.remove("text") {
        Some(Value::String(text)) => text,
        _ => return Err(VectorStoreError::InvalidPayload(format!("point {id} has no text"))),
    };
    let start_char = payload
        .remove("start_char_idx")
        .and_then(|value| value.as_u64())
        .map(|value| value as usize);
    let metadata: ChunkMetadata = serde_json::from_value(Value::Object(payload))
        .map_err(|error| VectorStoreError::InvalidPayload(error.to_string()))?;

    Ok(Chunk {
        id,
        text,
        start_char,
        metadata,
        embedding: vector,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_round_trips_through_chunk() {
        let mut metadata = ChunkMetadata::for_document("doc-9", 3, "deck.pdf");
        metadata.chunk_number = 4;
        metadata.page_number = Some("xii".into());
        let chunk = Chunk::new("slide text", Some(17), metadata);

        let payload = chunk_payload(&chunk).unwrap();
        assert_eq!(
            Value::Object(payload.clone()),
            json!({
                "document_id": "doc-9",
                "data_source_id": 3,
                "file_name": "deck.pdf",
                "chunk_number": 4,
                "page_number": "xii",
                "text": "slide text",
                "start_char_idx": 17
            })
        );

        let restored = chunk_from_payload(chunk.id, None, payload).unwrap();
        assert_eq!(restored, chunk);
    }

    #[test]
    fn payload_without_text_is_invalid() {
        let error = chunk_from_payload(Uuid::new_v4(), None, Map::new()).unwrap_err();
        assert!(matches!(error, VectorStoreError::InvalidPayload(_)));
    }

    #[test]
    fn collection_names_embed_the_data_source() {
        assert_eq!(collection_name(12), "index_12");
    }
}
