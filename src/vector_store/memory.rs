//! In-process [`VectorStore`] used by tests and offline runs.

use super::{VectorStore, VectorStoreError};
use crate::types::Chunk;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Chunks keyed by id; `None` until the first upsert creates the collection.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    points: RwLock<Option<BTreeMap<Uuid, Chunk>>>,
}

impl InMemoryVectorStore {
    /// Create a store whose collection does not exist yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored chunk, ordered by id.
    pub fn chunks(&self) -> Vec<Chunk> {
        self.points
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|points| points.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<usize, VectorStoreError> {
        if let Some(missing) = chunks.iter().find(|chunk| chunk.embedding.is_none()) {
            return Err(VectorStoreError::MissingEmbedding(missing.id));
        }
        let count = chunks.len();
        let mut guard = self
            .points
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let points = guard.get_or_insert_with(BTreeMap::new);
        for chunk in chunks {
            points.insert(chunk.id, chunk);
        }
        Ok(count)
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), VectorStoreError> {
        let mut guard = self
            .points
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(points) = guard.as_mut() {
            points.retain(|_, chunk| chunk.metadata.document_id != document_id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<Option<u64>, VectorStoreError> {
        let guard = self
            .points
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.as_ref().map(|points| points.len() as u64))
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Chunk>, VectorStoreError> {
        let guard = self
            .points
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.as_ref().and_then(|points| points.get(&id).cloned()))
    }

    async fn delete_collection(&self) -> Result<(), VectorStoreError> {
        *self
            .points
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}
