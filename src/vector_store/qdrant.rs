//! Qdrant REST adapter, one collection (`index_<data_source_id>`) per store instance.

use super::{VectorStore, VectorStoreError, chunk_from_payload, chunk_payload, collection_name};
use crate::types::{Chunk, DataSourceId};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Lightweight HTTP client for a single Qdrant collection.
pub struct QdrantVectorStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
    // Whether the collection is known to exist; cleared when it is dropped.
    ensured: Mutex<bool>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Debug, Deserialize)]
struct CountResult {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct PointResponse {
    result: Option<StoredPoint>,
}

#[derive(Debug, Deserialize)]
struct StoredPoint {
    #[serde(default)]
    vector: Option<Value>,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

impl QdrantVectorStore {
    /// Build a store for `data_source_id` against the Qdrant instance at `url`.
    pub fn new(
        url: &str,
        api_key: Option<String>,
        data_source_id: DataSourceId,
    ) -> Result<Self, VectorStoreError> {
        let client = Client::builder().user_agent("rag-indexer/0.1").build()?;
        let base_url = normalize_base_url(url).map_err(VectorStoreError::InvalidUrl)?;
        let collection = collection_name(data_source_id);
        tracing::debug!(
            url = %base_url,
            collection = %collection,
            has_api_key = api_key.as_deref().is_some_and(|value| !value.is_empty()),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
            collection,
            ensured: Mutex::new(false),
        })
    }

    /// Name of the backing collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn ensure_collection(&self, vector_size: usize) -> Result<(), VectorStoreError> {
        let mut ensured = self.ensured.lock().await;
        if *ensured {
            return Ok(());
        }
        if !self.collection_exists().await? {
            tracing::debug!(
                collection = %self.collection,
                vector_size,
                "Creating collection"
            );
            let body = json!({
                "vectors": {
                    "size": vector_size,
                    "distance": "Cosine"
                }
            });
            let response = self
                .request(Method::PUT, &format!("collections/{}", self.collection))
                .json(&body)
                .send()
                .await?;
            self.ensure_success(response, || {
                tracing::debug!(collection = %self.collection, "Collection created");
            })
            .await?;
        }
        *ensured = true;
        Ok(())
    }

    async fn collection_exists(&self) -> Result<bool, VectorStoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = VectorStoreError::UnexpectedStatus { status, body };
                tracing::error!(collection = %self.collection, error = %error, "Collection existence check failed");
                Err(error)
            }
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(
        &self,
        response: reqwest::Response,
        on_success: F,
    ) -> Result<(), VectorStoreError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant request failed");
            Err(error)
        }
    }

    /// Like [`Self::ensure_success`], but a missing collection counts as success.
    async fn ensure_success_or_missing(
        &self,
        response: reqwest::Response,
        action: &'static str,
    ) -> Result<(), VectorStoreError> {
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(collection = %self.collection, action, "Collection missing; nothing to do");
            return Ok(());
        }
        self.ensure_success(response, || {
            tracing::debug!(collection = %self.collection, action, "Qdrant request succeeded");
        })
        .await
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<usize, VectorStoreError> {
        let Some(first) = chunks.first() else {
            return Ok(0);
        };
        let vector_size = first
            .embedding
            .as_ref()
            .map(Vec::len)
            .ok_or(VectorStoreError::MissingEmbedding(first.id))?;
        self.ensure_collection(vector_size).await?;

        let points = chunks
            .iter()
            .map(|chunk| {
                let vector = chunk
                    .embedding
                    .as_ref()
                    .ok_or(VectorStoreError::MissingEmbedding(chunk.id))?;
                Ok(json!({
                    "id": chunk.id.to_string(),
                    "vector": vector,
                    "payload": chunk_payload(chunk)?,
                }))
            })
            .collect::<Result<Vec<_>, VectorStoreError>>()?;

        let point_count = points.len();
        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::debug!(
                collection = %self.collection,
                points = point_count,
                "Points upserted"
            );
        })
        .await?;
        Ok(point_count)
    }

    async fn delete_document(&self, document_id: &str) -> Result<(), VectorStoreError> {
        let body = json!({
            "filter": {
                "must": [
                    { "key": "document_id", "match": { "value": document_id } }
                ]
            }
        });
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )
            .query(&[("wait", true)])
            .json(&body)
            .send()
            .await?;
        self.ensure_success_or_missing(response, "delete_document")
            .await
    }

    async fn count(&self) -> Result<Option<u64>, VectorStoreError> {
        let response = self
            .request(
                Method::POST,
                &format!("collections/{}/points/count", self.collection),
            )
            .json(&json!({ "exact": true }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = VectorStoreError::UnexpectedStatus { status, body };
            tracing::error!(collection = %self.collection, error = %error, "Qdrant count failed");
            return Err(error);
        }

        let CountResponse { result } = response.json().await?;
        Ok(Some(result.count))
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Chunk>, VectorStoreError> {
        let response = self
            .request(
                Method::GET,
                &format!("collections/{}/points/{id}", self.collection),
            )
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VectorStoreError::UnexpectedStatus { status, body });
        }

        let PointResponse { result } = response.json().await?;
        let Some(point) = result else {
            return Ok(None);
        };
        let vector = point.vector.and_then(|value| match value {
            Value::Array(values) => values
                .iter()
                .map(|value| value.as_f64().map(|number| number as f32))
                .collect::<Option<Vec<f32>>>(),
            _ => None,
        });
        chunk_from_payload(id, vector, point.payload.unwrap_or_default()).map(Some)
    }

    async fn delete_collection(&self) -> Result<(), VectorStoreError> {
        let mut ensured = self.ensured.lock().await;
        let response = self
            .request(Method::DELETE, &format!("collections/{}", self.collection))
            .send()
            .await?;
        self.ensure_success_or_missing(response, "delete_collection")
            .await?;
        *ensured = false;
        Ok(())
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
