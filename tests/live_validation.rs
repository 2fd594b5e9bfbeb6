use std::sync::Arc;

use rag_indexer::chunking::SemanticSplitter;
use rag_indexer::config::Config;
use rag_indexer::embedding::{EmbeddingClient, HashingEmbeddingClient, OllamaEmbeddingClient};
use rag_indexer::indexing::EmbeddingIndexer;
use rag_indexer::summarization::{
    OllamaSummarizationClient, SummarizationClient, SummarizationRequest,
};
use rag_indexer::vector_store::QdrantVectorStore;

const LIVE_DATA_SOURCE: i64 = 990_001;

fn live_config() -> Config {
    dotenvy::dotenv().ok();
    Config::from_env().expect("configuration must load from the environment")
}

#[tokio::test]
#[ignore = "Requires live Qdrant"]
async fn live_qdrant_index_and_drop() {
    let config = live_config();
    let store = QdrantVectorStore::new(&config.qdrant_url, config.qdrant_api_key.clone(), LIVE_DATA_SOURCE)
        .expect("qdrant client");
    let indexer = EmbeddingIndexer::new(
        LIVE_DATA_SOURCE,
        Arc::new(SemanticSplitter::whitespace(32, 0).unwrap()),
        Arc::new(HashingEmbeddingClient::new(config.embedding_dimension)),
        Arc::new(store),
    );
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.txt");
    std::fs::write(&path, "live qdrant validation ".repeat(40)).unwrap();

    let outcome = indexer.index_file(&path, "live-doc").await.expect("index");
    assert!(outcome.upserted > 0);
    assert_eq!(indexer.size().await.unwrap(), Some(outcome.upserted as u64));

    indexer.delete_data_source().await.expect("drop collection");
    assert_eq!(indexer.size().await.unwrap(), None);
}

#[tokio::test]
#[ignore = "Requires live Ollama embeddings"]
async fn live_ollama_embedding_roundtrip() {
    let config = live_config();
    let client = OllamaEmbeddingClient::new(config.ollama_url.clone(), config.embedding_model.clone())
        .expect("embedding client");
    let vectors = client
        .generate_embeddings(vec!["rag-indexer live embedding".to_string()])
        .await
        .expect("failed to request embeddings from provider");
    assert_eq!(vectors.len(), 1, "expected embedding per input chunk");
    assert_eq!(
        vectors[0].len(),
        config.embedding_dimension,
        "embedding dimension mismatch"
    );
}

#[tokio::test]
#[ignore = "Requires live Ollama summarization model"]
async fn live_ollama_summary() {
    let config = live_config();
    let model = config
        .summarization_model
        .clone()
        .expect("SUMMARIZATION_MODEL must be set");
    let client = OllamaSummarizationClient::new(config.ollama_url.clone(), model).unwrap();
    let summary = client
        .generate_summary(SummarizationRequest::new(
            "Summarize in one sentence: Rust guarantees memory safety without a garbage collector.",
        ))
        .await
        .expect("summary");
    assert!(!summary.trim().is_empty());
}
