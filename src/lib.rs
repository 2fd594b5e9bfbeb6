#![deny(missing_docs)]

//! Document ingestion for multi-tenant retrieval: format readers, chunking, concurrent
//! embedding into per-collection vector indexes, and persisted document and collection
//! summaries.

/// Token-bounded text splitting.
pub mod chunking;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Embedding and summary indexers.
pub mod indexing;
/// Structured logging and tracing setup.
pub mod logging;
/// Indexing metrics helpers.
pub mod metrics;
/// Format readers and the extension registry.
pub mod readers;
/// Summarization client abstraction and adapters.
pub mod summarization;
/// Chunk and metadata types shared across the pipeline.
pub mod types;
/// Vector store abstraction, Qdrant adapter and in-memory store.
pub mod vector_store;
