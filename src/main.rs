use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rag_indexer::chunking::{SemanticSplitter, Splitter, overlap_tokens};
use rag_indexer::config::{self, Config, ConfigError, EmbeddingProvider};
use rag_indexer::embedding::{EmbeddingClient, HashingEmbeddingClient, OllamaEmbeddingClient};
use rag_indexer::indexing::{EmbeddingIndexer, SummaryIndexer, SummarySettings};
use rag_indexer::logging;
use rag_indexer::metrics::IndexingMetrics;
use rag_indexer::summarization::OllamaSummarizationClient;
use rag_indexer::types::DataSourceId;
use rag_indexer::vector_store::QdrantVectorStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "rag-indexer",
    about = "Index documents into per-collection vector and summary indexes"
)]
struct Cli {
    /// Collection the command operates on.
    #[arg(long, global = true, default_value_t = 0)]
    data_source: DataSourceId,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Embed a file and upsert its chunks.
    Index {
        #[arg(long)]
        document_id: String,
        path: PathBuf,
        /// Abort if indexing takes longer than this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Summarize a file into the collection and global summary indexes.
    Summarize {
        #[arg(long)]
        document_id: String,
        path: PathBuf,
    },
    /// Print the stored summary of one document.
    Summary {
        #[arg(long)]
        document_id: String,
    },
    /// Print the executive summary of the collection.
    FullSummary,
    /// Remove a document's vectors and summary.
    DeleteDocument {
        #[arg(long)]
        document_id: String,
    },
    /// Remove the collection's vectors and summaries.
    DeleteDataSource,
    /// Print the number of stored vectors.
    Size,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("failed to load configuration")?;
    logging::init_tracing();

    let metrics = Arc::new(IndexingMetrics::new());
    let result = run(cli, config, metrics.clone()).await;
    tracing::debug!(metrics = ?metrics.snapshot(), "Indexing metrics");
    result
}

async fn run(cli: Cli, config: &Config, metrics: Arc<IndexingMetrics>) -> Result<()> {
    let data_source = cli.data_source;
    match cli.command {
        Command::Index {
            document_id,
            path,
            timeout_secs,
        } => {
            let indexer = embedding_indexer(config, data_source)?.with_metrics(metrics);
            let outcome = match timeout_secs {
                Some(secs) => {
                    indexer
                        .index_file_within(&path, &document_id, Duration::from_secs(secs))
                        .await
                }
                None => indexer.index_file(&path, &document_id).await,
            }
            .with_context(|| format!("failed to index {}", path.display()))?;
            println!(
                "indexed {} ({} chunks, {} batches, {} upserted)",
                outcome.document_id, outcome.chunks, outcome.batches, outcome.upserted
            );
        }
        Command::Summarize { document_id, path } => {
            summary_indexer(config, data_source)?
                .with_metrics(metrics)
                .index_file(&path, &document_id)
                .await
                .with_context(|| format!("failed to summarize {}", path.display()))?;
            println!("summarized {document_id}");
        }
        Command::Summary { document_id } => {
            let summary = summary_indexer(config, data_source)?
                .get_summary(&document_id)
                .await?;
            print_optional(summary);
        }
        Command::FullSummary => {
            let summary = summary_indexer(config, data_source)?
                .get_full_summary()
                .await?;
            print_optional(summary);
        }
        Command::DeleteDocument { document_id } => {
            embedding_indexer(config, data_source)?
                .with_metrics(metrics.clone())
                .delete_document(&document_id)
                .await?;
            match summary_indexer(config, data_source) {
                Ok(indexer) => {
                    indexer
                        .with_metrics(metrics)
                        .delete_document(&document_id)
                        .await?
                }
                Err(error) => tracing::warn!(%error, "Skipping summary index cleanup"),
            }
            println!("deleted {document_id}");
        }
        Command::DeleteDataSource => {
            embedding_indexer(config, data_source)?
                .delete_data_source()
                .await?;
            match summary_indexer(config, data_source) {
                Ok(indexer) => indexer.delete_data_source().await?,
                Err(error) => tracing::warn!(%error, "Skipping summary index cleanup"),
            }
            println!("deleted data source {data_source}");
        }
        Command::Size => {
            match embedding_indexer(config, data_source)?.size().await? {
                Some(count) => println!("{count}"),
                None => println!("collection does not exist"),
            }
        }
    }
    Ok(())
}

fn print_optional(value: Option<String>) {
    match value {
        Some(text) => println!("{text}"),
        None => println!("No summary available."),
    }
}

fn splitter(config: &Config) -> Result<Arc<dyn Splitter>> {
    let chunk_size = config.text_splitter_chunk_size;
    let overlap = overlap_tokens(chunk_size, config.text_splitter_chunk_overlap);
    let splitter = SemanticSplitter::for_model(&config.embedding_model, chunk_size, overlap)?;
    Ok(Arc::new(splitter))
}

fn embedding_indexer(config: &Config, data_source: DataSourceId) -> Result<EmbeddingIndexer> {
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
        )?),
        EmbeddingProvider::Hashing => {
            Arc::new(HashingEmbeddingClient::new(config.embedding_dimension))
        }
    };
    let store = QdrantVectorStore::new(
        &config.qdrant_url,
        config.qdrant_api_key.clone(),
        data_source,
    )?;
    Ok(
        EmbeddingIndexer::new(data_source, splitter(config)?, client, Arc::new(store))
            .with_settings(config.indexer_settings())
            .with_enhanced_pdf(config.enhanced_pdf()),
    )
}

fn summary_indexer(config: &Config, data_source: DataSourceId) -> Result<SummaryIndexer> {
    let model = config
        .summarization_model
        .clone()
        .ok_or_else(|| ConfigError::MissingVariable("SUMMARIZATION_MODEL".to_string()))?;
    let client = OllamaSummarizationClient::new(config.ollama_url.clone(), model)?;
    Ok(SummaryIndexer::new(
        data_source,
        splitter(config)?,
        Arc::new(client),
        SummarySettings::new(config.databases_dir.clone()),
    )
    .with_enhanced_pdf(config.enhanced_pdf()))
}
