use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use govdoc_rag_core::{
    format_debug_hits, run_ingestion, AnswerClient, CharacterNgramEmbedder, CorpusStore,
    CredentialPool, Embedder, GeminiModel, HfTokenizer, HttpEmbedder, HybridRetriever,
    IngestionOptions, IngestionPaths, PdfExtractor, RagEngine, RetrievalOptions,
    TesseractExtractor, TokenCodec, WordTokenizer, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_GEMINI_MODEL, DEFAULT_PAGE_LIMIT,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "govdoc-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Folder holding the source PDFs.
    #[arg(long, global = true, env = "GOVDOC_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// JSON list of {filename, title, date, url} records.
    #[arg(long, global = true, env = "GOVDOC_METADATA", default_value = "metadata.json")]
    metadata: PathBuf,

    /// Directory holding chunks.json and index.bin.
    #[arg(long, global = true, env = "GOVDOC_INDEX_DIR", default_value = "faiss_index")]
    index_dir: PathBuf,

    /// HuggingFace tokenizer.json used for chunking.
    #[arg(long, global = true, env = "GOVDOC_TOKENIZER")]
    tokenizer: Option<PathBuf>,

    /// Sentence-embedding server; the local n-gram embedder is used when unset.
    #[arg(long, global = true, env = "EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    #[arg(long, global = true, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Width of the local n-gram embedder.
    #[arg(long, global = true, env = "EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Comma-separated Gemini API keys, tried in order.
    #[arg(long, global = true, env = "GEMINI_API_KEYS", hide_env_values = true)]
    gemini_api_keys: Option<String>,

    #[arg(long, global = true, env = "GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
    gemini_model: String,

    /// Override the Gemini API base URL.
    #[arg(long, global = true, env = "GEMINI_BASE_URL")]
    gemini_base_url: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// OCR every listed PDF, chunk, embed and persist the index.
    Ingest {
        #[arg(long, default_value = "512")]
        chunk_tokens: usize,
        #[arg(long, default_value = "75")]
        overlap_tokens: usize,
        #[arg(long, default_value = "32")]
        batch_size: usize,
        /// Parallel document workers; defaults to the CPU count.
        #[arg(long)]
        workers: Option<usize>,
        /// Give up on a single document after this many seconds.
        #[arg(long)]
        document_timeout_secs: Option<u64>,
        #[arg(long, default_value = "eng+hin")]
        ocr_languages: String,
    },
    /// Rank chunks for a query without calling the answer model.
    Search {
        query: String,
        #[arg(long, default_value = "7")]
        k: usize,
        #[arg(long, default_value = "0.2")]
        keyword_boost: f32,
        /// Print the score breakdown and a text preview for each hit.
        #[arg(long, default_value_t = false)]
        debug: bool,
    },
    /// Answer a question from the indexed documents.
    Ask {
        query: String,
        #[arg(long, default_value = "7")]
        k: usize,
        #[arg(long, default_value = "0.2")]
        keyword_boost: f32,
        /// Print the answer, retrieved chunks and context as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Document, chunk and source counts as JSON.
    Stats,
    /// A page of stored chunk records as JSON.
    Chunks {
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "govdoc-rag boot"
    );

    match &cli.command {
        Command::Ingest {
            chunk_tokens,
            overlap_tokens,
            batch_size,
            workers,
            document_timeout_secs,
            ocr_languages,
        } => {
            let defaults = IngestionOptions::default();
            let options = IngestionOptions {
                chunk_tokens: *chunk_tokens,
                overlap_tokens: *overlap_tokens,
                embed_batch_size: *batch_size,
                ocr_languages: ocr_languages.clone(),
                max_workers: workers.unwrap_or(defaults.max_workers).max(1),
                document_timeout: document_timeout_secs.map(Duration::from_secs),
                ..defaults
            };

            let tokenizer_path = cli
                .tokenizer
                .as_deref()
                .ok_or_else(|| anyhow!("--tokenizer or GOVDOC_TOKENIZER is required for ingestion"))?;
            let codec: Arc<dyn TokenCodec> = Arc::new(HfTokenizer::from_file(tokenizer_path)?);
            let extractor: Arc<dyn PdfExtractor> =
                Arc::new(TesseractExtractor::from_options(&options));
            let embedder = connect_embedder(&cli)?;

            let paths = IngestionPaths {
                metadata: cli.metadata.clone(),
                data_dir: cli.data_dir.clone(),
                output_dir: cli.index_dir.clone(),
            };
            let report =
                run_ingestion(&paths, extractor, codec, embedder.as_ref(), &options).await?;

            if !report.skipped_files.is_empty() {
                warn!(skipped = report.skipped_files.len(), "some documents were skipped");
                for skipped in &report.skipped_files {
                    println!("skipped: {} ({})", skipped.path.display(), skipped.reason);
                }
            }
            for orphan in &report.orphans {
                info!(path = %orphan.display(), "pdf not listed in metadata");
            }

            println!(
                "{} of {} documents processed, {} chunks indexed (dim {}) into {} at {}",
                report.processed,
                report.planned,
                report.chunks,
                report.dimension,
                cli.index_dir.display(),
                Utc::now().to_rfc3339()
            );
            println!("run_id={}", report.run_id);
        }
        Command::Search {
            query,
            k,
            keyword_boost,
            debug,
        } => {
            let store = load_store(&cli)?;
            let embedder = connect_embedder(&cli)?;
            let words = WordTokenizer::new()?;
            let retriever =
                HybridRetriever::new(store.index(), store.chunks(), embedder.as_ref(), &words);

            let options = RetrievalOptions::default()
                .with_k(*k)
                .with_keyword_boost(*keyword_boost);

            if *debug {
                let hits = retriever.debug_retrieve(query, &options)?;
                print!("{}", format_debug_hits(query, &hits));
            } else {
                for (rank, hit) in retriever.retrieve_with(query, &options)?.iter().enumerate() {
                    println!(
                        "[{}] score={:.4} uid={} source={} page={}",
                        rank + 1,
                        hit.score,
                        hit.uid,
                        hit.source,
                        hit.page
                    );
                    println!("  {}", hit.text);
                }
            }
        }
        Command::Ask {
            query,
            k,
            keyword_boost,
            json,
        } => {
            let options = RetrievalOptions::default()
                .with_k(*k)
                .with_keyword_boost(*keyword_boost);
            let engine = build_engine(&cli, options)?;
            let response = engine.ask(query).await?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", response.answer);
                println!();
                for chunk in &response.chunks {
                    println!("source: {} (page {})", chunk.source, chunk.page);
                }
            }
        }
        Command::Stats => {
            let store = load_store(&cli)?;
            println!("{}", serde_json::to_string_pretty(&store.stats())?);
        }
        Command::Chunks { offset, limit } => {
            let store = load_store(&cli)?;
            let page = store.list_chunks(*offset, *limit);
            println!("{}", serde_json::to_string_pretty(page)?);
        }
    }

    Ok(())
}

fn load_store(cli: &Cli) -> anyhow::Result<CorpusStore> {
    CorpusStore::load(&cli.index_dir)
        .with_context(|| format!("loading corpus from {}", cli.index_dir.display()))
}

/// The HTTP embedder uses a blocking client, so it is built off the async
/// worker.
fn connect_embedder(cli: &Cli) -> anyhow::Result<Arc<dyn Embedder>> {
    match &cli.embedding_endpoint {
        Some(endpoint) => {
            let embedder = tokio::task::block_in_place(|| {
                HttpEmbedder::connect(endpoint, cli.embedding_api_key.clone())
            })
            .with_context(|| format!("connecting to embedding server {endpoint}"))?;
            info!(endpoint = %endpoint, dimensions = embedder.dimensions(), "http embedder ready");
            Ok(Arc::new(embedder))
        }
        None => Ok(Arc::new(CharacterNgramEmbedder {
            dimensions: cli.embedding_dimensions,
        })),
    }
}

fn build_engine(cli: &Cli, options: RetrievalOptions) -> anyhow::Result<RagEngine> {
    let keys = cli
        .gemini_api_keys
        .as_deref()
        .ok_or_else(|| anyhow!("GEMINI_API_KEYS must list at least one key"))?;
    let pool = CredentialPool::from_list(keys)?;
    let model = GeminiModel::new(&cli.gemini_model, cli.gemini_base_url.as_deref())?;
    let answers = AnswerClient::new(pool, Arc::new(model));

    let store = load_store(cli)?;
    let embedder = connect_embedder(cli)?;
    Ok(RagEngine::new(store, embedder, answers, options)?)
}
