pub mod answer;
pub mod chunking;
pub mod context;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod retriever;
pub mod store;
pub mod tokenizer;
pub mod traits;

pub use answer::{
    build_prompt, AnswerClient, AnswerOutcome, CredentialPool, GeminiModel, GenerativeModel,
    DEFAULT_GEMINI_MODEL, REFUSAL,
};
pub use chunking::{build_page_chunks, chunk_text, token_windows, ChunkingConfig};
pub use context::build_context;
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use engine::{AskResponse, RagEngine};
pub use error::{CorpusError, FailureKind, GenerationError, IngestError, SearchError};
pub use extractor::{PdfExtractor, TesseractExtractor};
pub use index::FlatIpIndex;
pub use ingest::{
    discover_pdf_files, load_metadata, run_ingestion, IngestionPaths, IngestionReport,
    SkippedPdf,
};
pub use models::{
    Chunk, CorpusStats, DocumentMetadata, IngestionOptions, PageText, RetrievalDebugHit,
    RetrievalOptions, RetrievedChunk,
};
pub use retriever::{format_debug_hits, HybridRetriever, WordTokenizer};
pub use store::{CorpusStore, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use tokenizer::{HfTokenizer, TokenCodec};
pub use traits::{Neighbor, VectorIndex};
