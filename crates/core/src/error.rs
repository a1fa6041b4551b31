use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("ocr failed: {0}")]
    OcrFailed(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("metadata file not found: {}", .0.display())]
    MetadataMissing(PathBuf),

    #[error("metadata file is malformed: {0}")]
    MetadataMalformed(#[from] serde_json::Error),

    #[error("no documents found: {0}")]
    NoDocuments(String),

    #[error("no chunks were extracted from any document")]
    NoChunks,

    #[error("document timed out after {seconds}s: {}", path.display())]
    Timeout { path: PathBuf, seconds: u64 },

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("index build failed: {0}")]
    Index(#[from] SearchError),

    #[error("persisting corpus failed: {0}")]
    Persist(#[from] CorpusError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("embedding dimension mismatch: query {query}, index {index}")]
    DimensionMismatch { query: usize, index: usize },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("search request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing corpus file: {}", .0.display())]
    MissingFile(PathBuf),

    #[error("chunk file is malformed: {0}")]
    Chunks(#[from] serde_json::Error),

    #[error("index file is malformed: {0}")]
    Index(#[from] bincode::Error),

    #[error("index and chunk files do not match: {0}")]
    Mismatch(String),

    #[error("embedding model produces {model} dimensions but index holds {index}")]
    DimensionMismatch { model: usize, index: usize },

    #[error("credential pool is empty")]
    EmptyCredentialPool,

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failure classes of an upstream generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Quota exhausted or credential rejected; rotating may help.
    Credential,
    Transport,
    Response,
}

#[derive(Debug, Error)]
#[error("{reason}")]
pub struct GenerationError {
    pub kind: FailureKind,
    pub reason: String,
}

impl GenerationError {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_credential_failure(&self) -> bool {
        self.kind == FailureKind::Credential
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(error: reqwest::Error) -> Self {
        let kind = match error.status() {
            Some(status) if is_credential_status(status.as_u16()) => FailureKind::Credential,
            Some(_) => FailureKind::Response,
            None if error.is_decode() => FailureKind::Response,
            None => FailureKind::Transport,
        };
        Self::new(kind, error.to_string())
    }
}

/// 401/403 reject the key, 429 signals exhausted quota.
pub fn is_credential_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 429)
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
