use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One record of the metadata file, keyed by `filename`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub filename: String,
    pub title: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// The unit of retrieval. `uid` follows worker completion order and is only
/// unique within one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub uid: u64,
    pub source: String,
    pub title: String,
    pub date: String,
    pub page: u32,
    pub chunk_index_on_page: u32,
    pub text: String,
}

/// Public shape of a retrieval hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub score: f32,
    pub uid: u64,
    pub source: String,
    pub page: u32,
    pub text: String,
}

/// Retrieval hit with the scoring breakdown, for operational inspection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalDebugHit {
    pub score: f32,
    pub semantic_score: f32,
    pub keyword_boost: f32,
    pub keyword_matches: Vec<String>,
    pub uid: u64,
    pub source: String,
    pub page: u32,
    pub preview: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorpusStats {
    pub documents: usize,
    pub chunks: usize,
    pub sources: usize,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub embed_batch_size: usize,
    pub ocr_languages: String,
    pub render_dpi: u32,
    pub max_workers: usize,
    pub document_timeout: Option<Duration>,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_tokens: 512,
            overlap_tokens: 75,
            embed_batch_size: 32,
            ocr_languages: "eng+hin".to_string(),
            render_dpi: 300,
            max_workers: std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1),
            document_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    pub k: usize,
    pub keyword_boost: f32,
    pub candidate_floor: usize,
    pub preview_chars: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            k: 7,
            keyword_boost: 0.2,
            candidate_floor: 50,
            preview_chars: 300,
        }
    }
}

impl RetrievalOptions {
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_keyword_boost(mut self, keyword_boost: f32) -> Self {
        self.keyword_boost = keyword_boost;
        self
    }

    pub fn with_candidate_floor(mut self, candidate_floor: usize) -> Self {
        self.candidate_floor = candidate_floor;
        self
    }

    /// Candidate pool width; wider than `k` so the keyword boost can promote
    /// hits from below the raw top-k.
    pub fn candidate_pool(&self) -> usize {
        self.candidate_floor.max(self.k)
    }
}
