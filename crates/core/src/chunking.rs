use crate::error::IngestError;
use crate::models::{Chunk, DocumentMetadata, IngestionOptions, PageText};
use crate::tokenizer::TokenCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub window_tokens: usize,
    pub overlap_tokens: usize,
}

impl ChunkingConfig {
    pub fn new(window_tokens: usize, overlap_tokens: usize) -> Result<Self, IngestError> {
        if window_tokens == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "window must hold at least one token".to_string(),
            ));
        }
        if overlap_tokens >= window_tokens {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {overlap_tokens} must be smaller than window {window_tokens}"
            )));
        }

        Ok(Self {
            window_tokens,
            overlap_tokens,
        })
    }

    pub fn stride(&self) -> usize {
        self.window_tokens.saturating_sub(self.overlap_tokens).max(1)
    }
}

impl TryFrom<&IngestionOptions> for ChunkingConfig {
    type Error = IngestError;

    fn try_from(value: &IngestionOptions) -> Result<Self, Self::Error> {
        Self::new(value.chunk_tokens, value.overlap_tokens)
    }
}

/// Slides a `window_tokens` window over `ids` with step `stride()`. Every
/// window but the last is full; the last one ends at the final token.
pub fn token_windows(ids: &[u32], config: ChunkingConfig) -> Vec<&[u32]> {
    let mut windows = Vec::new();
    if ids.is_empty() {
        return windows;
    }

    let mut start = 0usize;
    loop {
        let end = start.saturating_add(config.window_tokens).min(ids.len());
        windows.push(&ids[start..end]);
        if end == ids.len() {
            break;
        }
        start = start.saturating_add(config.stride());
    }

    windows
}

/// Tokenizes `text` and decodes each window back to text. Windows that decode
/// to nothing but whitespace are dropped.
pub fn chunk_text(
    text: &str,
    codec: &dyn TokenCodec,
    config: ChunkingConfig,
) -> Result<Vec<String>, IngestError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let ids = codec.encode(text)?;
    let mut chunks = Vec::new();
    for window in token_windows(&ids, config) {
        let decoded = codec.decode(window)?;
        if !decoded.trim().is_empty() {
            chunks.push(decoded);
        }
    }

    Ok(chunks)
}

/// Builds the chunks of one page. `uid` is left at zero; ingestion assigns it
/// once every document has been processed.
pub fn build_page_chunks(
    document: &DocumentMetadata,
    page: &PageText,
    codec: &dyn TokenCodec,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    let chunks = chunk_text(&page.text, codec, config)?
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            uid: 0,
            source: document.filename.clone(),
            title: document.title.clone(),
            date: document.date.clone(),
            page: page.number,
            chunk_index_on_page: (index + 1) as u32,
            text,
        })
        .collect();

    Ok(chunks)
}
