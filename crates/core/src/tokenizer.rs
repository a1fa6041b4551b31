use crate::error::IngestError;
use std::path::Path;
use tokenizers::Tokenizer;

/// Encodes text into the embedding model's token ids and back.
pub trait TokenCodec: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, IngestError>;
    fn decode(&self, ids: &[u32]) -> Result<String, IngestError>;
}

/// HuggingFace tokenizer loaded from the model's `tokenizer.json`.
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    pub fn from_file(path: &Path) -> Result<Self, IngestError> {
        if !path.exists() {
            return Err(IngestError::InvalidArgument(format!(
                "tokenizer file not found: {}",
                path.display()
            )));
        }

        let mut inner = Tokenizer::from_file(path)
            .map_err(|error| IngestError::Tokenizer(error.to_string()))?;
        // Chunking needs the full token stream; a shipped max_length would
        // cut every page at the model window.
        inner
            .with_truncation(None)
            .map_err(|error| IngestError::Tokenizer(error.to_string()))?;
        inner.with_padding(None);
        Ok(Self { inner })
    }
}

impl TokenCodec for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, IngestError> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|error| IngestError::Tokenizer(error.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, IngestError> {
        self.inner
            .decode(ids, true)
            .map_err(|error| IngestError::Tokenizer(error.to_string()))
    }
}
