use crate::error::SearchError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Floor applied to the vector norm so blank text does not divide by zero.
pub const NORM_EPSILON: f32 = 1e-12;

pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// Raw model output for each input, in input order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError>;

    fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| SearchError::Embedding("embedder returned no vector".to_string()))
    }
}

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

pub fn normalize(vector: &mut [f32]) {
    let norm = l2_norm(vector).max(NORM_EPSILON);
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

/// Embeds `texts` and L2-normalizes every vector. Used for both stored chunks
/// and queries so the two sides stay comparable.
pub fn embed_normalized(
    embedder: &dyn Embedder,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, SearchError> {
    let mut vectors = embedder.embed_batch(texts)?;
    if vectors.len() != texts.len() {
        return Err(SearchError::Embedding(format!(
            "embedder returned {} vectors for {} inputs",
            vectors.len(),
            texts.len()
        )));
    }

    for vector in &mut vectors {
        normalize(vector);
    }
    Ok(vectors)
}

pub fn embed_query(embedder: &dyn Embedder, query: &str) -> Result<Vec<f32>, SearchError> {
    let mut vector = embedder.embed(query)?;
    normalize(&mut vector);
    Ok(vector)
}

/// Hashes character trigrams into a fixed number of buckets. Deterministic
/// and offline; useful for tests and small corpora.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        normalize(&mut vector);
        vector
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EmbedResponse {
    Bare(Vec<Vec<f32>>),
    Wrapped { embeddings: Vec<Vec<f32>> },
}

impl EmbedResponse {
    fn into_vectors(self) -> Vec<Vec<f32>> {
        match self {
            Self::Bare(vectors) => vectors,
            Self::Wrapped { embeddings } => embeddings,
        }
    }
}

/// Client for a sentence-embedding server that accepts `{"inputs": [...]}`
/// and answers with one vector per input.
///
/// Requests go through a blocking client inside `block_in_place`, so calls
/// made from async code need the multi-thread tokio runtime; on a
/// `current_thread` runtime they panic.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    endpoint: Url,
    api_key: Option<String>,
    client: Client,
    dimensions: usize,
}

impl HttpEmbedder {
    /// Connects and probes the server once to learn its output dimension.
    pub fn connect(endpoint: &str, api_key: Option<String>) -> Result<Self, SearchError> {
        let endpoint = Url::parse(endpoint)?;
        let client = Client::builder().timeout(Duration::from_secs(120)).build()?;
        let mut embedder = Self {
            endpoint,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            client,
            dimensions: 0,
        };

        let probe = embedder.embed("dimension probe")?;
        if probe.is_empty() {
            return Err(SearchError::BackendResponse {
                backend: embedder.endpoint.to_string(),
                details: "probe returned an empty vector".to_string(),
            });
        }
        embedder.dimensions = probe.len();
        Ok(embedder)
    }

    fn request_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header("content-type", "application/json")
            .json(&EmbedRequest { inputs: texts });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: self.endpoint.to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: EmbedResponse = response.json()?;
        Ok(parsed.into_vectors())
    }
}

impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tokio::task::block_in_place(|| self.request_blocking(texts))
    }
}
