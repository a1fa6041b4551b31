use crate::embeddings::{embed_query, Embedder};
use crate::models::{Chunk, RetrievalDebugHit, RetrievalOptions, RetrievedChunk};
use crate::traits::{valid_neighbors, VectorIndex};
use crate::SearchError;
use regex::Regex;
use std::collections::HashSet;

/// Case-folded `\w+` word extraction shared by queries and chunk texts.
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    pattern: Regex,
}

impl WordTokenizer {
    pub fn new() -> Result<Self, SearchError> {
        Ok(Self {
            pattern: Regex::new(r"\w+")?,
        })
    }

    pub fn word_set(&self, text: &str) -> HashSet<String> {
        let lowered = text.to_lowercase();
        self.pattern
            .find_iter(&lowered)
            .map(|word| word.as_str().to_string())
            .collect()
    }
}

#[derive(Debug)]
struct ScoredCandidate<'a> {
    chunk: &'a Chunk,
    semantic_score: f32,
    keyword_boost: f32,
    keyword_matches: Vec<String>,
    score: f32,
}

/// Vector search over a candidate pool, then a lexical boost of
/// `keyword_boost` per distinct query word found in the chunk.
pub struct HybridRetriever<'a, I: VectorIndex + ?Sized> {
    index: &'a I,
    chunks: &'a [Chunk],
    embedder: &'a dyn Embedder,
    words: &'a WordTokenizer,
}

impl<'a, I: VectorIndex + ?Sized> HybridRetriever<'a, I> {
    pub fn new(
        index: &'a I,
        chunks: &'a [Chunk],
        embedder: &'a dyn Embedder,
        words: &'a WordTokenizer,
    ) -> Self {
        Self {
            index,
            chunks,
            embedder,
            words,
        }
    }

    /// Top `k` chunks with the default candidate pool.
    pub fn retrieve(
        &self,
        query: &str,
        k: usize,
        keyword_boost: f32,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        let options = RetrievalOptions::default()
            .with_k(k)
            .with_keyword_boost(keyword_boost);
        self.retrieve_with(query, &options)
    }

    pub fn retrieve_with(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        Ok(self
            .rank(query, options)?
            .into_iter()
            .map(|candidate| RetrievedChunk {
                score: candidate.score,
                uid: candidate.chunk.uid,
                source: candidate.chunk.source.clone(),
                page: candidate.chunk.page,
                text: candidate.chunk.text.clone(),
            })
            .collect())
    }

    /// Same ranking as `retrieve_with` for the same options, keeping the score
    /// breakdown and a one-line text preview.
    pub fn debug_retrieve(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievalDebugHit>, SearchError> {
        Ok(self
            .rank(query, options)?
            .into_iter()
            .map(|candidate| RetrievalDebugHit {
                score: candidate.score,
                semantic_score: candidate.semantic_score,
                keyword_boost: candidate.keyword_boost,
                keyword_matches: candidate.keyword_matches,
                uid: candidate.chunk.uid,
                source: candidate.chunk.source.clone(),
                page: candidate.chunk.page,
                preview: preview(&candidate.chunk.text, options.preview_chars),
            })
            .collect())
    }

    fn rank(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<ScoredCandidate<'a>>, SearchError> {
        let query_vector = embed_query(self.embedder, query)?;
        if query_vector.len() != self.index.dimension() {
            return Err(SearchError::DimensionMismatch {
                query: query_vector.len(),
                index: self.index.dimension(),
            });
        }

        let neighbors = valid_neighbors(
            self.index.search(&query_vector, options.candidate_pool())?,
            self.chunks.len(),
        );
        let query_words = self.words.word_set(query);

        let mut candidates = neighbors
            .into_iter()
            .filter_map(|neighbor| {
                let chunk = self.chunks.get(neighbor.position)?;
                let chunk_words = self.words.word_set(&chunk.text);
                let mut keyword_matches = query_words
                    .intersection(&chunk_words)
                    .cloned()
                    .collect::<Vec<_>>();
                keyword_matches.sort_unstable();

                let keyword_boost = options.keyword_boost * keyword_matches.len() as f32;
                Some(ScoredCandidate {
                    chunk,
                    semantic_score: neighbor.score,
                    keyword_boost,
                    keyword_matches,
                    score: neighbor.score + keyword_boost,
                })
            })
            .collect::<Vec<_>>();

        // stable: ties keep semantic order
        candidates.sort_by(|left, right| right.score.total_cmp(&left.score));
        candidates.truncate(options.k);
        Ok(candidates)
    }
}

pub fn preview(text: &str, max_chars: usize) -> String {
    let head = text.chars().take(max_chars).collect::<String>();
    let head = head.replace('\n', " ").trim().to_string();
    if text.chars().count() > max_chars {
        format!("{head}...")
    } else {
        head
    }
}

/// One-line-per-hit rendering used by the CLI debug command.
pub fn format_debug_hits(query: &str, hits: &[RetrievalDebugHit]) -> String {
    let mut out = String::from("--- Retrieval Debug ---\n");
    out.push_str(&format!("Query: {query}\n"));
    for (rank, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "\n[{}] score={:.4} semantic={:.4} boost={:.2} uid={} source={} page={}\n",
            rank + 1,
            hit.score,
            hit.semantic_score,
            hit.keyword_boost,
            hit.uid,
            hit.source,
            hit.page
        ));
        if !hit.keyword_matches.is_empty() {
            out.push_str(&format!("matches: {}\n", hit.keyword_matches.join(", ")));
        }
        out.push_str(&hit.preview);
        out.push('\n');
    }
    out.push_str("--- End of Retrieval ---\n");
    out
}
