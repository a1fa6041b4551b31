use crate::answer::{AnswerClient, AnswerOutcome};
use crate::context::build_context;
use crate::embeddings::Embedder;
use crate::models::{Chunk, CorpusStats, RetrievalDebugHit, RetrievalOptions, RetrievedChunk};
use crate::retriever::{HybridRetriever, WordTokenizer};
use crate::store::CorpusStore;
use crate::traits::VectorIndex;
use crate::{CorpusError, SearchError};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub chunks: Vec<RetrievedChunk>,
    pub context: String,
    pub attempts: usize,
}

/// Loaded corpus plus the models needed to serve questions. Built once at
/// startup and read concurrently afterwards; only the credential pool inside
/// the answer client changes.
pub struct RagEngine {
    store: CorpusStore,
    embedder: Arc<dyn Embedder>,
    words: WordTokenizer,
    answers: AnswerClient,
    options: RetrievalOptions,
}

impl RagEngine {
    pub fn new(
        store: CorpusStore,
        embedder: Arc<dyn Embedder>,
        answers: AnswerClient,
        options: RetrievalOptions,
    ) -> Result<Self, CorpusError> {
        let index_dimension = store.index().dimension();
        if embedder.dimensions() != index_dimension {
            return Err(CorpusError::DimensionMismatch {
                model: embedder.dimensions(),
                index: index_dimension,
            });
        }

        let words = WordTokenizer::new()
            .map_err(|error| CorpusError::Config(error.to_string()))?;

        info!(
            chunks = store.chunks().len(),
            dimension = index_dimension,
            credentials = answers.pool().len(),
            "engine ready"
        );

        Ok(Self {
            store,
            embedder,
            words,
            answers,
            options,
        })
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    fn retriever(&self) -> HybridRetriever<'_, crate::index::FlatIpIndex> {
        HybridRetriever::new(
            self.store.index(),
            self.store.chunks(),
            self.embedder.as_ref(),
            &self.words,
        )
    }

    /// Top `k` chunks; the candidate pool comes from the engine's options.
    pub fn retrieve(
        &self,
        query: &str,
        k: usize,
        keyword_boost: f32,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        let options = self.options.with_k(k).with_keyword_boost(keyword_boost);
        self.retriever().retrieve_with(query, &options)
    }

    pub fn debug_retrieve(
        &self,
        query: &str,
        options: &RetrievalOptions,
    ) -> Result<Vec<RetrievalDebugHit>, SearchError> {
        self.retriever().debug_retrieve(query, options)
    }

    pub fn build_context(&self, chunks: &[RetrievedChunk]) -> String {
        build_context(chunks)
    }

    pub async fn answer(&self, context: &str, query: &str) -> AnswerOutcome {
        self.answers.answer(context, query).await
    }

    pub fn stats(&self) -> CorpusStats {
        self.store.stats()
    }

    pub fn list_chunks(&self, offset: usize, limit: usize) -> &[Chunk] {
        self.store.list_chunks(offset, limit)
    }

    /// Retrieve, build context and answer. A credential failure is retried
    /// with the rotated key, at most once per key in the pool.
    pub async fn ask(&self, query: &str) -> Result<AskResponse, SearchError> {
        let chunks = self.retriever().retrieve_with(query, &self.options)?;
        let context = build_context(&chunks);
        debug!(retrieved = chunks.len(), context_chars = context.len(), "context built");

        let max_attempts = self.answers.pool().len();
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            let outcome = self.answers.answer(&context, query).await;
            if !outcome.is_credential_failure() || attempts >= max_attempts {
                break outcome;
            }
        };

        Ok(AskResponse {
            answer: outcome.render(),
            chunks,
            context,
            attempts,
        })
    }
}
