use crate::index::FlatIpIndex;
use crate::models::{Chunk, CorpusStats};
use crate::traits::VectorIndex;
use crate::CorpusError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use uuid::Uuid;

pub const CHUNKS_FILE: &str = "chunks.json";
pub const INDEX_FILE: &str = "index.bin";
pub const DEFAULT_PAGE_LIMIT: usize = 50;
pub const MAX_PAGE_LIMIT: usize = 500;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusManifest {
    pub run_id: Uuid,
    pub built_at: DateTime<Utc>,
    pub dimension: usize,
    pub rows: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    format_version: u32,
    manifest: CorpusManifest,
    chunks_sha256: String,
    index: FlatIpIndex,
}

/// The chunk list and its vector index, kept as one matched pair.
#[derive(Debug, Clone)]
pub struct CorpusStore {
    chunks: Vec<Chunk>,
    index: FlatIpIndex,
    manifest: CorpusManifest,
}

impl CorpusStore {
    pub fn new(chunks: Vec<Chunk>, index: FlatIpIndex) -> Result<Self, CorpusError> {
        if chunks.len() != index.len() {
            return Err(CorpusError::Mismatch(format!(
                "{} chunks but {} index rows",
                chunks.len(),
                index.len()
            )));
        }

        let manifest = CorpusManifest {
            run_id: Uuid::new_v4(),
            built_at: Utc::now(),
            dimension: index.dimension(),
            rows: index.len(),
        };

        Ok(Self {
            chunks,
            index,
            manifest,
        })
    }

    /// Writes both files to temporaries in `dir` and renames them into place
    /// only once both are fully written. The index header records a digest of
    /// the chunk file, so an interrupted rename is caught by `load`.
    pub fn persist(&self, dir: &Path) -> Result<(), CorpusError> {
        fs::create_dir_all(dir)?;

        let chunk_bytes = serde_json::to_vec_pretty(&self.chunks)?;
        let index_bytes = bincode::serialize(&IndexFile {
            format_version: FORMAT_VERSION,
            manifest: self.manifest.clone(),
            chunks_sha256: digest(&chunk_bytes),
            index: self.index.clone(),
        })?;

        let chunk_tmp = write_temp(dir, &chunk_bytes)?;
        let index_tmp = write_temp(dir, &index_bytes)?;

        chunk_tmp
            .persist(dir.join(CHUNKS_FILE))
            .map_err(|error| error.error)?;
        index_tmp
            .persist(dir.join(INDEX_FILE))
            .map_err(|error| error.error)?;

        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, CorpusError> {
        let chunks_path = dir.join(CHUNKS_FILE);
        let index_path = dir.join(INDEX_FILE);
        for path in [&chunks_path, &index_path] {
            if !path.is_file() {
                return Err(CorpusError::MissingFile(path.clone()));
            }
        }

        let chunk_bytes = fs::read(&chunks_path)?;
        let index_file: IndexFile = bincode::deserialize(&fs::read(&index_path)?)?;

        if index_file.format_version != FORMAT_VERSION {
            return Err(CorpusError::Mismatch(format!(
                "index format version {} is not {FORMAT_VERSION}",
                index_file.format_version
            )));
        }
        if index_file.chunks_sha256 != digest(&chunk_bytes) {
            return Err(CorpusError::Mismatch(format!(
                "{} was not written by the run that produced {}",
                chunks_path.display(),
                index_path.display()
            )));
        }
        if index_file.index.dimension() == 0 {
            return Err(CorpusError::Mismatch("index has zero dimension".to_string()));
        }

        let chunks: Vec<Chunk> = serde_json::from_slice(&chunk_bytes)?;
        if chunks.len() != index_file.index.len() || chunks.len() != index_file.manifest.rows {
            return Err(CorpusError::Mismatch(format!(
                "{} chunks but {} index rows",
                chunks.len(),
                index_file.index.len()
            )));
        }

        Ok(Self {
            chunks,
            index: index_file.index,
            manifest: index_file.manifest,
        })
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn index(&self) -> &FlatIpIndex {
        &self.index
    }

    pub fn manifest(&self) -> &CorpusManifest {
        &self.manifest
    }

    pub fn stats(&self) -> CorpusStats {
        stats_for(&self.chunks)
    }

    /// A page of chunk records in storage order. `limit` is clamped to
    /// `1..=MAX_PAGE_LIMIT`; an offset past the end yields an empty slice.
    pub fn list_chunks(&self, offset: usize, limit: usize) -> &[Chunk] {
        let limit = limit.clamp(1, MAX_PAGE_LIMIT);
        let start = offset.min(self.chunks.len());
        let end = start.saturating_add(limit).min(self.chunks.len());
        &self.chunks[start..end]
    }
}

/// Every source file counts as one document.
pub fn stats_for(chunks: &[Chunk]) -> CorpusStats {
    let sources = chunks
        .iter()
        .map(|chunk| chunk.source.as_str())
        .collect::<HashSet<_>>()
        .len();

    CorpusStats {
        documents: sources,
        chunks: chunks.len(),
        sources,
    }
}

fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_temp(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile, CorpusError> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn chunk(uid: u64, source: &str, text: &str) -> Chunk {
        Chunk {
            uid,
            source: source.to_string(),
            title: format!("{source} title"),
            date: "2024-02-01".to_string(),
            page: 1,
            chunk_index_on_page: 1,
            text: text.to_string(),
        }
    }

    fn sample_store() -> Result<CorpusStore, Box<dyn std::error::Error>> {
        let chunks = vec![chunk(1, "a.pdf", "first"), chunk(2, "b.pdf", "second")];
        let index = FlatIpIndex::from_vectors(2, &[vec![1.0, 0.0], vec![0.0, 1.0]])?;
        Ok(CorpusStore::new(chunks, index)?)
    }

    #[test]
    fn persisted_pair_loads_back() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = sample_store()?;
        store.persist(dir.path())?;

        let loaded = CorpusStore::load(dir.path())?;
        assert_eq!(loaded.chunks(), store.chunks());
        assert_eq!(loaded.index(), store.index());
        assert_eq!(loaded.manifest(), store.manifest());

        let leftovers = fs::read_dir(dir.path())?.count();
        assert_eq!(leftovers, 2);
        Ok(())
    }

    #[test]
    fn missing_index_file_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        sample_store()?.persist(dir.path())?;
        fs::remove_file(dir.path().join(INDEX_FILE))?;

        let result = CorpusStore::load(dir.path());
        assert!(matches!(result, Err(CorpusError::MissingFile(_))));
        Ok(())
    }

    #[test]
    fn chunk_file_from_another_run_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        sample_store()?.persist(dir.path())?;

        let other = vec![chunk(1, "a.pdf", "first"), chunk(2, "c.pdf", "edited")];
        fs::write(dir.path().join(CHUNKS_FILE), serde_json::to_vec_pretty(&other)?)?;

        let result = CorpusStore::load(dir.path());
        assert!(matches!(result, Err(CorpusError::Mismatch(_))));
        Ok(())
    }

    #[test]
    fn row_count_must_match_chunk_count() -> Result<(), Box<dyn std::error::Error>> {
        let index = FlatIpIndex::from_vectors(2, &[vec![1.0, 0.0]])?;
        let result = CorpusStore::new(vec![chunk(1, "a.pdf", "x"), chunk(2, "a.pdf", "y")], index);
        assert!(matches!(result, Err(CorpusError::Mismatch(_))));
        Ok(())
    }

    #[test]
    fn stats_count_distinct_sources() {
        let chunks = (0..10)
            .map(|i| chunk(i + 1, ["a.pdf", "b.pdf", "c.pdf"][(i % 3) as usize], "text"))
            .collect::<Vec<_>>();

        assert_eq!(
            stats_for(&chunks),
            CorpusStats {
                documents: 3,
                chunks: 10,
                sources: 3
            }
        );
    }

    #[test]
    fn listing_is_paginated_and_clamped() -> Result<(), Box<dyn std::error::Error>> {
        let chunks = (1..=8).map(|uid| chunk(uid, "a.pdf", "t")).collect::<Vec<_>>();
        let vectors = vec![vec![1.0]; 8];
        let store = CorpusStore::new(chunks, FlatIpIndex::from_vectors(1, &vectors)?)?;

        let page = store.list_chunks(2, 3);
        assert_eq!(page.iter().map(|c| c.uid).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(store.list_chunks(6, 10).len(), 2);
        assert!(store.list_chunks(100, 10).is_empty());
        assert_eq!(store.list_chunks(0, 0).len(), 1);
        assert_eq!(store.list_chunks(0, 10_000).len(), 8);
        Ok(())
    }
}
