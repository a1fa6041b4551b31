use crate::chunking::{build_page_chunks, ChunkingConfig};
use crate::embeddings::{embed_normalized, Embedder};
use crate::extractor::PdfExtractor;
use crate::index::FlatIpIndex;
use crate::models::{Chunk, DocumentMetadata, IngestionOptions};
use crate::store::CorpusStore;
use crate::tokenizer::TokenCodec;
use crate::IngestError;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

pub fn load_metadata(path: &Path) -> Result<Vec<DocumentMetadata>, IngestError> {
    if !path.is_file() {
        return Err(IngestError::MetadataMissing(path.to_path_buf()));
    }

    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Clone)]
pub struct DocumentJob {
    pub path: PathBuf,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionPlan {
    pub jobs: Vec<DocumentJob>,
    pub missing: Vec<SkippedPdf>,
    /// PDFs on disk that no metadata record points at.
    pub orphans: Vec<PathBuf>,
}

/// Pairs each metadata record with `<data_dir>/<filename>`. Records whose file
/// is absent are reported, not fatal.
pub fn plan_documents(data_dir: &Path, metadata: Vec<DocumentMetadata>) -> IngestionPlan {
    let mut plan = IngestionPlan::default();
    let mut referenced = HashSet::new();

    for record in metadata {
        let path = data_dir.join(&record.filename);
        referenced.insert(path.clone());

        if !path.is_file() {
            warn!(path = %path.display(), "missing pdf, skipping");
            plan.missing.push(SkippedPdf {
                path,
                reason: "file not found".to_string(),
            });
            continue;
        }

        plan.jobs.push(DocumentJob {
            path,
            metadata: record,
        });
    }

    plan.orphans = discover_pdf_files(data_dir)
        .into_iter()
        .filter(|path| !referenced.contains(path))
        .collect();

    plan
}

/// OCR and chunk one document. Runs on a worker thread and touches no shared
/// mutable state.
pub fn process_document(
    job: &DocumentJob,
    extractor: &dyn PdfExtractor,
    codec: &dyn TokenCodec,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    let mut chunks = Vec::new();
    for page in extractor.extract_pages(&job.path)? {
        chunks.extend(build_page_chunks(&job.metadata, &page, codec, config)?);
    }
    Ok(chunks)
}

#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub chunks: Vec<Chunk>,
    pub processed: usize,
    pub skipped: Vec<SkippedPdf>,
}

/// Runs `process_document` for every job, at most `max_workers` at a time,
/// and waits for all of them. Results are concatenated in completion order, so
/// the `uid` assigned afterwards differs between runs.
pub async fn extract_corpus(
    jobs: Vec<DocumentJob>,
    extractor: Arc<dyn PdfExtractor>,
    codec: Arc<dyn TokenCodec>,
    options: &IngestionOptions,
) -> Result<ExtractionOutcome, IngestError> {
    let config = ChunkingConfig::try_from(options)?;
    let semaphore = Arc::new(Semaphore::new(options.max_workers.max(1)));
    let document_timeout = options.document_timeout;
    let mut tasks = JoinSet::new();

    for job in jobs {
        let semaphore = Arc::clone(&semaphore);
        let extractor = Arc::clone(&extractor);
        let codec = Arc::clone(&codec);

        tasks.spawn(async move {
            let path = job.path.clone();
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(error) => return (path, Err(IngestError::Worker(error.to_string()))),
            };

            // The permit moves into the worker so a timed-out document keeps
            // its slot until the thread really finishes.
            let work = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                process_document(&job, extractor.as_ref(), codec.as_ref(), config)
            });

            let joined = match document_timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        let error = IngestError::Timeout {
                            path: path.clone(),
                            seconds: limit.as_secs(),
                        };
                        return (path, Err(error));
                    }
                },
                None => work.await,
            };

            let result = joined
                .map_err(|error| IngestError::Worker(error.to_string()))
                .and_then(|result| result);
            (path, result)
        });
    }

    let mut outcome = ExtractionOutcome::default();
    while let Some(joined) = tasks.join_next().await {
        let (path, result) = joined.map_err(|error| IngestError::Worker(error.to_string()))?;
        match result {
            Ok(chunks) => {
                debug!(path = %path.display(), chunks = chunks.len(), "document processed");
                outcome.processed += 1;
                outcome.chunks.extend(chunks);
            }
            Err(error) => {
                warn!(path = %path.display(), reason = %error, "skipped pdf");
                outcome.skipped.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(outcome)
}

/// Numbers chunks 1..=n in their current order.
pub fn assign_uids(chunks: &mut [Chunk]) {
    for (position, chunk) in chunks.iter_mut().enumerate() {
        chunk.uid = position as u64 + 1;
    }
}

/// Embeds chunk texts `batch_size` at a time; the result is row-aligned with
/// `chunks`.
pub fn embed_chunks(
    embedder: &dyn Embedder,
    chunks: &[Chunk],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, IngestError> {
    let dimension = embedder.dimensions();
    let batch_size = batch_size.max(1);
    let total_batches = chunks.len().div_ceil(batch_size);
    let mut vectors = Vec::with_capacity(chunks.len());

    for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
        let texts = batch
            .iter()
            .map(|chunk| chunk.text.clone())
            .collect::<Vec<_>>();
        let embedded = embed_normalized(embedder, &texts)
            .map_err(|error| IngestError::Embedding(error.to_string()))?;

        if let Some(bad) = embedded.iter().find(|vector| vector.len() != dimension) {
            return Err(IngestError::Embedding(format!(
                "embedder declared {dimension} dimensions but produced {}",
                bad.len()
            )));
        }

        vectors.extend(embedded);
        debug!(batch = batch_no + 1, total_batches, "embedded batch");
    }

    Ok(vectors)
}

#[derive(Debug, Clone)]
pub struct IngestionPaths {
    pub metadata: PathBuf,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
}

pub struct IngestionReport {
    pub run_id: Uuid,
    pub planned: usize,
    pub processed: usize,
    pub chunks: usize,
    pub dimension: usize,
    pub skipped_files: Vec<SkippedPdf>,
    pub orphans: Vec<PathBuf>,
}

/// Full offline run: metadata → OCR/chunking → uids → embeddings → index →
/// persisted pair. Nothing is written unless every step succeeds.
pub async fn run_ingestion(
    paths: &IngestionPaths,
    extractor: Arc<dyn PdfExtractor>,
    codec: Arc<dyn TokenCodec>,
    embedder: &dyn Embedder,
    options: &IngestionOptions,
) -> Result<IngestionReport, IngestError> {
    let metadata = load_metadata(&paths.metadata)?;
    if metadata.is_empty() {
        return Err(IngestError::NoDocuments(format!(
            "{} lists no documents",
            paths.metadata.display()
        )));
    }

    let plan = plan_documents(&paths.data_dir, metadata);
    if plan.jobs.is_empty() {
        return Err(IngestError::NoDocuments(format!(
            "none of the listed pdfs exist under {}",
            paths.data_dir.display()
        )));
    }

    let planned = plan.jobs.len();
    info!(documents = planned, workers = options.max_workers, "processing documents");
    let outcome = extract_corpus(plan.jobs, extractor, codec, options).await?;

    let mut chunks = outcome.chunks;
    if chunks.is_empty() {
        return Err(IngestError::NoChunks);
    }
    assign_uids(&mut chunks);
    info!(chunks = chunks.len(), "chunks extracted");

    let vectors = embed_chunks(embedder, &chunks, options.embed_batch_size)?;
    let index = FlatIpIndex::from_vectors(embedder.dimensions(), &vectors)?;
    let store = CorpusStore::new(chunks, index)?;
    store.persist(&paths.output_dir)?;

    let manifest = store.manifest();
    info!(
        run_id = %manifest.run_id,
        rows = manifest.rows,
        output = %paths.output_dir.display(),
        "corpus persisted"
    );

    let mut skipped_files = plan.missing;
    skipped_files.extend(outcome.skipped);

    Ok(IngestionReport {
        run_id: manifest.run_id,
        planned,
        processed: outcome.processed,
        chunks: manifest.rows,
        dimension: manifest.dimension,
        skipped_files,
        orphans: plan.orphans,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{l2_norm, CharacterNgramEmbedder};
    use crate::models::PageText;
    use crate::tokenizer::testing::WhitespaceCodec;
    use crate::traits::VectorIndex;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Default)]
    struct FakeExtractor {
        pages: HashMap<String, Vec<PageText>>,
        slow: HashSet<String>,
    }

    impl FakeExtractor {
        fn with_document(mut self, filename: &str, pages: &[(u32, &str)]) -> Self {
            self.pages.insert(
                filename.to_string(),
                pages
                    .iter()
                    .map(|(number, text)| PageText {
                        number: *number,
                        text: text.to_string(),
                    })
                    .collect(),
            );
            self
        }
    }

    impl PdfExtractor for FakeExtractor {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string();
            if self.slow.contains(&name) {
                std::thread::sleep(Duration::from_millis(500));
            }
            self.pages
                .get(&name)
                .cloned()
                .ok_or_else(|| IngestError::PdfParse(format!("cannot parse {name}")))
        }
    }

    fn record(filename: &str) -> DocumentMetadata {
        DocumentMetadata {
            filename: filename.to_string(),
            title: format!("Title of {filename}"),
            date: "2024-03-10".to_string(),
            url: None,
        }
    }

    fn small_options() -> IngestionOptions {
        IngestionOptions {
            chunk_tokens: 4,
            overlap_tokens: 1,
            embed_batch_size: 2,
            max_workers: 2,
            ..IngestionOptions::default()
        }
    }

    fn write_fixture(
        dir: &Path,
        files: &[&str],
        metadata: &[DocumentMetadata],
    ) -> Result<IngestionPaths, Box<dyn std::error::Error>> {
        let data_dir = dir.join("data");
        fs::create_dir_all(&data_dir)?;
        for file in files {
            fs::write(data_dir.join(file), b"%PDF-1.4\n")?;
        }
        let metadata_path = dir.join("metadata.json");
        fs::write(&metadata_path, serde_json::to_vec(metadata)?)?;

        Ok(IngestionPaths {
            metadata: metadata_path,
            data_dir,
            output_dir: dir.join("index"),
        })
    }

    #[test]
    fn metadata_file_must_exist() {
        let result = load_metadata(Path::new("/nonexistent/metadata.json"));
        assert!(matches!(result, Err(IngestError::MetadataMissing(_))));
    }

    #[test]
    fn metadata_parses_optional_url() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("metadata.json");
        fs::write(
            &path,
            r#"[{"filename":"a.pdf","title":"A","date":"01-02-2024","url":"https://example.org/a.pdf"},
                {"filename":"b.pdf","title":"B","date":"03-04-2024"}]"#,
        )?;

        let records = load_metadata(&path)?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url.as_deref(), Some("https://example.org/a.pdf"));
        assert_eq!(records[1].url, None);

        fs::write(&path, "{not json")?;
        assert!(matches!(
            load_metadata(&path),
            Err(IngestError::MetadataMalformed(_))
        ));
        Ok(())
    }

    #[test]
    fn plan_skips_missing_files_and_reports_orphans() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let paths = write_fixture(
            dir.path(),
            &["a.pdf", "extra.pdf"],
            &[record("a.pdf"), record("gone.pdf")],
        )?;

        let plan = plan_documents(&paths.data_dir, load_metadata(&paths.metadata)?);
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].metadata.filename, "a.pdf");
        assert_eq!(plan.missing.len(), 1);
        assert!(plan.missing[0].path.ends_with("gone.pdf"));
        assert_eq!(plan.orphans, vec![paths.data_dir.join("extra.pdf")]);
        Ok(())
    }

    #[tokio::test]
    async fn bad_document_is_skipped_and_others_continue() -> Result<(), Box<dyn std::error::Error>>
    {
        let extractor = FakeExtractor::default()
            .with_document("good.pdf", &[(1, "visa fee is five hundred rupees"), (2, "apply online")]);
        let jobs = vec![
            DocumentJob {
                path: PathBuf::from("/corpus/good.pdf"),
                metadata: record("good.pdf"),
            },
            DocumentJob {
                path: PathBuf::from("/corpus/corrupt.pdf"),
                metadata: record("corrupt.pdf"),
            },
        ];

        let outcome = extract_corpus(
            jobs,
            Arc::new(extractor),
            Arc::new(WhitespaceCodec::default()),
            &small_options(),
        )
        .await?;

        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].path.ends_with("corrupt.pdf"));
        assert!(outcome.chunks.iter().all(|chunk| chunk.source == "good.pdf"));
        // page 1 has six tokens: two windows; page 2 has two: one window
        assert_eq!(outcome.chunks.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn slow_document_times_out() -> Result<(), Box<dyn std::error::Error>> {
        let mut extractor = FakeExtractor::default()
            .with_document("slow.pdf", &[(1, "never arrives")])
            .with_document("fast.pdf", &[(1, "arrives quickly")]);
        extractor.slow.insert("slow.pdf".to_string());

        let options = IngestionOptions {
            document_timeout: Some(Duration::from_millis(20)),
            ..small_options()
        };
        let jobs = ["slow.pdf", "fast.pdf"]
            .iter()
            .map(|name| DocumentJob {
                path: PathBuf::from(format!("/corpus/{name}")),
                metadata: record(name),
            })
            .collect();

        let outcome = extract_corpus(
            jobs,
            Arc::new(extractor),
            Arc::new(WhitespaceCodec::default()),
            &options,
        )
        .await?;

        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].reason.contains("timed out"));
        Ok(())
    }

    // uid order follows worker completion order. Only uniqueness and the 1..=n
    // range are guaranteed; if this test starts asserting a particular order,
    // something has come to depend on it.
    #[tokio::test]
    async fn uids_are_sequential_but_order_is_not_guaranteed(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut extractor = FakeExtractor::default();
        let mut jobs = Vec::new();
        for doc in 0..6 {
            let name = format!("doc{doc}.pdf");
            extractor = extractor.with_document(&name, &[(1, "alpha beta gamma delta epsilon zeta")]);
            jobs.push(DocumentJob {
                path: PathBuf::from(format!("/corpus/{name}")),
                metadata: record(&name),
            });
        }

        let mut outcome = extract_corpus(
            jobs,
            Arc::new(extractor),
            Arc::new(WhitespaceCodec::default()),
            &small_options(),
        )
        .await?;
        assign_uids(&mut outcome.chunks);

        let mut uids = outcome.chunks.iter().map(|chunk| chunk.uid).collect::<Vec<_>>();
        uids.sort_unstable();
        assert_eq!(uids, (1..=outcome.chunks.len() as u64).collect::<Vec<_>>());

        // chunks of one page stay together and in window order
        for pair in outcome.chunks.windows(2) {
            if pair[0].source == pair[1].source {
                assert_eq!(pair[1].chunk_index_on_page, pair[0].chunk_index_on_page + 1);
            }
        }
        Ok(())
    }

    #[test]
    fn embeddings_are_batched_and_normalized() -> Result<(), Box<dyn std::error::Error>> {
        let chunks = (1..=5)
            .map(|uid| Chunk {
                uid,
                source: "a.pdf".to_string(),
                title: "A".to_string(),
                date: "2024".to_string(),
                page: 1,
                chunk_index_on_page: uid as u32,
                text: format!("passport renewal step {uid}"),
            })
            .collect::<Vec<_>>();
        let embedder = CharacterNgramEmbedder { dimensions: 16 };

        let vectors = embed_chunks(&embedder, &chunks, 2)?;
        assert_eq!(vectors.len(), 5);
        for vector in &vectors {
            assert_eq!(vector.len(), 16);
            assert!((l2_norm(vector) - 1.0).abs() < 1e-5);
        }
        Ok(())
    }

    #[tokio::test]
    async fn full_run_persists_matched_pair() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let paths = write_fixture(
            dir.path(),
            &["visa.pdf", "passport.pdf", "broken.pdf"],
            &[
                record("visa.pdf"),
                record("passport.pdf"),
                record("broken.pdf"),
                record("missing.pdf"),
            ],
        )?;
        let extractor = FakeExtractor::default()
            .with_document("visa.pdf", &[(1, "Visa application fee is 500 rupees")])
            .with_document("passport.pdf", &[(2, "Passport renewal takes 30 days")]);
        let embedder = CharacterNgramEmbedder { dimensions: 32 };

        let report = run_ingestion(
            &paths,
            Arc::new(extractor),
            Arc::new(WhitespaceCodec::default()),
            &embedder,
            &small_options(),
        )
        .await?;

        assert_eq!(report.planned, 3);
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped_files.len(), 2);
        assert_eq!(report.dimension, 32);

        let store = CorpusStore::load(&paths.output_dir)?;
        assert_eq!(store.chunks().len(), report.chunks);
        assert_eq!(store.index().len(), report.chunks);
        assert_eq!(store.manifest().run_id, report.run_id);
        for (position, chunk) in store.chunks().iter().enumerate() {
            let row = store.index().row(position).ok_or("missing row")?;
            let expected = crate::embeddings::embed_query(&embedder, &chunk.text)?;
            assert_eq!(row, expected.as_slice());
        }
        Ok(())
    }

    #[tokio::test]
    async fn run_without_chunks_fails_and_writes_nothing() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempdir()?;
        let paths = write_fixture(dir.path(), &["blank.pdf"], &[record("blank.pdf")])?;
        let extractor = FakeExtractor::default().with_document("blank.pdf", &[]);

        let result = run_ingestion(
            &paths,
            Arc::new(extractor),
            Arc::new(WhitespaceCodec::default()),
            &CharacterNgramEmbedder::default(),
            &small_options(),
        )
        .await;

        assert!(matches!(result, Err(IngestError::NoChunks)));
        assert!(!paths.output_dir.exists());
        Ok(())
    }

    #[tokio::test]
    async fn run_without_documents_fails() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let paths = write_fixture(dir.path(), &[], &[record("missing.pdf")])?;

        let result = run_ingestion(
            &paths,
            Arc::new(FakeExtractor::default()),
            Arc::new(WhitespaceCodec::default()),
            &CharacterNgramEmbedder::default(),
            &small_options(),
        )
        .await;

        assert!(matches!(result, Err(IngestError::NoDocuments(_))));
        Ok(())
    }
}
