use crate::error::IngestError;
use crate::models::{IngestionOptions, PageText};
use lopdf::Document;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

pub trait PdfExtractor: Send + Sync {
    /// Returns the recognized text of every non-blank page, in page order.
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

/// Renders pages with `pdftoppm` and recognizes them with `tesseract`.
///
/// The page list comes from lopdf, so corrupt or non-PDF files fail before
/// any external tool is spawned.
#[derive(Debug, Clone)]
pub struct TesseractExtractor {
    pub languages: String,
    pub dpi: u32,
    pub pdftoppm_bin: PathBuf,
    pub tesseract_bin: PathBuf,
}

impl Default for TesseractExtractor {
    fn default() -> Self {
        Self::from_options(&IngestionOptions::default())
    }
}

impl TesseractExtractor {
    pub fn from_options(options: &IngestionOptions) -> Self {
        Self {
            languages: options.ocr_languages.clone(),
            dpi: options.render_dpi,
            pdftoppm_bin: PathBuf::from("pdftoppm"),
            tesseract_bin: PathBuf::from("tesseract"),
        }
    }

    fn render_page(&self, pdf: &Path, page: u32, prefix: &Path) -> Result<PathBuf, IngestError> {
        let page_arg = page.to_string();
        let output = Command::new(&self.pdftoppm_bin)
            .arg("-r")
            .arg(self.dpi.to_string())
            .args(["-f", page_arg.as_str(), "-l", page_arg.as_str(), "-png", "-singlefile"])
            .arg(pdf)
            .arg(prefix)
            .output()?;
        ensure_success("pdftoppm", &output, IngestError::PdfParse)?;

        Ok(prefix.with_extension("png"))
    }

    fn recognize(&self, image: &Path) -> Result<String, IngestError> {
        let output = Command::new(&self.tesseract_bin)
            .arg(image)
            .arg("stdout")
            .args(["-l", self.languages.as_str()])
            .output()?;
        ensure_success("tesseract", &output, IngestError::OcrFailed)?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl PdfExtractor for TesseractExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;
        let page_numbers = document.get_pages().into_keys().collect::<Vec<_>>();
        drop(document);

        let scratch = tempfile::tempdir()?;
        let mut recognized = Vec::with_capacity(page_numbers.len());
        for page in page_numbers {
            let prefix = scratch.path().join(format!("page-{page}"));
            let image = self.render_page(path, page, &prefix)?;
            let text = self.recognize(&image)?;
            std::fs::remove_file(&image)?;
            recognized.push((page, text));
        }

        Ok(collect_pages(recognized))
    }
}

/// Drops pages whose recognized text is blank.
pub fn collect_pages(recognized: impl IntoIterator<Item = (u32, String)>) -> Vec<PageText> {
    recognized
        .into_iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(number, text)| PageText { number, text })
        .collect()
}

fn ensure_success(
    tool: &str,
    output: &Output,
    to_error: impl FnOnce(String) -> IngestError,
) -> Result<(), IngestError> {
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(to_error(format!(
        "{tool} exited with {}: {}",
        output.status,
        stderr.trim()
    )))
}
