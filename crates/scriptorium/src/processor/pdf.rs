use async_trait::async_trait;
use bytes::Bytes;

use super::NativeExtractor;
use crate::error::ProcessError;

/// Per-page text read straight from a PDF's content streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeText {
    pub pages: Vec<String>,
}

impl NativeText {
    pub fn new(pages: Vec<String>) -> Self {
        Self { pages }
    }

    /// Characters across all pages after trimming.
    pub fn total_chars(&self) -> usize {
        self.pages.iter().map(|p| p.trim().chars().count()).sum()
    }

    /// Whether the text is worth keeping instead of running OCR.
    ///
    /// A file whose pages together hold fewer than `threshold` characters
    /// is almost certainly a scan with, at most, a stray text layer.
    pub fn is_usable(&self, threshold: usize) -> bool {
        !self.pages.is_empty() && self.total_chars() >= threshold
    }
}

/// [`NativeExtractor`] backed by lopdf.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NativeExtractor for LopdfExtractor {
    async fn extract_pages(&self, content: Bytes) -> Result<Vec<String>, ProcessError> {
        let span = tracing::info_span!("processor.pdf", bytes = content.len());
        tokio::task::spawn_blocking(move || {
            let _span = span.entered();
            extract_native_pages(&content)
        })
        .await
        .map_err(|e| ProcessError::PdfProcessing(format!("extraction task failed: {}", e)))?
    }
}

/// Reads every page's text in page order, trimmed.
///
/// A page whose text cannot be decoded yields an empty string rather than
/// failing the document; the length heuristic then decides whether OCR is
/// needed.
pub fn extract_native_pages(pdf_bytes: &[u8]) -> Result<Vec<String>, ProcessError> {
    let doc = lopdf::Document::load_mem(pdf_bytes)
        .map_err(|e| ProcessError::PdfProcessing(format!("Failed to load PDF: {}", e)))?;

    // BTreeMap keyed by page number, so already in order.
    let pages = doc
        .get_pages()
        .into_keys()
        .map(|page_num| match doc.extract_text(&[page_num]) {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::debug!("page {} has no extractable text: {}", page_num, e);
                String::new()
            }
        })
        .collect();

    Ok(pages)
}
