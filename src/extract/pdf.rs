use std::io::Write;

use super::TextExtractor;
use crate::error::{PipelineError, Result};

/// Text extraction for digital (text-layer) PDFs.
///
/// The report is staged in a uniquely named temp file that is removed when the
/// handle drops, on success and on every error path.
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String> {
        let mut tmp = tempfile::Builder::new()
            .prefix("license-report-")
            .suffix(".pdf")
            .tempfile()
            .map_err(|e| PipelineError::Extraction(format!("create temp file: {e}")))?;
        tmp.write_all(pdf_bytes)
            .and_then(|_| tmp.flush())
            .map_err(|e| PipelineError::Extraction(format!("write temp file: {e}")))?;

        let pages = pdf_extract::extract_text_by_pages(tmp.path())
            .map_err(|e| PipelineError::Extraction(format!("Failed to extract text: {e}")))?;

        tracing::info!("Extracted {} page(s) of report text", pages.len());
        Ok(pages.join("\n"))
    }
}
