pub mod dates;
pub mod llm;
pub mod pdf;
pub mod professions;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::ExtractedReport;

/// Raw report bytes to plain text, pages in order.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, pdf_bytes: &[u8]) -> Result<String>;
}

/// Report text plus the caller's birth date to a normalized record.
#[async_trait]
pub trait RecordExtractor: Send + Sync {
    async fn extract(&self, report_text: &str, birth_date: &str) -> Result<ExtractedReport>;
}
