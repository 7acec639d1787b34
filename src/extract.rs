//! Per-page text extraction from uploaded document bytes.
//!
//! The pipeline depends on the [`TextExtractor`] trait; the production
//! implementation wraps `pdf-extract`. Extraction failures surface as
//! errors for the pipeline to convert into a failed document status.

use anyhow::{Context, Result};

use crate::models::PageText;

/// Text-extraction collaborator: raw document bytes in, ordered
/// `(page_number, text)` out, bounded at `max_pages`.
pub trait TextExtractor: Send + Sync {
    fn pages(&self, bytes: &[u8], max_pages: usize) -> Result<Vec<PageText>>;
}

/// PDF extraction via `pdf-extract`.
///
/// Pages beyond `max_pages` are ignored even if the source has more. Pages
/// are returned in document order with 1-based page numbers; pages without
/// text come back with an empty string (callers decide whether that
/// matters).
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn pages(&self, bytes: &[u8], max_pages: usize) -> Result<Vec<PageText>> {
        let pages =
            pdf_extract::extract_text_from_mem_by_pages(bytes).context("PDF extraction failed")?;

        Ok(pages
            .into_iter()
            .take(max_pages)
            .enumerate()
            .map(|(i, text)| PageText {
                page_number: (i + 1) as i64,
                text,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pdf_returns_error() {
        let err = PdfTextExtractor.pages(b"not a pdf", 50).unwrap_err();
        assert!(err.to_string().contains("PDF extraction failed"));
    }
}
