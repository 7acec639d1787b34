//! Ingestion pipeline orchestration.
//!
//! Drives one document through download → extraction → chunking →
//! embedding → persistence. Each run executes off the request path (one
//! background task per accepted trigger) and reports its outcome only
//! through the document row: terminal `ready` on success, `failed` with a
//! capped error message otherwise.
//!
//! The steps run in a private executor returning a typed [`IngestError`]
//! that enumerates every failure mode; conversion to persisted state
//! happens at exactly one point in [`Ingestor::run`]. The failure
//! write uses a fresh pool connection, independent of whatever transaction
//! the failing step left behind.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use crate::chunker::chunk_pages;
use crate::config::IngestionConfig;
use crate::embedding::EmbeddingClient;
use crate::extract::TextExtractor;
use crate::models::Document;
use crate::storage::StorageBackend;
use crate::store;

/// Persisted error messages are capped at this many characters.
const MAX_ERROR_MESSAGE_CHARS: usize = 2000;

/// Why an ingestion run failed.
#[derive(Debug)]
pub enum IngestError {
    /// No page yielded any text after extraction.
    NoTextExtracted,
    /// Extraction produced text but chunking filtered everything out.
    NoChunksProduced,
    /// A collaborator (storage, extraction, embeddings, database) failed.
    Failed(anyhow::Error),
}

impl IngestError {
    fn message(&self) -> String {
        match self {
            IngestError::NoTextExtracted => "No text extracted from PDF".to_string(),
            IngestError::NoChunksProduced => "No chunks produced after extraction".to_string(),
            IngestError::Failed(e) => format!("{:#}", e),
        }
    }
}

impl From<anyhow::Error> for IngestError {
    fn from(e: anyhow::Error) -> Self {
        IngestError::Failed(e)
    }
}

/// Successful run summary, for logging.
struct IngestReport {
    page_count: i64,
    chunk_count: usize,
}

/// One-document-at-a-time ingestion driver.
///
/// Constructed once and shared; each [`run`](Self::run) call processes a
/// single document id.
pub struct Ingestor {
    pool: SqlitePool,
    storage: Arc<dyn StorageBackend>,
    extractor: Arc<dyn TextExtractor>,
    embeddings: Arc<dyn EmbeddingClient>,
    config: IngestionConfig,
}

impl Ingestor {
    pub fn new(
        pool: SqlitePool,
        storage: Arc<dyn StorageBackend>,
        extractor: Arc<dyn TextExtractor>,
        embeddings: Arc<dyn EmbeddingClient>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            pool,
            storage,
            extractor,
            embeddings,
            config,
        }
    }

    /// Launch a run on the background executor.
    ///
    /// The returned handle is the completion signal; current callers drop
    /// it (fire-and-forget), but requeue/timeout logic can await it.
    pub fn spawn(self: Arc<Self>, document_id: String) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(&document_id).await })
    }

    /// Run ingestion for a document, absorbing every failure into the
    /// document row. Never returns an error: nothing downstream observes a
    /// return value.
    pub async fn run(&self, document_id: &str) {
        let doc = match store::get_document(&self.pool, document_id).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                // Deleted concurrently; nothing to update.
                debug!(document_id, "ingestion skipped: document not found");
                return;
            }
            Err(e) => {
                error!(document_id, error = %e, "ingestion aborted: could not load document");
                return;
            }
        };

        match self.execute(&doc).await {
            Ok(report) => {
                info!(
                    document_id,
                    pages = report.page_count,
                    chunks = report.chunk_count,
                    "ingestion complete"
                );
            }
            Err(err) => {
                let message = truncate_chars(&err.message(), MAX_ERROR_MESSAGE_CHARS);
                warn!(document_id, error = %message, "ingestion failed");
                if let Err(e) = store::mark_failed(&self.pool, document_id, &message).await {
                    error!(document_id, error = %e, "failed to persist ingestion failure");
                }
            }
        }
    }

    async fn execute(&self, doc: &Document) -> Result<IngestReport, IngestError> {
        let bytes = self.storage.download(&doc.storage_key).await?;

        let pages = self.extractor.pages(&bytes, self.config.max_pdf_pages)?;
        let page_count = pages
            .iter()
            .filter(|p| !p.text.trim().is_empty())
            .count() as i64;
        if page_count == 0 {
            return Err(IngestError::NoTextExtracted);
        }

        let chunks = chunk_pages(&pages, &self.config);
        if chunks.is_empty() {
            return Err(IngestError::NoChunksProduced);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embeddings.embed(&texts).await?;

        if vectors.len() != chunks.len() {
            return Err(IngestError::Failed(anyhow::anyhow!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let dims = self.embeddings.dims();
        if dims > 0 {
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                return Err(IngestError::Failed(anyhow::anyhow!(
                    "unexpected embedding dimension: got {}, expected {}",
                    bad.len(),
                    dims
                )));
            }
        }

        store::replace_chunks(&self.pool, &doc.id, &chunks, &vectors, page_count).await?;

        Ok(IngestReport {
            page_count,
            chunk_count: chunks.len(),
        })
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_caps_long_messages() {
        let long = "x".repeat(5000);
        assert_eq!(truncate_chars(&long, 2000).len(), 2000);
        assert_eq!(truncate_chars("short", 2000), "short");
    }

    #[test]
    fn test_fixed_failure_messages() {
        assert_eq!(
            IngestError::NoTextExtracted.message(),
            "No text extracted from PDF"
        );
        assert_eq!(
            IngestError::NoChunksProduced.message(),
            "No chunks produced after extraction"
        );
    }
}
