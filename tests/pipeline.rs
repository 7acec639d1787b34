//! Integration tests for the ingestion pipeline.
//!
//! Each test runs against its own temp-dir SQLite database and local
//! storage root, with a plain-text extractor stub (form feed separates
//! pages) and a mock embedding client, so outcomes depend only on the
//! pipeline logic under test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tempfile::TempDir;

use docq::config::IngestionConfig;
use docq::db;
use docq::embedding::EmbeddingClient;
use docq::extract::TextExtractor;
use docq::ingest::Ingestor;
use docq::migrate;
use docq::models::{Document, DocumentStatus, PageText};
use docq::storage::{LocalStorage, StorageBackend};
use docq::store;

/// Extractor stub: bytes are UTF-8 text, form feed separates pages.
struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn pages(&self, bytes: &[u8], max_pages: usize) -> Result<Vec<PageText>> {
        let text = std::str::from_utf8(bytes)?;
        Ok(text
            .split('\u{c}')
            .take(max_pages)
            .enumerate()
            .map(|(i, t)| PageText {
                page_number: (i + 1) as i64,
                text: t.to_string(),
            })
            .collect())
    }
}

/// Deterministic embedding client: vector slot 0 encodes the text length,
/// slot 1 the input index, so tests can verify chunk/vector pairing.
struct MockEmbeddings {
    dims: usize,
    calls: AtomicUsize,
}

impl MockEmbeddings {
    fn new(dims: usize) -> Self {
        Self {
            dims,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddings {
    fn model_name(&self) -> &str {
        "mock"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let mut v = vec![0.0f32; self.dims];
                v[0] = t.chars().count() as f32;
                v[1] = i as f32;
                v
            })
            .collect())
    }
}

/// Embedding client that always fails with the given message.
struct FailingEmbeddings {
    message: String,
}

#[async_trait]
impl EmbeddingClient for FailingEmbeddings {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("{}", self.message)
    }
}

/// Embedding client that returns vectors narrower than it claims.
struct BadDimsEmbeddings;

#[async_trait]
impl EmbeddingClient for BadDimsEmbeddings {
    fn model_name(&self) -> &str {
        "bad-dims"
    }
    fn dims(&self) -> usize {
        8
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.0f32; 3]).collect())
    }
}

struct TestEnv {
    _tmp: TempDir,
    pool: SqlitePool,
    storage: Arc<dyn StorageBackend>,
    ingestor: Ingestor,
}

fn test_ingestion_config() -> IngestionConfig {
    IngestionConfig {
        chunk_size: 200,
        chunk_overlap: 40,
        min_chunk_chars: 5,
        ..IngestionConfig::default()
    }
}

async fn setup(embeddings: Arc<dyn EmbeddingClient>) -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("docq.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let storage: Arc<dyn StorageBackend> =
        Arc::new(LocalStorage::new(tmp.path().join("uploads")));

    let ingestor = Ingestor::new(
        pool.clone(),
        storage.clone(),
        Arc::new(PlainTextExtractor),
        embeddings,
        test_ingestion_config(),
    );

    TestEnv {
        _tmp: tmp,
        pool,
        storage,
        ingestor,
    }
}

/// Create a user + document, write the body to storage, and walk the
/// document to `processing` the way the ingest trigger does.
async fn seed_processing_document(env: &TestEnv, body: &[u8]) -> Document {
    let user = store::create_user(&env.pool, "test@example.com").await.unwrap();
    let doc = store::create_document(
        &env.pool,
        &user.id,
        "test.pdf",
        &format!("documents/{}/test.pdf", uuid::Uuid::new_v4()),
    )
    .await
    .unwrap();

    env.storage.put(&doc.storage_key, body).await.unwrap();
    assert!(
        store::transition(&env.pool, &doc.id, DocumentStatus::Pending, DocumentStatus::Uploaded)
            .await
            .unwrap()
    );
    assert!(
        store::transition(
            &env.pool,
            &doc.id,
            DocumentStatus::Uploaded,
            DocumentStatus::Processing
        )
        .await
        .unwrap()
    );
    doc
}

fn two_page_body() -> Vec<u8> {
    format!(
        "{}\u{c}{}",
        "Page one has plenty of text describing the alpha half of the corpus in full sentences.",
        "Page two covers the beta half with equally verbose and distinct wording throughout."
    )
    .into_bytes()
}

#[tokio::test]
async fn test_happy_path_two_pages() {
    let env = setup(Arc::new(MockEmbeddings::new(8))).await;
    let doc = seed_processing_document(&env, &two_page_body()).await;

    env.ingestor.run(&doc.id).await;

    let doc = store::get_document(&env.pool, &doc.id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Ready);
    assert_eq!(doc.page_count, Some(2));
    assert_eq!(doc.error_message, None);

    let chunks = store::chunks_for_document(&env.pool, &doc.id).await.unwrap();
    assert!(!chunks.is_empty());
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i as i64, "chunk indices must be dense");
        assert!(chunk.page_number == 1 || chunk.page_number == 2);

        let vector = chunk.embedding_vector();
        assert_eq!(vector.len(), 8);
        // Slot 1 carries the batch index: vectors stayed paired with their
        // chunks in chunker output order.
        assert_eq!(vector[1], i as f32);
        assert_eq!(vector[0], chunk.content.chars().count() as f32);
    }
    assert!(chunks.iter().any(|c| c.page_number == 1));
    assert!(chunks.iter().any(|c| c.page_number == 2));
    assert!(chunks.iter().any(|c| c.content.contains("alpha")));
    assert!(chunks.iter().any(|c| c.content.contains("beta")));
}

#[tokio::test]
async fn test_no_text_extracted_fails() {
    let env = setup(Arc::new(MockEmbeddings::new(8))).await;
    let doc = seed_processing_document(&env, "  \u{c}\t\n\u{c} ".as_bytes()).await;

    env.ingestor.run(&doc.id).await;

    let doc = store::get_document(&env.pool, &doc.id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert_eq!(doc.error_message.as_deref(), Some("No text extracted from PDF"));
    assert_eq!(doc.page_count, None);

    let chunks = store::chunks_for_document(&env.pool, &doc.id).await.unwrap();
    assert!(chunks.is_empty());
}

#[tokio::test]
async fn test_all_chunks_filtered_fails() {
    // Both pages have text, but below the minimum chunk length.
    let env = setup(Arc::new(MockEmbeddings::new(8))).await;
    let doc = seed_processing_document(&env, "tiny\u{c}wee".as_bytes()).await;

    env.ingestor.run(&doc.id).await;

    let doc = store::get_document(&env.pool, &doc.id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert_eq!(
        doc.error_message.as_deref(),
        Some("No chunks produced after extraction")
    );
}

#[tokio::test]
async fn test_reingestion_replaces_chunks() {
    let env = setup(Arc::new(MockEmbeddings::new(8))).await;
    let doc = seed_processing_document(&env, &two_page_body()).await;

    env.ingestor.run(&doc.id).await;
    let first = store::chunks_for_document(&env.pool, &doc.id).await.unwrap();
    assert!(first.iter().any(|c| c.content.contains("alpha")));

    // New upload cycle with different content
    let body = "Replacement content entirely about gamma subjects, still long enough to chunk.";
    env.storage.put(&doc.storage_key, body.as_bytes()).await.unwrap();
    assert!(
        store::transition(&env.pool, &doc.id, DocumentStatus::Ready, DocumentStatus::Uploaded)
            .await
            .unwrap()
    );
    assert!(
        store::transition(
            &env.pool,
            &doc.id,
            DocumentStatus::Uploaded,
            DocumentStatus::Processing
        )
        .await
        .unwrap()
    );
    env.ingestor.run(&doc.id).await;

    let doc = store::get_document(&env.pool, &doc.id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Ready);
    assert_eq!(doc.page_count, Some(1));

    let second = store::chunks_for_document(&env.pool, &doc.id).await.unwrap();
    assert!(!second.is_empty());
    for (i, chunk) in second.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i as i64);
        assert!(
            chunk.content.contains("gamma"),
            "leftover chunk from the first run: {:?}",
            chunk.content
        );
    }
}

#[tokio::test]
async fn test_missing_document_is_silent_noop() {
    let env = setup(Arc::new(MockEmbeddings::new(8))).await;

    // Must not panic, error, or write anything.
    env.ingestor.run("does-not-exist").await;

    let chunks = store::chunks_for_document(&env.pool, "does-not-exist").await.unwrap();
    assert!(chunks.is_empty());
}

#[tokio::test]
async fn test_embedding_failure_marks_failed() {
    let env = setup(Arc::new(FailingEmbeddings {
        message: "embedding backend exploded".to_string(),
    }))
    .await;
    let doc = seed_processing_document(&env, &two_page_body()).await;

    env.ingestor.run(&doc.id).await;

    let doc = store::get_document(&env.pool, &doc.id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.error_message.unwrap().contains("embedding backend exploded"));

    let chunks = store::chunks_for_document(&env.pool, &doc.id).await.unwrap();
    assert!(chunks.is_empty());
}

#[tokio::test]
async fn test_error_message_truncated_to_cap() {
    let env = setup(Arc::new(FailingEmbeddings {
        message: "x".repeat(5000),
    }))
    .await;
    let doc = seed_processing_document(&env, &two_page_body()).await;

    env.ingestor.run(&doc.id).await;

    let doc = store::get_document(&env.pool, &doc.id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert_eq!(doc.error_message.unwrap().chars().count(), 2000);
}

#[tokio::test]
async fn test_wrong_embedding_dimension_marks_failed() {
    let env = setup(Arc::new(BadDimsEmbeddings)).await;
    let doc = seed_processing_document(&env, &two_page_body()).await;

    env.ingestor.run(&doc.id).await;

    let doc = store::get_document(&env.pool, &doc.id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc
        .error_message
        .unwrap()
        .contains("unexpected embedding dimension"));
}

#[tokio::test]
async fn test_missing_storage_object_marks_failed() {
    let env = setup(Arc::new(MockEmbeddings::new(8))).await;

    // Document exists but nothing was written to storage.
    let user = store::create_user(&env.pool, "test@example.com").await.unwrap();
    let doc = store::create_document(&env.pool, &user.id, "test.pdf", "documents/missing/test.pdf")
        .await
        .unwrap();

    env.ingestor.run(&doc.id).await;

    let doc = store::get_document(&env.pool, &doc.id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(!doc.error_message.unwrap().is_empty());
}

#[tokio::test]
async fn test_deleting_user_cascades_to_documents_and_chunks() {
    let env = setup(Arc::new(MockEmbeddings::new(8))).await;
    let doc = seed_processing_document(&env, &two_page_body()).await;
    env.ingestor.run(&doc.id).await;
    assert!(!store::chunks_for_document(&env.pool, &doc.id).await.unwrap().is_empty());

    assert!(store::delete_user(&env.pool, &doc.user_id).await.unwrap());

    assert!(store::get_document(&env.pool, &doc.id).await.unwrap().is_none());
    assert!(store::chunks_for_document(&env.pool, &doc.id).await.unwrap().is_empty());
}
