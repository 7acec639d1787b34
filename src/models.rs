//! Core data models used throughout docq.
//!
//! These types represent the users, documents, and chunks that flow through
//! the ingestion pipeline, plus the intermediate page/chunk values exchanged
//! between extraction, chunking, and embedding.

use serde::{Deserialize, Serialize};

/// Lifecycle of a document.
///
/// `pending` at presign time, `uploaded` after the storage write is
/// confirmed, `processing` while ingestion runs, then terminal `ready` or
/// `failed`. Only `uploaded` may transition to `processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Uploaded,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Failed => "failed",
        }
    }
}

/// An account that owns documents. Deleting a user cascades to their
/// documents and chunks.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub created_at: i64,
}

/// An uploaded document and its ingestion state.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    pub filename: String,
    pub storage_key: String,
    pub status: DocumentStatus,
    pub page_count: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: i64,
}

/// A persisted chunk of document text with its embedding vector.
///
/// `chunk_index` is a dense 0-based ordinal in chunker output order; the
/// whole set for a document is replaced as a unit on re-ingestion. The
/// embedding is stored as little-endian f32 bytes (see
/// [`crate::embedding::blob_to_vec`]).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub page_number: i64,
    pub embedding: Vec<u8>,
    pub created_at: i64,
}

impl DocumentChunk {
    /// Decode the stored embedding BLOB into a float vector.
    pub fn embedding_vector(&self) -> Vec<f32> {
        crate::embedding::blob_to_vec(&self.embedding)
    }
}

/// Text extracted from one PDF page, before chunking.
#[derive(Debug, Clone)]
pub struct PageText {
    pub page_number: i64,
    pub text: String,
}

/// One chunk produced by the chunker, tagged with its source page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageChunk {
    pub page_number: i64,
    pub text: String,
}
