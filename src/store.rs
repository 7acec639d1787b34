//! Relational store for users, documents, and chunks.
//!
//! Thin query layer over the SQLite pool. Chunk replacement is a single
//! transaction so readers never observe a partial chunk set, and status
//! transitions are guarded updates so triggers can enforce the document
//! state machine atomically.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::embedding::vec_to_blob;
use crate::models::{Document, DocumentChunk, DocumentStatus, PageChunk, User};

pub async fn create_user(pool: &SqlitePool, email: &str) -> Result<User> {
    let user = User {
        id: Uuid::new_v4().to_string(),
        email: email.to_string(),
        created_at: Utc::now().timestamp(),
    };

    sqlx::query("INSERT INTO users (id, email, created_at) VALUES (?, ?, ?)")
        .bind(&user.id)
        .bind(&user.email)
        .bind(user.created_at)
        .execute(pool)
        .await?;

    Ok(user)
}

pub async fn get_user(pool: &SqlitePool, id: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT id, email, created_at FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Delete a user; their documents and chunks go with them (cascade).
pub async fn delete_user(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn create_document(
    pool: &SqlitePool,
    user_id: &str,
    filename: &str,
    storage_key: &str,
) -> Result<Document> {
    let doc = Document {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        filename: filename.to_string(),
        storage_key: storage_key.to_string(),
        status: DocumentStatus::Pending,
        page_count: None,
        error_message: None,
        created_at: Utc::now().timestamp(),
    };

    sqlx::query(
        r#"
        INSERT INTO documents (id, user_id, filename, storage_key, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.user_id)
    .bind(&doc.filename)
    .bind(&doc.storage_key)
    .bind(doc.status)
    .bind(doc.created_at)
    .execute(pool)
    .await?;

    Ok(doc)
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let doc = sqlx::query_as::<_, Document>(
        r#"
        SELECT id, user_id, filename, storage_key, status, page_count, error_message, created_at
        FROM documents WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(doc)
}

/// Guarded status transition. Returns whether the document was actually in
/// `from` (and is now in `to`); concurrent triggers race on this update,
/// at most one wins.
pub async fn transition(
    pool: &SqlitePool,
    id: &str,
    from: DocumentStatus,
    to: DocumentStatus,
) -> Result<bool> {
    let result = sqlx::query("UPDATE documents SET status = ? WHERE id = ? AND status = ?")
        .bind(to)
        .bind(id)
        .bind(from)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Record a terminal ingestion failure. Runs on a fresh pool connection so
/// the failure path survives even when the ingestion transaction did not.
pub async fn mark_failed(pool: &SqlitePool, id: &str, error_message: &str) -> Result<()> {
    sqlx::query("UPDATE documents SET status = ?, error_message = ? WHERE id = ?")
        .bind(DocumentStatus::Failed)
        .bind(error_message)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Atomically replace a document's chunk set and mark it ready.
///
/// Delete-then-insert runs in one transaction together with the final
/// status update, so a failure anywhere rolls the whole replacement back
/// and readers never see a partial set. Chunk indices are dense and
/// 0-based in chunker output order.
pub async fn replace_chunks(
    pool: &SqlitePool,
    document_id: &str,
    chunks: &[PageChunk],
    vectors: &[Vec<f32>],
    page_count: i64,
) -> Result<()> {
    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM document_chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    for (i, (chunk, vector)) in chunks.iter().zip(vectors.iter()).enumerate() {
        sqlx::query(
            r#"
            INSERT INTO document_chunks (id, document_id, chunk_index, content, page_number, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(document_id)
        .bind(i as i64)
        .bind(&chunk.text)
        .bind(chunk.page_number)
        .bind(vec_to_blob(vector))
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        "UPDATE documents SET status = ?, page_count = ?, error_message = NULL WHERE id = ?",
    )
    .bind(DocumentStatus::Ready)
    .bind(page_count)
    .bind(document_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn chunks_for_document(
    pool: &SqlitePool,
    document_id: &str,
) -> Result<Vec<DocumentChunk>> {
    let chunks = sqlx::query_as::<_, DocumentChunk>(
        r#"
        SELECT id, document_id, chunk_index, content, page_number, embedding, created_at
        FROM document_chunks WHERE document_id = ?
        ORDER BY chunk_index
        "#,
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;
    Ok(chunks)
}
