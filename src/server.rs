//! HTTP API server.
//!
//! Exposes the upload/ingest flow over a JSON HTTP API:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service banner |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/users` | Create a user |
//! | `POST` | `/documents/presign` | Create a pending document + upload URL |
//! | `PUT`  | `/documents/upload-local` | Dev-only upload target (local backend) |
//! | `POST` | `/documents/confirm` | Confirm the storage write; `pending → uploaded` |
//! | `POST` | `/documents/ingest` | Trigger ingestion; `uploaded → processing` |
//! | `GET`  | `/documents/{id}` | Poll document status |
//! | `POST` | `/ask` | RAG Q&A placeholder |
//!
//! Two middleware layers wrap the routes:
//! - **Demo gate** — when `server.demo_key` is configured, non-public
//!   routes require a matching `x-demo-key` header.
//! - **Rate limiting** — per-route sliding windows keyed by user id
//!   (`x-user-id` header) or caller IP. Rejections are HTTP 429 with a
//!   `Retry-After` header and a JSON body naming the limit and window.
//!
//! Ingestion itself runs outside the request/response cycle: the trigger
//! flips the document to `processing`, spawns a background task, and
//! returns 202 immediately. All outcomes are observable only via
//! `GET /documents/{id}`.
//!
//! # Error Contract
//!
//! Error responses follow one schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "only application/pdf uploads are supported" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found`
//! (404), `conflict` (409), `internal` (500). Rate-limit rejections use
//! the dedicated 429 body described above.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingClient};
use crate::extract::PdfTextExtractor;
use crate::ingest::Ingestor;
use crate::models::DocumentStatus;
use crate::rate_limit::{route_for_path, Identity, RateLimiter};
use crate::storage::{self, StorageBackend};
use crate::store;

/// Shared application state passed to all route handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub limiter: Arc<RateLimiter>,
    pub storage: Arc<dyn StorageBackend>,
    pub ingestor: Arc<Ingestor>,
}

/// Wire up the collaborators described by the configuration.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let config = Arc::new(config.clone());
    let pool = db::connect(&config).await?;
    let storage = storage::create_backend(&config.storage)?;
    let embeddings: Arc<dyn EmbeddingClient> = embedding::create_client(&config.embedding)?;
    let limiter = Arc::new(RateLimiter::in_memory(config.rate_limits.clone()));
    let ingestor = Arc::new(Ingestor::new(
        pool.clone(),
        storage.clone(),
        Arc::new(PdfTextExtractor),
        embeddings,
        config.ingestion.clone(),
    ));

    Ok(AppState {
        config,
        pool,
        limiter,
        storage,
        ingestor,
    })
}

/// Build the router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/users", post(handle_create_user))
        .route("/documents/presign", post(handle_presign))
        .route("/documents/upload-local", put(handle_upload_local))
        .route("/documents/confirm", post(handle_confirm))
        .route("/documents/ingest", post(handle_ingest))
        .route("/documents/{id}", get(handle_get_document))
        .route("/ask", post(handle_ask))
        .layer(cors)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            demo_gate_middleware,
        ))
        .with_state(state)
}

/// Start the HTTP server and run until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = build_state(config).await?;
    let bind = config.server.bind.clone();
    let app = app(state);

    info!("listening on http://{}", bind);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// ============ Middleware ============

fn normalized_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Resolve the request principal: explicit user id first, then forwarded
/// address, then socket peer address.
fn client_identity(req: &Request) -> Identity {
    let user_id = req
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let ip = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
        })
        .unwrap_or_else(|| "0.0.0.0".to_string());

    Identity::new(user_id, ip)
}

/// Require `x-demo-key` on non-public routes when a demo key is configured.
async fn demo_gate_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(ref demo_key) = state.config.server.demo_key else {
        return next.run(req).await;
    };

    let path = normalized_path(req.uri().path());
    if path == "/" || path == "/health" {
        return next.run(req).await;
    }

    let supplied = req
        .headers()
        .get("x-demo-key")
        .and_then(|v| v.to_str().ok());
    if supplied == Some(demo_key.as_str()) {
        return next.run(req).await;
    }

    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: "Missing or invalid x-demo-key header".to_string(),
    }
    .into_response()
}

/// Apply the per-route sliding window before the handlers run.
async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(route) = route_for_path(req.uri().path()) else {
        return next.run(req).await;
    };
    let Some(policy) = state.limiter.policy(route).copied() else {
        return next.run(req).await;
    };

    let identity = client_identity(&req);
    let decision = state.limiter.check(&identity, route);
    if decision.allowed {
        return next.run(req).await;
    }

    let retry_after = decision.retry_after_seconds.unwrap_or(1);
    let body = serde_json::json!({
        "detail": "Rate limit exceeded",
        "retry_after_seconds": retry_after,
        "limit": policy.limit,
        "window": policy.window_label(),
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert("Retry-After", HeaderValue::from(retry_after));
    response
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn conflict(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: "internal error".to_string(),
    }
}

// ============ GET / and /health ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "docq API" }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /users ============

#[derive(Deserialize)]
struct CreateUserRequest {
    email: String,
}

async fn handle_create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = req.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(bad_request("a valid email is required"));
    }

    let user = store::create_user(&state.pool, email).await.map_err(|e| {
        if format!("{:#}", e).contains("UNIQUE") {
            bad_request("email already registered")
        } else {
            internal(e)
        }
    })?;

    Ok((StatusCode::CREATED, Json(user)))
}

// ============ POST /documents/presign ============

#[derive(Deserialize)]
struct PresignRequest {
    user_id: String,
    filename: String,
    content_type: String,
    file_size_bytes: u64,
}

#[derive(Serialize)]
struct PresignResponse {
    document_id: String,
    storage_key: String,
    upload_url: String,
    method: String,
}

async fn handle_presign(
    State(state): State<AppState>,
    Json(req): Json<PresignRequest>,
) -> Result<Json<PresignResponse>, AppError> {
    if req.content_type != "application/pdf" {
        return Err(bad_request("only application/pdf uploads are supported"));
    }
    if req.filename.is_empty() || req.filename.contains('/') || req.filename.contains("..") {
        return Err(bad_request("invalid filename"));
    }

    let size_mb = req.file_size_bytes as f64 / (1024.0 * 1024.0);
    let max_mb = state.config.ingestion.max_pdf_mb;
    if size_mb > max_mb {
        return Err(bad_request(format!(
            "PDF too large: {:.2} MB exceeds limit of {} MB",
            size_mb, max_mb
        )));
    }

    let user = store::get_user(&state.pool, &req.user_id)
        .await
        .map_err(internal)?;
    if user.is_none() {
        return Err(bad_request("unknown user"));
    }

    let storage_key = format!("documents/{}/{}", Uuid::new_v4(), req.filename);
    let doc = store::create_document(&state.pool, &req.user_id, &req.filename, &storage_key)
        .await
        .map_err(internal)?;

    let presigned = state
        .storage
        .presign_put(&storage_key, state.config.storage.presign_expiry_secs)
        .map_err(internal)?;

    Ok(Json(PresignResponse {
        document_id: doc.id,
        storage_key,
        upload_url: presigned.url,
        method: presigned.method,
    }))
}

// ============ PUT /documents/upload-local ============

#[derive(Deserialize)]
struct UploadLocalQuery {
    key: String,
}

async fn handle_upload_local(
    State(state): State<AppState>,
    Query(query): Query<UploadLocalQuery>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.config.storage.backend != "local" {
        return Err(not_found("local upload endpoint is not enabled"));
    }

    let size_mb = body.len() as f64 / (1024.0 * 1024.0);
    if size_mb > state.config.ingestion.max_pdf_mb {
        return Err(bad_request(format!(
            "PDF too large: {:.2} MB exceeds limit of {} MB",
            size_mb, state.config.ingestion.max_pdf_mb
        )));
    }

    state
        .storage
        .put(&query.key, &body)
        .await
        .map_err(|e| bad_request(format!("{:#}", e)))?;

    Ok(Json(serde_json::json!({ "status": "stored" })))
}

// ============ POST /documents/confirm ============

#[derive(Deserialize)]
struct ConfirmRequest {
    document_id: String,
}

async fn handle_confirm(
    State(state): State<AppState>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let doc = store::get_document(&state.pool, &req.document_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("document not found"))?;

    match doc.status {
        DocumentStatus::Pending | DocumentStatus::Uploaded => {}
        other => {
            return Err(conflict(format!(
                "document already confirmed (status: {})",
                other.as_str()
            )));
        }
    }

    let exists = state
        .storage
        .exists(&doc.storage_key)
        .await
        .map_err(internal)?;
    if !exists {
        return Err(bad_request("file not found in storage"));
    }

    store::transition(
        &state.pool,
        &doc.id,
        DocumentStatus::Pending,
        DocumentStatus::Uploaded,
    )
    .await
    .map_err(internal)?;

    Ok(Json(serde_json::json!({
        "document_id": doc.id,
        "status": DocumentStatus::Uploaded.as_str(),
    })))
}

// ============ POST /documents/ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    document_id: String,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<impl IntoResponse, AppError> {
    let doc = store::get_document(&state.pool, &req.document_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("document not found"))?;

    // Only `uploaded` may enter `processing`; the guarded update makes
    // concurrent triggers race safely (at most one wins).
    let started = store::transition(
        &state.pool,
        &doc.id,
        DocumentStatus::Uploaded,
        DocumentStatus::Processing,
    )
    .await
    .map_err(internal)?;
    if !started {
        return Err(conflict(format!(
            "document is not ready for ingestion (status: {})",
            doc.status.as_str()
        )));
    }

    state.ingestor.clone().spawn(doc.id.clone());

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "document_id": doc.id,
            "status": DocumentStatus::Processing.as_str(),
        })),
    ))
}

// ============ GET /documents/{id} ============

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<crate::models::Document>, AppError> {
    let doc = store::get_document(&state.pool, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("document not found"))?;
    Ok(Json(doc))
}

// ============ POST /ask ============

/// Placeholder for RAG Q&A over ingested chunks. Rate limited like the
/// real endpoint will be.
async fn handle_ask() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "ask endpoint placeholder" }))
}
