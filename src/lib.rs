//! # docq
//!
//! A document question-answering backend: PDF ingestion, chunking, and
//! embeddings.
//!
//! Users upload PDFs through a presigned-upload flow; the service extracts
//! text per page, splits it into bounded word-aligned chunks, computes
//! vector embeddings, and persists everything for retrieval. Ingestion
//! runs as a background task per document; request admission is guarded by
//! a per-route, per-identity sliding-window rate limiter.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────┐   ┌──────────┐
//! │  Client  │──▶│ HTTP API (axum)           │──▶│  SQLite   │
//! │ uploads  │   │ presign/confirm/ingest    │   │ docs +    │
//! └──────────┘   │ rate limit + demo gate    │   │ chunks    │
//!                └────────────┬──────────────┘   └──────────┘
//!                             │ spawn
//!                             ▼
//!                ┌───────────────────────────┐
//!                │ Ingestion pipeline        │
//!                │ download → extract →      │
//!                │ chunk → embed → persist   │
//!                └───────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docq init                          # create database
//! docq serve                         # start the HTTP API
//! docq ingest <document-id>          # re-run ingestion from the CLI
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunker`] | Word-aligned sliding-window text chunking |
//! | [`rate_limit`] | Per-route sliding-window rate limiter |
//! | [`ingest`] | Ingestion pipeline |
//! | [`extract`] | Per-page PDF text extraction |
//! | [`embedding`] | Embedding client abstraction |
//! | [`storage`] | Blob storage backends (local, S3) |
//! | [`store`] | Relational store for users/documents/chunks |
//! | [`server`] | HTTP API server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod rate_limit;
pub mod server;
pub mod storage;
pub mod store;
