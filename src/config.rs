use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::rate_limit::RatePolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default = "default_rate_limits")]
    pub rate_limits: HashMap<String, RatePolicy>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// When set, non-public routes require a matching `x-demo-key` header.
    #[serde(default)]
    pub demo_key: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u64,
    #[serde(default)]
    pub local: LocalStorageConfig,
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            presign_expiry_secs: default_presign_expiry_secs(),
            local: LocalStorageConfig::default(),
            s3: None,
        }
    }
}

fn default_storage_backend() -> String {
    "local".to_string()
}
fn default_presign_expiry_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_root")]
    pub root: PathBuf,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root: default_local_root(),
        }
    }
}

fn default_local_root() -> PathBuf {
    PathBuf::from("uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
    #[serde(default = "default_max_chunks_per_document")]
    pub max_chunks_per_document: usize,
    #[serde(default = "default_max_pdf_pages")]
    pub max_pdf_pages: usize,
    #[serde(default = "default_max_pdf_mb")]
    pub max_pdf_mb: f64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_chars: default_min_chunk_chars(),
            max_chunks_per_document: default_max_chunks_per_document(),
            max_pdf_pages: default_max_pdf_pages(),
            max_pdf_mb: default_max_pdf_mb(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_min_chunk_chars() -> usize {
    20
}
fn default_max_chunks_per_document() -> usize {
    500
}
fn default_max_pdf_pages() -> usize {
    50
}
fn default_max_pdf_mb() -> f64 {
    10.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Default per-route policies: `ask` 10/hour,
/// `documents/ingest` 3/day, `documents/presign` 10/day,
/// `documents/confirm` 20/day.
pub fn default_rate_limits() -> HashMap<String, RatePolicy> {
    HashMap::from([
        (
            "ask".to_string(),
            RatePolicy {
                limit: 10,
                window_seconds: 3600,
            },
        ),
        (
            "documents/ingest".to_string(),
            RatePolicy {
                limit: 3,
                window_seconds: 86400,
            },
        ),
        (
            "documents/presign".to_string(),
            RatePolicy {
                limit: 10,
                window_seconds: 86400,
            },
        ),
        (
            "documents/confirm".to_string(),
            RatePolicy {
                limit: 20,
                window_seconds: 86400,
            },
        ),
    ])
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.ingestion.chunk_size == 0 {
        anyhow::bail!("ingestion.chunk_size must be > 0");
    }
    if config.ingestion.max_chunks_per_document == 0 {
        anyhow::bail!("ingestion.max_chunks_per_document must be > 0");
    }
    if config.ingestion.max_pdf_pages == 0 {
        anyhow::bail!("ingestion.max_pdf_pages must be > 0");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Validate storage
    match config.storage.backend.as_str() {
        "local" => {}
        "s3" => {
            if config.storage.s3.is_none() {
                anyhow::bail!("[storage.s3] section required when storage.backend is 's3'");
            }
        }
        other => anyhow::bail!("Unknown storage backend: '{}'. Must be local or s3.", other),
    }

    // Validate rate limits
    for (route, policy) in &config.rate_limits {
        if policy.limit == 0 || policy.window_seconds == 0 {
            anyhow::bail!(
                "rate_limits.\"{}\" must have limit > 0 and window_seconds > 0",
                route
            );
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: Config = toml::from_str(
            r#"
            [db]
            path = "data/docq.sqlite"

            [server]
            bind = "127.0.0.1:8000"
            "#,
        )
        .unwrap();

        assert_eq!(config.ingestion.chunk_size, 1000);
        assert_eq!(config.ingestion.chunk_overlap, 200);
        assert_eq!(config.storage.backend, "local");
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.rate_limits.get("ask").unwrap().limit, 10);
        assert_eq!(
            config
                .rate_limits
                .get("documents/ingest")
                .unwrap()
                .window_seconds,
            86400
        );
    }

    #[test]
    fn test_rate_limit_override() {
        let config: Config = toml::from_str(
            r#"
            [db]
            path = "data/docq.sqlite"

            [server]
            bind = "127.0.0.1:8000"

            [rate_limits]
            "ask" = { limit = 2, window_seconds = 60 }
            "#,
        )
        .unwrap();

        let ask = config.rate_limits.get("ask").unwrap();
        assert_eq!(ask.limit, 2);
        assert_eq!(ask.window_seconds, 60);
        // Overriding the table replaces the defaults entirely
        assert!(config.rate_limits.get("documents/ingest").is_none());
    }
}
