//! Daemon configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::retrieval::RetrievalBackendKind;

/// Credentials and endpoint for one hosted model provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    pub retrieval_backend: RetrievalBackendKind,
    /// Maximum templates offered to the model per request
    pub candidate_limit: usize,
    /// Similarity floor for the embedding retriever
    pub min_similarity: f32,
    pub embedding_service_url: String,
    pub embedding_model: String,
    /// `None` when the API key is missing; the provider is then disabled.
    pub anthropic: Option<ProviderConfig>,
    pub gemini: Option<ProviderConfig>,
    pub openai: Option<ProviderConfig>,
    /// Transport timeout for every model call
    pub llm_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7777)),
            database_path: PathBuf::from(".cache/memegen.db"),
            retrieval_backend: RetrievalBackendKind::SimilarityThenCatalog,
            candidate_limit: 10,
            min_similarity: 0.0,
            embedding_service_url: "http://127.0.0.1:8001".to_string(),
            embedding_model: "all-MiniLM-L6-v2".to_string(),
            anthropic: None,
            gemini: None,
            openai: None,
            llm_timeout: Duration::from_secs(60),
        }
    }
}

impl DaemonConfig {
    /// Create config from environment variables (after loading `.env` if present).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let bind_addr = match std::env::var("BIND_ADDR") {
            Ok(addr) => addr.parse().with_context(|| format!("invalid BIND_ADDR: {}", addr))?,
            Err(_) => defaults.bind_addr,
        };

        let retrieval_backend = match std::env::var("RETRIEVAL_BACKEND") {
            Ok(kind) => kind.parse().map_err(anyhow::Error::msg)?,
            Err(_) => defaults.retrieval_backend,
        };

        Ok(Self {
            bind_addr,
            database_path: std::env::var("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            retrieval_backend,
            candidate_limit: std::env::var("CANDIDATE_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|limit| *limit > 0)
                .unwrap_or(defaults.candidate_limit),
            min_similarity: std::env::var("MIN_SIMILARITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_similarity),
            embedding_service_url: std::env::var("EMBEDDING_SERVICE_URL")
                .unwrap_or(defaults.embedding_service_url),
            embedding_model: std::env::var("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            anthropic: provider_from_env(
                "ANTHROPIC",
                "https://api.anthropic.com",
                "claude-3-5-sonnet-latest",
            ),
            gemini: provider_from_env(
                "GEMINI",
                "https://generativelanguage.googleapis.com",
                "gemini-2.0-flash",
            ),
            openai: provider_from_env("OPENAI", "https://api.openai.com", "gpt-4o-mini"),
            llm_timeout: Duration::from_secs(
                std::env::var("LLM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        })
    }
}

fn provider_from_env(prefix: &str, default_base_url: &str, default_model: &str) -> Option<ProviderConfig> {
    let api_key = std::env::var(format!("{}_API_KEY", prefix))
        .ok()
        .filter(|key| !key.trim().is_empty())?;

    Some(ProviderConfig {
        api_key,
        base_url: std::env::var(format!("{}_BASE_URL", prefix))
            .unwrap_or_else(|_| default_base_url.to_string())
            .trim_end_matches('/')
            .to_string(),
        model: std::env::var(format!("{}_MODEL", prefix)).unwrap_or_else(|_| default_model.to_string()),
    })
}
