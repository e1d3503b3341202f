use axum::{response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod db;
mod embeddings;
mod llm;
mod orchestrator;
mod retrieval;

use config::DaemonConfig;
use embeddings::TextEmbedder;
use llm::{AnthropicProvider, CaptionProvider, ChatCompletionProvider, GeminiProvider, ModelChoice};
use orchestrator::SelectionPipeline;

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn build_pipeline(config: &DaemonConfig, retriever: Arc<dyn retrieval::CandidateRetriever>) -> anyhow::Result<SelectionPipeline> {
    let mut pipeline = SelectionPipeline::new(retriever);

    match &config.anthropic {
        Some(provider) => {
            let anthropic: Arc<dyn CaptionProvider> = Arc::new(AnthropicProvider::new(provider.clone(), config.llm_timeout)?);
            pipeline = pipeline.with_primary(ModelChoice::Claude, anthropic);
        }
        None => warn!("ANTHROPIC_API_KEY not set, claude selections go straight to the fallback"),
    }

    match &config.gemini {
        Some(provider) => {
            let gemini: Arc<dyn CaptionProvider> = Arc::new(GeminiProvider::new(provider.clone(), config.llm_timeout)?);
            pipeline = pipeline.with_primary(ModelChoice::Gemini, gemini);
        }
        None => warn!("GEMINI_API_KEY not set, gemini selections go straight to the fallback"),
    }

    match &config.openai {
        Some(provider) => {
            let fallback: Arc<dyn CaptionProvider> =
                Arc::new(ChatCompletionProvider::new(provider.clone(), config.llm_timeout)?);
            pipeline = pipeline.with_fallback(fallback);
        }
        None => warn!("OPENAI_API_KEY not set, no free-text fallback"),
    }

    Ok(pipeline)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DaemonConfig::from_env()?;

    // Initialize database
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(db::Database::new(&config.database_path)?);
    info!("Database initialized at {:?}", config.database_path);

    let embedder: Arc<dyn TextEmbedder> = Arc::new(embeddings::MlServiceEmbedder::new(
        &config.embedding_service_url,
        &config.embedding_model,
    )?);

    let retriever = retrieval::build_retriever(
        config.retrieval_backend,
        db.clone(),
        embedder.clone(),
        config.candidate_limit,
        config.min_similarity,
    );
    info!(
        backend = config.retrieval_backend.as_str(),
        limit = config.candidate_limit,
        "Candidate retrieval configured"
    );

    let pipeline = build_pipeline(&config, retriever)?;
    info!("Caption providers: {}", pipeline.describe());

    let state = api::AppState {
        db,
        pipeline: Arc::new(pipeline),
        embedder,
    };

    // Build the router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false);

    let app = Router::new()
        .route("/health", get(health))
        .nest("/api", api::router(state))
        .layer(cors);

    info!("Starting daemon server on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
