use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::embeddings::TextEmbedder;
use crate::orchestrator::SelectionPipeline;

pub mod error;
pub mod selections;
pub mod templates;

pub use error::{ApiError, ApiResult};

/// Shared handles every route needs.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub pipeline: Arc<SelectionPipeline>,
    pub embedder: Arc<dyn TextEmbedder>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/templates", templates::router(state.clone()))
        .nest("/selections", selections::router(state))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::Result;
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;
    use serde::de::DeserializeOwned;
    use serde_json::Value;

    use meme_engine::{ProtocolError, SelectionRequest, SelectionResponse};

    use crate::llm::CaptionProvider;
    use crate::retrieval::CatalogRetriever;

    /// Two-dimensional vectors derived from text length.
    pub struct LengthEmbedder;

    #[async_trait::async_trait]
    impl TextEmbedder for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }

        async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    /// Returns the same decoded payload or error on every call.
    pub struct FixedProvider {
        name: &'static str,
        reply: std::result::Result<Value, ProtocolError>,
    }

    impl FixedProvider {
        pub fn new(name: &'static str, reply: std::result::Result<Value, ProtocolError>) -> Arc<Self> {
            Arc::new(FixedProvider { name, reply })
        }
    }

    #[async_trait::async_trait]
    impl CaptionProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn is_structured(&self) -> bool {
            true
        }

        async fn select(
            &self,
            _request: &SelectionRequest,
            _model: Option<&str>,
        ) -> std::result::Result<SelectionResponse, ProtocolError> {
            let value = self.reply.clone()?;
            SelectionResponse::from_value(value)?.validate()
        }
    }

    pub fn state_with(build: impl FnOnce(Arc<Database>) -> SelectionPipeline) -> AppState {
        let db = Arc::new(Database::in_memory().unwrap());
        let pipeline = build(db.clone());
        AppState {
            db,
            pipeline: Arc::new(pipeline),
            embedder: Arc::new(LengthEmbedder),
        }
    }

    /// Catalog retrieval and no providers.
    pub fn state() -> AppState {
        state_with(|db| SelectionPipeline::new(Arc::new(CatalogRetriever::new(db, 10))))
    }

    pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub async fn json_body<T: DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
