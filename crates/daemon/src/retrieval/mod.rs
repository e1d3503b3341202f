use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

use meme_engine::{Template, TemplateMode};

use crate::db::{Database, TemplateStatus};
use crate::embeddings::TextEmbedder;

pub mod local_backend;

pub use local_backend::SimilarityRetriever;

/// Backend kind identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalBackendKind {
    #[serde(rename = "similarity")]
    Similarity,
    #[serde(rename = "catalog")]
    Catalog,
    #[serde(rename = "similarity_then_catalog")]
    SimilarityThenCatalog,
}

impl RetrievalBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalBackendKind::Similarity => "similarity",
            RetrievalBackendKind::Catalog => "catalog",
            RetrievalBackendKind::SimilarityThenCatalog => "similarity_then_catalog",
        }
    }
}

impl FromStr for RetrievalBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "similarity" | "local" => Ok(RetrievalBackendKind::Similarity),
            "catalog" => Ok(RetrievalBackendKind::Catalog),
            "similarity_then_catalog" | "" => Ok(RetrievalBackendKind::SimilarityThenCatalog),
            other => Err(format!("unknown RETRIEVAL_BACKEND: {}", other)),
        }
    }
}

/// Produces the ordered candidate set for one selection request.
///
/// An empty result is a normal outcome, not an error.
#[async_trait::async_trait]
pub trait CandidateRetriever: Send + Sync {
    async fn retrieve(&self, prompt_text: &str, mode: TemplateMode) -> Result<Vec<Template>>;
}

/// Completed templates of the mode, newest first. Needs no embedding service.
pub struct CatalogRetriever {
    db: Arc<Database>,
    limit: usize,
}

impl CatalogRetriever {
    pub fn new(db: Arc<Database>, limit: usize) -> Self {
        CatalogRetriever { db, limit }
    }
}

#[async_trait::async_trait]
impl CandidateRetriever for CatalogRetriever {
    async fn retrieve(&self, _prompt_text: &str, mode: TemplateMode) -> Result<Vec<Template>> {
        let stored = self
            .db
            .list_templates(Some(mode), Some(TemplateStatus::Completed), Some(self.limit))?;
        Ok(stored.into_iter().map(|s| s.template).collect())
    }
}

/// Try the primary retriever, and use the secondary if it errors.
pub struct FallbackRetriever {
    primary: Arc<dyn CandidateRetriever>,
    secondary: Arc<dyn CandidateRetriever>,
}

impl FallbackRetriever {
    pub fn new(primary: Arc<dyn CandidateRetriever>, secondary: Arc<dyn CandidateRetriever>) -> Self {
        FallbackRetriever { primary, secondary }
    }
}

#[async_trait::async_trait]
impl CandidateRetriever for FallbackRetriever {
    async fn retrieve(&self, prompt_text: &str, mode: TemplateMode) -> Result<Vec<Template>> {
        match self.primary.retrieve(prompt_text, mode).await {
            Ok(templates) => Ok(templates),
            Err(e) => {
                warn!(error = %e, "similarity retrieval failed, falling back to catalog");
                self.secondary.retrieve(prompt_text, mode).await
            }
        }
    }
}

/// Build the retriever selected by configuration.
pub fn build_retriever(
    kind: RetrievalBackendKind,
    db: Arc<Database>,
    embedder: Arc<dyn TextEmbedder>,
    limit: usize,
    min_similarity: f32,
) -> Arc<dyn CandidateRetriever> {
    let catalog = || Arc::new(CatalogRetriever::new(db.clone(), limit)) as Arc<dyn CandidateRetriever>;
    let similarity =
        || Arc::new(SimilarityRetriever::new(db.clone(), embedder.clone(), limit, min_similarity)) as Arc<dyn CandidateRetriever>;

    match kind {
        RetrievalBackendKind::Similarity => similarity(),
        RetrievalBackendKind::Catalog => catalog(),
        RetrievalBackendKind::SimilarityThenCatalog => Arc::new(FallbackRetriever::new(similarity(), catalog())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingRetriever;

    #[async_trait::async_trait]
    impl CandidateRetriever for FailingRetriever {
        async fn retrieve(&self, _prompt_text: &str, _mode: TemplateMode) -> Result<Vec<Template>> {
            Err(anyhow::anyhow!("embedding service down"))
        }
    }

    struct ConstantEmbedder;

    #[async_trait::async_trait]
    impl TextEmbedder for ConstantEmbedder {
        fn model_name(&self) -> &str {
            "constant"
        }

        async fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    fn seeded_db() -> Arc<Database> {
        let db = Database::in_memory().unwrap();
        db.create_template("Drake", "", "https://cdn.example/drake.mp4", false).unwrap();
        db.create_template("Dancing Guy", "", "https://cdn.example/dance.mp4", true).unwrap();
        db.create_template("Distracted Boyfriend", "", "https://cdn.example/boyfriend.mp4", false).unwrap();
        Arc::new(db)
    }

    #[test]
    fn backend_kind_parses() {
        assert_eq!("catalog".parse(), Ok(RetrievalBackendKind::Catalog));
        assert_eq!("local".parse(), Ok(RetrievalBackendKind::Similarity));
        assert!("vector_db".parse::<RetrievalBackendKind>().is_err());
    }

    #[tokio::test]
    async fn catalog_filters_by_mode_and_limit() {
        let db = seeded_db();

        let standard = CatalogRetriever::new(db.clone(), 10)
            .retrieve("anything", TemplateMode::Standard)
            .await
            .unwrap();
        assert_eq!(standard.len(), 2);
        assert!(standard.iter().all(|t| !t.greenscreen));

        let limited = CatalogRetriever::new(db, 1)
            .retrieve("anything", TemplateMode::Standard)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn catalog_returns_empty_rather_than_failing() {
        let db = Arc::new(Database::in_memory().unwrap());
        let templates = CatalogRetriever::new(db, 10)
            .retrieve("anything", TemplateMode::Greenscreen)
            .await
            .unwrap();
        assert!(templates.is_empty());
    }

    #[tokio::test]
    async fn catalog_skips_templates_still_processing() {
        let db = seeded_db();
        let failed = db.create_template("Two Buttons", "", "https://cdn.example/buttons.mp4", false).unwrap();
        db.update_template_status(failed, TemplateStatus::Failed, Some("crop failed")).unwrap();
        db.create_pending_template("Surprised Pikachu", "", "https://cdn.example/pikachu.mp4", false)
            .unwrap();

        let standard = CatalogRetriever::new(db, 10)
            .retrieve("anything", TemplateMode::Standard)
            .await
            .unwrap();
        let names: Vec<&str> = standard.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Distracted Boyfriend", "Drake"]);
    }

    #[tokio::test]
    async fn default_backend_offers_templates_nobody_embedded_yet() {
        let db = Arc::new(Database::in_memory().unwrap());
        db.create_template("Drake", "", "https://cdn.example/drake.mp4", false).unwrap();
        db.create_template("Distracted Boyfriend", "", "https://cdn.example/boyfriend.mp4", false).unwrap();

        let retriever = build_retriever(
            RetrievalBackendKind::SimilarityThenCatalog,
            db,
            Arc::new(ConstantEmbedder),
            10,
            0.2,
        );
        let templates = retriever.retrieve("monday mornings", TemplateMode::Standard).await.unwrap();
        assert_eq!(templates.len(), 2);
    }

    #[tokio::test]
    async fn fallback_retriever_uses_secondary_on_error() {
        let db = seeded_db();
        let retriever = FallbackRetriever::new(Arc::new(FailingRetriever), Arc::new(CatalogRetriever::new(db, 10)));

        let templates = retriever.retrieve("cats", TemplateMode::Greenscreen).await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].name, "Dancing Guy");
    }
}
