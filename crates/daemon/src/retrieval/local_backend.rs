use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use meme_engine::{Template, TemplateMode};

use crate::db::Database;
use crate::embeddings::{self, TextEmbedder};
use crate::retrieval::CandidateRetriever;

/// Ranks the mode's embedded templates by cosine similarity to the prompt,
/// then tops up with templates not yet embedded for this model, newest first.
pub struct SimilarityRetriever {
    db: Arc<Database>,
    embedder: Arc<dyn TextEmbedder>,
    limit: usize,
    min_similarity: f32,
}

impl SimilarityRetriever {
    pub fn new(db: Arc<Database>, embedder: Arc<dyn TextEmbedder>, limit: usize, min_similarity: f32) -> Self {
        SimilarityRetriever {
            db,
            embedder,
            limit,
            min_similarity,
        }
    }
}

#[async_trait::async_trait]
impl CandidateRetriever for SimilarityRetriever {
    async fn retrieve(&self, prompt_text: &str, mode: TemplateMode) -> Result<Vec<Template>> {
        let query_embedding = self.embedder.embed_text(prompt_text).await?;

        let templates = self.db.load_embedded_templates(self.embedder.model_name(), mode)?;
        let searched = templates.len();

        let ranked = embeddings::rank_by_similarity(&query_embedding, templates, self.min_similarity, self.limit);

        let kept = ranked.len();
        let top_score = ranked.first().map(|(_, score)| *score);
        let mut candidates: Vec<Template> = ranked.into_iter().map(|(template, _)| template).collect();

        if candidates.len() < self.limit {
            let unembedded =
                self.db
                    .load_unembedded_templates(self.embedder.model_name(), mode, self.limit - candidates.len())?;
            candidates.extend(unembedded);
        }

        debug!(
            mode = %mode,
            searched,
            kept,
            unranked = candidates.len() - kept,
            top_score,
            "similarity retrieval"
        );

        Ok(candidates)
    }
}
