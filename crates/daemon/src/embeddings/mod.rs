use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use meme_engine::Template;

/// Turns text into a vector in the same space as the stored template embeddings.
#[async_trait::async_trait]
pub trait TextEmbedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// Client for the ML service `/embeddings/text` endpoint.
pub struct MlServiceEmbedder {
    client: reqwest::Client,
    base_url: String,
    model_name: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl MlServiceEmbedder {
    pub fn new(base_url: &str, model_name: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(MlServiceEmbedder {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_name: model_name.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl TextEmbedder for MlServiceEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/embeddings/text", self.base_url))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!("ML service returned error {}: {}", status, error_text));
        }

        let body: EmbeddingResponse = response.json().await?;
        if body.embedding.is_empty() {
            return Err(anyhow::anyhow!("ML service returned an empty embedding"));
        }
        Ok(body.embedding)
    }
}

/// Text embedded for a template: its name plus usage instructions.
pub fn template_embedding_text(name: &str, instructions: &str) -> String {
    let instructions = instructions.trim();
    if instructions.is_empty() {
        name.to_string()
    } else {
        format!("{}\n{}", name, instructions)
    }
}

/// Rank templates against a query vector, best first.
///
/// Vectors of different length are compared on their common prefix. Templates
/// without an embedding or scoring below `min_similarity` are skipped.
pub fn rank_by_similarity(
    query_embedding: &[f32],
    templates: Vec<Template>,
    min_similarity: f32,
    limit: usize,
) -> Vec<(Template, f32)> {
    let mut scored: Vec<(Template, f32)> = templates
        .into_iter()
        .filter_map(|template| {
            let min_dim = query_embedding.len().min(template.embedding.len());
            if min_dim == 0 {
                return None;
            }
            let similarity = cosine_similarity(&query_embedding[..min_dim], &template.embedding[..min_dim]);
            (similarity >= min_similarity).then_some((template, similarity))
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// Compute cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
