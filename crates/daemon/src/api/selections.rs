use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use meme_engine::TemplateMode;

use crate::api::{ApiError, ApiResult, AppState};
use crate::llm::ModelChoice;
use crate::orchestrator::SelectionOutcome;

const DEFAULT_FEEDBACK_LIMIT: usize = 50;

#[derive(Deserialize)]
pub struct SelectTemplatesRequest {
    prompt: String,
    audience: Option<String>,
    mode: Option<String>,
    model: Option<String>,
    model_id: Option<String>,
}

#[derive(Deserialize)]
pub struct CaptionFeedbackRequest {
    template_id: Uuid,
    prompt: String,
    caption: String,
    model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaptionFeedbackResponse {
    id: i64,
    template_id: Uuid,
    prompt: String,
    caption: String,
    model: Option<String>,
    created_at: String,
}

#[derive(Deserialize)]
pub struct FeedbackQuery {
    limit: Option<usize>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(select_templates))
        .route("/feedback", get(list_feedback).post(record_feedback))
        .with_state(state)
}

async fn select_templates(
    State(state): State<AppState>,
    Json(req): Json<SelectTemplatesRequest>,
) -> ApiResult<Json<SelectionOutcome>> {
    let mode: TemplateMode = req
        .mode
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(ApiError::bad_request)?;
    let model: ModelChoice = req
        .model
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(ApiError::bad_request)?;
    let model_id = req.model_id.as_deref().map(str::trim).filter(|m| !m.is_empty());

    let outcome = state
        .pipeline
        .select_templates_for_idea(&req.prompt, req.audience.as_deref(), mode, model, model_id)
        .await?;

    Ok(Json(outcome))
}

async fn record_feedback(
    State(state): State<AppState>,
    Json(req): Json<CaptionFeedbackRequest>,
) -> ApiResult<(StatusCode, Json<CaptionFeedbackResponse>)> {
    let caption = req.caption.trim();
    if caption.is_empty() {
        return Err(ApiError::bad_request("caption is required"));
    }
    if state.db.get_template(req.template_id)?.is_none() {
        return Err(ApiError::not_found(format!("template {} not found", req.template_id)));
    }

    let prompt = req.prompt.trim();
    let model = req.model.as_deref().map(str::trim).filter(|m| !m.is_empty());
    let id = state.db.record_caption_feedback(req.template_id, prompt, caption, model)?;
    info!(feedback_id = id, template_id = %req.template_id, "caption feedback recorded");

    Ok((
        StatusCode::CREATED,
        Json(CaptionFeedbackResponse {
            id,
            template_id: req.template_id,
            prompt: prompt.to_string(),
            caption: caption.to_string(),
            model: model.map(str::to_string),
            created_at: chrono::Utc::now().to_rfc3339(),
        }),
    ))
}

async fn list_feedback(
    State(state): State<AppState>,
    Query(query): Query<FeedbackQuery>,
) -> ApiResult<Json<Vec<CaptionFeedbackResponse>>> {
    let feedback = state
        .db
        .recent_caption_feedback(query.limit.unwrap_or(DEFAULT_FEEDBACK_LIMIT))?;

    Ok(Json(
        feedback
            .into_iter()
            .map(|f| CaptionFeedbackResponse {
                id: f.id,
                template_id: f.template_id,
                prompt: f.prompt_text,
                caption: f.caption,
                model: f.model_choice,
                created_at: f.created_at.to_rfc3339(),
            })
            .collect(),
    ))
}
