use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use meme_engine::TemplateMode;

use crate::api::{ApiError, ApiResult, AppState};
use crate::db::{StoredTemplate, TemplateStatus};
use crate::embeddings::template_embedding_text;

#[derive(Deserialize)]
pub struct ListTemplatesQuery {
    mode: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct CreateTemplateRequest {
    name: String,
    #[serde(default)]
    instructions: String,
    video_url: String,
    #[serde(default)]
    greenscreen: bool,
    /// `processing` while the video is still being prepared.
    status: Option<TemplateStatus>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    status: TemplateStatus,
    error_message: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateTemplateRequest {
    name: Option<String>,
    instructions: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TemplateResponse {
    id: Uuid,
    name: String,
    instructions: String,
    video_url: String,
    greenscreen: bool,
    mode: TemplateMode,
    status: TemplateStatus,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<StoredTemplate> for TemplateResponse {
    fn from(stored: StoredTemplate) -> Self {
        let template = stored.template;
        let mode = if template.greenscreen {
            TemplateMode::Greenscreen
        } else {
            TemplateMode::Standard
        };
        TemplateResponse {
            id: template.id,
            name: template.name,
            instructions: template.instructions,
            video_url: template.video_url,
            greenscreen: template.greenscreen,
            mode,
            status: stored.status,
            error_message: stored.error_message,
            created_at: stored.created_at.to_rfc3339(),
            updated_at: stored.updated_at.to_rfc3339(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_templates).post(create_template))
        .route("/:id", get(get_template).patch(update_template).delete(delete_template))
        .route("/:id/status", patch(update_status))
        .with_state(state)
}

async fn list_templates(
    State(state): State<AppState>,
    Query(query): Query<ListTemplatesQuery>,
) -> ApiResult<Json<Vec<TemplateResponse>>> {
    let mode = query
        .mode
        .as_deref()
        .map(str::parse::<TemplateMode>)
        .transpose()
        .map_err(ApiError::bad_request)?;

    let status = query
        .status
        .as_deref()
        .map(str::parse::<TemplateStatus>)
        .transpose()
        .map_err(ApiError::bad_request)?;

    let templates = state.db.list_templates(mode, status, query.limit)?;
    Ok(Json(templates.into_iter().map(TemplateResponse::from).collect()))
}

async fn create_template(
    State(state): State<AppState>,
    Json(req): Json<CreateTemplateRequest>,
) -> ApiResult<(StatusCode, Json<TemplateResponse>)> {
    let name = req.name.trim();
    let video_url = req.video_url.trim();
    if name.is_empty() || video_url.is_empty() {
        return Err(ApiError::bad_request("name and video_url are required"));
    }
    let instructions = req.instructions.trim();

    let status = req.status.unwrap_or_default();
    let id = match status {
        TemplateStatus::Completed => state.db.create_template(name, instructions, video_url, req.greenscreen)?,
        TemplateStatus::Processing => state.db.create_pending_template(name, instructions, video_url, req.greenscreen)?,
        TemplateStatus::Failed => return Err(ApiError::bad_request("a template cannot be created as failed")),
    };
    info!(template_id = %id, name, greenscreen = req.greenscreen, %status, "template created");

    index_template(&state, id, name, instructions).await;

    let stored = state
        .db
        .get_template(id)?
        .ok_or_else(|| ApiError::not_found(format!("template {} vanished after insert", id)))?;
    Ok((StatusCode::CREATED, Json(stored.into())))
}

async fn get_template(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<TemplateResponse>> {
    let stored = state
        .db
        .get_template(id)?
        .ok_or_else(|| ApiError::not_found(format!("template {} not found", id)))?;
    Ok(Json(stored.into()))
}

async fn update_template(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTemplateRequest>,
) -> ApiResult<Json<TemplateResponse>> {
    let name = req.name.as_deref().map(str::trim);
    if name == Some("") {
        return Err(ApiError::bad_request("name cannot be blank"));
    }
    let instructions = req.instructions.as_deref().map(str::trim);

    if !state.db.update_template_text(id, name, instructions)? {
        return Err(ApiError::not_found(format!("template {} not found", id)));
    }

    let stored = state
        .db
        .get_template(id)?
        .ok_or_else(|| ApiError::not_found(format!("template {} not found", id)))?;

    if name.is_some() || instructions.is_some() {
        index_template(&state, id, &stored.template.name, &stored.template.instructions).await;
    }

    Ok(Json(stored.into()))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> ApiResult<Json<TemplateResponse>> {
    let error_message = req.error_message.as_deref().map(str::trim).filter(|m| !m.is_empty());
    if !state.db.update_template_status(id, req.status, error_message)? {
        return Err(ApiError::not_found(format!("template {} not found", id)));
    }
    info!(template_id = %id, status = %req.status, "template status updated");

    let stored = state
        .db
        .get_template(id)?
        .ok_or_else(|| ApiError::not_found(format!("template {} not found", id)))?;
    Ok(Json(stored.into()))
}

async fn delete_template(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    if !state.db.delete_template(id)? {
        return Err(ApiError::not_found(format!("template {} not found", id)));
    }
    info!(template_id = %id, "template deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Embed a template's text so similarity retrieval can find it. Failures are
/// logged and swallowed; catalog retrieval still sees the template.
async fn index_template(state: &AppState, id: Uuid, name: &str, instructions: &str) {
    let text = template_embedding_text(name, instructions);
    let vector = match state.embedder.embed_text(&text).await {
        Ok(vector) => vector,
        Err(e) => {
            warn!(template_id = %id, error = %e, "template embedding failed");
            return;
        }
    };

    if let Err(e) = state.db.store_template_embedding(id, state.embedder.model_name(), &vector) {
        warn!(template_id = %id, error = %e, "storing template embedding failed");
    }
}
