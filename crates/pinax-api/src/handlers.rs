//! Request handlers for the dispatcher.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use pinax_core::truncate::{allocate_budget, render_truncated, TruncationItem};
use pinax_core::{validate_record, Admission, ChunkRequest, ContextBundle, ContextFile, Error};
use pinax_inference::ExtractOptions;

use crate::AppState;

/// Error envelope for the HTTP surface.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(subsystem = "api", error = %self.0, "Request failed");
        }
        let body = json!({
            "error": self.0.to_string(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        (status, Json(body)).into_response()
    }
}

/// `POST /process`: admit a chunk and answer immediately; progress is
/// observable via `/status` and the callback.
pub async fn process_chunk(
    State(state): State<AppState>,
    Json(request): Json<ChunkRequest>,
) -> Result<Response, ApiError> {
    let total_pis = request.pis.len();
    match state.registry.dispatch(&request).await? {
        Admission::Accepted => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "accepted",
                "chunk_id": request.chunk_id,
                "total_pis": total_pis,
            })),
        )
            .into_response()),
        Admission::AlreadyProcessing(phase) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "already_processing",
                "chunk_id": request.chunk_id,
                "phase": phase.as_str(),
            })),
        )
            .into_response()),
    }
}

/// `GET /status/{chunk_id}`: phase and per-status counts, with error
/// strings for failed items.
pub async fn chunk_status(
    State(state): State<AppState>,
    Path(chunk_id): Path<String>,
) -> Result<Response, ApiError> {
    let Some(chunk) = state.db.chunks.load(&chunk_id).await? else {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("unknown chunk: {chunk_id}")})),
        )
            .into_response());
    };

    let progress = state.db.chunks.progress(&chunk_id).await?;
    let failures: Vec<Value> = state
        .db
        .chunks
        .list_pi_states(&chunk_id)
        .await?
        .into_iter()
        .filter(|pi| pi.status == pinax_core::PiStatus::Error)
        .map(|pi| json!({"pi": pi.pi, "error": pi.error}))
        .collect();

    Ok(Json(json!({
        "phase": chunk.phase.as_str(),
        "progress": progress,
        "failures": failures,
    }))
    .into_response())
}

/// Body of `POST /extract-metadata`.
#[derive(Debug, Deserialize)]
pub struct ExtractMetadataRequest {
    pub files: Vec<ContextFile>,
    #[serde(default)]
    pub directory_name: Option<String>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    #[serde(default)]
    pub overrides: Option<Value>,
    #[serde(default)]
    pub access_url: Option<String>,
}

/// `POST /extract-metadata`: single-shot extraction over caller-supplied
/// files; shares no state with the chunk engine.
pub async fn extract_metadata(
    State(state): State<AppState>,
    Json(request): Json<ExtractMetadataRequest>,
) -> Result<Response, ApiError> {
    if request.files.is_empty() {
        return Err(Error::InvalidInput("files must be non-empty".to_string()).into());
    }

    let items: Vec<TruncationItem> = request
        .files
        .iter()
        .map(|f| TruncationItem::from_content(f.name.as_str(), &f.content))
        .collect();
    let plan = allocate_budget(&items, state.content_token_target);
    let files: Vec<ContextFile> = request
        .files
        .into_iter()
        .zip(plan.allocations)
        .map(|(file, allocation)| ContextFile {
            content: render_truncated(&file.content, allocation.allocated_chars),
            name: file.name,
        })
        .collect();

    let bundle = ContextBundle {
        directory_name: request.directory_name.unwrap_or_else(|| "upload".to_string()),
        files,
        existing_pinax: None,
    };
    let options = ExtractOptions {
        custom_prompt: request.custom_prompt,
        overrides: request.overrides,
        access_url: request.access_url,
    };

    let extraction = state.extractor.extract(&bundle, &options).await?;
    Ok(Json(json!({
        "record": extraction.record,
        "validation": extraction.validation,
        "usage": {
            "prompt_tokens": extraction.usage.prompt_tokens,
            "completion_tokens": extraction.usage.completion_tokens,
            "cost_usd": extraction.usage.cost_usd(),
        },
    }))
    .into_response())
}

/// `POST /validate-metadata`: pure validation of a record body.
pub async fn validate_metadata(Json(record): Json<Value>) -> Response {
    Json(json!({ "validation": validate_record(&record) })).into_response()
}

/// `GET /health`: liveness probe.
pub async fn health() -> Response {
    Json(json!({"status": "ok"})).into_response()
}
