//! # pinax-api
//!
//! HTTP dispatcher for the PINAX engine: chunk dispatch and status on top
//! of the worker registry, plus synchronous extraction and validation
//! helpers that share no state with the chunk engine.

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use pinax_db::Database;
use pinax_inference::Extractor;
use pinax_worker::WorkerRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub registry: Arc<WorkerRegistry>,
    pub extractor: Extractor,
    /// Token budget applied to synchronous extraction inputs.
    pub content_token_target: i64,
}

/// Build the dispatcher router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/process", post(handlers::process_chunk))
        .route("/status/{chunk_id}", get(handlers::chunk_status))
        .route("/extract-metadata", post(handlers::extract_metadata))
        .route("/validate-metadata", post(handlers::validate_metadata))
        .route("/health", get(handlers::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
