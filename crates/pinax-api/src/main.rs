//! pinax-api - HTTP server binary for the PINAX metadata engine.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pinax_api::{build_router, AppState};
use pinax_archive::{ArchiveClient, ArchiveConfig};
use pinax_core::defaults::{DB_PATH, SERVER_PORT};
use pinax_db::Database;
use pinax_inference::{Extractor, GatewayConfig, ModelGateway};
use pinax_worker::{WorkerConfig, WorkerRegistry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_path = std::env::var("PINAX_DB_PATH").unwrap_or_else(|_| DB_PATH.to_string());
    let db = Database::connect(&db_path).await?;

    let archive = ArchiveClient::new(ArchiveConfig::from_env()?)?;
    let gateway = ModelGateway::new(GatewayConfig::from_env()?)?;
    let extractor = Extractor::new(gateway);
    let worker_config = WorkerConfig::from_env()?;
    let content_token_target = worker_config.content_token_target;

    let registry = Arc::new(WorkerRegistry::new(
        db.clone(),
        archive,
        extractor.clone(),
        worker_config,
    )?);

    // Chunks interrupted by the previous shutdown pick up where they left off.
    let resumed = registry.resume_incomplete().await?;
    if resumed > 0 {
        info!(subsystem = "api", resumed, "Resumed unfinished chunks");
    }

    let state = AppState {
        db,
        registry,
        extractor,
        content_token_target,
    };
    let app = build_router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(SERVER_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(subsystem = "api", %addr, db_path = %db_path, "PINAX dispatcher listening");

    axum::serve(listener, app).await?;
    Ok(())
}
