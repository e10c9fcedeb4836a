//! # pinax-db
//!
//! SQLite persistence for the PINAX chunk engine.
//!
//! This crate provides:
//! - Connection pool management with an embedded schema
//! - The chunk/PI state repository the state machine runs on
//! - The cached-context repository that bounds per-item memory
//!
//! All rows carry a `chunk_id`; each chunk worker only ever touches its own
//! rows, which preserves the single-writer discipline on a shared store.

pub mod chunks;
pub mod context;
pub mod pool;

pub use chunks::ChunkRepository;
pub use context::ContextRepository;
pub use pool::{connect_pool, PoolConfig};

use pinax_core::Result;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::SqlitePool,
    /// Chunk and PI state repository.
    pub chunks: ChunkRepository,
    /// Cached per-PI context repository.
    pub context: ContextRepository,
}

impl Database {
    /// Open (creating if missing) the database at `path` and apply the
    /// embedded schema.
    pub async fn connect(path: &str) -> Result<Self> {
        Self::connect_with_config(path, PoolConfig::default()).await
    }

    /// Open with custom pool configuration.
    pub async fn connect_with_config(path: &str, config: PoolConfig) -> Result<Self> {
        let pool = connect_pool(path, config).await?;
        Ok(Self {
            chunks: ChunkRepository::new(pool.clone()),
            context: ContextRepository::new(pool.clone()),
            pool,
        })
    }
}
