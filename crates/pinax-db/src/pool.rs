//! Connection pool management and the embedded schema.

use std::str::FromStr;
use std::time::{Duration, Instant};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::info;

use pinax_core::{Error, Result};

/// Default maximum number of connections in the pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default connection acquire timeout in seconds.
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// The durable layout of the chunk engine. Four tables; `pi_state` doubles
/// as the membership list of a chunk.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunk_state (
    chunk_id             TEXT PRIMARY KEY,
    batch_id             TEXT NOT NULL,
    prefix               TEXT NOT NULL DEFAULT '',
    custom_prompt        TEXT,
    institution          TEXT,
    phase                TEXT NOT NULL,
    started_at           TEXT NOT NULL,
    completed_at         TEXT,
    callback_retry_count INTEGER NOT NULL DEFAULT 0,
    global_error         TEXT
);

CREATE TABLE IF NOT EXISTS pi_state (
    chunk_id    TEXT NOT NULL,
    pi          TEXT NOT NULL,
    status      TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    pinax_json  TEXT,
    pinax_cid   TEXT,
    new_tip     TEXT,
    new_version INTEGER,
    error       TEXT,
    PRIMARY KEY (chunk_id, pi)
);

CREATE TABLE IF NOT EXISTS context_meta (
    chunk_id            TEXT NOT NULL,
    pi                  TEXT NOT NULL,
    directory_name      TEXT NOT NULL,
    existing_pinax_json TEXT,
    PRIMARY KEY (chunk_id, pi)
);

CREATE TABLE IF NOT EXISTS context_files (
    chunk_id TEXT NOT NULL,
    pi       TEXT NOT NULL,
    idx      INTEGER NOT NULL,
    filename TEXT NOT NULL,
    content  TEXT NOT NULL,
    PRIMARY KEY (chunk_id, pi, idx)
);

CREATE INDEX IF NOT EXISTS idx_pi_state_status ON pi_state (chunk_id, status);
"#;

/// Pool configuration options.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Connection acquire timeout.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }
}

/// Open (creating if missing) a WAL-mode SQLite pool at `path` and apply
/// the schema.
pub async fn connect_pool(path: &str, config: PoolConfig) -> Result<SqlitePool> {
    let start = Instant::now();

    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))
        .map_err(Error::Database)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .map_err(Error::Database)?;

    // raw_sql: the schema is a multi-statement script.
    sqlx::raw_sql(SCHEMA)
        .execute(&pool)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        path = %path,
        max_connections = config.max_connections,
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool established"
    );
    Ok(pool)
}
