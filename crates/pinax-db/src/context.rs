//! Cached per-PI context repository.
//!
//! A fetched context can run to many megabytes, so it lives in the store
//! rather than in worker memory between passes, and is deleted the moment
//! its PI reaches a terminal status.

use sqlx::{Row, SqlitePool};

use pinax_core::{ContextBundle, ContextFile, Error, Result};

/// SQLite implementation of the cached-context store.
#[derive(Clone)]
pub struct ContextRepository {
    pool: SqlitePool,
}

impl ContextRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a bundle, replacing any previous cache for this PI.
    pub async fn save(&self, chunk_id: &str, pi: &str, bundle: &ContextBundle) -> Result<()> {
        let existing_json = match &bundle.existing_pinax {
            Some(record) => Some(serde_json::to_string(record)?),
            None => None,
        };

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("DELETE FROM context_files WHERE chunk_id = ? AND pi = ?")
            .bind(chunk_id)
            .bind(pi)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        sqlx::query("DELETE FROM context_meta WHERE chunk_id = ? AND pi = ?")
            .bind(chunk_id)
            .bind(pi)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO context_meta (chunk_id, pi, directory_name, existing_pinax_json)
             VALUES (?, ?, ?, ?)",
        )
        .bind(chunk_id)
        .bind(pi)
        .bind(&bundle.directory_name)
        .bind(existing_json)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        for (idx, file) in bundle.files.iter().enumerate() {
            sqlx::query(
                "INSERT INTO context_files (chunk_id, pi, idx, filename, content)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(chunk_id)
            .bind(pi)
            .bind(idx as i64)
            .bind(&file.name)
            .bind(&file.content)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    /// Load a cached bundle, files in their original order.
    pub async fn load(&self, chunk_id: &str, pi: &str) -> Result<Option<ContextBundle>> {
        let meta = sqlx::query(
            "SELECT directory_name, existing_pinax_json FROM context_meta
             WHERE chunk_id = ? AND pi = ?",
        )
        .bind(chunk_id)
        .bind(pi)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(meta) = meta else {
            return Ok(None);
        };

        let existing_pinax = match meta.get::<Option<String>, _>("existing_pinax_json") {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };

        let files = sqlx::query(
            "SELECT filename, content FROM context_files
             WHERE chunk_id = ? AND pi = ? ORDER BY idx",
        )
        .bind(chunk_id)
        .bind(pi)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?
        .into_iter()
        .map(|row| ContextFile {
            name: row.get("filename"),
            content: row.get("content"),
        })
        .collect();

        Ok(Some(ContextBundle {
            directory_name: meta.get("directory_name"),
            files,
            existing_pinax,
        }))
    }

    /// Drop the cache for a PI that reached a terminal status.
    pub async fn delete(&self, chunk_id: &str, pi: &str) -> Result<()> {
        sqlx::query("DELETE FROM context_files WHERE chunk_id = ? AND pi = ?")
            .bind(chunk_id)
            .bind(pi)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        sqlx::query("DELETE FROM context_meta WHERE chunk_id = ? AND pi = ?")
            .bind(chunk_id)
            .bind(pi)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
