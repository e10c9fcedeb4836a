//! Chunk and PI state repository.
//!
//! Every mutation here is a status transition the state machine leans on:
//! a crash between any two calls leaves rows a later pass can pick up
//! again. Only the worker that owns a chunk calls the mutating methods.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use pinax_core::{
    Admission, ChunkPhase, ChunkRequest, ChunkState, Error, PiState, PiStatus, PinaxRecord,
    Progress, Result,
};

/// SQLite implementation of chunk/PI state persistence.
#[derive(Clone)]
pub struct ChunkRepository {
    pool: SqlitePool,
}

/// A `done` PI row awaiting upload and/or CAS append.
#[derive(Debug, Clone)]
pub struct PublishablePi {
    pub pi: String,
    pub record: PinaxRecord,
    /// Set when a previous pass uploaded the record but crashed before the
    /// append was persisted; the upload is skipped on retry.
    pub pinax_cid: Option<String>,
}

impl ChunkRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Admit a chunk request.
    ///
    /// A live chunk under the same id is reported back with its phase.
    /// Terminal leftovers are purged and replaced by fresh rows: the chunk
    /// in `processing`, one `pending` PI row per input.
    pub async fn admit(&self, request: &ChunkRequest) -> Result<Admission> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT phase FROM chunk_state WHERE chunk_id = ?")
                .bind(&request.chunk_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::Database)?;

        if let Some(phase) = existing {
            let phase = ChunkPhase::parse(&phase);
            if !phase.is_terminal() {
                return Ok(Admission::AlreadyProcessing(phase));
            }
            delete_chunk_rows(&mut tx, &request.chunk_id).await?;
        }

        sqlx::query(
            "INSERT INTO chunk_state
                 (chunk_id, batch_id, prefix, custom_prompt, institution, phase, started_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.chunk_id)
        .bind(&request.batch_id)
        .bind(&request.prefix)
        .bind(&request.custom_prompt)
        .bind(&request.institution)
        .bind(ChunkPhase::Processing.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        for pi in &request.pis {
            sqlx::query(
                "INSERT OR IGNORE INTO pi_state (chunk_id, pi, status) VALUES (?, ?, ?)",
            )
            .bind(&request.chunk_id)
            .bind(pi)
            .bind(PiStatus::Pending.as_str())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(Admission::Accepted)
    }

    /// Load the chunk row, if any.
    pub async fn load(&self, chunk_id: &str) -> Result<Option<ChunkState>> {
        let row = sqlx::query(
            "SELECT chunk_id, batch_id, prefix, custom_prompt, institution, phase,
                    started_at, completed_at, callback_retry_count, global_error
             FROM chunk_state WHERE chunk_id = ?",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| ChunkState {
            chunk_id: row.get("chunk_id"),
            batch_id: row.get("batch_id"),
            prefix: row.get("prefix"),
            custom_prompt: row.get("custom_prompt"),
            institution: row.get("institution"),
            phase: ChunkPhase::parse(row.get::<String, _>("phase").as_str()),
            started_at: row.get::<DateTime<Utc>, _>("started_at"),
            completed_at: row.get("completed_at"),
            callback_retry_count: row.get("callback_retry_count"),
            global_error: row.get("global_error"),
        }))
    }

    /// Transition the chunk to a new phase.
    pub async fn set_phase(&self, chunk_id: &str, phase: ChunkPhase) -> Result<()> {
        sqlx::query("UPDATE chunk_state SET phase = ? WHERE chunk_id = ?")
            .bind(phase.as_str())
            .bind(chunk_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// Record an uncaught pass failure and short-circuit to callback.
    pub async fn set_global_error(&self, chunk_id: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE chunk_state SET global_error = ?, phase = ? WHERE chunk_id = ?")
            .bind(message)
            .bind(ChunkPhase::Callback.as_str())
            .bind(chunk_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// Mark the chunk done with a completion timestamp.
    pub async fn complete(&self, chunk_id: &str) -> Result<()> {
        sqlx::query("UPDATE chunk_state SET phase = ?, completed_at = ? WHERE chunk_id = ?")
            .bind(ChunkPhase::Done.as_str())
            .bind(Utc::now())
            .bind(chunk_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// Increment the callback retry counter and return the new count.
    pub async fn record_callback_failure(&self, chunk_id: &str) -> Result<i64> {
        sqlx::query(
            "UPDATE chunk_state SET callback_retry_count = callback_retry_count + 1
             WHERE chunk_id = ?",
        )
        .bind(chunk_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let count: i64 =
            sqlx::query_scalar("SELECT callback_retry_count FROM chunk_state WHERE chunk_id = ?")
                .bind(chunk_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }

    /// Claim every pending PI for one processing round, marking them
    /// `processing`. Single-writer per chunk makes select-then-update safe.
    pub async fn claim_pending(&self, chunk_id: &str) -> Result<Vec<String>> {
        let pis: Vec<String> = sqlx::query_scalar(
            "SELECT pi FROM pi_state WHERE chunk_id = ? AND status = ? ORDER BY pi",
        )
        .bind(chunk_id)
        .bind(PiStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        if !pis.is_empty() {
            sqlx::query("UPDATE pi_state SET status = ? WHERE chunk_id = ? AND status = ?")
                .bind(PiStatus::Processing.as_str())
                .bind(chunk_id)
                .bind(PiStatus::Pending.as_str())
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
        }
        Ok(pis)
    }

    /// Put crashed in-flight rows back to `pending`. Called once when a
    /// worker resumes a chunk after a restart.
    pub async fn reset_in_flight(&self, chunk_id: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE pi_state SET status = ? WHERE chunk_id = ? AND status = ?")
            .bind(PiStatus::Pending.as_str())
            .bind(chunk_id)
            .bind(PiStatus::Processing.as_str())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    /// Store a successful extraction and mark the PI `done`.
    pub async fn mark_extracted(
        &self,
        chunk_id: &str,
        pi: &str,
        record: &PinaxRecord,
    ) -> Result<()> {
        let json = serde_json::to_string(record)?;
        sqlx::query(
            "UPDATE pi_state SET status = ?, pinax_json = ?, error = NULL
             WHERE chunk_id = ? AND pi = ?",
        )
        .bind(PiStatus::Done.as_str())
        .bind(json)
        .bind(chunk_id)
        .bind(pi)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Count a failed attempt against the PI's retry budget.
    ///
    /// Below the budget the PI goes back to `pending` for the next pass;
    /// at the budget it becomes terminal `error`. Returns the resulting
    /// status.
    pub async fn mark_failed(
        &self,
        chunk_id: &str,
        pi: &str,
        error: &str,
        max_retries: i64,
    ) -> Result<PiStatus> {
        let retry_count: i64 =
            sqlx::query_scalar("SELECT retry_count FROM pi_state WHERE chunk_id = ? AND pi = ?")
                .bind(chunk_id)
                .bind(pi)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;

        let next = retry_count + 1;
        let status = if next >= max_retries {
            PiStatus::Error
        } else {
            PiStatus::Pending
        };

        sqlx::query(
            "UPDATE pi_state SET status = ?, retry_count = ?, error = ?
             WHERE chunk_id = ? AND pi = ?",
        )
        .bind(status.as_str())
        .bind(next)
        .bind(error)
        .bind(chunk_id)
        .bind(pi)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(status)
    }

    /// Whether any PI is still `pending` or `processing`.
    pub async fn has_open_items(&self, chunk_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pi_state
             WHERE chunk_id = ? AND status IN (?, ?)",
        )
        .bind(chunk_id)
        .bind(PiStatus::Pending.as_str())
        .bind(PiStatus::Processing.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(count > 0)
    }

    /// `done` PIs that have no appended version yet, with their records.
    pub async fn list_publishable(&self, chunk_id: &str) -> Result<Vec<PublishablePi>> {
        let rows = sqlx::query(
            "SELECT pi, pinax_json, pinax_cid FROM pi_state
             WHERE chunk_id = ? AND status = ? AND new_tip IS NULL
             ORDER BY pi",
        )
        .bind(chunk_id)
        .bind(PiStatus::Done.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let json: Option<String> = row.get("pinax_json");
            let json = json.ok_or_else(|| {
                Error::Internal(format!(
                    "done PI {} has no stored record",
                    row.get::<String, _>("pi")
                ))
            })?;
            out.push(PublishablePi {
                pi: row.get("pi"),
                record: serde_json::from_str(&json)?,
                pinax_cid: row.get("pinax_cid"),
            });
        }
        Ok(out)
    }

    /// Persist the uploaded record's content address.
    pub async fn set_pinax_cid(&self, chunk_id: &str, pi: &str, cid: &str) -> Result<()> {
        sqlx::query("UPDATE pi_state SET pinax_cid = ? WHERE chunk_id = ? AND pi = ?")
            .bind(cid)
            .bind(chunk_id)
            .bind(pi)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    /// Persist the appended version's tip and number.
    pub async fn record_appended(
        &self,
        chunk_id: &str,
        pi: &str,
        tip: &str,
        version: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE pi_state SET new_tip = ?, new_version = ? WHERE chunk_id = ? AND pi = ?",
        )
        .bind(tip)
        .bind(version)
        .bind(chunk_id)
        .bind(pi)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// Mark a PI terminally failed during publishing.
    pub async fn mark_publish_failed(&self, chunk_id: &str, pi: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE pi_state SET status = ?, error = ? WHERE chunk_id = ? AND pi = ?",
        )
        .bind(PiStatus::Error.as_str())
        .bind(error)
        .bind(chunk_id)
        .bind(pi)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    /// All PI rows of a chunk, ordered by PI.
    pub async fn list_pi_states(&self, chunk_id: &str) -> Result<Vec<PiState>> {
        let rows = sqlx::query(
            "SELECT pi, status, retry_count, pinax_json, pinax_cid, new_tip, new_version, error
             FROM pi_state WHERE chunk_id = ? ORDER BY pi",
        )
        .bind(chunk_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let record = match row.get::<Option<String>, _>("pinax_json") {
                Some(json) => Some(serde_json::from_str(&json)?),
                None => None,
            };
            out.push(PiState {
                pi: row.get("pi"),
                status: PiStatus::parse(row.get::<String, _>("status").as_str()),
                retry_count: row.get("retry_count"),
                pinax_record: record,
                pinax_cid: row.get("pinax_cid"),
                new_tip: row.get("new_tip"),
                new_version: row.get("new_version"),
                error: row.get("error"),
            });
        }
        Ok(out)
    }

    /// Per-status counts for the status endpoint.
    pub async fn progress(&self, chunk_id: &str) -> Result<Progress> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'done') AS done,
                COUNT(*) FILTER (WHERE status = 'error') AS failed
             FROM pi_state WHERE chunk_id = ?",
        )
        .bind(chunk_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Progress {
            total: row.get("total"),
            pending: row.get("pending"),
            processing: row.get("processing"),
            done: row.get("done"),
            failed: row.get("failed"),
        })
    }

    /// Chunk ids with rows still in the store; used to resume after a
    /// restart. Terminal phases are included so their cleanup tick runs.
    pub async fn unfinished_chunks(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT chunk_id FROM chunk_state ORDER BY started_at")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)
    }

    /// Delete every row belonging to a chunk.
    pub async fn cleanup(&self, chunk_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        delete_chunk_rows(&mut tx, chunk_id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}

async fn delete_chunk_rows(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    chunk_id: &str,
) -> Result<()> {
    for table in ["context_files", "context_meta", "pi_state", "chunk_state"] {
        sqlx::query(&format!("DELETE FROM {table} WHERE chunk_id = ?"))
            .bind(chunk_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
    }
    Ok(())
}
