//! The chunk state machine and its registry.
//!
//! One tokio task per chunk plays the role of a durable-object alarm: it
//! wakes, re-reads durable state, performs one pass of eligible work,
//! persists progress, and re-arms. All durable writes happen on this task
//! between fan-out rounds; per-PI child tasks only talk to the network.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use pinax_archive::ArchiveClient;
use pinax_core::defaults::{CALLBACK_TIMEOUT_SECS, PINAX_COMPONENT, VERSION_NOTE};
use pinax_core::{
    Admission, CallbackPayload, ChunkPhase, ChunkRequest, ChunkState, ContextBundle, Error,
    PiStatus, Result,
};
use pinax_db::Database;
use pinax_inference::{ExtractOptions, Extraction, Extractor, Usage};

use crate::config::WorkerConfig;
use crate::context::ContextFetcher;

/// Owns one worker task per live chunk and the shared clients they run on.
pub struct WorkerRegistry {
    db: Database,
    archive: ArchiveClient,
    extractor: Extractor,
    config: WorkerConfig,
    callback_client: reqwest::Client,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl WorkerRegistry {
    pub fn new(
        db: Database,
        archive: ArchiveClient,
        extractor: Extractor,
        config: WorkerConfig,
    ) -> Result<Self> {
        let callback_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CALLBACK_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            db,
            archive,
            extractor,
            config,
            callback_client,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Admit a chunk request and spawn its worker when accepted.
    pub async fn dispatch(&self, request: &ChunkRequest) -> Result<Admission> {
        if request.chunk_id.is_empty() || request.batch_id.is_empty() {
            return Err(Error::InvalidInput(
                "batch_id and chunk_id are required".to_string(),
            ));
        }
        if request.pis.is_empty() {
            return Err(Error::InvalidInput("pis must be non-empty".to_string()));
        }

        let admission = self.db.chunks.admit(request).await?;
        if admission == Admission::Accepted {
            info!(
                subsystem = "worker",
                op = "dispatch",
                batch_id = %request.batch_id,
                chunk_id = %request.chunk_id,
                total_pis = request.pis.len(),
                "Chunk admitted"
            );
            self.spawn(request.chunk_id.clone());
        }
        Ok(admission)
    }

    /// Re-spawn workers for every chunk left in the store. Crashed
    /// in-flight PIs are reset to pending first. Called once at startup.
    pub async fn resume_incomplete(&self) -> Result<usize> {
        let chunks = self.db.chunks.unfinished_chunks().await?;
        for chunk_id in &chunks {
            let reset = self.db.chunks.reset_in_flight(chunk_id).await?;
            info!(
                subsystem = "worker",
                op = "resume",
                chunk_id = %chunk_id,
                reset_pis = reset,
                "Resuming chunk after restart"
            );
            self.spawn(chunk_id.clone());
        }
        Ok(chunks.len())
    }

    /// Abort every worker task. Durable state makes the next start resume
    /// them.
    pub fn shutdown(&self) {
        let mut handles = self.handles.lock().expect("registry lock");
        for (_, handle) in handles.drain() {
            handle.abort();
        }
    }

    fn spawn(&self, chunk_id: String) {
        let worker = ChunkWorker {
            chunk_id: chunk_id.clone(),
            db: self.db.clone(),
            archive: self.archive.clone(),
            extractor: self.extractor.clone(),
            config: self.config.clone(),
            callback_client: self.callback_client.clone(),
        };
        let handle = tokio::spawn(worker.run());
        // Latest task wins; a predecessor still winding down must not race
        // the fresh worker on the same rows.
        if let Some(previous) = self
            .handles
            .lock()
            .expect("registry lock")
            .insert(chunk_id, handle)
        {
            previous.abort();
        }
    }
}

impl Drop for WorkerRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The single-writer actor for one chunk.
struct ChunkWorker {
    chunk_id: String,
    db: Database,
    archive: ArchiveClient,
    extractor: Extractor,
    config: WorkerConfig,
    callback_client: reqwest::Client,
}

/// What one per-PI pipeline round produced.
struct ItemOutcome {
    pi: String,
    /// A bundle fetched fresh this round; cached only if the item will be
    /// retried.
    fresh_bundle: Option<ContextBundle>,
    result: Result<Extraction>,
}

/// What one per-PI publish round produced.
struct PublishOutcome {
    pi: String,
    result: Result<(String, String, i64)>, // (cid, tip, version)
}

impl ChunkWorker {
    /// The alarm loop: first tick after one interval, then as each pass
    /// dictates, until a terminal tick runs cleanup.
    async fn run(self) {
        let mut delay = Duration::from_millis(self.config.alarm_interval_ms);
        loop {
            sleep(delay).await;
            match self.tick().await {
                Some(next) => delay = next,
                None => break,
            }
        }
    }

    /// One wake: load state, run the phase's pass, decide the next delay.
    /// `None` ends the task.
    #[instrument(skip(self), fields(subsystem = "worker", chunk_id = %self.chunk_id))]
    async fn tick(&self) -> Option<Duration> {
        let alarm = Duration::from_millis(self.config.alarm_interval_ms);

        let chunk = match self.db.chunks.load(&self.chunk_id).await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return None,
            Err(e) => {
                error!(error = %e, "Failed to load chunk state");
                return Some(alarm);
            }
        };

        if chunk.phase.is_terminal() {
            match self.db.chunks.cleanup(&self.chunk_id).await {
                Ok(()) => {
                    info!(phase = chunk.phase.as_str(), "Chunk cleaned up");
                    return None;
                }
                Err(e) => {
                    error!(error = %e, "Cleanup failed");
                    return Some(alarm);
                }
            }
        }

        let result = match chunk.phase {
            ChunkPhase::Processing => self.processing_pass(&chunk).await,
            ChunkPhase::Publishing => self.publishing_pass().await,
            ChunkPhase::Callback => self.callback_pass(&chunk).await,
            ChunkPhase::Done | ChunkPhase::Error => unreachable!("terminal handled above"),
        };

        match result {
            Ok(delay) => Some(delay),
            Err(e) => {
                error!(phase = chunk.phase.as_str(), error = %e, "Pass failed; short-circuiting to callback");
                if let Err(persist) = self
                    .db
                    .chunks
                    .set_global_error(&self.chunk_id, &e.to_string())
                    .await
                {
                    error!(error = %persist, "Failed to persist global error");
                }
                Some(alarm)
            }
        }
    }

    /// PROCESSING: claim pending PIs, run their pipelines concurrently,
    /// persist the outcomes. Advances when nothing is pending or in flight.
    async fn processing_pass(&self, chunk: &ChunkState) -> Result<Duration> {
        let alarm = Duration::from_millis(self.config.alarm_interval_ms);

        if !self.db.chunks.has_open_items(&self.chunk_id).await? {
            self.db
                .chunks
                .set_phase(&self.chunk_id, ChunkPhase::Publishing)
                .await?;
            info!(phase = "publishing", "All items settled; advancing");
            return Ok(alarm);
        }

        let claimed = self.db.chunks.claim_pending(&self.chunk_id).await?;
        if claimed.is_empty() {
            // Rows in `processing` without a live task: a previous pass was
            // interrupted. Put them back so the next pass retries them.
            self.db.chunks.reset_in_flight(&self.chunk_id).await?;
            return Ok(alarm);
        }

        let options = ExtractOptions {
            custom_prompt: chunk.custom_prompt.clone(),
            overrides: chunk
                .institution
                .as_ref()
                .map(|institution| serde_json::json!({ "institution": institution })),
            access_url: None,
        };

        let mut tasks: JoinSet<ItemOutcome> = JoinSet::new();
        for pi in &claimed {
            let pi = pi.clone();
            let chunk_id = self.chunk_id.clone();
            let db = self.db.clone();
            let fetcher =
                ContextFetcher::new(self.archive.clone(), self.config.content_token_target);
            let extractor = self.extractor.clone();
            let options = options.clone();
            tasks.spawn(async move {
                run_item_pipeline(chunk_id, pi, db, fetcher, extractor, options).await
            });
        }

        let mut unaccounted: HashSet<String> = claimed.iter().cloned().collect();
        let mut round_usage = Usage::default();
        let mut outcomes: Vec<ItemOutcome> = Vec::with_capacity(claimed.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    unaccounted.remove(&outcome.pi);
                    outcomes.push(outcome);
                }
                Err(e) => error!(error = %e, "Item task aborted"),
            }
        }

        // Durable writes happen here, on the worker task, between rounds.
        for outcome in outcomes {
            match outcome.result {
                Ok(extraction) => {
                    round_usage.add(&extraction.usage);
                    if !extraction.validation.valid {
                        warn!(
                            pi = %outcome.pi,
                            missing = ?extraction.validation.missing_required,
                            "Record fails schema; publishing with warnings"
                        );
                    }
                    self.db
                        .chunks
                        .mark_extracted(&self.chunk_id, &outcome.pi, &extraction.record)
                        .await?;
                    self.db.context.delete(&self.chunk_id, &outcome.pi).await?;
                    debug!(pi = %outcome.pi, "Item extracted");
                }
                Err(e) => {
                    let status = self
                        .db
                        .chunks
                        .mark_failed(
                            &self.chunk_id,
                            &outcome.pi,
                            &e.to_string(),
                            self.config.max_retries_per_pi,
                        )
                        .await?;
                    match status {
                        PiStatus::Pending => {
                            // Cache the fetched context so the retry skips
                            // straight to the model call.
                            if let Some(bundle) = &outcome.fresh_bundle {
                                self.db
                                    .context
                                    .save(&self.chunk_id, &outcome.pi, bundle)
                                    .await?;
                            }
                            warn!(pi = %outcome.pi, error = %e, "Item failed; will retry");
                        }
                        _ => {
                            self.db.context.delete(&self.chunk_id, &outcome.pi).await?;
                            warn!(pi = %outcome.pi, error = %e, "Item failed terminally");
                        }
                    }
                }
            }
        }

        for pi in unaccounted {
            let status = self
                .db
                .chunks
                .mark_failed(
                    &self.chunk_id,
                    &pi,
                    "item task aborted",
                    self.config.max_retries_per_pi,
                )
                .await?;
            if status.is_terminal() {
                self.db.context.delete(&self.chunk_id, &pi).await?;
            }
        }

        if round_usage.total_tokens > 0 {
            info!(
                prompt_tokens = round_usage.prompt_tokens,
                completion_tokens = round_usage.completion_tokens,
                cost_usd = round_usage.cost_usd(),
                "Processing round complete"
            );
        }
        Ok(alarm)
    }

    /// PUBLISHING: upload each done record and append a CAS version.
    /// Advances when every done PI carries a new tip.
    async fn publishing_pass(&self) -> Result<Duration> {
        let alarm = Duration::from_millis(self.config.alarm_interval_ms);

        let publishable = self.db.chunks.list_publishable(&self.chunk_id).await?;
        if publishable.is_empty() {
            self.db
                .chunks
                .set_phase(&self.chunk_id, ChunkPhase::Callback)
                .await?;
            info!(phase = "callback", "All records published; advancing");
            return Ok(alarm);
        }

        let mut tasks: JoinSet<PublishOutcome> = JoinSet::new();
        for item in publishable {
            let archive = self.archive.clone();
            tasks.spawn(async move {
                let result = async {
                    let cid = match item.pinax_cid.clone() {
                        Some(cid) => cid,
                        None => {
                            let body = serde_json::to_string_pretty(&item.record)?;
                            archive.upload(body, PINAX_COMPONENT).await?
                        }
                    };
                    let components =
                        BTreeMap::from([(PINAX_COMPONENT.to_string(), cid.clone())]);
                    let appended = archive
                        .append_with_refresh(&item.pi, &components, VERSION_NOTE)
                        .await?;
                    Ok((cid, appended.tip, appended.version))
                }
                .await;
                PublishOutcome { pi: item.pi, result }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Publish task aborted");
                    continue;
                }
            };
            match outcome.result {
                Ok((cid, tip, version)) => {
                    self.db
                        .chunks
                        .set_pinax_cid(&self.chunk_id, &outcome.pi, &cid)
                        .await?;
                    self.db
                        .chunks
                        .record_appended(&self.chunk_id, &outcome.pi, &tip, version)
                        .await?;
                    info!(pi = %outcome.pi, cid = %cid, version, "Record published");
                }
                Err(e) => {
                    // The CAS loop already retried; this PI is spent.
                    self.db
                        .chunks
                        .mark_publish_failed(&self.chunk_id, &outcome.pi, &e.to_string())
                        .await?;
                    warn!(pi = %outcome.pi, error = %e, "Publish failed terminally");
                }
            }
        }
        Ok(alarm)
    }

    /// CALLBACK: deliver the chunk rollup, with bounded exponential
    /// backoff. Gives up (logged) after the retry budget and completes
    /// anyway; delivery is at-least-once, not exactly-once.
    async fn callback_pass(&self, chunk: &ChunkState) -> Result<Duration> {
        let alarm = Duration::from_millis(self.config.alarm_interval_ms);

        let pis = self.db.chunks.list_pi_states(&self.chunk_id).await?;
        let payload = CallbackPayload::assemble(chunk, &pis, Utc::now());

        let url = format!(
            "{}/callback/pinax/{}",
            self.config.orchestrator_url.trim_end_matches('/'),
            chunk.batch_id
        );
        let outcome = self.callback_client.post(&url).json(&payload).send().await;

        let failure = match outcome {
            Ok(response) if response.status().is_success() => {
                info!(
                    status = ?payload.status,
                    succeeded = payload.summary.succeeded,
                    failed = payload.summary.failed,
                    duration_ms = payload.summary.processing_time_ms,
                    "Callback delivered"
                );
                self.db.chunks.complete(&self.chunk_id).await?;
                return Ok(alarm);
            }
            Ok(response) => format!("orchestrator answered HTTP {}", response.status()),
            Err(e) => e.to_string(),
        };

        let retry_count = self.db.chunks.record_callback_failure(&self.chunk_id).await?;
        if retry_count >= self.config.max_callback_retries {
            error!(
                error = %Error::Callback(failure),
                attempt = retry_count,
                "Callback retries exhausted; completing without delivery"
            );
            self.db.chunks.complete(&self.chunk_id).await?;
            Ok(alarm)
        } else {
            let delay = self.config.callback_base_delay_ms * 2u64.pow(retry_count as u32);
            warn!(
                error = %Error::Callback(failure),
                attempt = retry_count,
                retry_in_ms = delay,
                "Callback failed; backing off"
            );
            Ok(Duration::from_millis(delay))
        }
    }
}

/// The per-PI pipeline: cached-or-fresh context, then extraction. Runs on
/// a child task; performs no durable writes.
async fn run_item_pipeline(
    chunk_id: String,
    pi: String,
    db: Database,
    fetcher: ContextFetcher,
    extractor: Extractor,
    options: ExtractOptions,
) -> ItemOutcome {
    let (bundle, fresh) = match db.context.load(&chunk_id, &pi).await {
        Ok(Some(bundle)) => {
            debug!(subsystem = "worker", pi = %pi, "Using cached context");
            (bundle, None)
        }
        Ok(None) => match fetcher.fetch(&pi).await {
            Ok(bundle) => (bundle.clone(), Some(bundle)),
            Err(e) => {
                return ItemOutcome {
                    pi,
                    fresh_bundle: None,
                    result: Err(e),
                }
            }
        },
        Err(e) => {
            return ItemOutcome {
                pi,
                fresh_bundle: None,
                result: Err(e),
            }
        }
    };

    let result = extractor.extract(&bundle, &options).await;
    ItemOutcome {
        pi,
        fresh_bundle: fresh,
        result,
    }
}
