//! HTTP client for the Arke object store.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::multipart;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pinax_core::defaults::{ARCHIVE_TIMEOUT_SECS, CAS_BASE_DELAY_MS, CAS_MAX_ATTEMPTS};
use pinax_core::{EntitySnapshot, Error, Result};

/// Configuration for the object-store client.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Base URL of the store API.
    pub base_url: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
}

impl ArchiveConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_seconds: ARCHIVE_TIMEOUT_SECS,
        }
    }

    /// Read configuration from `ARKE_API_URL`.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("ARKE_API_URL")
            .map_err(|_| Error::Config("ARKE_API_URL is not set".to_string()))?;
        Ok(Self::new(base_url))
    }
}

/// Result of a successful version append.
#[derive(Debug, Clone, Deserialize)]
pub struct AppendedVersion {
    pub tip: String,
    pub version: i64,
}

#[derive(Debug, Serialize)]
struct AppendRequest<'a> {
    expect_tip: Option<&'a str>,
    components: &'a BTreeMap<String, String>,
    note: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadedBlob {
    cid: String,
}

/// Client for the four object-store operations.
#[derive(Clone)]
pub struct ArchiveClient {
    client: reqwest::Client,
    config: ArchiveConfig,
}

impl ArchiveClient {
    pub fn new(config: ArchiveConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Fetch the current snapshot of an entity.
    pub async fn get_entity(&self, pi: &str) -> Result<EntitySnapshot> {
        let url = self.url(&format!("/entities/{pi}"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("get_entity {pi}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Fetch(format!("get_entity {pi}: HTTP {status}: {body}")));
        }

        response
            .json::<EntitySnapshot>()
            .await
            .map_err(|e| Error::Fetch(format!("get_entity {pi}: bad body: {e}")))
    }

    /// Download a blob by content address, decoded as UTF-8 text.
    pub async fn download(&self, cid: &str) -> Result<String> {
        let url = self.url(&format!("/blobs/{cid}"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("download {cid}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Fetch(format!("download {cid}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| Error::Fetch(format!("download {cid}: {e}")))
    }

    /// Upload content as a named file; returns its content address.
    pub async fn upload(&self, content: String, filename: &str) -> Result<String> {
        let part = multipart::Part::text(content).file_name(filename.to_string());
        let form = multipart::Form::new().part("file", part);

        let url = self.url("/upload");
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Publish(format!("upload {filename}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Publish(format!(
                "upload {filename}: HTTP {status}: {body}"
            )));
        }

        let blobs: Vec<UploadedBlob> = response
            .json()
            .await
            .map_err(|e| Error::Publish(format!("upload {filename}: bad body: {e}")))?;

        blobs
            .into_iter()
            .next()
            .map(|b| b.cid)
            .ok_or_else(|| Error::Publish(format!("upload {filename}: empty response")))
    }

    /// Append a new version to an entity, conditioned on `expect_tip`.
    /// Fails on tip mismatch (the store answers 409) and on any non-2xx.
    pub async fn append_version(
        &self,
        pi: &str,
        expect_tip: Option<&str>,
        components: &BTreeMap<String, String>,
        note: &str,
    ) -> Result<AppendedVersion> {
        let url = self.url(&format!("/entities/{pi}/versions"));
        let response = self
            .client
            .post(&url)
            .json(&AppendRequest {
                expect_tip,
                components,
                note,
            })
            .send()
            .await
            .map_err(|e| Error::Publish(format!("append_version {pi}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Publish(format!(
                "append_version {pi}: HTTP {status}: {body}"
            )));
        }

        response
            .json::<AppendedVersion>()
            .await
            .map_err(|e| Error::Publish(format!("append_version {pi}: bad body: {e}")))
    }

    /// CAS append with refresh: each attempt re-reads the entity for the
    /// latest tip before appending, so a collision with a concurrent writer
    /// costs one backoff delay, never a corrupted history.
    pub async fn append_with_refresh(
        &self,
        pi: &str,
        components: &BTreeMap<String, String>,
        note: &str,
    ) -> Result<AppendedVersion> {
        let mut last_error = Error::Publish(format!("append_with_refresh {pi}: no attempts"));

        for attempt in 1..=CAS_MAX_ATTEMPTS {
            let entity = match self.get_entity(pi).await {
                Ok(entity) => entity,
                Err(e) => {
                    warn!(
                        subsystem = "archive",
                        op = "append_with_refresh",
                        pi = %pi,
                        attempt,
                        error = %e,
                        "Tip refresh failed"
                    );
                    last_error = Error::Publish(e.to_string());
                    backoff(attempt).await;
                    continue;
                }
            };

            match self.append_version(pi, entity.tip(), components, note).await {
                Ok(appended) => {
                    debug!(
                        subsystem = "archive",
                        op = "append_with_refresh",
                        pi = %pi,
                        attempt,
                        tip = %appended.tip,
                        version = appended.version,
                        "Version appended"
                    );
                    return Ok(appended);
                }
                Err(e) => {
                    warn!(
                        subsystem = "archive",
                        op = "append_with_refresh",
                        pi = %pi,
                        attempt,
                        error = %e,
                        "Append attempt failed"
                    );
                    last_error = e;
                    backoff(attempt).await;
                }
            }
        }

        Err(last_error)
    }
}

/// Exponential backoff between CAS attempts; no sleep after the last one.
async fn backoff(attempt: u32) {
    if attempt < CAS_MAX_ATTEMPTS {
        let delay = CAS_BASE_DELAY_MS * 2u64.pow(attempt - 1);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}
