//! Configuration for the chunk engine.

use pinax_core::defaults::{
    ALARM_INTERVAL_MS, CALLBACK_BASE_DELAY_MS, CONTENT_TOKEN_PROPORTION, MAX_CALLBACK_RETRIES,
    MAX_RETRIES_PER_PI, MODEL_MAX_TOKENS,
};
use pinax_core::{Error, Result};

/// Configuration for chunk workers.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the orchestrator that receives callbacks.
    pub orchestrator_url: String,
    /// Wake interval between passes in milliseconds.
    pub alarm_interval_ms: u64,
    /// Extraction attempts per PI before it is marked terminal.
    pub max_retries_per_pi: i64,
    /// Callback delivery attempts per chunk.
    pub max_callback_retries: i64,
    /// Base delay for callback retry backoff: `base * 2^retry_count`.
    pub callback_base_delay_ms: u64,
    /// Token budget handed to the truncator per context bundle.
    pub content_token_target: i64,
}

impl WorkerConfig {
    pub fn new(orchestrator_url: impl Into<String>) -> Self {
        Self {
            orchestrator_url: orchestrator_url.into(),
            alarm_interval_ms: ALARM_INTERVAL_MS,
            max_retries_per_pi: MAX_RETRIES_PER_PI,
            max_callback_retries: MAX_CALLBACK_RETRIES,
            callback_base_delay_ms: CALLBACK_BASE_DELAY_MS,
            content_token_target: (MODEL_MAX_TOKENS as f64 * CONTENT_TOKEN_PROPORTION) as i64,
        }
    }

    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `ORCHESTRATOR_URL` | (required) | Callback base URL |
    /// | `ALARM_INTERVAL_MS` | `100` | Wake interval between passes |
    /// | `MAX_RETRIES_PER_PI` | `3` | Extraction attempts per PI |
    /// | `MAX_CALLBACK_RETRIES` | `3` | Callback delivery attempts |
    /// | `MODEL_MAX_TOKENS` | `128000` | Model context window |
    /// | `CONTENT_TOKEN_PROPORTION` | `0.5` | Window share given to content |
    pub fn from_env() -> Result<Self> {
        let orchestrator_url = std::env::var("ORCHESTRATOR_URL")
            .map_err(|_| Error::Config("ORCHESTRATOR_URL is not set".to_string()))?;
        let mut config = Self::new(orchestrator_url);

        if let Some(v) = env_parse::<u64>("ALARM_INTERVAL_MS") {
            config.alarm_interval_ms = v;
        }
        if let Some(v) = env_parse::<i64>("MAX_RETRIES_PER_PI") {
            config.max_retries_per_pi = v.max(1);
        }
        if let Some(v) = env_parse::<i64>("MAX_CALLBACK_RETRIES") {
            config.max_callback_retries = v.max(1);
        }

        let max_tokens = env_parse::<i64>("MODEL_MAX_TOKENS").unwrap_or(MODEL_MAX_TOKENS);
        let proportion = env_parse::<f64>("CONTENT_TOKEN_PROPORTION")
            .filter(|p| *p > 0.0 && *p <= 1.0)
            .unwrap_or(CONTENT_TOKEN_PROPORTION);
        config.content_token_target = (max_tokens as f64 * proportion) as i64;

        Ok(config)
    }

    pub fn with_alarm_interval(mut self, ms: u64) -> Self {
        self.alarm_interval_ms = ms;
        self
    }

    pub fn with_max_retries_per_pi(mut self, retries: i64) -> Self {
        self.max_retries_per_pi = retries;
        self
    }

    pub fn with_callback_base_delay(mut self, ms: u64) -> Self {
        self.callback_base_delay_ms = ms;
        self
    }

    pub fn with_content_token_target(mut self, tokens: i64) -> Self {
        self.content_token_target = tokens;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
