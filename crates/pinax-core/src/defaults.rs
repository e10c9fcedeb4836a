//! Centralized default constants for the PINAX engine.
//!
//! **This module is the single source of truth** for all shared default
//! values. Crates reference these constants instead of defining their own
//! magic numbers. Organized by domain area.

// =============================================================================
// MODEL GATEWAY
// =============================================================================

/// Default DeepInfra OpenAI-compatible endpoint.
pub const DEEPINFRA_URL: &str = "https://api.deepinfra.com/v1/openai";

/// Default generation model.
pub const MODEL_NAME: &str = "meta-llama/Meta-Llama-3.1-8B-Instruct";

/// Default model context window in tokens.
pub const MODEL_MAX_TOKENS: i64 = 128_000;

/// Share of the context window reserved for file content.
pub const CONTENT_TOKEN_PROPORTION: f64 = 0.5;

/// Sampling temperature for extraction calls.
pub const MODEL_TEMPERATURE: f32 = 0.2;

/// Completion-token cap for extraction calls.
pub const MODEL_COMPLETION_TOKENS: u32 = 1024;

/// Timeout for gateway requests in seconds.
pub const GATEWAY_TIMEOUT_SECS: u64 = 300;

/// Prompt-token price in USD per million tokens.
pub const INPUT_COST_PER_MTOK: f64 = 0.075;

/// Completion-token price in USD per million tokens.
pub const OUTPUT_COST_PER_MTOK: f64 = 0.2;

// =============================================================================
// TOKEN ESTIMATION
// =============================================================================

/// Characters per estimated token. `tokens = ceil(len / 4)`.
pub const CHARS_PER_TOKEN: usize = 4;

/// Marker appended to content cut down by the truncator.
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

// =============================================================================
// CHUNK ENGINE
// =============================================================================

/// Maximum extraction attempts per PI before it is marked terminal.
pub const MAX_RETRIES_PER_PI: i64 = 3;

/// Maximum callback delivery attempts per chunk.
pub const MAX_CALLBACK_RETRIES: i64 = 3;

/// Worker wake interval in milliseconds.
pub const ALARM_INTERVAL_MS: u64 = 100;

/// Base delay for callback retry backoff: `base * 2^retry_count`.
pub const CALLBACK_BASE_DELAY_MS: u64 = 1000;

// =============================================================================
// CAS PUBLISHING
// =============================================================================

/// Attempts for the append-version refresh-and-retry loop.
pub const CAS_MAX_ATTEMPTS: u32 = 3;

/// Base delay for CAS retry backoff in milliseconds.
pub const CAS_BASE_DELAY_MS: u64 = 500;

/// Version note recorded on every PINAX append.
pub const VERSION_NOTE: &str = "Added PINAX metadata";

// =============================================================================
// CONTEXT ASSEMBLY
// =============================================================================

/// Component labels never treated as plain text input.
pub const RESERVED_COMPONENT_NAMES: [&str; 3] = ["pinax.json", "cheimarros.json", "description.md"];

/// Suffix identifying OCR sidecar components.
pub const OCR_SIDECAR_SUFFIX: &str = ".ref.json";

/// Component label of the entity's PINAX record.
pub const PINAX_COMPONENT: &str = "pinax.json";

/// File-name tag given to the previous PINAX record in the context bundle.
pub const PREVIOUS_PINAX_NAME: &str = "[PREVIOUS] pinax.json";

/// Extensions treated as text input (lowercase suffix match).
pub const TEXT_EXTENSIONS: [&str; 20] = [
    ".txt", ".md", ".json", ".xml", ".html", ".htm", ".csv", ".tsv", ".yaml", ".yml", ".toml",
    ".ini", ".cfg", ".conf", ".log", ".rst", ".tex", ".rtf", ".asc", ".nfo",
];

/// Directory-name fallback: last N characters of the PI.
pub const PI_SUFFIX_LEN: usize = 8;

// =============================================================================
// RECORD DEFAULTS
// =============================================================================

/// The 12 DCMI Type vocabulary values (case-sensitive).
pub const DCMI_TYPES: [&str; 12] = [
    "Collection",
    "Dataset",
    "Event",
    "Image",
    "InteractiveResource",
    "MovingImage",
    "PhysicalObject",
    "Service",
    "Software",
    "Sound",
    "StillImage",
    "Text",
];

/// Default `source` value on emitted records.
pub const DEFAULT_SOURCE: &str = "PINAX";

/// Base URL for generated `access_url` values.
pub const ACCESS_URL_BASE: &str = "https://arke.institute";

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default SQLite database path.
pub const DB_PATH: &str = "pinax.db";

/// Timeout for object-store requests in seconds.
pub const ARCHIVE_TIMEOUT_SECS: u64 = 120;

/// Timeout for orchestrator callback requests in seconds.
pub const CALLBACK_TIMEOUT_SECS: u64 = 30;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dcmi_vocabulary_is_complete_and_sorted() {
        assert_eq!(DCMI_TYPES.len(), 12);
        let mut sorted = DCMI_TYPES;
        sorted.sort_unstable();
        assert_eq!(sorted, DCMI_TYPES, "vocabulary kept alphabetical");
    }

    #[test]
    fn text_extensions_are_lowercase_with_dot() {
        for ext in TEXT_EXTENSIONS {
            assert!(ext.starts_with('.'));
            assert_eq!(ext, ext.to_lowercase());
        }
    }

    #[test]
    fn content_budget_fits_context_window() {
        let budget = (MODEL_MAX_TOKENS as f64 * CONTENT_TOKEN_PROPORTION) as i64;
        assert!(budget > 0);
        assert!(budget + i64::from(MODEL_COMPLETION_TOKENS) < MODEL_MAX_TOKENS);
    }
}
