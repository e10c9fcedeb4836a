//! Structured logging schema and field name constants for the PINAX engine.
//!
//! All crates use these constants for consistent structured logging fields
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), phase transitions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (component fetches) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "worker", "archive", "inference", "db"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "chunk_worker", "context_fetcher", "gateway", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "processing_pass", "append_version", "extract", "callback"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Batch identifier a chunk belongs to.
pub const BATCH_ID: &str = "batch_id";

/// Chunk identifier being processed.
pub const CHUNK_ID: &str = "chunk_id";

/// Persistent identifier of the entity being operated on.
pub const PI: &str = "pi";

/// Content address involved in a store operation.
pub const CID: &str = "cid";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of files in an assembled context bundle.
pub const FILE_COUNT: &str = "file_count";

/// Estimated prompt tokens before truncation.
pub const TOKENS_BEFORE: &str = "tokens_before";

/// Estimated prompt tokens after truncation.
pub const TOKENS_AFTER: &str = "tokens_after";

/// Prompt tokens billed by the gateway.
pub const PROMPT_TOKENS: &str = "prompt_tokens";

/// Completion tokens billed by the gateway.
pub const COMPLETION_TOKENS: &str = "completion_tokens";

/// Estimated request cost in USD.
pub const COST_USD: &str = "cost_usd";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Chunk phase after a transition.
pub const PHASE: &str = "phase";

/// Retry attempt number.
pub const ATTEMPT: &str = "attempt";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
