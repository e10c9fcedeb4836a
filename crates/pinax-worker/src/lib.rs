//! # pinax-worker
//!
//! The chunk execution engine: a durable, timer-driven state machine that
//! takes a chunk of entity identifiers through
//! `PROCESSING → PUBLISHING → CALLBACK → DONE`, with per-item retry
//! budgets, CAS publishing, and an at-least-once orchestrator callback.
//!
//! Every pass re-reads its state from the store and persists progress as
//! row transitions, so a crash at any point resumes cleanly on the next
//! start (`WorkerRegistry::resume_incomplete`).

pub mod config;
pub mod context;
pub mod worker;

pub use config::WorkerConfig;
pub use context::ContextFetcher;
pub use worker::WorkerRegistry;
