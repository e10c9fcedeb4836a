//! # pinax-core
//!
//! Core types, traits, and abstractions for the PINAX metadata engine.
//!
//! This crate provides the foundational data structures that the other
//! pinax crates depend on: the PINAX record and its validator, entity
//! snapshots from the Arke object store, chunk/PI state for the batch
//! engine, and the progressive-tax truncation algorithm.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod truncate;
pub mod validate;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use normalize::{normalize_date, normalize_type};
pub use truncate::{allocate_budget, render_truncated, TruncationItem, TruncationMode};
pub use validate::{validate_record, ValidationReport};
