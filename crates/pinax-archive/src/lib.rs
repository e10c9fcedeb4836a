//! # pinax-archive
//!
//! Client for the Arke content-addressed object store.
//!
//! Four operations: entity snapshots, blob downloads, multipart uploads,
//! and compare-and-swap version appends, plus the refresh-and-retry loop
//! that publishing leans on when concurrent writers move an entity's tip.

pub mod client;

pub use client::{AppendedVersion, ArchiveClient, ArchiveConfig};
