//! Raito Ingestion Library
//!
//! This library implements the ingestion pipeline behind the Raito server:
//! fetch remote documents, extract structured fields and asset references,
//! deduplicate by content fingerprint, normalize image assets to a canonical
//! encoding, and persist everything transactionally.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`db`] - Database connection and schema management
//! - [`fetch`] - HTTP fetcher with retry/backoff
//! - [`extract`] - Tolerant HTML parsing and ruleset-driven field extraction
//! - [`dedup`] - Content fingerprinting and canonicalization
//! - [`normalize`] - Image decoding, bounds checks and canonical re-encoding
//! - [`store`] - Transactional record/asset persistence
//! - [`pipeline`] - Coordinator: bounded concurrency and per-fingerprint
//!   single-flight exclusivity
//!
//! The HTTP API that re-serves stored records is an external collaborator;
//! it consumes the [`store`] read interface and is not part of this crate.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod dedup;
pub mod extract;
pub mod fetch;
pub mod normalize;
pub mod pipeline;
pub mod store;

// Re-export commonly used types
pub use config::IngestConfig;
pub use db::Database;
pub use dedup::Fingerprint;
pub use extract::{CompiledRuleset, DraftRecord, ExtractError, Ruleset, extract};
pub use fetch::{FetchError, FetchOptions, FetchedDocument, Fetcher, RetryPolicy};
pub use normalize::{ImageError, ImageNormalizer, NormalizedImage};
pub use pipeline::{
    Coordinator, CoordinatorConfig, FailureKind, IngestError, IngestOutcome, IngestStats,
};
pub use store::{PutOutcome, RecordStore, Store, StoreError, StoredAsset, StoredRecord};
