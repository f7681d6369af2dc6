//! # Regenerator
//!
//! A bulk re-processing engine: it touches every record matching a set of
//! categories through an update operation, in bounded-size chunks, with a
//! pause between chunks, and keeps going when individual records or whole
//! categories fail.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use regenerator::batch::{RawRunOptions, RunCoordinator, RunRequest};
//! use regenerator::category::MEDIA_COLLECTION;
//! use regenerator::store::MemoryRecordStore;
//! use serde_json::json;
//!
//! # async fn example() -> regenerator::Result<()> {
//! let store = Arc::new(MemoryRecordStore::new());
//! store.insert(MEDIA_COLLECTION, 1, json!({ "mime": "image/png" }));
//!
//! let request = RunRequest::media(["images"]).with_options(RawRunOptions {
//!     sleep_duration: 0,
//!     ..Default::default()
//! });
//! let report = RunCoordinator::new(store).run(request).await?;
//! assert_eq!(report.message, "1 items updated successfully, 0 items failed to update.");
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`batch`]: selector, chunker, executor, throttle and the run coordinator
//! - [`category`]: categories and how they map to store filters
//! - [`store`]: the record store seam and an in-memory implementation
//! - [`config`]: deployment settings from the environment
//! - [`metrics`]: Prometheus metrics
//! - [`telemetry`]: tracing subscriber setup

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for regenerator operations
pub type Result<T> = std::result::Result<T, RegenError>;

/// Main error type for regenerator operations
#[derive(Error, Debug)]
pub enum RegenError {
    /// Invalid run options; raised before any store access
    #[error("Configuration error: {0}")]
    Configuration(#[from] batch::ConfigurationError),

    /// Store failure surfaced directly to the caller
    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),

    /// Metrics registration or encoding failure
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Batch orchestration engine
pub mod batch;

/// Categories and their selection filters
pub mod category;

/// Engine configuration
pub mod config;

/// Run metrics
pub mod metrics;

/// Record store seam
pub mod store;

/// Logging setup
pub mod telemetry;
