//! Prometheus metrics for regeneration runs
//!
//! Metrics are registered on a caller-supplied [`Registry`] so several engines
//! (or tests) can coexist in one process.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::batch::ChunkResult;
use crate::{RegenError, Result};

/// Counters and histograms updated by the run coordinator
#[derive(Clone)]
pub struct RegenMetrics {
    records: IntCounterVec,
    chunks: IntCounterVec,
    categories_skipped: IntCounterVec,
    chunk_duration: HistogramVec,
}

impl RegenMetrics {
    /// Create the metrics and register them on `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        let records = IntCounterVec::new(
            Opts::new("regenerator_records_total", "Records processed, by outcome"),
            &["category", "outcome"],
        )?;
        let chunks = IntCounterVec::new(
            Opts::new("regenerator_chunks_total", "Chunks executed"),
            &["category"],
        )?;
        let categories_skipped = IntCounterVec::new(
            Opts::new(
                "regenerator_categories_skipped_total",
                "Categories skipped before execution",
            ),
            &["reason"],
        )?;
        let chunk_duration = HistogramVec::new(
            HistogramOpts::new(
                "regenerator_chunk_duration_seconds",
                "Chunk execution duration in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
            &["category"],
        )?;

        registry.register(Box::new(records.clone()))?;
        registry.register(Box::new(chunks.clone()))?;
        registry.register(Box::new(categories_skipped.clone()))?;
        registry.register(Box::new(chunk_duration.clone()))?;

        Ok(Self {
            records,
            chunks,
            categories_skipped,
            chunk_duration,
        })
    }

    /// Record a finished chunk
    pub fn record_chunk(&self, category: &str, result: &ChunkResult, elapsed: Duration) {
        self.records
            .with_label_values(&[category, "success"])
            .inc_by(result.succeeded as u64);
        self.records
            .with_label_values(&[category, "failure"])
            .inc_by(result.failed as u64);
        self.chunks.with_label_values(&[category]).inc();
        self.chunk_duration
            .with_label_values(&[category])
            .observe(elapsed.as_secs_f64());
    }

    /// Record a category that never reached execution
    pub fn record_skip(&self, reason: &str) {
        self.categories_skipped.with_label_values(&[reason]).inc();
    }

    /// Records counted for `category` and `outcome`
    pub fn records_total(&self, category: &str, outcome: &str) -> u64 {
        self.records.with_label_values(&[category, outcome]).get()
    }

    /// Chunks counted for `category`
    pub fn chunks_total(&self, category: &str) -> u64 {
        self.chunks.with_label_values(&[category]).get()
    }

    /// Skips counted for `reason`
    pub fn skipped_total(&self, reason: &str) -> u64 {
        self.categories_skipped.with_label_values(&[reason]).get()
    }
}

/// Render everything in `registry` in the Prometheus text format
pub fn gather_text(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| RegenError::Metrics(prometheus::Error::Msg(e.to_string())))
}
