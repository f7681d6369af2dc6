use std::num::NonZeroUsize;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::category::RunScope;
use crate::store::RecordId;

/// Smallest accepted chunk size
pub const CHUNK_SIZE_MIN: usize = 1;
/// Largest accepted chunk size
pub const CHUNK_SIZE_MAX: usize = 500;
/// Chunk size when the request leaves it out
pub const DEFAULT_CHUNK_SIZE: usize = 10;
/// Pause between chunks when the request leaves it out
pub const DEFAULT_SLEEP_DURATION_MS: i64 = 5_000;
/// Limit value meaning "no limit"
pub const UNLIMITED: i64 = -1;

/// Invalid run options, detected before any store access
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Chunk size outside `CHUNK_SIZE_MIN..=CHUNK_SIZE_MAX`
    #[error("Chunk size {value} is outside the allowed range {min}..={max}")]
    ChunkSizeOutOfRange {
        /// Rejected value
        value: i64,
        /// Lower bound
        min: usize,
        /// Upper bound
        max: usize,
    },

    /// Limit below the unlimited sentinel
    #[error("Invalid limit {0}: use a positive number, or -1 for no limit")]
    InvalidLimit(i64),

    /// Negative pause between chunks
    #[error("Sleep duration must not be negative (got {0}ms)")]
    NegativeSleepDuration(i64),

    /// Skip field that is not a plain field name
    #[error("Invalid skip field name: {0:?}")]
    InvalidSkipField(String),
}

/// Per-category cap on fetched candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Limit {
    /// Fetch everything that matches
    #[default]
    Unlimited,
    /// Fetch at most this many
    AtMost(NonZeroUsize),
}

impl Limit {
    /// Interpret a raw request value; `-1` and `0` mean unlimited
    pub fn from_raw(raw: i64) -> Result<Self, ConfigurationError> {
        match raw {
            UNLIMITED | 0 => Ok(Limit::Unlimited),
            n if n < UNLIMITED => Err(ConfigurationError::InvalidLimit(n)),
            n => usize::try_from(n)
                .ok()
                .and_then(NonZeroUsize::new)
                .map(Limit::AtMost)
                .ok_or(ConfigurationError::InvalidLimit(n)),
        }
    }

    /// Bound to hand to the store, if any
    pub fn as_option(self) -> Option<usize> {
        match self {
            Limit::Unlimited => None,
            Limit::AtMost(n) => Some(n.get()),
        }
    }
}

fn default_limit() -> i64 {
    UNLIMITED
}

fn default_chunk_size() -> i64 {
    DEFAULT_CHUNK_SIZE as i64
}

fn default_sleep_duration() -> i64 {
    DEFAULT_SLEEP_DURATION_MS
}

/// Run options as received from a caller, before validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRunOptions {
    /// Max candidates per category, `-1` for no limit
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Records per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
    /// Pause after each chunk, in milliseconds
    #[serde(default = "default_sleep_duration", alias = "sleepDurationMs")]
    pub sleep_duration: i64,
    /// Skip candidates whose field of this name is already populated
    #[serde(default, alias = "filterByText")]
    pub skip_field: Option<String>,
}

impl Default for RawRunOptions {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            chunk_size: default_chunk_size(),
            sleep_duration: default_sleep_duration(),
            skip_field: None,
        }
    }
}

/// Validated, immutable options for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    limit: Limit,
    chunk_size: NonZeroUsize,
    sleep_duration: Duration,
    skip_field: Option<String>,
}

fn skip_field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("static pattern"))
}

impl RunOptions {
    /// Validate raw values
    pub fn new(
        limit: i64,
        chunk_size: i64,
        sleep_duration_ms: i64,
        skip_field: Option<&str>,
    ) -> Result<Self, ConfigurationError> {
        let chunk_size = usize::try_from(chunk_size)
            .ok()
            .filter(|size| (CHUNK_SIZE_MIN..=CHUNK_SIZE_MAX).contains(size))
            .and_then(NonZeroUsize::new)
            .ok_or(ConfigurationError::ChunkSizeOutOfRange {
                value: chunk_size,
                min: CHUNK_SIZE_MIN,
                max: CHUNK_SIZE_MAX,
            })?;

        let sleep_ms = u64::try_from(sleep_duration_ms)
            .map_err(|_| ConfigurationError::NegativeSleepDuration(sleep_duration_ms))?;

        let skip_field = match skip_field.map(|f| f.trim().to_lowercase()) {
            None => None,
            Some(field) if field.is_empty() => None,
            Some(field) if skip_field_pattern().is_match(&field) => Some(field),
            Some(field) => return Err(ConfigurationError::InvalidSkipField(field)),
        };

        Ok(Self {
            limit: Limit::from_raw(limit)?,
            chunk_size,
            sleep_duration: Duration::from_millis(sleep_ms),
            skip_field,
        })
    }

    /// Per-category cap on candidates
    pub fn limit(&self) -> Limit {
        self.limit
    }

    /// Records per chunk
    pub fn chunk_size(&self) -> NonZeroUsize {
        self.chunk_size
    }

    /// Pause after each chunk
    pub fn sleep_duration(&self) -> Duration {
        self.sleep_duration
    }

    /// Field whose presence excludes a candidate
    pub fn skip_field(&self) -> Option<&str> {
        self.skip_field.as_deref()
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            limit: Limit::Unlimited,
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
            sleep_duration: Duration::from_millis(DEFAULT_SLEEP_DURATION_MS as u64),
            skip_field: None,
        }
    }
}

impl TryFrom<RawRunOptions> for RunOptions {
    type Error = ConfigurationError;

    fn try_from(raw: RawRunOptions) -> Result<Self, Self::Error> {
        RunOptions::new(
            raw.limit,
            raw.chunk_size,
            raw.sleep_duration,
            raw.skip_field.as_deref(),
        )
    }
}

/// One invocation: which categories to process and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Media or content categories
    #[serde(default)]
    pub scope: RunScope,
    /// Category names, processed in order
    #[serde(alias = "types")]
    pub categories: Vec<String>,
    /// Unvalidated options
    #[serde(default)]
    pub options: RawRunOptions,
}

impl RunRequest {
    /// Media run over `categories` with default options
    pub fn media<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scope: RunScope::Media,
            categories: categories.into_iter().map(Into::into).collect(),
            options: RawRunOptions::default(),
        }
    }

    /// Content run over the given content-type uids with default options
    pub fn content<I, S>(uids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            scope: RunScope::Content,
            categories: uids.into_iter().map(Into::into).collect(),
            options: RawRunOptions::default(),
        }
    }

    /// Replace the options
    pub fn with_options(mut self, options: RawRunOptions) -> Self {
        self.options = options;
        self
    }

    /// Parse a request body
    pub fn from_json(body: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

/// Tally for one chunk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResult {
    /// Updates that succeeded
    pub succeeded: usize,
    /// Updates that failed
    pub failed: usize,
    /// Identifiers of failed records, in completion order
    pub failed_ids: Vec<RecordId>,
}

impl ChunkResult {
    /// Members accounted for
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Count a success
    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    /// Count a failure of `id`
    pub fn record_failure(&mut self, id: RecordId) {
        self.failed += 1;
        self.failed_ids.push(id);
    }
}

/// How a category ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "camelCase")]
pub enum CategoryStatus {
    /// Every chunk was executed
    Processed,
    /// The candidate lookup failed; nothing was updated
    SelectionFailed(String),
    /// The scope does not know this category
    Unrecognized,
    /// The run was cancelled before this category finished
    Cancelled,
}

/// Per-category breakdown in a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryOutcome {
    /// Category name as requested
    pub category: String,
    /// Candidates returned by selection
    pub selected: usize,
    /// Chunks the candidates were split into
    pub chunks: usize,
    /// Successful updates
    pub succeeded: usize,
    /// Failed updates
    pub failed: usize,
    /// Final status
    pub status: CategoryStatus,
}

impl CategoryOutcome {
    /// Outcome for a category that never reached execution
    pub fn skipped(category: impl Into<String>, status: CategoryStatus) -> Self {
        Self {
            category: category.into(),
            selected: 0,
            chunks: 0,
            succeeded: 0,
            failed: 0,
            status,
        }
    }
}

/// Progress notification emitted after every chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunProgress {
    /// Category being processed
    pub category: String,
    /// Zero-based index of the chunk just finished
    pub chunk_index: usize,
    /// Chunks in this category
    pub chunk_count: usize,
    /// Successes so far in the whole run
    pub succeeded: usize,
    /// Failures so far in the whole run
    pub failed: usize,
}

/// Final summary of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Identifier used in logs for this run
    pub run_id: Uuid,
    /// Human readable summary
    pub message: String,
    /// Successful updates across all categories
    pub success_count: usize,
    /// Failed updates across all categories
    pub failure_count: usize,
    /// Identifiers of every failed record
    pub failed_ids: Vec<RecordId>,
    /// Per-category breakdown, in request order
    pub categories: Vec<CategoryOutcome>,
    /// Whether the run stopped early on cancellation
    pub cancelled: bool,
}

impl RunReport {
    /// Render the report as a JSON response body
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Summary line for a finished run
pub fn summary_message(success_count: usize, failure_count: usize) -> String {
    format!(
        "{} items updated successfully, {} items failed to update.",
        success_count, failure_count
    )
}
