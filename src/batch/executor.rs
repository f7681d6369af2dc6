//! Batch executor: one chunk, fanned out and joined
//!
//! - Every member of the chunk is dispatched as its own task
//! - Optional ceiling on simultaneous store calls, enforced with a semaphore
//! - Optional per-update timeout
//! - Failures (errors, timeouts, panics) are isolated per record
//! - Returns only once every member has completed

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::batch::types::{ChunkResult, CHUNK_SIZE_MAX};
use crate::store::{Candidate, Mutation, RecordId, RecordStore, StoreError};

/// The per-record update a chunk applies
#[async_trait]
pub trait UpdateOperation: Send + Sync {
    /// Update the record `id`
    async fn update(&self, id: RecordId) -> Result<(), StoreError>;
}

/// Applies a [`Mutation`] to records of one collection through a store
pub struct StoreUpdate {
    store: Arc<dyn RecordStore>,
    collection: String,
    mutation: Mutation,
}

impl StoreUpdate {
    /// Update records of `collection` in `store` with `mutation`
    pub fn new(store: Arc<dyn RecordStore>, collection: impl Into<String>, mutation: Mutation) -> Self {
        Self {
            store,
            collection: collection.into(),
            mutation,
        }
    }
}

#[async_trait]
impl UpdateOperation for StoreUpdate {
    async fn update(&self, id: RecordId) -> Result<(), StoreError> {
        self.store
            .update_record(&self.collection, id, self.mutation.clone())
            .await
            .map(|_| ())
    }
}

/// Callback for progress updates: (completed, total) within the chunk
///
/// Invoked from the joining task once a member's outcome is tallied, never
/// from inside an update task.
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

/// Executes one chunk of updates concurrently
pub struct BatchExecutor {
    /// Maximum simultaneous update calls
    concurrency_limit: usize,
    /// Timeout for individual updates
    timeout_duration: Option<Duration>,
    /// Progress callback
    progress_callback: Option<ProgressCallback>,
}

impl BatchExecutor {
    /// Executor whose fan-out equals the chunk size
    pub fn new() -> Self {
        Self {
            concurrency_limit: CHUNK_SIZE_MAX,
            timeout_duration: None,
            progress_callback: None,
        }
    }

    /// Cap simultaneous update calls
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    /// Fail any single update that runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_duration = Some(timeout);
        self
    }

    /// Set progress callback
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Current concurrency ceiling
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Run `operation` on every member of `chunk` and tally the outcome
    #[instrument(skip(self, chunk, operation), fields(chunk_len = chunk.len()))]
    pub async fn execute(
        &self,
        chunk: Vec<Candidate>,
        operation: Arc<dyn UpdateOperation>,
    ) -> ChunkResult {
        let chunk_start = Instant::now();
        let total = chunk.len();
        let mut result = ChunkResult::default();

        if chunk.is_empty() {
            debug!("Empty chunk, nothing to execute");
            return result;
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));

        let mut pending = FuturesUnordered::new();
        for candidate in chunk {
            let id = candidate.id;
            let sem = semaphore.clone();
            let operation = operation.clone();
            let timeout = self.timeout_duration;

            let task = tokio::spawn(async move {
                match sem.acquire_owned().await {
                    Ok(_permit) => Self::update_one(operation.as_ref(), id, timeout).await,
                    Err(_) => Err(StoreError::Unavailable("executor shut down".to_string())),
                }
            });

            pending.push(async move { (id, task.await) });
        }

        while let Some((id, joined)) = pending.next().await {
            match joined {
                Ok(Ok(())) => {
                    debug!(record_id = %id, "Record updated");
                    result.record_success();
                }
                Ok(Err(e)) => {
                    error!(record_id = %id, error = %e, "Failed to update record");
                    result.record_failure(id);
                }
                Err(e) => {
                    error!(record_id = %id, error = %e, "Update task aborted");
                    result.record_failure(id);
                }
            }

            if let Some(ref callback) = self.progress_callback {
                callback(result.total(), total);
            }
        }

        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            duration_ms = chunk_start.elapsed().as_millis() as u64,
            "Chunk executed"
        );

        if result.failed * 2 > total && total > 5 {
            warn!(
                failed = result.failed,
                total = total,
                "More than half of the chunk failed"
            );
        }

        result
    }

    async fn update_one(
        operation: &dyn UpdateOperation,
        id: RecordId,
        timeout: Option<Duration>,
    ) -> Result<(), StoreError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, operation.update(id))
                .await
                .unwrap_or_else(|_| Err(StoreError::Timeout(limit.as_millis() as u64))),
            None => operation.update(id).await,
        }
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_executor_creation() {
        let executor = BatchExecutor::new();
        assert_eq!(executor.concurrency_limit, CHUNK_SIZE_MAX);
        assert!(executor.timeout_duration.is_none());
    }

    #[test]
    fn test_batch_executor_configuration() {
        let executor = BatchExecutor::new()
            .with_concurrency_limit(0)
            .with_timeout(Duration::from_secs(60));

        assert_eq!(executor.concurrency_limit(), 1);
        assert_eq!(executor.timeout_duration, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_empty_chunk() {
        struct Never;

        #[async_trait]
        impl UpdateOperation for Never {
            async fn update(&self, _id: RecordId) -> Result<(), StoreError> {
                unreachable!("no members to update")
            }
        }

        let result = BatchExecutor::new().execute(Vec::new(), Arc::new(Never)).await;
        assert_eq!(result, ChunkResult::default());
    }
}
