//! Run coordinator
//!
//! Drives `Selector -> Chunker -> (BatchExecutor -> Throttle)*` over the
//! categories of a request, strictly one category and one chunk at a time.
//! Only configuration errors reach the caller; selection and update failures
//! are folded into the [`RunReport`].

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use crate::batch::chunker::chunk;
use crate::batch::executor::{BatchExecutor, StoreUpdate, UpdateOperation};
use crate::batch::selector::Selector;
use crate::batch::throttle::Throttle;
use crate::batch::types::{
    summary_message, CategoryOutcome, CategoryStatus, ChunkResult, RunOptions, RunProgress,
    RunReport, RunRequest,
};
use crate::category::{Category, RunScope};
use crate::config::EngineConfig;
use crate::metrics::RegenMetrics;
use crate::store::{Mutation, RecordId, RecordStore};
use crate::Result;

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Constructed, nothing done yet
    Idle,
    /// Looking up candidates for a category
    SelectingCategory,
    /// Splitting candidates into chunks
    Chunking,
    /// Waiting on a chunk's updates
    ExecutingChunk,
    /// Pausing between chunks
    Throttling,
    /// Finished; the report is final
    Done,
}

/// Callback invoked after every chunk
pub type RunProgressCallback = Arc<dyn Fn(&RunProgress) + Send + Sync>;

/// State of a single invocation
struct Run {
    id: Uuid,
    state: RunState,
    success_count: usize,
    failure_count: usize,
    failed_ids: Vec<RecordId>,
    categories: Vec<CategoryOutcome>,
    cancelled: bool,
    /// A chunk finished and its pause has not been taken yet
    pending_pause: bool,
}

impl Run {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: RunState::Idle,
            success_count: 0,
            failure_count: 0,
            failed_ids: Vec::new(),
            categories: Vec::new(),
            cancelled: false,
            pending_pause: false,
        }
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "Run state change");
        self.state = next;
    }

    fn absorb(&mut self, outcome: &mut CategoryOutcome, result: ChunkResult) {
        outcome.succeeded += result.succeeded;
        outcome.failed += result.failed;
        self.success_count += result.succeeded;
        self.failure_count += result.failed;
        self.failed_ids.extend(result.failed_ids);
    }

    fn finish(mut self) -> RunReport {
        self.transition(RunState::Done);
        RunReport {
            run_id: self.id,
            message: summary_message(self.success_count, self.failure_count),
            success_count: self.success_count,
            failure_count: self.failure_count,
            failed_ids: self.failed_ids,
            categories: self.categories,
            cancelled: self.cancelled,
        }
    }
}

/// Orchestrates regeneration runs against one record store
pub struct RunCoordinator {
    store: Arc<dyn RecordStore>,
    selector: Selector,
    executor: BatchExecutor,
    mutation: Mutation,
    throttle_after_last_chunk: bool,
    metrics: Option<RegenMetrics>,
    progress: Option<RunProgressCallback>,
}

impl RunCoordinator {
    /// Coordinator with default engine settings
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            selector: Selector::new(store.clone()),
            store,
            executor: BatchExecutor::new(),
            mutation: Mutation::Touch,
            throttle_after_last_chunk: true,
            metrics: None,
            progress: None,
        }
    }

    /// Coordinator configured from deployment settings
    pub fn from_config(store: Arc<dyn RecordStore>, config: &EngineConfig) -> Self {
        let mut executor = BatchExecutor::new().with_concurrency_limit(config.max_in_flight);
        if let Some(timeout) = config.update_timeout() {
            executor = executor.with_timeout(timeout);
        }
        Self::new(store)
            .with_executor(executor)
            .with_throttle_after_last_chunk(config.throttle_after_last_chunk)
    }

    /// Replace the chunk executor
    pub fn with_executor(mut self, executor: BatchExecutor) -> Self {
        self.executor = executor;
        self
    }

    /// Mutation applied to every candidate; defaults to [`Mutation::Touch`]
    pub fn with_mutation(mut self, mutation: Mutation) -> Self {
        self.mutation = mutation;
        self
    }

    /// Whether to pause after the last chunk the run executes
    pub fn with_throttle_after_last_chunk(mut self, enabled: bool) -> Self {
        self.throttle_after_last_chunk = enabled;
        self
    }

    /// Report chunk and skip counts to `metrics`
    pub fn with_metrics(mut self, metrics: RegenMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Call `callback` after every chunk
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&RunProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Execute a run to completion
    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        self.run_with_cancel(request, CancellationToken::new()).await
    }

    /// Execute a run, stopping at the next category or chunk boundary once `cancel` fires
    ///
    /// Fails only when the request options are invalid, before the store is
    /// touched. A cancelled run still returns the report of the work done.
    #[instrument(
        skip_all,
        fields(
            run_id = tracing::field::Empty,
            scope = ?request.scope,
            categories = request.categories.len()
        )
    )]
    pub async fn run_with_cancel(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let options = RunOptions::try_from(request.options).map_err(|e| {
            warn!(error = %e, "Rejected run options");
            e
        })?;

        let mut run = Run::new();
        Span::current().record("run_id", tracing::field::display(run.id));
        info!(
            limit = ?options.limit().as_option(),
            chunk_size = options.chunk_size().get(),
            sleep_ms = options.sleep_duration().as_millis() as u64,
            skip_field = ?options.skip_field(),
            "Starting regeneration run"
        );

        let throttle = Throttle::new(options.sleep_duration());

        for raw in &request.categories {
            if cancel.is_cancelled() {
                run.cancelled = true;
                run.categories
                    .push(CategoryOutcome::skipped(raw.as_str(), CategoryStatus::Cancelled));
                continue;
            }

            let outcome = self
                .process_category(&mut run, request.scope, raw, &options, &throttle, &cancel)
                .await;
            run.categories.push(outcome);
        }

        // The pause owed by the last executed chunk, wherever it fell in the request
        if run.pending_pause && self.throttle_after_last_chunk {
            run.transition(RunState::Throttling);
            throttle.wait_or_cancel(&cancel).await;
        }

        let report = run.finish();
        info!(
            success_count = report.success_count,
            failure_count = report.failure_count,
            cancelled = report.cancelled,
            "{}",
            report.message
        );
        Ok(report)
    }

    async fn process_category(
        &self,
        run: &mut Run,
        scope: RunScope,
        raw: &str,
        options: &RunOptions,
        throttle: &Throttle,
        cancel: &CancellationToken,
    ) -> CategoryOutcome {
        run.transition(RunState::SelectingCategory);

        let Some(category) = Category::resolve(scope, raw) else {
            warn!(category = %raw, scope = ?scope, "Unrecognized category, skipping");
            self.record_skip("unrecognized");
            return CategoryOutcome::skipped(raw, CategoryStatus::Unrecognized);
        };

        let candidates = match self
            .selector
            .select(&category, options.skip_field(), options.limit())
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(
                    category = %category,
                    error = %e.source,
                    "Failed to fetch items, skipping category"
                );
                self.record_skip("selection_failed");
                return CategoryOutcome::skipped(
                    raw,
                    CategoryStatus::SelectionFailed(e.source.to_string()),
                );
            }
        };

        run.transition(RunState::Chunking);
        let selected = candidates.len();
        let chunks = chunk(candidates, options.chunk_size());
        let chunk_count = chunks.len();
        info!(category = %category, selected, chunks = chunk_count, "Category selected");

        let mut outcome = CategoryOutcome {
            category: raw.to_string(),
            selected,
            chunks: chunk_count,
            succeeded: 0,
            failed: 0,
            status: CategoryStatus::Processed,
        };

        let operation: Arc<dyn UpdateOperation> = Arc::new(StoreUpdate::new(
            self.store.clone(),
            category.collection(),
            self.mutation.clone(),
        ));

        for (chunk_index, members) in chunks.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!(category = %category, chunk_index, "Run cancelled between chunks");
                run.cancelled = true;
                outcome.status = CategoryStatus::Cancelled;
                break;
            }

            if run.pending_pause {
                run.pending_pause = false;
                run.transition(RunState::Throttling);
                if !throttle.wait_or_cancel(cancel).await {
                    info!(category = %category, chunk_index, "Run cancelled during throttle");
                    run.cancelled = true;
                    outcome.status = CategoryStatus::Cancelled;
                    break;
                }
            }

            run.transition(RunState::ExecutingChunk);
            let started = Instant::now();
            let result = self.executor.execute(members, operation.clone()).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_chunk(&outcome.category, &result, started.elapsed());
            }
            run.absorb(&mut outcome, result);
            run.pending_pause = true;

            if let Some(progress) = &self.progress {
                progress(&RunProgress {
                    category: outcome.category.clone(),
                    chunk_index,
                    chunk_count,
                    succeeded: run.success_count,
                    failed: run.failure_count,
                });
            }
        }

        outcome
    }

    fn record_skip(&self, reason: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_skip(reason);
        }
    }
}
