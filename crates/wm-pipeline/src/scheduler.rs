//! Batch scheduling.
//!
//! [`JobScheduler`] runs a [`PairProcessor`] over every queued pair with at
//! most `max_concurrency` pairs in flight. Pairs are dispatched in chunks of
//! `min(2 * max_concurrency, 8)`; each pair holds a semaphore permit for its
//! whole run. A failing pair is recorded and never stops its siblings.
//! Before anything runs, every pair is given its own deliverable path; pairs
//! whose names would clash get a ` (2)`, ` (3)`, ... suffix in queue order.
//! [`JobScheduler::cancel`] stops new pairs from starting; in-flight pairs
//! finish on their own, then temp files are purged and `on_complete` fires.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use wm_av::TempRegistry;
use wm_core::{BatchResult, Error, Pair, ProgressState, WatermarkSettings};

use crate::context::{BatchEvents, PairContext};
use crate::pipeline::PairProcessor;

/// Largest chunk of pairs dispatched together.
const MAX_CHUNK: usize = 8;

struct QueuedBatch {
    pairs: Vec<Pair>,
    settings: Arc<WatermarkSettings>,
    output_root: PathBuf,
}

enum PairOutcome {
    Delivered(PathBuf),
    Failed(String),
    /// Not started because the batch was cancelled first.
    Skipped,
}

pub struct JobScheduler {
    processor: Arc<dyn PairProcessor>,
    max_concurrency: usize,
    events: Arc<BatchEvents>,
    batch: Mutex<Option<QueuedBatch>>,
    progress: Arc<Mutex<ProgressState>>,
    /// Current batch token. The lock also orders cancellation against pair
    /// starts.
    cancel: Arc<Mutex<CancellationToken>>,
    temps: TempRegistry,
}

impl JobScheduler {
    /// `max_concurrency` is clamped to at least 1.
    pub fn new(processor: Arc<dyn PairProcessor>, max_concurrency: usize) -> Self {
        Self {
            processor,
            max_concurrency: max_concurrency.max(1),
            events: Arc::new(BatchEvents::noop()),
            batch: Mutex::new(None),
            progress: Arc::new(Mutex::new(ProgressState::default())),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            temps: TempRegistry::new(),
        }
    }

    pub fn with_events(mut self, events: BatchEvents) -> Self {
        self.events = Arc::new(events);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Pairs dispatched together.
    pub fn chunk_size(&self) -> usize {
        (2 * self.max_concurrency).min(MAX_CHUNK)
    }

    pub fn progress(&self) -> ProgressState {
        *self.progress.lock()
    }

    /// Registry of temp paths purged at the end of each batch.
    pub fn temps(&self) -> &TempRegistry {
        &self.temps
    }

    /// Store a batch for the next [`start`](Self::start).
    ///
    /// Replaces any batch queued earlier and resets progress and
    /// cancellation.
    ///
    /// # Errors
    ///
    /// - [`Error::NoWorkItems`] if `pairs` is empty.
    /// - [`Error::Validation`] if `settings` are out of range.
    pub fn queue(
        &self,
        pairs: Vec<Pair>,
        settings: WatermarkSettings,
        output_root: impl Into<PathBuf>,
    ) -> wm_core::Result<()> {
        if pairs.is_empty() {
            return Err(Error::NoWorkItems);
        }
        settings.validate()?;

        *self.progress.lock() = ProgressState::new(pairs.len());
        *self.cancel.lock() = CancellationToken::new();
        *self.batch.lock() = Some(QueuedBatch {
            pairs,
            settings: Arc::new(settings),
            output_root: output_root.into(),
        });
        Ok(())
    }

    /// Stop dispatching new pairs. Idempotent.
    pub fn cancel(&self) {
        let token = self.cancel.lock();
        if !token.is_cancelled() {
            tracing::info!("batch cancellation requested");
            token.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().is_cancelled()
    }

    /// Run the queued batch to completion.
    ///
    /// # Errors
    ///
    /// Batch-level failures, reported before any pair starts:
    /// [`Error::NoWorkItems`] if nothing is queued,
    /// [`Error::InvalidOutputFolder`], and whatever the processor's
    /// preflight rejects (e.g. [`Error::ToolNotFound`]). Per-pair failures
    /// are collected in the returned [`BatchResult`].
    pub async fn start(&self) -> wm_core::Result<BatchResult> {
        let batch = self.batch.lock().take().ok_or(Error::NoWorkItems)?;
        check_output_folder(&batch.output_root)?;
        self.processor.preflight(&batch.pairs).await?;
        let destinations = plan_destinations(
            batch
                .pairs
                .iter()
                .map(|pair| self.processor.destination(pair, &batch.output_root)),
        );

        let token = self.cancel.lock().clone();
        let total = batch.pairs.len();
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut result = BatchResult::default();

        tracing::info!(
            pairs = total,
            concurrency = self.max_concurrency,
            chunk = self.chunk_size(),
            output = %batch.output_root.display(),
            "batch started"
        );

        for (chunk_index, chunk) in batch.pairs.chunks(self.chunk_size()).enumerate() {
            if token.is_cancelled() {
                break;
            }

            let mut tasks = JoinSet::new();
            for (offset, pair) in chunk.iter().enumerate() {
                let index = chunk_index * self.chunk_size() + offset;
                let ctx = PairContext {
                    index,
                    settings: Arc::clone(&batch.settings),
                    output_root: batch.output_root.clone(),
                    destination: destinations[index].clone(),
                    cancellation: token.clone(),
                    temps: self.temps.clone(),
                };
                tasks.spawn(run_pair(
                    Arc::clone(&self.processor),
                    Arc::clone(&semaphore),
                    Arc::clone(&self.cancel),
                    Arc::clone(&self.events),
                    pair.clone(),
                    ctx,
                ));
            }

            while let Some(joined) = tasks.join_next().await {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => PairOutcome::Failed(format!("pair task aborted: {e}")),
                };
                match outcome {
                    PairOutcome::Delivered(_) => result.success_count += 1,
                    PairOutcome::Failed(message) => result.errors.push(message),
                    PairOutcome::Skipped => continue,
                }
                let state = self.progress.lock().advance();
                self.events.progress(state.completed, state.total);
            }
        }

        result.cancelled = token.is_cancelled();
        let purged = self.temps.purge();

        tracing::info!(
            succeeded = result.success_count,
            failed = result.failure_count(),
            cancelled = result.cancelled,
            purged,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );

        self.events.complete(result.success_count, &result.errors);
        Ok(result)
    }
}

async fn run_pair(
    processor: Arc<dyn PairProcessor>,
    semaphore: Arc<Semaphore>,
    cancel: Arc<Mutex<CancellationToken>>,
    events: Arc<BatchEvents>,
    pair: Pair,
    ctx: PairContext,
) -> PairOutcome {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return PairOutcome::Skipped;
    };

    let primary_name = pair.primary_name();
    let watermark_name = pair.watermark_name();

    // A pair begins only while holding the token lock, so no pair starts
    // after cancel() returns.
    {
        let token = cancel.lock();
        if token.is_cancelled() {
            return PairOutcome::Skipped;
        }
        events.current_pair(&primary_name, &watermark_name);
    }

    tracing::debug!(primary = %primary_name, watermark = %watermark_name, "pair started");

    // A nested task turns a panicking processor into an ordinary failure
    // for this pair.
    let worker = {
        let processor = Arc::clone(&processor);
        let pair = pair.clone();
        tokio::spawn(async move { processor.process(&pair, &ctx).await })
    };
    let result = match worker.await {
        Ok(result) => result,
        Err(e) => Err(Error::Internal(format!("pair worker failed: {e}"))),
    };

    match result {
        Ok(dest) => PairOutcome::Delivered(dest),
        Err(e) => {
            tracing::error!(
                primary = %primary_name,
                watermark = %watermark_name,
                error = %e,
                "pair failed"
            );
            PairOutcome::Failed(Error::pair(primary_name, watermark_name, e).to_string())
        }
    }
}

/// Make every proposed destination unique within the batch.
///
/// The first pair to propose a path keeps it; later ones get ` (n)` added
/// to the file stem, with the smallest `n` not already taken. Paths are
/// compared case-insensitively so the plan holds on case-folding
/// filesystems too.
fn plan_destinations(proposed: impl Iterator<Item = Option<PathBuf>>) -> Vec<Option<PathBuf>> {
    let mut taken = HashSet::new();
    proposed
        .map(|dest| {
            let dest = dest?;
            if taken.insert(fold_case(&dest)) {
                return Some(dest);
            }
            let stem = dest
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let ext = dest
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            let renamed = (2..)
                .map(|n| dest.with_file_name(format!("{stem} ({n}){ext}")))
                .find(|candidate| taken.insert(fold_case(candidate)))?;
            tracing::warn!(
                wanted = %dest.display(),
                using = %renamed.display(),
                "deliverable name already taken in this batch"
            );
            Some(renamed)
        })
        .collect()
}

fn fold_case(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// The output root must be an existing, writable directory.
fn check_output_folder(root: &Path) -> wm_core::Result<()> {
    let invalid = |reason: String| Error::InvalidOutputFolder {
        path: root.to_path_buf(),
        reason,
    };
    let meta = std::fs::metadata(root).map_err(|e| invalid(format!("not accessible: {e}")))?;
    if !meta.is_dir() {
        return Err(invalid("not a directory".into()));
    }
    tempfile::Builder::new()
        .prefix(".wavemark-write-check")
        .tempfile_in(root)
        .map(drop)
        .map_err(|e| invalid(format!("not writable: {e}")))
}
