//! Per-batch context handed to pair processors, and the caller's callbacks.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use wm_av::TempRegistry;
use wm_core::WatermarkSettings;

type ProgressFn = dyn Fn(usize, usize) + Send + Sync;
type CurrentPairFn = dyn Fn(&str, &str) + Send + Sync;
type CompleteFn = dyn Fn(usize, &[String]) + Send + Sync;

/// Callbacks a caller registers to follow a batch.
///
/// - `on_progress(completed, total)` after each pair finishes.
/// - `on_current_pair(primary, watermark)` when a pair begins.
/// - `on_complete(success_count, errors)` once, when the batch is over.
///
/// Callbacks run on scheduler tasks and must not call back into the
/// scheduler.
pub struct BatchEvents {
    on_progress: Box<ProgressFn>,
    on_current_pair: Box<CurrentPairFn>,
    on_complete: Box<CompleteFn>,
}

impl BatchEvents {
    /// Events that discard every notification.
    pub fn noop() -> Self {
        Self {
            on_progress: Box::new(|_, _| {}),
            on_current_pair: Box::new(|_, _| {}),
            on_complete: Box::new(|_, _| {}),
        }
    }

    pub fn on_progress(mut self, f: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.on_progress = Box::new(f);
        self
    }

    pub fn on_current_pair(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_current_pair = Box::new(f);
        self
    }

    pub fn on_complete(mut self, f: impl Fn(usize, &[String]) + Send + Sync + 'static) -> Self {
        self.on_complete = Box::new(f);
        self
    }

    pub(crate) fn progress(&self, completed: usize, total: usize) {
        (self.on_progress)(completed, total);
    }

    pub(crate) fn current_pair(&self, primary: &str, watermark: &str) {
        (self.on_current_pair)(primary, watermark);
    }

    pub(crate) fn complete(&self, success_count: usize, errors: &[String]) {
        (self.on_complete)(success_count, errors);
    }
}

impl Default for BatchEvents {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for BatchEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEvents").finish_non_exhaustive()
    }
}

/// What a processor needs to know about the batch a pair belongs to.
#[derive(Debug, Clone)]
pub struct PairContext {
    /// Position of the pair in the queued batch.
    pub index: usize,
    /// Settings snapshot taken when the batch was queued.
    pub settings: Arc<WatermarkSettings>,
    pub output_root: PathBuf,
    /// Deliverable path reserved for this pair, distinct from every other
    /// pair's in the batch. `None` when the processor names its own output.
    pub destination: Option<PathBuf>,
    /// Batch cancellation; processors may use it to abandon optional work.
    pub cancellation: CancellationToken,
    /// Temp paths to purge once the batch drains. Anything a pair leaves
    /// behind after it returns belongs here.
    pub temps: TempRegistry,
}
