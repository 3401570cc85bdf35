//! # wm-pipeline
//!
//! Batch execution for wavemark.
//!
//! - [`JobScheduler`] -- queues pairs and runs them under bounded
//!   concurrency with progress callbacks and cooperative cancellation.
//! - [`PairProcessor`] / [`WatermarkPipeline`] -- the per-pair pipeline:
//!   normalize inputs, build the composition, render, transcode, deliver.
//! - [`Exporter`] / [`Transcoder`] -- native render to a lossless
//!   intermediate and external transcode to the delivery codec.

pub mod context;
pub mod export;
pub mod mix;
pub mod pipeline;
pub mod scheduler;

pub use context::{BatchEvents, PairContext};
pub use export::{Exporter, FfmpegTranscoder, Transcoder};
pub use pipeline::{PairProcessor, WatermarkPipeline};
pub use scheduler::JobScheduler;
