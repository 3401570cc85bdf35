//! # wm-av
//!
//! Audio I/O, external tool management, and input normalization for the
//! wavemark pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find ffmpeg and ffprobe in a
//!   configured location, a fixed list of install prefixes, or `PATH`.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for running external processes.
//! - **Native audio** ([`audio`]) -- probe, decode, peak extraction and
//!   lossless WAV writing without external tools.
//! - **Workspace management** ([`Workspace`], [`TempRegistry`]) -- per-pair
//!   scratch directories with safe finalization and batch-wide cleanup.
//! - **Conversion cache** ([`ConversionCache`]) -- bounded, idle-evicting
//!   memo of conversion decisions and results.
//! - **Format normalization** ([`FormatNormalizer`]) -- convert inputs the
//!   renderer cannot read into a working format, at most once per source.

pub mod audio;
pub mod cache;
pub mod command;
pub mod normalize;
pub mod tools;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use audio::{AudioBuffer, AudioInfo};
pub use cache::ConversionCache;
pub use command::{ToolCommand, ToolOutput};
pub use normalize::{ConversionEntry, ConversionStrategy, FormatNormalizer, StrategyKind};
pub use tools::{ResolvedTool, ToolInfo, ToolRegistry, ToolSource};
pub use workspace::{TempRegistry, Workspace};
