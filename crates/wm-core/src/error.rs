//! Unified error type for the wavemark pipeline.
//!
//! All crates funnel their failures into [`Error`]. Batch-level failures
//! (see [`Error::is_batch_fatal`]) abort a run before any pair starts; every
//! other variant is recovered at the pair boundary and reported in the
//! batch's error list.

use std::path::PathBuf;
use std::time::Duration;

/// Unified error type covering all failure modes in wavemark.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An input file has no usable audio stream.
    #[error("Invalid input track {path}: {reason}")]
    InvalidInputTrack {
        /// The offending input file.
        path: PathBuf,
        /// Why the track could not be used.
        reason: String,
    },

    /// The timeline for a pair could not be constructed.
    #[error("Composition build failure: {0}")]
    CompositionBuildFailure(String),

    /// Rendering the composed timeline failed.
    #[error("Export failure: {0}")]
    ExportFailure(String),

    /// An external transcoder exited unsuccessfully.
    #[error("Conversion failure [{tool}] (exit code {}): {message}", display_code(.exit_code))]
    ConversionFailure {
        /// Name of the tool that failed.
        tool: String,
        /// Process exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Captured diagnostic output.
        message: String,
    },

    /// An operation did not finish within its time budget.
    #[error("Timeout: {operation} did not finish within {after:?}")]
    Timeout {
        /// What was running.
        operation: String,
        /// The budget that elapsed.
        after: Duration,
    },

    /// A required external tool could not be located.
    #[error("Tool not found: {tool}")]
    ToolNotFound {
        /// Name of the missing tool.
        tool: String,
    },

    /// A batch was queued without any pairs.
    #[error("No work items queued")]
    NoWorkItems,

    /// The output root is missing or not a writable directory.
    #[error("Invalid output folder {path}: {reason}")]
    InvalidOutputFolder {
        /// The configured output root.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// A single pair failed; wraps the underlying error as text.
    #[error("{primary} + {watermark}: {detail}")]
    PairProcessingFailure {
        /// Display name of the primary track.
        primary: String,
        /// Display name of the watermark track.
        watermark: String,
        /// Human-readable failure description.
        detail: String,
    },

    /// Work was abandoned because the batch was cancelled.
    #[error("Cancelled")]
    Cancelled,

    /// Configuration or request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "none".to_string(),
    }
}

impl Error {
    /// Whether this error aborts a whole batch rather than a single pair.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Error::NoWorkItems
                | Error::ToolNotFound { .. }
                | Error::InvalidOutputFolder { .. }
                | Error::Validation(_)
        )
    }

    /// Convenience constructor for [`Error::InvalidInputTrack`].
    pub fn invalid_track(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidInputTrack {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Convenience constructor for [`Error::ConversionFailure`].
    pub fn conversion(
        tool: impl Into<String>,
        exit_code: Option<i32>,
        message: impl Into<String>,
    ) -> Self {
        Error::ConversionFailure {
            tool: tool.into(),
            exit_code,
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Timeout`].
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Convenience constructor for [`Error::ToolNotFound`].
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Error::ToolNotFound { tool: tool.into() }
    }

    /// Wrap a per-pair failure with the pair's display names.
    pub fn pair(
        primary: impl Into<String>,
        watermark: impl Into<String>,
        detail: impl std::fmt::Display,
    ) -> Self {
        Error::PairProcessingFailure {
            primary: primary.into(),
            watermark: watermark.into(),
            detail: detail.to_string(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
