//! wm-core: shared types, errors, configuration, and output naming.
//!
//! This crate is the foundational dependency for all other wm-* crates,
//! providing the batch data model (pairs, watermark settings, batch
//! results), a unified error type, application configuration, and the
//! file-naming template used for deliverables.

pub mod config;
pub mod error;
pub mod naming;
pub mod settings;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use naming::{NamingTemplate, SeparatorStyle};
pub use settings::*;
