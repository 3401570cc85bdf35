//! wavemark - batch audio watermarking
//!
//! This library crate exposes the CLI's input handling for integration
//! testing. The processing itself lives in the `wm-*` crates.

pub mod inputs;
