//! Core types for the minlog compaction engine.
//!
//! This crate provides the foundations shared by every log structure:
//! - The command and state model ([`Command`], [`State`], [`MinStateTable`])
//! - Log configuration with validation ([`config::LogConfig`])
//! - The serialization codec: per-command wire form plus the compacted and
//!   traditional log dialects ([`codec`])
//! - Error types using snafu ([`MinlogError`])

pub mod codec;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types at crate root
pub use config::{LogConfig, ReduceInterval, Reducer};
pub use error::{MinlogError, Result};
pub use types::{Command, MinStateTable, Op, State};
