//! Core types, configuration, and error handling for blamescope.
//!
//! This crate provides the shared foundation used by all other blamescope crates:
//! - [`BlamescopeError`]: unified error type using `thiserror`
//! - [`BlamescopeConfig`]: configuration loaded from `.blamescope.toml`
//! - Shared types: [`ChangeSet`], [`LineRange`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{
    AttributionConfig, BlamescopeConfig, CorrelateConfig, HistoryConfig, HistoryOrder,
    MergeParents,
};
pub use error::BlamescopeError;
pub use types::{normalize_path, ChangeSet, LineRange, OutputFormat};

/// A convenience `Result` type for blamescope operations.
pub type Result<T> = std::result::Result<T, BlamescopeError>;
