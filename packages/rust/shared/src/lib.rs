//! Shared types, error model, and configuration for Bindery.
//!
//! This crate is the foundation depended on by all other Bindery crates.
//! It provides:
//! - [`BinderyError`]: the job-level error type, and [`ItemError`] for
//!   failures scoped to a single item
//! - Domain types ([`Item`], [`ProjectSnapshot`], [`JobProgress`],
//!   [`AttributionEntry`], [`JobId`])
//! - Configuration ([`AppConfig`], [`ExportConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, ExportConfig, FetchConfig, ImagesConfig, JobsConfig,
    RenderConfig, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from,
};
pub use error::{BinderyError, ItemError, Result};
pub use types::{
    AttributionEntry, AttributionKind, CachedContent, ExportFormat, ExportOptions, FailedItem,
    FailureKind, Item, ItemOptions, ItemType, JobId, JobProgress, ProjectSnapshot,
};
