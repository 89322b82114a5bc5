//! Document assembly and export pipeline for Bindery.
//!
//! This crate turns a project snapshot into a single PDF, EPUB or Markdown
//! artifact: per-item normalization, sequencing with the page-break policy,
//! rendering through external typesetters with fallback, final merge, and
//! asynchronous progress reporting (see [`Exporter`]).

pub mod attribution;
pub mod images;
pub mod merger;
pub mod normalizer;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod renderer;
pub mod sequencer;
pub mod svg;
pub mod tools;

pub use attribution::AttributionCollector;
pub use pipeline::{Exporter, output_file_name, total_steps};
pub use progress::{JobStore, MemoryJobStore, PersistentJobStore};
pub use tools::Toolbox;
