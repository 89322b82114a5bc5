//! Bindery CLI: compile research projects into PDF, EPUB or Markdown.
//!
//! Reads a project snapshot (JSON), runs the export pipeline, and follows
//! the job's progress until the artifact is written.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
