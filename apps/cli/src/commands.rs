//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use bindery_core::{Exporter, JobStore, MemoryJobStore, PersistentJobStore, Toolbox};
use bindery_shared::{
    AppConfig, ExportConfig, ExportFormat, ExportOptions, JobProgress, ProjectSnapshot,
    expand_home, init_config, load_config,
};
use bindery_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Bindery: compile research projects into a single document.
#[derive(Parser)]
#[command(
    name = "bindery",
    version,
    about = "Compile a project of web pages, articles, images and documents into PDF, EPUB or Markdown.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Export a project snapshot.
    Export {
        /// Project snapshot (JSON).
        project: PathBuf,

        /// Output format: pdf, epub or markdown.
        #[arg(short, long, default_value = "pdf")]
        format: ExportFormat,

        /// Include a table of contents.
        #[arg(long)]
        toc: bool,

        /// Number pages (PDF only).
        #[arg(long)]
        page_numbers: bool,

        /// Output directory (overrides config).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Upload storage searched for moved local files (overrides config).
        #[arg(long)]
        storage_dir: Option<PathBuf>,

        /// Record the job in this database (overrides config).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// List recorded export jobs.
    Jobs {
        /// Job database (defaults to `jobs.database` from config).
        #[arg(long)]
        db: Option<PathBuf>,

        /// Maximum number of jobs to show.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show which external tools were found on PATH.
    Tools,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "bindery=warn",
        1 => "bindery=info",
        2 => "bindery=debug",
        _ => "bindery=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Export {
            project,
            format,
            toc,
            page_numbers,
            out,
            storage_dir,
            db,
        } => {
            let options = ExportOptions {
                include_toc: toc,
                show_page_numbers: page_numbers,
            };
            cmd_export(&project, format, options, out, storage_dir, db).await
        }
        Command::Jobs { db, limit } => cmd_jobs(db, limit).await,
        Command::Tools => cmd_tools().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// export
// ---------------------------------------------------------------------------

async fn cmd_export(
    project_path: &Path,
    format: ExportFormat,
    options: ExportOptions,
    out: Option<PathBuf>,
    storage_dir: Option<PathBuf>,
    db: Option<PathBuf>,
) -> Result<()> {
    let app = load_config()?;
    let mut config = ExportConfig::from(&app);
    if let Some(out) = out {
        config.output_dir = out;
    }
    if let Some(dir) = storage_dir {
        config.storage_dir = dir;
    }

    let raw = std::fs::read_to_string(project_path)
        .map_err(|e| eyre!("cannot read project '{}': {e}", project_path.display()))?;
    let project: ProjectSnapshot = serde_json::from_str(&raw)
        .map_err(|e| eyre!("invalid project '{}': {e}", project_path.display()))?;

    let retain = Duration::from_secs(config.retain_secs);
    let store: Arc<dyn JobStore> = match job_database(&app, db) {
        Some(path) => {
            let storage = Storage::open(&path).await?;
            let store = PersistentJobStore::new(Arc::new(storage), retain);
            store.prune_history(app.jobs.history_days).await?;
            Arc::new(store)
        }
        None => Arc::new(MemoryJobStore::new(retain)),
    };

    let toolbox = Toolbox::probe(&config);
    info!(
        project = %project.name,
        items = project.items.len(),
        %format,
        "starting export"
    );

    let exporter = Exporter::new(config, toolbox, store);
    let id = exporter.start_export(project, format, options).await?;

    let spinner = spinner()?;
    if let Some(mut rx) = exporter.subscribe(&id).await {
        loop {
            let state = rx.borrow_and_update().clone();
            spinner.set_message(format!("[{}/{}] {}", state.step, state.total, state.message));
            if state.done || rx.changed().await.is_err() {
                break;
            }
        }
    }
    let done = exporter.wait(&id).await?;
    spinner.finish_and_clear();

    print_summary(&done);
    match done.error {
        Some(error) => Err(eyre!("export failed: {error}")),
        None => Ok(()),
    }
}

/// Database named on the command line, else in config, else none.
fn job_database(app: &AppConfig, flag: Option<PathBuf>) -> Option<PathBuf> {
    flag.or_else(|| {
        let configured = app.jobs.database.trim();
        (!configured.is_empty()).then(|| expand_home(configured))
    })
}

fn spinner() -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));
    Ok(spinner)
}

fn print_summary(done: &JobProgress) {
    println!();
    if let Some(path) = &done.output_path {
        println!("  Export written to {}", path.display());
    }
    if !done.failed_items.is_empty() {
        println!("  {} item(s) skipped:", done.failed_items.len());
        for failed in &done.failed_items {
            println!("    - {} [{:?}]: {}", failed.title, failed.kind, failed.reason);
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// jobs / tools / config
// ---------------------------------------------------------------------------

async fn cmd_jobs(db: Option<PathBuf>, limit: usize) -> Result<()> {
    let app = load_config()?;
    let path = job_database(&app, db).ok_or_else(|| {
        eyre!("no job database configured: pass --db or set jobs.database in the config file")
    })?;

    let storage = Storage::open_readonly(&path).await?;
    let jobs = storage.list_jobs(limit).await?;
    if jobs.is_empty() {
        println!("No export jobs recorded in {}", path.display());
        return Ok(());
    }

    println!("{:<38} {:<9} {:<10} {:<20} PROJECT", "ID", "FORMAT", "STATUS", "CREATED");
    for job in jobs {
        let status = match (&job.progress.error, job.progress.done) {
            (Some(_), _) => "failed".to_string(),
            (None, true) => "done".to_string(),
            (None, false) => format!("{}/{}", job.progress.step, job.progress.total),
        };
        println!(
            "{:<38} {:<9} {:<10} {:<20} {}",
            job.id.to_string(),
            job.format.to_string(),
            status,
            job.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            job.project_name
        );
    }
    Ok(())
}

async fn cmd_tools() -> Result<()> {
    let app = load_config()?;
    let toolbox = Toolbox::probe(&ExportConfig::from(&app));
    for (category, found) in toolbox.inventory() {
        let found = if found.is_empty() {
            "(none found)".to_string()
        } else {
            found.join(", ")
        };
        println!("  {category:<18} {found}");
    }
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
