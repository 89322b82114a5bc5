//! Export pipeline: snapshot → normalize → sequence → render → merge.
//!
//! `start_export` registers a job and returns at once; the work runs on a
//! background task. Items are normalized one at a time, in position order.
//! A failing item is recorded and skipped; only infrastructure failures (no
//! engine, no merge tool) abort the job. Each job owns a temporary directory
//! that is removed when the task ends, whatever the outcome.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use bindery_shared::{
    BinderyError, ExportConfig, ExportFormat, ExportOptions, FailedItem, Item, ItemError,
    ItemType, JobId, JobProgress, ProjectSnapshot, Result,
};

use crate::attribution::{AttributionCollector, SECTION_TITLE};
use crate::merger::merge_components;
use crate::normalizer::{Fragment, NormalizedItem, Normalizer};
use crate::progress::{JobStore, MemoryJobStore};
use crate::renderer::{Renderer, write_markdown};
use crate::sequencer::Sequencer;
use crate::svg::SvgResolver;
use crate::tools::Toolbox;

/// Steps outside the per-item loop: preparing, rendering, finishing.
const FIXED_STEPS: u32 = 3;

/// Submits export jobs and answers progress queries.
#[derive(Clone)]
pub struct Exporter {
    config: Arc<ExportConfig>,
    toolbox: Toolbox,
    store: Arc<dyn JobStore>,
}

impl Exporter {
    pub fn new(config: ExportConfig, toolbox: Toolbox, store: Arc<dyn JobStore>) -> Self {
        Self {
            config: Arc::new(config),
            toolbox,
            store,
        }
    }

    /// Exporter with a process-local job store.
    pub fn in_memory(config: ExportConfig, toolbox: Toolbox) -> Self {
        let store = MemoryJobStore::new(Duration::from_secs(config.retain_secs));
        Self::new(config, toolbox, Arc::new(store))
    }

    /// Submit an export. Returns as soon as the job is registered.
    #[instrument(skip_all, fields(project = %project.name, %format))]
    pub async fn start_export(
        &self,
        project: ProjectSnapshot,
        format: ExportFormat,
        options: ExportOptions,
    ) -> Result<JobId> {
        let id = JobId::new();
        let items = project.ordered_items();
        let total = total_steps(format, &items);

        self.store
            .create(&id, &project.name, format, JobProgress::queued(total))
            .await?;

        let job = Job {
            id,
            project,
            items,
            format,
            options,
            config: Arc::clone(&self.config),
            toolbox: self.toolbox.clone(),
            store: Arc::clone(&self.store),
        };
        tokio::spawn(job.run());

        info!(job_id = %id, total, "export submitted");
        Ok(id)
    }

    pub async fn get_progress(&self, id: &JobId) -> Result<Option<JobProgress>> {
        self.store.get(id).await
    }

    pub async fn subscribe(&self, id: &JobId) -> Option<watch::Receiver<JobProgress>> {
        self.store.subscribe(id).await
    }

    /// Wait until the job is done and return its final state.
    pub async fn wait(&self, id: &JobId) -> Result<JobProgress> {
        if let Some(mut rx) = self.store.subscribe(id).await {
            if let Ok(state) = rx.wait_for(|p| p.done).await {
                return Ok(state.clone());
            }
        }
        self.store
            .get(id)
            .await?
            .ok_or_else(|| BinderyError::validation(format!("unknown job {id}")))
    }
}

/// `total` for a job: fixed overhead, one per item, one more when a PDF
/// export may need a merge.
pub fn total_steps(format: ExportFormat, items: &[Item]) -> u32 {
    let merge = format == ExportFormat::Pdf
        && items
            .iter()
            .any(|i| matches!(i.item_type, ItemType::Pdf | ItemType::Titlepage));
    FIXED_STEPS + items.len() as u32 + u32::from(merge)
}

/// `<sanitized name>_<YYYYMMDD_HHMMSS>.<ext>`
pub fn output_file_name(project_name: &str, format: ExportFormat, now: DateTime<Local>) -> String {
    let mut name = String::with_capacity(project_name.len());
    for c in project_name.trim().chars() {
        if c.is_alphanumeric() || c == '-' {
            name.push(c);
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }
    let name = name.trim_matches('_');
    let name = if name.is_empty() { "export" } else { name };
    format!(
        "{name}_{}.{}",
        now.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Publishes one job's state after every change.
struct Reporter {
    store: Arc<dyn JobStore>,
    id: JobId,
    state: JobProgress,
}

impl Reporter {
    fn new(store: Arc<dyn JobStore>, id: JobId, total: u32) -> Self {
        Self {
            store,
            id,
            state: JobProgress::queued(total),
        }
    }

    async fn advance(&mut self, message: impl Into<String>) {
        self.state.step = (self.state.step + 1).min(self.state.total);
        self.state.message = message.into();
        self.publish().await;
    }

    async fn fail_item(&mut self, item: &Item, err: &ItemError) {
        warn!(item_id = %item.id, kind = ?err.kind(), error = %err, "item skipped");
        self.state.failed_items.push(FailedItem {
            item_id: item.id.clone(),
            title: item.display_title().to_string(),
            kind: err.kind(),
            reason: err.to_string(),
        });
        self.publish().await;
    }

    async fn finish(mut self, output: PathBuf) {
        self.state.step = self.state.total;
        self.state.done = true;
        self.state.message = "Export complete".into();
        self.state.output_path = Some(output);
        self.publish().await;
    }

    async fn fail(mut self, err: &BinderyError) {
        self.state.done = true;
        self.state.message = "Export failed".into();
        self.state.error = Some(err.to_string());
        self.publish().await;
    }

    async fn publish(&self) {
        if let Err(e) = self.store.set(&self.id, self.state.clone()).await {
            warn!(job_id = %self.id, error = %e, "failed to publish progress");
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

struct Job {
    id: JobId,
    project: ProjectSnapshot,
    items: Vec<Item>,
    format: ExportFormat,
    options: ExportOptions,
    config: Arc<ExportConfig>,
    toolbox: Toolbox,
    store: Arc<dyn JobStore>,
}

impl Job {
    #[instrument(skip_all, fields(job_id = %self.id, format = %self.format))]
    async fn run(self) {
        let total = total_steps(self.format, &self.items);
        let mut reporter = Reporter::new(Arc::clone(&self.store), self.id, total);

        match self.execute(&mut reporter).await {
            Ok(output) => {
                info!(
                    output = %output.display(),
                    failed = reporter.state.failed_items.len(),
                    "export finished"
                );
                reporter.finish(output).await;
            }
            Err(e) => {
                error!(error = %e, "export failed");
                reporter.fail(&e).await;
            }
        }
    }

    async fn execute(&self, reporter: &mut Reporter) -> Result<PathBuf> {
        reporter.advance("Preparing workspace").await;
        let work = self.work_dir()?;
        let work_path = work.path();
        let normalizer = Normalizer::new(&self.config, self.toolbox.clone(), self.format, work_path)?;
        let svg = (self.format == ExportFormat::Pdf).then(|| {
            SvgResolver::new(normalizer.fetch_client(), &self.toolbox.rasterizers, work_path)
        });

        let mut sequencer = Sequencer::new(self.format);
        let mut attributions = AttributionCollector::new();
        let count = self.items.len();

        for (i, item) in self.items.iter().enumerate() {
            reporter
                .advance(format!("Processing item {}/{}: {}", i + 1, count, item.display_title()))
                .await;

            let mut normalized = match normalizer.normalize(item).await {
                Ok(normalized) => normalized,
                Err(e) => {
                    reporter.fail_item(item, &e).await;
                    continue;
                }
            };
            if let Some(entry) = normalized.attribution.take() {
                attributions.record(entry);
            }
            if let (Some(svg), Fragment::Markdown(markdown)) = (&svg, &mut normalized.fragment) {
                *markdown = svg.resolve(markdown).await;
            }
            sequencer.push(normalized);
        }

        if let Some(section) = attributions.render(&self.project) {
            sequencer.push(NormalizedItem {
                item_id: "attribution".into(),
                title: SECTION_TITLE.into(),
                heading_like: false,
                fragment: Fragment::Markdown(section),
                attribution: None,
            });
        }
        let elements = sequencer.finish();

        let output_dir = &self.config.output_dir;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| BinderyError::io(output_dir, e))?;
        let output = output_dir.join(output_file_name(&self.project.name, self.format, Local::now()));

        reporter.advance(format!("Rendering {}", self.format)).await;
        let renderer = Renderer::new(
            &self.toolbox,
            work_path,
            &self.project.name,
            self.options,
            self.config.toc_depth,
        );
        match self.format {
            ExportFormat::Markdown => write_markdown(&elements, &output).await?,
            ExportFormat::Epub => renderer.render_epub(&elements, &output).await?,
            ExportFormat::Pdf => {
                let components = renderer.render_pdf(&elements).await?;
                if components.len() > 1 {
                    reporter
                        .advance(format!("Merging {} components", components.len()))
                        .await;
                }
                merge_components(&self.toolbox.mergers, &self.config.merge_tools, &components, &output)
                    .await?;
            }
        }

        Ok(output)
    }

    fn work_dir(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("bindery-job-");
        match &self.config.work_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| BinderyError::io(root, e))?;
                builder.tempdir_in(root).map_err(|e| BinderyError::io(root, e))
            }
            None => builder
                .tempdir()
                .map_err(|e| BinderyError::io(std::env::temp_dir(), e)),
        }
    }
}
