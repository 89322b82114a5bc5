//! External tool categories and capability probing.
//!
//! Every category is a narrow async trait. Concrete adapters wrap a command
//! line program located on `PATH`; a [`Toolbox`] holds the adapters that were
//! actually found, in the configured priority order. Tests build a `Toolbox`
//! by hand with fake adapters.

mod pandoc;
mod pdf;
mod raster;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use bindery_shared::{ExportConfig, ExportFormat};

pub use pandoc::{PandocConverter, PandocTypesetter};
pub use pdf::{CommandMerger, CommandTextExtractor, MergeTool, PdfInfo, TextTool};
pub use raster::{CommandRasterizer, RasterTool};

/// Keep at most this many bytes of a failing tool's stderr.
const STDERR_TAIL: usize = 2000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a single external tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{tool} is not installed")]
    NotFound { tool: String },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool}: {source}")]
    Io {
        tool: String,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One typesetting invocation.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: ExportFormat,
    /// Document title (EPUB metadata).
    pub title: String,
    pub toc: bool,
    pub toc_depth: u8,
    pub page_numbers: bool,
    /// Suppress headers, footers and page numbers on every page.
    pub empty_page_style: bool,
    /// Directory relative image paths resolve against.
    pub resource_dir: PathBuf,
    pub stylesheet: Option<PathBuf>,
}

/// Markdown → PDF or EPUB.
#[async_trait]
pub trait Typesetter: Send + Sync {
    fn name(&self) -> &str;
    async fn render(&self, request: &RenderRequest) -> Result<(), ToolError>;
}

/// Office document → Markdown.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    fn name(&self) -> &str;
    /// Convert `input`, extracting embedded media under `media_dir`.
    async fn to_markdown(&self, input: &Path, media_dir: &Path) -> Result<String, ToolError>;
}

/// Raw text out of a PDF, pages separated by form feeds.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;
    async fn extract_text(&self, pdf: &Path) -> Result<String, ToolError>;
}

/// Vector image → PNG.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    fn name(&self) -> &str;
    async fn rasterize(&self, svg: &Path, png: &Path) -> Result<(), ToolError>;
}

/// Concatenate PDFs in the given order.
#[async_trait]
pub trait PdfMerger: Send + Sync {
    fn name(&self) -> &str;
    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError>;
}

/// Number of pages in a PDF.
#[async_trait]
pub trait PageCounter: Send + Sync {
    fn name(&self) -> &str;
    async fn count_pages(&self, pdf: &Path) -> Result<u32, ToolError>;
}

// ---------------------------------------------------------------------------
// Toolbox
// ---------------------------------------------------------------------------

/// The external tools available to an export, in priority order.
#[derive(Clone, Default)]
pub struct Toolbox {
    pub pdf_engines: Vec<Arc<dyn Typesetter>>,
    pub epub_writer: Option<Arc<dyn Typesetter>>,
    pub converter: Option<Arc<dyn DocumentConverter>>,
    pub text_extractors: Vec<Arc<dyn TextExtractor>>,
    pub rasterizers: Vec<Arc<dyn Rasterizer>>,
    pub mergers: Vec<Arc<dyn PdfMerger>>,
    pub page_counter: Option<Arc<dyn PageCounter>>,
}

impl Toolbox {
    /// Locate every configured tool on `PATH`.
    pub fn probe(config: &ExportConfig) -> Self {
        let pandoc = locate(&config.pandoc);

        let pdf_engines = match &pandoc {
            Some(pandoc) => config
                .pdf_engines
                .iter()
                .filter(|engine| locate(engine).is_some())
                .map(|engine| {
                    Arc::new(PandocTypesetter::pdf(pandoc.clone(), engine.clone()))
                        as Arc<dyn Typesetter>
                })
                .collect(),
            None => Vec::new(),
        };

        let text_extractors = config
            .text_extractors
            .iter()
            .filter_map(|name| {
                let kind = known(TextTool::from_name(name), name)?;
                let program = locate(name)?;
                Some(Arc::new(CommandTextExtractor::new(kind, program)) as Arc<dyn TextExtractor>)
            })
            .collect();

        let rasterizers = config
            .rasterizers
            .iter()
            .filter_map(|name| {
                let kind = known(RasterTool::from_name(name), name)?;
                let program = locate(name)?;
                Some(Arc::new(CommandRasterizer::new(kind, program)) as Arc<dyn Rasterizer>)
            })
            .collect();

        let mergers = config
            .merge_tools
            .iter()
            .filter_map(|name| {
                let kind = known(MergeTool::from_name(name), name)?;
                let program = locate(name)?;
                Some(Arc::new(CommandMerger::new(kind, program)) as Arc<dyn PdfMerger>)
            })
            .collect();

        let toolbox = Self {
            pdf_engines,
            epub_writer: pandoc
                .clone()
                .map(|p| Arc::new(PandocTypesetter::epub(p)) as Arc<dyn Typesetter>),
            converter: pandoc.map(|p| Arc::new(PandocConverter::new(p)) as Arc<dyn DocumentConverter>),
            text_extractors,
            rasterizers,
            mergers,
            page_counter: locate("pdfinfo").map(|p| Arc::new(PdfInfo::new(p)) as Arc<dyn PageCounter>),
        };

        debug!(
            pdf_engines = toolbox.pdf_engines.len(),
            mergers = toolbox.mergers.len(),
            text_extractors = toolbox.text_extractors.len(),
            rasterizers = toolbox.rasterizers.len(),
            "tool probe complete"
        );
        toolbox
    }

    /// Tool names per category, for display.
    pub fn inventory(&self) -> Vec<(&'static str, Vec<String>)> {
        vec![
            ("pdf engines", self.pdf_engines.iter().map(|t| t.name().to_string()).collect()),
            (
                "epub writer",
                self.epub_writer.iter().map(|t| t.name().to_string()).collect(),
            ),
            (
                "document converter",
                self.converter.iter().map(|t| t.name().to_string()).collect(),
            ),
            ("pdf text extractors", self.text_extractors.iter().map(|t| t.name().to_string()).collect()),
            ("rasterizers", self.rasterizers.iter().map(|t| t.name().to_string()).collect()),
            ("pdf merge tools", self.mergers.iter().map(|t| t.name().to_string()).collect()),
            (
                "page counter",
                self.page_counter.iter().map(|t| t.name().to_string()).collect(),
            ),
        ]
    }
}

fn locate(program: &str) -> Option<PathBuf> {
    let found = which::which(program).ok();
    debug!(program, found = found.is_some(), "probe");
    found
}

fn known<K>(kind: Option<K>, name: &str) -> Option<K> {
    if kind.is_none() {
        warn!(tool = name, "unknown tool name in config, skipping");
    }
    kind
}

// ---------------------------------------------------------------------------
// Process helper
// ---------------------------------------------------------------------------

/// Run `program` to completion and return its stdout.
pub(crate) async fn run_tool(
    tool: &str,
    program: &Path,
    args: &[OsString],
) -> Result<Vec<u8>, ToolError> {
    debug!(tool, program = %program.display(), ?args, "running external tool");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ToolError::NotFound { tool: tool.into() },
            _ => ToolError::Io {
                tool: tool.into(),
                source: e,
            },
        })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            tool: tool.into(),
            status: output.status.to_string(),
            stderr: stderr_tail(&output.stderr),
        });
    }
    Ok(output.stdout)
}

/// The end of a tool's stderr, where LaTeX and friends put the actual error.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("…{}", &text[start..])
}
