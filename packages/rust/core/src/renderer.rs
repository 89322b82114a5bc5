//! Rendering of the assembly sequence to the target format.
//!
//! - Markdown: fragments joined by blank lines, no external engine.
//! - EPUB: one pandoc invocation over the whole stream.
//! - PDF: every element becomes one component PDF. Batches go through the
//!   engine chain; only the first batch carries the table of contents. Title
//!   pages are typeset alone with an empty page style. Native PDFs pass
//!   through untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use bindery_markdown::directives;
use bindery_shared::{BinderyError, ExportFormat, ExportOptions, Result};

use crate::sequencer::{Element, SequencedFragment};
use crate::tools::{RenderRequest, Toolbox, Typesetter};

/// Words per page for the page estimate when no page counter is available.
pub const WORDS_PER_PAGE: usize = 450;

// ---------------------------------------------------------------------------
// Markdown assembly
// ---------------------------------------------------------------------------

/// Join fragments with blank lines, inserting the format's page breaks.
///
/// A break requested by the first fragment of a batch is dropped: every PDF
/// batch starts on a fresh page anyway.
pub fn batch_markdown(fragments: &[SequencedFragment], format: ExportFormat) -> String {
    let page_break = directives::page_break(format);
    let mut parts: Vec<&str> = Vec::with_capacity(fragments.len() * 2);
    for (i, fragment) in fragments.iter().enumerate() {
        if i > 0 && fragment.page_break_before && !page_break.is_empty() {
            parts.push(page_break);
        }
        parts.push(&fragment.markdown);
    }
    parts.join("\n\n")
}

fn all_fragments(elements: &[Element]) -> Vec<SequencedFragment> {
    elements
        .iter()
        .filter_map(|e| match e {
            Element::Batch(frags) => Some(frags.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

/// Write the Markdown export.
pub async fn write_markdown(elements: &[Element], output: &Path) -> Result<()> {
    let mut markdown = batch_markdown(&all_fragments(elements), ExportFormat::Markdown);
    markdown.push('\n');
    tokio::fs::write(output, markdown)
        .await
        .map_err(|e| BinderyError::io(output, e))
}

// ---------------------------------------------------------------------------
// Engine chain
// ---------------------------------------------------------------------------

/// Try each engine in order until one produces the output file.
pub async fn typeset_with_fallback(
    engines: &[Arc<dyn Typesetter>],
    request: &RenderRequest,
) -> Result<String> {
    if engines.is_empty() {
        return Err(BinderyError::EngineUnavailable(format!(
            "none found on PATH for {} output",
            request.format
        )));
    }

    let mut last_error = String::new();
    for engine in engines {
        match engine.render(request).await {
            Ok(()) if request.output.is_file() => {
                debug!(engine = engine.name(), output = %request.output.display(), "rendered");
                return Ok(engine.name().to_string());
            }
            Ok(()) => {
                warn!(engine = engine.name(), "engine reported success but wrote nothing");
                last_error = format!("{} produced no output", engine.name());
            }
            Err(e) => {
                warn!(engine = engine.name(), error = %e, "engine failed, trying next");
                last_error = e.to_string();
            }
        }
    }

    Err(BinderyError::RenderFailure {
        attempts: engines.len(),
        last_error,
    })
}

// ---------------------------------------------------------------------------
// Page estimate
// ---------------------------------------------------------------------------

/// An emitted item and the page it is estimated to start on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    pub title: String,
    pub page: u32,
    /// Index of the element holding the item.
    pub element: usize,
}

fn pages_for(words: usize) -> u32 {
    words.div_ceil(WORDS_PER_PAGE).max(1) as u32
}

fn word_count(markdown: &str) -> usize {
    markdown.split_whitespace().count()
}

/// Start page of each fragment relative to `first_page`, and the page after the batch.
fn lay_out_batch(fragments: &[SequencedFragment], first_page: u32) -> (Vec<u32>, u32) {
    let mut starts = Vec::with_capacity(fragments.len());
    let mut page = first_page;
    let mut words = 0usize;
    for (i, fragment) in fragments.iter().enumerate() {
        if i > 0 && fragment.page_break_before {
            page += pages_for(words);
            words = 0;
        }
        starts.push(page + (words / WORDS_PER_PAGE) as u32);
        words += word_count(&fragment.markdown);
    }
    (starts, page + pages_for(words))
}

/// Estimated page count of one batch.
pub fn estimate_batch_pages(fragments: &[SequencedFragment]) -> u32 {
    let (_, next) = lay_out_batch(fragments, 1);
    next - 1
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders one job's elements inside its work directory.
pub struct Renderer<'a> {
    toolbox: &'a Toolbox,
    work_dir: &'a Path,
    title: &'a str,
    options: ExportOptions,
    toc_depth: u8,
}

impl<'a> Renderer<'a> {
    pub fn new(
        toolbox: &'a Toolbox,
        work_dir: &'a Path,
        title: &'a str,
        options: ExportOptions,
        toc_depth: u8,
    ) -> Self {
        Self {
            toolbox,
            work_dir,
            title,
            options,
            toc_depth,
        }
    }

    /// Render the EPUB export in a single invocation.
    #[instrument(skip_all, fields(output = %output.display()))]
    pub async fn render_epub(&self, elements: &[Element], output: &Path) -> Result<()> {
        let writer = self.toolbox.epub_writer.as_ref().ok_or_else(|| {
            BinderyError::EngineUnavailable("pandoc is required for EPUB output".into())
        })?;

        let input = self.work_dir.join("document.md");
        let markdown = batch_markdown(&all_fragments(elements), ExportFormat::Epub);
        write_file(&input, &markdown).await?;
        let stylesheet = self.work_dir.join("epub.css");
        write_file(&stylesheet, &directives::epub_stylesheet()).await?;

        let request = RenderRequest {
            input,
            output: output.to_path_buf(),
            format: ExportFormat::Epub,
            title: self.title.to_string(),
            toc: self.options.include_toc,
            toc_depth: self.toc_depth,
            page_numbers: false,
            empty_page_style: false,
            resource_dir: self.work_dir.to_path_buf(),
            stylesheet: Some(stylesheet),
        };
        typeset_with_fallback(std::slice::from_ref(writer), &request).await?;
        Ok(())
    }

    /// Render every element to a component PDF, in sequence order.
    #[instrument(skip_all, fields(elements = elements.len()))]
    pub async fn render_pdf(&self, elements: &[Element]) -> Result<Vec<PathBuf>> {
        let first_batch = elements.iter().position(|e| matches!(e, Element::Batch(_)));
        let annotations = match (self.options.include_toc, first_batch) {
            (true, Some(first)) => {
                let outline = self.outline(elements).await;
                toc_annotations(&outline, first)
            }
            _ => None,
        };

        let mut components = Vec::with_capacity(elements.len());
        let mut pages_before = 0u32;

        for (idx, element) in elements.iter().enumerate() {
            match element {
                Element::TitlePage { markdown, .. } => {
                    let pdf = self.typeset(idx, markdown, false, true).await?;
                    pages_before += self.page_count(&pdf, 1).await;
                    components.push(pdf);
                }
                Element::Batch(fragments) => {
                    let is_first = Some(idx) == first_batch;
                    let mut markdown = String::new();
                    if self.options.show_page_numbers && pages_before > 0 {
                        markdown.push_str(&format!("\\setcounter{{page}}{{{}}}\n\n", pages_before + 1));
                    }
                    if let (true, Some(notes)) = (is_first, &annotations) {
                        markdown.push_str(notes);
                        markdown.push_str("\n\n");
                    }
                    markdown.push_str(&batch_markdown(fragments, ExportFormat::Pdf));

                    let toc = is_first && self.options.include_toc;
                    let pdf = self.typeset(idx, &markdown, toc, false).await?;
                    pages_before += self.page_count(&pdf, estimate_batch_pages(fragments)).await;
                    components.push(pdf);
                }
                Element::Native { path, .. } => {
                    pages_before += self.page_count(path, 1).await;
                    components.push(path.clone());
                }
            }
        }

        info!(components = components.len(), pages = pages_before, "pdf components rendered");
        Ok(components)
    }

    /// Estimated start page of every emitted item.
    pub async fn outline(&self, elements: &[Element]) -> Vec<OutlineEntry> {
        let mut entries = Vec::new();
        let mut page = 1u32;

        for (idx, element) in elements.iter().enumerate() {
            match element {
                Element::TitlePage { .. } => page += 1,
                Element::Native { title, path, .. } => {
                    entries.push(OutlineEntry {
                        title: title.clone(),
                        page,
                        element: idx,
                    });
                    page += self.page_count(path, 1).await;
                }
                Element::Batch(fragments) => {
                    let (starts, next) = lay_out_batch(fragments, page);
                    entries.extend(fragments.iter().zip(starts).map(|(f, start)| OutlineEntry {
                        title: f.title.clone(),
                        page: start,
                        element: idx,
                    }));
                    page = next;
                }
            }
        }
        entries
    }

    async fn page_count(&self, pdf: &Path, estimate: u32) -> u32 {
        let Some(counter) = &self.toolbox.page_counter else {
            return estimate;
        };
        match counter.count_pages(pdf).await {
            Ok(pages) => pages,
            Err(e) => {
                debug!(error = %e, "page count unavailable, using estimate");
                estimate
            }
        }
    }

    async fn typeset(
        &self,
        idx: usize,
        markdown: &str,
        toc: bool,
        empty_page_style: bool,
    ) -> Result<PathBuf> {
        let input = self.work_dir.join(format!("component-{idx:03}.md"));
        let output = self.work_dir.join(format!("component-{idx:03}.pdf"));
        write_file(&input, markdown).await?;

        let request = RenderRequest {
            input,
            output: output.clone(),
            format: ExportFormat::Pdf,
            title: self.title.to_string(),
            toc,
            toc_depth: self.toc_depth,
            page_numbers: self.options.show_page_numbers,
            empty_page_style,
            resource_dir: self.work_dir.to_path_buf(),
            stylesheet: None,
        };
        let engine = typeset_with_fallback(&self.toolbox.pdf_engines, &request).await?;
        debug!(component = idx, %engine, "component typeset");
        Ok(output)
    }
}

/// List of items outside the first batch with their estimated pages.
///
/// The table of contents generated for the first batch cannot see later
/// components, so they are listed after it.
fn toc_annotations(outline: &[OutlineEntry], first_batch: usize) -> Option<String> {
    let later: Vec<String> = outline
        .iter()
        .filter(|e| e.element > first_batch)
        .map(|e| format!("- {}, p. {}", e.title, e.page))
        .collect();
    if later.is_empty() {
        return None;
    }
    Some(format!("**Further contents**\n\n{}", later.join("\n")))
}

async fn write_file(path: &Path, contents: &str) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|e| BinderyError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn frag(id: &str, markdown: &str, page_break_before: bool) -> SequencedFragment {
        SequencedFragment {
            item_id: id.into(),
            title: id.into(),
            markdown: markdown.into(),
            page_break_before,
        }
    }

    /// Writes its input Markdown as the "PDF", or fails.
    struct FakeEngine {
        name: &'static str,
        fail: bool,
        calls: Mutex<Vec<RenderRequest>>,
    }

    impl FakeEngine {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Typesetter for FakeEngine {
        fn name(&self) -> &str {
            self.name
        }

        async fn render(&self, request: &RenderRequest) -> std::result::Result<(), ToolError> {
            self.calls.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(ToolError::Failed {
                    tool: self.name.into(),
                    status: "exit status: 43".into(),
                    stderr: "! LaTeX Error".into(),
                });
            }
            let body = std::fs::read(&request.input).unwrap();
            std::fs::write(&request.output, body).unwrap();
            Ok(())
        }
    }

    #[test]
    fn markdown_batches_are_joined_with_blank_lines() {
        let frags = vec![frag("a", "# A", false), frag("b", "Body", true)];
        assert_eq!(batch_markdown(&frags, ExportFormat::Markdown), "# A\n\nBody");
        assert_eq!(batch_markdown(&frags, ExportFormat::Pdf), "# A\n\n\\newpage\n\nBody");
    }

    #[test]
    fn leading_break_of_a_batch_is_dropped() {
        let frags = vec![frag("a", "A", true)];
        assert_eq!(batch_markdown(&frags, ExportFormat::Pdf), "A");
    }

    #[test]
    fn page_estimate_counts_breaks_and_words() {
        let long = "word ".repeat(WORDS_PER_PAGE + 10);
        let frags = vec![
            frag("h", "# Chapter", false),
            frag("a", &long, false),
            frag("b", "short", true),
        ];
        let (starts, next) = lay_out_batch(&frags, 1);
        assert_eq!(starts, vec![1, 1, 3]);
        assert_eq!(next, 4);
        assert_eq!(estimate_batch_pages(&frags), 3);
    }

    #[tokio::test]
    async fn engine_fallback_uses_next_engine() {
        let primary = FakeEngine::new("xelatex", true);
        let secondary = FakeEngine::new("lualatex", false);
        let engines: Vec<Arc<dyn Typesetter>> = vec![primary.clone(), secondary.clone()];

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.md");
        std::fs::write(&input, "# Hello").unwrap();
        let request = RenderRequest {
            input,
            output: dir.path().join("out.pdf"),
            format: ExportFormat::Pdf,
            title: "T".into(),
            toc: false,
            toc_depth: 2,
            page_numbers: true,
            empty_page_style: false,
            resource_dir: dir.path().to_path_buf(),
            stylesheet: None,
        };

        let used = typeset_with_fallback(&engines, &request).await.unwrap();
        assert_eq!(used, "lualatex");
        assert_eq!(primary.calls.lock().unwrap().len(), 1);
        assert!(request.output.is_file());
    }

    #[tokio::test]
    async fn all_engines_failing_is_render_failure() {
        let engines: Vec<Arc<dyn Typesetter>> =
            vec![FakeEngine::new("xelatex", true), FakeEngine::new("pdflatex", true)];
        let dir = tempfile::tempdir().unwrap();
        let request = RenderRequest {
            input: dir.path().join("in.md"),
            output: dir.path().join("out.pdf"),
            format: ExportFormat::Pdf,
            title: "T".into(),
            toc: false,
            toc_depth: 2,
            page_numbers: true,
            empty_page_style: false,
            resource_dir: dir.path().to_path_buf(),
            stylesheet: None,
        };

        let err = typeset_with_fallback(&engines, &request).await.unwrap_err();
        assert!(matches!(err, BinderyError::RenderFailure { attempts: 2, .. }));
        assert!(err.to_string().contains("LaTeX Error"));

        let err = typeset_with_fallback(&[], &request).await.unwrap_err();
        assert!(matches!(err, BinderyError::EngineUnavailable(_)));
    }

    #[tokio::test]
    async fn epub_is_one_invocation_with_stylesheet() {
        let writer = FakeEngine::new("pandoc", false);
        let toolbox = Toolbox {
            epub_writer: Some(writer.clone() as Arc<dyn Typesetter>),
            ..Toolbox::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("econ.epub");

        let elements = vec![Element::Batch(vec![
            frag("Chapter 1", "# Chapter 1", false),
            frag("Supply", "## Supply", false),
            frag("Demand", "## Demand", true),
        ])];
        let options = ExportOptions {
            include_toc: true,
            show_page_numbers: true,
        };
        let renderer = Renderer::new(&toolbox, dir.path(), "Econ 101", options, 3);
        renderer.render_epub(&elements, &output).await.unwrap();

        let calls = writer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let request = &calls[0];
        assert_eq!(request.format, ExportFormat::Epub);
        assert_eq!(request.title, "Econ 101");
        assert!(request.toc);
        assert_eq!(request.toc_depth, 3);
        assert!(!request.page_numbers);

        let css = std::fs::read_to_string(request.stylesheet.as_ref().unwrap()).unwrap();
        assert!(css.contains(".pagebreak"));

        let body = std::fs::read_to_string(&output).unwrap();
        assert_eq!(
            body,
            "# Chapter 1\n\n## Supply\n\n<div class=\"pagebreak\"></div>\n\n## Demand"
        );
    }

    #[tokio::test]
    async fn epub_without_writer_is_unavailable() {
        let toolbox = Toolbox::default();
        let dir = tempfile::tempdir().unwrap();
        let renderer = Renderer::new(&toolbox, dir.path(), "Econ 101", ExportOptions::default(), 2);

        let err = renderer
            .render_epub(&[], &dir.path().join("out.epub"))
            .await
            .unwrap_err();
        assert!(matches!(err, BinderyError::EngineUnavailable(_)));
    }

    #[tokio::test]
    async fn pdf_components_follow_sequence_with_single_toc() {
        let engine = FakeEngine::new("xelatex", false);
        let toolbox = Toolbox {
            pdf_engines: vec![engine.clone() as Arc<dyn Typesetter>],
            ..Toolbox::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let native = dir.path().join("reading.pdf");
        std::fs::write(&native, "%PDF native").unwrap();

        let elements = vec![
            Element::TitlePage {
                item_id: "t".into(),
                markdown: "TITLE".into(),
            },
            Element::Batch(vec![frag("Chapter 1", "# Chapter 1", false)]),
            Element::Native {
                item_id: "p".into(),
                title: "Reading".into(),
                path: native.clone(),
            },
            Element::Batch(vec![frag("Chapter 2", "# Chapter 2", true)]),
        ];
        let options = ExportOptions {
            include_toc: true,
            show_page_numbers: true,
        };
        let renderer = Renderer::new(&toolbox, dir.path(), "Econ 101", options, 2);
        let components = renderer.render_pdf(&elements).await.unwrap();

        assert_eq!(components.len(), 4);
        assert_eq!(components[2], native);

        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].empty_page_style && !calls[0].toc);
        assert!(calls[1].toc);
        assert!(!calls[2].toc);

        let first = std::fs::read_to_string(&components[1]).unwrap();
        assert!(first.contains("**Further contents**"));
        assert!(first.contains("- Reading, p. 3"));
        assert!(first.contains("- Chapter 2, p. 4"));
        let last = std::fs::read_to_string(&components[3]).unwrap();
        assert!(last.starts_with("\\setcounter{page}{4}"));
    }
}
