//! Per-item conversion to Markdown fragments or native artifacts.
//!
//! Every item type has its own path; all of them end in a [`NormalizedItem`]
//! or an [`ItemError`] that the pipeline records without stopping.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, instrument, warn};

use bindery_fetch::{ExtractionChain, FetchClient, WikiRef, WikipediaClient};
use bindery_markdown::directives::{self, TitlePage};
use bindery_markdown::{
    BoilerplateRules, has_extractable_text, reflow_pdf_text, shift_headings, strip_leading_title,
};
use bindery_shared::{
    AttributionEntry, AttributionKind, BinderyError, ExportConfig, ExportFormat, Item, ItemError,
    ItemType, Result,
};

use crate::images;
use crate::paths::PathResolver;
use crate::tools::Toolbox;

/// Level of the heading emitted above fetched and converted content.
const CONTENT_HEADING_LEVEL: u8 = 2;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// What an item turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Markdown destined for a typesetting batch.
    Markdown(String),
    /// A title page, typeset on its own for PDF output.
    TitlePage(String),
    /// An existing PDF embedded as-is.
    Native(PathBuf),
}

/// A normalized item, ready for sequencing.
#[derive(Debug, Clone)]
pub struct NormalizedItem {
    pub item_id: String,
    pub title: String,
    /// Headings and title pages suppress the following page break.
    pub heading_like: bool,
    pub fragment: Fragment,
    /// Citation for content fetched during this export.
    pub attribution: Option<AttributionEntry>,
}

impl NormalizedItem {
    fn markdown(item: &Item, title: impl Into<String>, markdown: String) -> Self {
        Self {
            item_id: item.id.clone(),
            title: title.into(),
            heading_like: item.item_type.is_heading_like(),
            fragment: Fragment::Markdown(markdown),
            attribution: None,
        }
    }

    fn with_attribution(mut self, entry: AttributionEntry) -> Self {
        self.attribution = Some(entry);
        self
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Converts items for one export job.
pub struct Normalizer {
    fetch: FetchClient,
    wikipedia: WikipediaClient,
    extraction: ExtractionChain,
    web_rules: BoilerplateRules,
    wiki_rules: BoilerplateRules,
    resolver: PathResolver,
    toolbox: Toolbox,
    format: ExportFormat,
    work_dir: PathBuf,
    max_image_dimension: u32,
}

impl Normalizer {
    /// Build a normalizer writing intermediate files under `work_dir`.
    pub fn new(
        config: &ExportConfig,
        toolbox: Toolbox,
        format: ExportFormat,
        work_dir: &Path,
    ) -> Result<Self> {
        let assets = work_dir.join("assets");
        std::fs::create_dir_all(&assets).map_err(|e| BinderyError::io(&assets, e))?;

        let fetch = FetchClient::new(config.fetch_timeout_secs)?;
        Ok(Self {
            wikipedia: WikipediaClient::new(fetch.clone(), config.wikipedia_api.clone()),
            fetch,
            extraction: ExtractionChain::new(),
            web_rules: BoilerplateRules::web_defaults(),
            wiki_rules: BoilerplateRules::wikipedia_defaults(),
            resolver: PathResolver::new(&config.storage_dir),
            toolbox,
            format,
            work_dir: work_dir.to_path_buf(),
            max_image_dimension: config.max_image_dimension,
        })
    }

    /// The HTTP client, shared with the vector image resolver.
    pub fn fetch_client(&self) -> &FetchClient {
        &self.fetch
    }

    /// Normalize one item.
    #[instrument(skip(self, item), fields(item_id = %item.id, kind = item.item_type.as_str()))]
    pub async fn normalize(&self, item: &Item) -> std::result::Result<NormalizedItem, ItemError> {
        match item.item_type {
            ItemType::Heading => Ok(self.heading(item)),
            ItemType::Titlepage => Ok(self.title_page(item)),
            ItemType::Url => self.web_page(item).await,
            ItemType::Wikipedia => self.encyclopedia(item).await,
            ItemType::Image => self.image(item).await,
            ItemType::Pdf => self.pdf(item).await,
            ItemType::Docx => self.docx(item).await,
        }
    }

    fn heading(&self, item: &Item) -> NormalizedItem {
        let level = item.options.level.unwrap_or(1);
        let title = item.display_title();
        NormalizedItem::markdown(item, title, directives::heading(title, level))
    }

    fn title_page(&self, item: &Item) -> NormalizedItem {
        let page = TitlePage {
            title: item.display_title(),
            subtitle: item.options.subtitle.as_deref(),
            author: item.options.author.as_deref(),
            date: item.options.date.as_deref(),
        };
        let fragment = match self.format {
            ExportFormat::Pdf => Fragment::TitlePage(page.to_latex()),
            _ => Fragment::Markdown(page.to_markdown()),
        };
        NormalizedItem {
            item_id: item.id.clone(),
            title: item.display_title().to_string(),
            heading_like: true,
            fragment,
            attribution: None,
        }
    }

    async fn web_page(&self, item: &Item) -> std::result::Result<NormalizedItem, ItemError> {
        if let Some(cached) = &item.cached_content {
            debug!("using cached content");
            let title = item.display_title();
            return Ok(NormalizedItem::markdown(
                item,
                title,
                content_fragment(title, &cached.markdown),
            ));
        }

        let url = source_ref(item)?;
        let page = self.fetch.fetch_html(url).await?;
        let extracted = self.extraction.extract(&page.html);
        debug!(strategy = %extracted.strategy, "main content extracted");

        let converted = bindery_markdown::convert(&extracted.html, Some(&page.url), &self.web_rules)
            .map_err(|e| ItemError::Conversion(e.to_string()))?;
        if converted.markdown.trim().is_empty() {
            return Err(ItemError::Conversion(format!("no readable content at {url}")));
        }

        let title = explicit_title(item)
            .or(extracted.title.as_deref())
            .unwrap_or("Untitled")
            .to_string();
        let entry = AttributionEntry {
            kind: AttributionKind::Web,
            title: title.clone(),
            url: page.url.clone(),
            revision: None,
            accessed: Utc::now().date_naive(),
        };
        let markdown = content_fragment(&title, &converted.markdown);
        Ok(NormalizedItem::markdown(item, title, markdown).with_attribution(entry))
    }

    async fn encyclopedia(&self, item: &Item) -> std::result::Result<NormalizedItem, ItemError> {
        if let Some(cached) = &item.cached_content {
            debug!(revision = ?cached.revision, "using cached article");
            let title = item.display_title();
            return Ok(NormalizedItem::markdown(
                item,
                title,
                content_fragment(title, &cached.markdown),
            ));
        }

        let reference = source_ref(item)?;
        let wiki = WikiRef::parse(reference)
            .ok_or_else(|| ItemError::fetch(reference, "not an encyclopedia reference"))?;
        let article = self.wikipedia.fetch_article(&wiki).await?;

        let converted =
            bindery_markdown::convert(&article.html, Some(&article.url), &self.wiki_rules)
                .map_err(|e| ItemError::Conversion(e.to_string()))?;

        let title = explicit_title(item)
            .unwrap_or(&article.title)
            .to_string();
        let entry = AttributionEntry {
            kind: AttributionKind::Wikipedia,
            title: article.title.clone(),
            url: article.url.clone(),
            revision: article.revid.map(|r| r.to_string()),
            accessed: Utc::now().date_naive(),
        };
        let markdown = content_fragment(&title, &converted.markdown);
        Ok(NormalizedItem::markdown(item, title, markdown).with_attribution(entry))
    }

    async fn image(&self, item: &Item) -> std::result::Result<NormalizedItem, ItemError> {
        let reference = source_ref(item)?;
        let caption = item
            .options
            .caption
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| item.display_title());
        let width = directives::image_width(item.options.width);
        let remote = is_remote(reference);

        let target = match (remote, self.format) {
            (true, format) => {
                let file = self.fetch.download(reference, &self.work_dir.join("assets")).await?;
                // Markdown output links the source it just confirmed.
                if format == ExportFormat::Markdown {
                    reference.to_string()
                } else {
                    self.prepare_raster(&file.path).await
                }
            }
            (false, ExportFormat::Markdown) => absolute(self.resolver.resolve(reference)?),
            (false, _) => {
                let path = self.resolver.resolve(reference)?;
                self.prepare_raster(&path).await
            }
        };

        let mut normalized =
            NormalizedItem::markdown(item, item.display_title(), directives::image(&target, caption, width));
        if remote {
            normalized = normalized.with_attribution(AttributionEntry {
                kind: AttributionKind::Image,
                title: caption.to_string(),
                url: reference.to_string(),
                revision: None,
                accessed: Utc::now().date_naive(),
            });
        }
        Ok(normalized)
    }

    /// Downscale raster images; vector images are handled after sequencing.
    async fn prepare_raster(&self, path: &Path) -> String {
        let path = absolute(path.to_path_buf());
        if images::is_svg(&path) {
            return path;
        }
        images::downscale_if_needed(Path::new(&path), self.max_image_dimension)
            .await
            .display()
            .to_string()
    }

    async fn pdf(&self, item: &Item) -> std::result::Result<NormalizedItem, ItemError> {
        let path = self.resolver.resolve(source_ref(item)?)?;
        let title = item.display_title();

        if self.format == ExportFormat::Pdf {
            return Ok(NormalizedItem {
                item_id: item.id.clone(),
                title: title.to_string(),
                heading_like: false,
                fragment: Fragment::Native(path),
                attribution: None,
            });
        }

        let raw = self.extract_pdf_text(&path).await?;
        if !has_extractable_text(&raw) {
            return Err(ItemError::NoExtractableText {
                file: file_label(&path),
            });
        }
        let text = reflow_pdf_text(&raw);
        Ok(NormalizedItem::markdown(item, title, content_fragment(title, &text)))
    }

    async fn extract_pdf_text(&self, path: &Path) -> std::result::Result<String, ItemError> {
        if self.toolbox.text_extractors.is_empty() {
            return Err(ItemError::Conversion("no PDF text extractor available".into()));
        }

        let mut last_error = String::new();
        for extractor in &self.toolbox.text_extractors {
            match extractor.extract_text(path).await {
                Ok(text) => {
                    debug!(tool = extractor.name(), chars = text.len(), "text extracted");
                    return Ok(text);
                }
                Err(e) => {
                    warn!(tool = extractor.name(), error = %e, "text extractor failed, trying next");
                    last_error = e.to_string();
                }
            }
        }
        Err(ItemError::Conversion(format!("text extraction failed: {last_error}")))
    }

    async fn docx(&self, item: &Item) -> std::result::Result<NormalizedItem, ItemError> {
        let path = self.resolver.resolve(source_ref(item)?)?;
        let converter = self
            .toolbox
            .converter
            .as_ref()
            .ok_or_else(|| ItemError::Conversion("no document converter available".into()))?;

        let media_dir = self.work_dir.join("media").join(safe_id(&item.id));
        let markdown = converter
            .to_markdown(&path, &media_dir)
            .await
            .map_err(|e| ItemError::Conversion(e.to_string()))?;
        if !has_extractable_text(&markdown) {
            return Err(ItemError::NoExtractableText {
                file: file_label(&path),
            });
        }

        let title = item.display_title();
        Ok(NormalizedItem::markdown(item, title, content_fragment(title, &markdown)))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Item heading followed by the body, whose own headings nest below it.
pub fn content_fragment(title: &str, body: &str) -> String {
    let body = strip_leading_title(body, title);
    let body = shift_headings(&body, CONTENT_HEADING_LEVEL as usize + 1);
    let heading = directives::heading(title, CONTENT_HEADING_LEVEL);
    let body = body.trim();
    if body.is_empty() {
        heading
    } else {
        format!("{heading}\n\n{body}")
    }
}

/// The item's source reference; an absent one fails the way its type would.
fn source_ref(item: &Item) -> std::result::Result<&str, ItemError> {
    let reference = item.source_ref.as_deref().map(str::trim).filter(|r| !r.is_empty());
    reference.ok_or_else(|| match item.item_type {
        ItemType::Url | ItemType::Wikipedia => {
            ItemError::fetch(format!("item {}", item.id), "no source URL")
        }
        ItemType::Pdf | ItemType::Docx | ItemType::Image => ItemError::MissingLocalFile {
            reference: format!("item {} has no source", item.id),
        },
        ItemType::Heading | ItemType::Titlepage => {
            ItemError::Conversion(format!("item {} has no source", item.id))
        }
    })
}

fn explicit_title(item: &Item) -> Option<&str> {
    item.title.as_deref().map(str::trim).filter(|t| !t.is_empty())
}

fn is_remote(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

fn absolute(path: PathBuf) -> String {
    std::path::absolute(&path)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn safe_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
