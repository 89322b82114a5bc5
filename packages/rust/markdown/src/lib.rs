//! HTML-to-Markdown conversion and cleanup passes.
//!
//! Converts extracted HTML content to clean Markdown fragments using the `htmd`
//! crate. Boilerplate is stripped by a [`BoilerplateRules`] table before and
//! after conversion, then a series of cleanup passes normalizes headings,
//! whitespace, code blocks, and links.
//!
//! The crate also owns the text-only side of document assembly: PDF text
//! reflow ([`reflow`]) and Markdown/LaTeX directive emission ([`directives`]).

pub mod boilerplate;
mod cleanup;
pub mod directives;
pub mod reflow;

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use bindery_shared::{BinderyError, Result};

pub use boilerplate::{BoilerplateRules, HtmlMatcher, LineAction, LineRule};
pub use cleanup::{shift_headings, strip_leading_title};
pub use reflow::{has_extractable_text, reflow_pdf_text};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Result of converting an HTML fragment to Markdown.
#[derive(Debug, Clone)]
pub struct ConvertResult {
    /// The cleaned Markdown fragment.
    pub markdown: String,
    /// Approximate word count (code blocks excluded).
    pub word_count: usize,
}

// ---------------------------------------------------------------------------
// Converter
// ---------------------------------------------------------------------------

/// Convert extracted content HTML to a clean Markdown fragment.
///
/// 1. Applies the HTML side of `rules` (selector, phrase and emptiness matchers)
/// 2. Pre-processes HTML tables into markdown tables
/// 3. Converts HTML → Markdown via `htmd`
/// 4. Applies the line side of `rules`
/// 5. Runs the cleanup pipeline (relative links resolve against `source_url`)
#[instrument(skip(html, rules), fields(url = source_url.unwrap_or_default()))]
pub fn convert(
    html: &str,
    source_url: Option<&str>,
    rules: &BoilerplateRules,
) -> Result<ConvertResult> {
    let content_html = rules.apply_html(html);
    let content_html = preprocess_tables(&content_html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "iframe", "noscript", "svg", "form", "button",
        ])
        .build();

    let raw_markdown = converter
        .convert(&content_html)
        .map_err(|e| BinderyError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw_markdown.len(), "htmd conversion complete");

    let filtered = rules.apply_lines(&raw_markdown);
    let base_url = source_url.and_then(|u| Url::parse(u).ok());
    let markdown = cleanup::run_pipeline(&filtered, base_url.as_ref());
    let word_count = count_words(&markdown);

    debug!(word_count, final_len = markdown.len(), "conversion complete");

    Ok(ConvertResult {
        markdown,
        word_count,
    })
}

// ---------------------------------------------------------------------------
// Table pre-processing
// ---------------------------------------------------------------------------

static TABLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table").expect("valid selector"));
static TR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").expect("valid selector"));
static TH_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").expect("valid selector"));
static TD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").expect("valid selector"));

/// Convert HTML `<table>` elements to markdown table syntax before htmd conversion.
///
/// `htmd` 0.1 doesn't support table conversion, so we handle it manually.
fn preprocess_tables(html: &str) -> String {
    let doc = Html::parse_fragment(html);

    if doc.select(&TABLE_SEL).next().is_none() {
        return html.to_string();
    }

    // Work on the parser's own serialization so each table's outer HTML matches
    // byte for byte (implied `<tbody>` and attribute quoting included).
    let mut result = doc.root_element().inner_html();

    // Nested tables are flattened into their outer table's cells.
    for table_el in doc.select(&TABLE_SEL) {
        if table_el
            .ancestors()
            .filter_map(scraper::ElementRef::wrap)
            .any(|a| a.value().name() == "table")
        {
            continue;
        }
        let table_html = table_el.html();
        let md_table = html_table_to_markdown(&table_el);
        result = result.replacen(&table_html, &md_table, 1);
    }

    result
}

/// Convert a single HTML table element to a markdown table string.
fn html_table_to_markdown(table: &scraper::ElementRef) -> String {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut has_header = false;

    for tr in table.select(&TR_SEL) {
        let ths: Vec<String> = tr.select(&TH_SEL).map(|cell| cell_text(&cell)).collect();

        if !ths.is_empty() && rows.is_empty() {
            has_header = true;
            rows.push(ths);
            continue;
        }

        let cells: Vec<String> = tr
            .select(&TD_SEL)
            .chain(tr.select(&TH_SEL))
            .map(|cell| cell_text(&cell))
            .collect();

        if !cells.is_empty() {
            rows.push(cells);
        }
    }

    let col_count = rows.iter().map(|r| r.len()).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }

    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let mut md = String::from("\n\n");

    // Header row
    let header = &rows[0];
    md.push_str("| ");
    md.push_str(&header.join(" | "));
    md.push_str(" |\n");

    // Separator row
    md.push_str("| ");
    md.push_str(&vec!["---"; col_count].join(" | "));
    md.push_str(" |\n");

    let data_start = if has_header { 1 } else { 0 };
    for row in &rows[data_start..] {
        md.push_str("| ");
        md.push_str(&row.join(" | "));
        md.push_str(" |\n");
    }

    md.push('\n');
    md
}

/// Cell text with whitespace collapsed and pipes escaped.
fn cell_text(cell: &scraper::ElementRef) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Count words in Markdown (excluding code blocks).
fn count_words(md: &str) -> usize {
    static CODE_BLOCK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));

    let without_code = CODE_BLOCK_RE.replace_all(md, "");
    without_code
        .split_whitespace()
        .filter(|w| !w.starts_with('#') || w.len() > 2)
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
