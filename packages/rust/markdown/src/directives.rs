//! Markdown and LaTeX directives emitted during document assembly.
//!
//! Everything here is pure string building: headings, title pages, image
//! directives, page breaks, and the escaping they need.

use bindery_shared::ExportFormat;

/// Default image width, in percent of the text block.
pub const DEFAULT_IMAGE_WIDTH: u8 = 80;

/// CSS class carried by EPUB page-break markers.
pub const PAGE_BREAK_CLASS: &str = "pagebreak";

/// An ATX heading. Levels outside 1..=6 are clamped.
pub fn heading(text: &str, level: u8) -> String {
    let level = level.clamp(1, 6) as usize;
    format!("{} {}", "#".repeat(level), single_line(text))
}

/// Title page metadata.
#[derive(Debug, Clone, Default)]
pub struct TitlePage<'a> {
    pub title: &'a str,
    pub subtitle: Option<&'a str>,
    pub author: Option<&'a str>,
    pub date: Option<&'a str>,
}

impl TitlePage<'_> {
    /// Plain Markdown rendition, used for Markdown and EPUB output.
    pub fn to_markdown(&self) -> String {
        let mut md = heading(self.title, 1);
        if let Some(subtitle) = non_empty(self.subtitle) {
            md.push_str(&format!("\n\n*{}*", single_line(subtitle)));
        }
        let byline: Vec<&str> = [non_empty(self.author), non_empty(self.date)]
            .into_iter()
            .flatten()
            .collect();
        if !byline.is_empty() {
            md.push_str(&format!("\n\n{}", byline.join(" · ")));
        }
        md
    }

    /// Raw LaTeX block for PDF output. The page carries no header, footer or number.
    pub fn to_latex(&self) -> String {
        let mut body = String::from(
            "```{=latex}\n\\begin{titlepage}\n\\thispagestyle{empty}\n\\centering\n\\vspace*{0.3\\textheight}\n",
        );
        body.push_str(&format!(
            "{{\\Huge\\bfseries {}\\par}}\n",
            escape_latex(self.title)
        ));
        if let Some(subtitle) = non_empty(self.subtitle) {
            body.push_str(&format!(
                "\\vspace{{1em}}\n{{\\Large {}\\par}}\n",
                escape_latex(subtitle)
            ));
        }
        if let Some(author) = non_empty(self.author) {
            body.push_str(&format!(
                "\\vspace{{2em}}\n{{\\large {}\\par}}\n",
                escape_latex(author)
            ));
        }
        if let Some(date) = non_empty(self.date) {
            body.push_str(&format!(
                "\\vspace{{1em}}\n{{\\large {}\\par}}\n",
                escape_latex(date)
            ));
        }
        body.push_str("\\end{titlepage}\n```");
        body
    }
}

/// Clamp an optional width percentage into `[10, 100]`, defaulting to 80.
pub fn image_width(width: Option<i64>) -> u8 {
    width.map_or(DEFAULT_IMAGE_WIDTH, |w| w.clamp(10, 100) as u8)
}

/// A Markdown image with caption and pandoc width attribute.
pub fn image(path: &str, caption: &str, width_percent: u8) -> String {
    format!(
        "![{}](<{}>){{width={}%}}",
        escape_caption(caption),
        path,
        width_percent
    )
}

/// Caption-only stand-in for an image that could not be embedded.
pub fn image_placeholder(caption: &str) -> String {
    let caption = single_line(caption);
    if caption.is_empty() {
        "*[image]*".to_string()
    } else {
        format!("*[image: {caption}]*")
    }
}

/// Forced page break for the target format. Markdown output has none.
pub fn page_break(format: ExportFormat) -> &'static str {
    match format {
        ExportFormat::Pdf => "\\newpage",
        ExportFormat::Epub => "<div class=\"pagebreak\"></div>",
        ExportFormat::Markdown => "",
    }
}

/// Stylesheet passed to the EPUB writer.
pub fn epub_stylesheet() -> String {
    format!(
        ".{PAGE_BREAK_CLASS} {{ page-break-after: always; break-after: page; }}\n\
         img {{ max-width: 100%; height: auto; }}\n\
         figure {{ margin: 1em 0; text-align: center; }}\n\
         figcaption {{ font-style: italic; font-size: 0.9em; }}\n\
         section.attribution {{ font-size: 0.9em; }}\n"
    )
}

/// Escape LaTeX special characters in plain text.
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str("\\textasciitilde{}"),
            '^' => out.push_str("\\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape a caption for use as Markdown image alt text.
fn escape_caption(caption: &str) -> String {
    single_line(caption).replace('[', "\\[").replace(']', "\\]")
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
