//! Reflow of text extracted from PDF files.
//!
//! Extractors emit one physical line per output line and a form feed (`\x0c`)
//! between pages. Reflow rejoins hard-wrapped lines into paragraphs,
//! de-hyphenates words split across lines, marks page boundaries with an HTML
//! comment, and collapses runs of blank lines.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Minimum non-whitespace characters for a document to count as having text.
const MIN_TEXT_CHARS: usize = 50;

/// Minimum distinct alphanumeric characters (guards against OCR noise like `.....`).
const MIN_DISTINCT_CHARS: usize = 10;

/// A line shorter than this fraction of the page's widest line, ending in
/// terminal punctuation, closes its paragraph.
const SHORT_LINE_RATIO: f32 = 0.8;

/// Reflow raw extractor output into Markdown paragraphs.
pub fn reflow_pdf_text(raw: &str) -> String {
    let mut out = String::new();

    // Markers carry the physical page number, blank pages included.
    for (idx, page) in raw.split('\x0c').enumerate() {
        if page.trim().is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str(&format!("\n\n<!-- page {} -->\n\n", idx + 1));
        }
        out.push_str(&reflow_page(page));
    }

    collapse_blank_lines(out.trim())
}

/// True when `text` looks like real extracted prose rather than the empty or
/// near-empty output of a scanned, image-only document.
pub fn has_extractable_text(text: &str) -> bool {
    let non_ws = text.chars().filter(|c| !c.is_whitespace()).count();
    if non_ws < MIN_TEXT_CHARS {
        return false;
    }

    let distinct: HashSet<char> = text
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();
    distinct.len() >= MIN_DISTINCT_CHARS
}

fn reflow_page(page: &str) -> String {
    let lines: Vec<&str> = page.lines().map(str::trim_end).collect();
    let width = lines
        .iter()
        .map(|l| l.trim().chars().count())
        .max()
        .unwrap_or(0);
    let short_limit = (width as f32 * SHORT_LINE_RATIO) as usize;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();

    for (idx, raw_line) in lines.iter().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            flush(&mut current, &mut paragraphs);
            continue;
        }

        if current.is_empty() {
            current.push_str(line);
        } else if let Some(stem_len) = hyphenated_stem_len(&current, line) {
            current.truncate(stem_len);
            current.push_str(line);
        } else {
            current.push(' ');
            current.push_str(line);
        }

        let next = lines.get(idx + 1).map(|l| l.trim()).unwrap_or("");
        if ends_paragraph(line, next, short_limit) {
            flush(&mut current, &mut paragraphs);
        }
    }
    flush(&mut current, &mut paragraphs);

    paragraphs.join("\n\n")
}

fn flush(current: &mut String, paragraphs: &mut Vec<String>) {
    if !current.is_empty() {
        paragraphs.push(std::mem::take(current));
    }
}

/// If `current` ends with a word broken by a hyphen and `next` continues it in
/// lowercase, return the byte length of `current` without the hyphen.
fn hyphenated_stem_len(current: &str, next: &str) -> Option<usize> {
    let stem = current.strip_suffix('-')?;
    let before = stem.chars().last()?;
    let after = next.chars().next()?;
    (before.is_alphabetic() && after.is_lowercase()).then_some(stem.len())
}

fn ends_paragraph(line: &str, next: &str, short_limit: usize) -> bool {
    static BULLET_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([-•*–]|\d{1,3}[.)])\s").expect("valid regex"));

    if next.is_empty() || BULLET_RE.is_match(next) {
        return true;
    }

    let terminal = line.ends_with(['.', '!', '?', ':', '"', '”']);
    if !terminal {
        return false;
    }

    let starts_upper = next.chars().next().is_some_and(|c| c.is_uppercase());
    line.chars().count() < short_limit && starts_upper
}

fn collapse_blank_lines(text: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n[ \t]*(\n[ \t]*){2,}").expect("valid regex"));

    let mut result = MULTI_BLANK_RE.replace_all(text, "\n\n").to_string();
    result.push('\n');
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_hard_wrapped_lines() {
        let raw = "The price of a good is determined by the interaction\nof supply and demand in a competitive market.\nShort line.\nNext paragraph starts here and runs on for a while\nuntil it ends.";
        let out = reflow_pdf_text(raw);
        assert!(out.contains(
            "The price of a good is determined by the interaction of supply and demand in a competitive market."
        ));
        assert!(out.contains("Short line.\n\nNext paragraph"));
    }

    #[test]
    fn dehyphenates_split_words() {
        let raw = "Market equi-\nlibrium occurs when quantities match.";
        let out = reflow_pdf_text(raw);
        assert!(out.contains("Market equilibrium occurs"));
    }

    #[test]
    fn keeps_hyphen_before_capital() {
        let raw = "The Anglo-\nSaxon model of capitalism.";
        let out = reflow_pdf_text(raw);
        assert!(out.contains("Anglo- Saxon"));
    }

    #[test]
    fn marks_page_breaks() {
        let raw = "First page text.\x0cSecond page text.\x0c";
        let out = reflow_pdf_text(raw);
        assert_eq!(out, "First page text.\n\n<!-- page 2 -->\n\nSecond page text.\n");
    }

    #[test]
    fn page_markers_count_blank_pages() {
        let raw = "Page one text ends here.\x0c\x0cPage three text begins here.\x0c";
        let out = reflow_pdf_text(raw);
        assert_eq!(
            out,
            "Page one text ends here.\n\n<!-- page 3 -->\n\nPage three text begins here.\n"
        );
    }

    #[test]
    fn leading_blank_page_gets_no_marker() {
        let out = reflow_pdf_text("\x0cCover text only.");
        assert_eq!(out, "Cover text only.\n");
    }

    #[test]
    fn bullets_start_new_paragraphs() {
        let raw = "Key points\n- demand curves slope down\n- supply curves slope up";
        let out = reflow_pdf_text(raw);
        assert!(out.contains("Key points\n\n- demand curves slope down\n\n- supply"));
    }

    #[test]
    fn collapses_blank_runs() {
        let raw = "Alpha.\n\n\n\n\nBeta.";
        assert_eq!(reflow_pdf_text(raw), "Alpha.\n\nBeta.\n");
    }

    #[test]
    fn text_absence_heuristic() {
        assert!(!has_extractable_text(""));
        assert!(!has_extractable_text("   \n\x0c\n  "));
        assert!(!has_extractable_text(&".".repeat(200)));
        assert!(!has_extractable_text(&"ab ".repeat(40)));
        assert!(has_extractable_text(
            "Economics studies how societies allocate scarce resources among competing uses."
        ));
    }
}
