//! Readability-style scoring of content containers.
//!
//! Every substantial paragraph scores its parent in full and its grandparent
//! at half weight. Container scores start from a class/id weight and are
//! scaled down by link density; the best-scoring container wins.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::ExtractionStrategy;

static PARA_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p, pre, blockquote").expect("valid selector"));
static LINK_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("valid selector"));

static POSITIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)article|body|content|entry|hentry|main|page|post|text|blog|story|prose")
        .expect("valid regex")
});
static NEGATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)comment|meta|footer|footnote|masthead|nav|sidebar|share|social|related|promo|sponsor|widget|menu|banner|newsletter|subscribe|advert",
    )
    .expect("valid regex")
});

/// Paragraphs shorter than this do not contribute.
const MIN_PARAGRAPH_CHARS: usize = 25;

/// Scores containers by the paragraphs they hold.
#[derive(Debug, Clone)]
pub struct ReadabilityStrategy {
    /// Winning score below which the strategy reports no candidate.
    pub min_score: f64,
}

impl Default for ReadabilityStrategy {
    fn default() -> Self {
        Self { min_score: 20.0 }
    }
}

impl ExtractionStrategy for ReadabilityStrategy {
    fn extract(&self, doc: &Html) -> Option<String> {
        let mut scores = HashMap::new();

        for para in doc.select(&PARA_SEL) {
            let text = para.text().collect::<String>();
            let len = text.trim().chars().count();
            if len < MIN_PARAGRAPH_CHARS {
                continue;
            }

            let score = 1.0 + text.matches(',').count() as f64 + (len as f64 / 100.0).min(3.0);
            let mut ancestors = para.ancestors().filter_map(ElementRef::wrap);

            if let Some(parent) = ancestors.next() {
                *scores.entry(parent.id()).or_insert_with(|| base_score(&parent)) += score;
            }
            if let Some(grandparent) = ancestors.next() {
                *scores
                    .entry(grandparent.id())
                    .or_insert_with(|| base_score(&grandparent)) += score / 2.0;
            }
        }

        let adjusted = |el: &ElementRef, raw: f64| raw * (1.0 - link_density(el));

        let (mut best, mut best_score) = scores
            .iter()
            .filter_map(|(id, raw)| {
                let el = ElementRef::wrap(doc.tree.get(*id)?)?;
                Some((el, adjusted(&el, *raw)))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))?;

        // Content split across sibling sections scores the shared parent about
        // as high as each section; prefer the parent in that case.
        while let Some(parent) = best.parent().and_then(ElementRef::wrap) {
            let Some(raw) = scores.get(&parent.id()) else {
                break;
            };
            let parent_score = adjusted(&parent, *raw);
            if parent_score < best_score * 0.8 {
                break;
            }
            best = parent;
            best_score = parent_score.max(best_score);
        }

        (best_score >= self.min_score).then(|| best.inner_html())
    }

    fn name(&self) -> &str {
        "readability"
    }
}

/// Starting score from the element's tag, class and id.
fn base_score(el: &ElementRef) -> f64 {
    let tag = match el.value().name() {
        "article" => 10.0,
        "main" | "section" | "div" => 5.0,
        "pre" | "td" | "blockquote" => 3.0,
        "ul" | "ol" | "dl" | "form" => -3.0,
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "th" => -5.0,
        _ => 0.0,
    };

    let hints = format!(
        "{} {}",
        el.value().attr("class").unwrap_or_default(),
        el.value().attr("id").unwrap_or_default()
    );
    let mut weight = 0.0;
    if NEGATIVE_RE.is_match(&hints) {
        weight -= 25.0;
    }
    if POSITIVE_RE.is_match(&hints) {
        weight += 25.0;
    }

    tag + weight
}

/// Share of an element's text that sits inside links.
fn link_density(el: &ElementRef) -> f64 {
    let total: usize = el.text().map(|t| t.trim().len()).sum();
    if total == 0 {
        return 0.0;
    }
    let linked: usize = el
        .select(&LINK_SEL)
        .flat_map(|a| a.text())
        .map(|t| t.trim().len())
        .sum();
    (linked as f64 / total as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOREM: &str = "Markets coordinate the decisions of buyers and sellers, and prices carry the information each side needs.";

    #[test]
    fn picks_paragraph_container_over_link_farm() {
        let html = format!(
            r#"<html><body>
                <div class="links"><p><a href="/1">{LOREM}</a></p><p><a href="/2">{LOREM}</a></p></div>
                <div class="post-body"><p>{LOREM}</p><p>{LOREM}</p><p>{LOREM}</p></div>
            </body></html>"#
        );
        let doc = Html::parse_document(&html);
        let out = ReadabilityStrategy::default().extract(&doc).unwrap();
        assert!(out.contains(LOREM));
        assert!(!out.contains("href"));
    }

    #[test]
    fn merges_sibling_sections() {
        let html = format!(
            r#"<html><body><article>
                <section><p>{LOREM}</p><p>{LOREM}</p><p>{LOREM}</p></section>
                <section><p>{LOREM}</p><p>{LOREM}</p><p>{LOREM}</p><p>Second section ends here, finally.</p></section>
            </article></body></html>"#
        );
        let doc = Html::parse_document(&html);
        let out = ReadabilityStrategy::default().extract(&doc).unwrap();
        assert!(out.contains("Second section"));
    }

    #[test]
    fn nothing_substantial_yields_none() {
        let doc = Html::parse_document("<html><body><p>Hi.</p><p>Short.</p></body></html>");
        assert!(ReadabilityStrategy::default().extract(&doc).is_none());
    }

    #[test]
    fn negative_hints_lower_score() {
        let doc = Html::parse_fragment(r#"<div class="sidebar-widget"></div><div class="entry-content"></div>"#);
        let sel = Selector::parse("div").unwrap();
        let divs: Vec<_> = doc.select(&sel).collect();
        assert!(base_score(&divs[0]) < base_score(&divs[1]));
    }
}
