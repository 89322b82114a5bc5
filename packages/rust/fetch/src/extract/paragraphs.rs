//! Collects substantial paragraphs wherever they sit in the page.

use std::sync::LazyLock;

use scraper::{Html, Selector};

use super::ExtractionStrategy;

static PARA_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("valid selector"));

/// Concatenates every paragraph of at least `min_paragraph_chars` characters.
#[derive(Debug, Clone)]
pub struct ParagraphsStrategy {
    pub min_paragraph_chars: usize,
}

impl Default for ParagraphsStrategy {
    fn default() -> Self {
        Self {
            min_paragraph_chars: 80,
        }
    }
}

impl ExtractionStrategy for ParagraphsStrategy {
    fn extract(&self, doc: &Html) -> Option<String> {
        let paragraphs: Vec<String> = doc
            .select(&PARA_SEL)
            .filter(|p| p.text().collect::<String>().trim().chars().count() >= self.min_paragraph_chars)
            .map(|p| p.html())
            .collect();

        (!paragraphs.is_empty()).then(|| paragraphs.join("\n"))
    }

    fn name(&self) -> &str {
        "paragraphs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_long_paragraphs() {
        let long = "Opportunity cost is the value of the next best alternative given up when a choice is made.";
        let html = format!("<div><p>Menu</p><p>{long}</p></div><span><p>{long}</p></span>");
        let doc = Html::parse_document(&html);
        let out = ParagraphsStrategy::default().extract(&doc).unwrap();
        assert_eq!(out.matches("<p>").count(), 2);
        assert!(!out.contains("Menu"));
    }

    #[test]
    fn no_long_paragraphs_yields_none() {
        let doc = Html::parse_document("<p>a</p><p>b</p>");
        assert!(ParagraphsStrategy::default().extract(&doc).is_none());
    }
}
