//! Well-known article-body selectors.

use scraper::{Html, Selector};

use super::{ExtractionStrategy, MIN_CONTENT_CHARS, visible_text_len};

/// Selectors tried in order; the first match with enough text wins.
const ARTICLE_SELECTORS: &[&str] = &[
    r#"[itemprop="articleBody"]"#,
    "article .entry-content",
    "article .post-content",
    ".article-body",
    ".article-content",
    ".story-body",
    ".post-content",
    ".entry-content",
    "article",
    "main",
    r#"[role="main"]"#,
    "#content",
    ".content",
];

/// Returns the first well-known article container holding enough text.
#[derive(Debug, Clone)]
pub struct ArticleSelectorsStrategy {
    pub selectors: Vec<String>,
    pub min_chars: usize,
}

impl Default for ArticleSelectorsStrategy {
    fn default() -> Self {
        Self {
            selectors: ARTICLE_SELECTORS.iter().map(|s| s.to_string()).collect(),
            min_chars: MIN_CONTENT_CHARS,
        }
    }
}

impl ExtractionStrategy for ArticleSelectorsStrategy {
    fn extract(&self, doc: &Html) -> Option<String> {
        self.selectors
            .iter()
            .filter_map(|css| Selector::parse(css).ok())
            .flat_map(|sel| {
                doc.select(&sel)
                    .map(|el| el.inner_html())
                    .collect::<Vec<_>>()
            })
            .find(|html| visible_text_len(html) >= self.min_chars)
    }

    fn name(&self) -> &str {
        "article-selectors"
    }
}
