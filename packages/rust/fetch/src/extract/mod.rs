//! Main-content extraction strategies for arbitrary web pages.
//!
//! Strategies are tried in priority order; the first one whose result carries
//! enough text wins. [`BodyStrategy`] is the always-last fallback.

mod paragraphs;
mod readability;
mod selectors;

use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::debug;

pub use paragraphs::ParagraphsStrategy;
pub use readability::ReadabilityStrategy;
pub use selectors::ArticleSelectorsStrategy;

/// Minimum visible text for a strategy's result to be accepted.
pub const MIN_CONTENT_CHARS: usize = 200;

/// Elements never considered part of the main content.
const NON_CONTENT: &str =
    "script, style, noscript, template, nav, header, footer, aside, form, iframe, button, svg";

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One way of locating the main content of a parsed page.
pub trait ExtractionStrategy: Send + Sync {
    /// Return the content HTML, or `None` if this strategy found nothing.
    fn extract(&self, doc: &Html) -> Option<String>;

    /// Human-readable strategy name for tracing.
    fn name(&self) -> &str;
}

/// Output of [`ExtractionChain::extract`].
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    /// Content HTML.
    pub html: String,
    /// Page title from `og:title`, `<title>` or the first `<h1>`.
    pub title: Option<String>,
    /// Name of the strategy that produced `html`.
    pub strategy: String,
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Ordered list of strategies, short-circuiting on the first good result.
pub struct ExtractionChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    min_chars: usize,
}

impl ExtractionChain {
    /// Readability, article selectors, substantial paragraphs, then body.
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(ReadabilityStrategy::default()),
                Box::new(ArticleSelectorsStrategy::default()),
                Box::new(ParagraphsStrategy::default()),
                Box::new(BodyStrategy),
            ],
            min_chars: MIN_CONTENT_CHARS,
        }
    }

    /// A chain over custom strategies.
    pub fn with_strategies(strategies: Vec<Box<dyn ExtractionStrategy>>, min_chars: usize) -> Self {
        Self {
            strategies,
            min_chars,
        }
    }

    /// Extract the main content from a full HTML document.
    ///
    /// Non-content regions are stripped before any strategy runs. The last
    /// strategy's output is accepted regardless of length.
    pub fn extract(&self, html: &str) -> ExtractedContent {
        let full = Html::parse_document(html);
        let title = page_title(&full);
        let doc = Html::parse_document(&strip_non_content(&full));

        let last = self.strategies.len().saturating_sub(1);
        for (idx, strategy) in self.strategies.iter().enumerate() {
            let Some(content) = strategy.extract(&doc) else {
                debug!(strategy = strategy.name(), "no candidate");
                continue;
            };
            let chars = visible_text_len(&content);
            if chars >= self.min_chars || idx == last {
                debug!(strategy = strategy.name(), chars, "content extracted");
                return ExtractedContent {
                    html: content,
                    title,
                    strategy: strategy.name().to_string(),
                };
            }
            debug!(strategy = strategy.name(), chars, "candidate too short");
        }

        ExtractedContent {
            html: String::new(),
            title,
            strategy: "none".into(),
        }
    }
}

impl Default for ExtractionChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw `<body>` content; always matches.
pub struct BodyStrategy;

impl ExtractionStrategy for BodyStrategy {
    fn extract(&self, doc: &Html) -> Option<String> {
        static BODY_SEL: LazyLock<Selector> =
            LazyLock::new(|| Selector::parse("body").expect("valid selector"));

        doc.select(&BODY_SEL)
            .next()
            .map(|body| body.inner_html())
            .or_else(|| Some(doc.root_element().inner_html()))
    }

    fn name(&self) -> &str {
        "body"
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Serialize `doc` with every non-content element detached.
fn strip_non_content(doc: &Html) -> String {
    static NON_CONTENT_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(NON_CONTENT).expect("valid selector"));

    let mut doc = doc.clone();
    let doomed: Vec<_> = doc.select(&NON_CONTENT_SEL).map(|el| el.id()).collect();
    for id in doomed {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
    doc.html()
}

/// Best-effort page title.
fn page_title(doc: &Html) -> Option<String> {
    static OG_SEL: LazyLock<Selector> = LazyLock::new(|| {
        Selector::parse(r#"meta[property="og:title"]"#).expect("valid selector")
    });
    static TITLE_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("title").expect("valid selector"));
    static H1_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("h1").expect("valid selector"));

    let og = doc
        .select(&OG_SEL)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(str::to_string);
    let title = || {
        doc.select(&TITLE_SEL)
            .next()
            .map(|el| el.text().collect::<String>())
    };
    let h1 = || {
        doc.select(&H1_SEL)
            .next()
            .map(|el| el.text().collect::<String>())
    };

    og.or_else(title)
        .or_else(h1)
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

/// Number of non-whitespace characters of visible text in an HTML fragment.
pub(crate) fn visible_text_len(html: &str) -> usize {
    let frag = Html::parse_fragment(html);
    frag.root_element()
        .text()
        .map(|t| t.chars().filter(|c| !c.is_whitespace()).count())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/html")
            .join(name);
        std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("missing fixture {path:?}: {e}"))
    }

    struct Fixed(&'static str, Option<&'static str>);

    impl ExtractionStrategy for Fixed {
        fn extract(&self, _doc: &Html) -> Option<String> {
            self.1.map(str::to_string)
        }
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn chain_skips_short_and_missing_candidates() {
        let chain = ExtractionChain::with_strategies(
            vec![
                Box::new(Fixed("none", None)),
                Box::new(Fixed("short", Some("<p>tiny</p>"))),
                Box::new(Fixed("long", Some("<p>long enough text here</p>"))),
                Box::new(Fixed("never", Some("<p>unused</p>"))),
            ],
            10,
        );
        let out = chain.extract("<html><body></body></html>");
        assert_eq!(out.strategy, "long");
    }

    #[test]
    fn chain_accepts_last_strategy_unconditionally() {
        let chain = ExtractionChain::with_strategies(
            vec![
                Box::new(Fixed("short", Some("<p>a</p>"))),
                Box::new(Fixed("last", Some("<p>b</p>"))),
            ],
            100,
        );
        assert_eq!(chain.extract("<p>x</p>").strategy, "last");
    }

    #[test]
    fn extracts_article_fixture_with_readability() {
        let out = ExtractionChain::new().extract(&fixture("article.html"));
        assert_eq!(out.strategy, "readability");
        assert_eq!(out.title.as_deref(), Some("Supply and Demand"));
        assert!(out.html.contains("equilibrium price"));
        assert!(!out.html.contains("Site navigation"));
        assert!(!out.html.contains("analytics"));
    }

    #[test]
    fn falls_back_to_body_for_thin_pages() {
        let html = "<html><head><title>Note</title></head><body><div>Short note.</div></body></html>";
        let out = ExtractionChain::new().extract(html);
        assert_eq!(out.strategy, "body");
        assert!(out.html.contains("Short note."));
        assert_eq!(out.title.as_deref(), Some("Note"));
    }

    #[test]
    fn non_content_is_stripped_before_strategies() {
        let html = "<html><body><nav>Menu</nav><div>Body text</div><script>track()</script></body></html>";
        let out = ExtractionChain::new().extract(html);
        assert!(!out.html.contains("Menu"));
        assert!(!out.html.contains("track()"));
    }
}
