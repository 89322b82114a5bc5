//! Rule-table boilerplate filter.
//!
//! A [`BoilerplateRules`] value holds two ordered tables:
//!
//! * HTML matchers, applied to the parsed content before Markdown conversion.
//!   Every matched element is detached from the tree.
//! * Line rules, applied to the converted Markdown (outside code fences).
//!   A matching line is either dropped or rewritten.
//!
//! Presets cover generic web articles and encyclopedia pages; callers can
//! extend or build their own tables.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Rule types
// ---------------------------------------------------------------------------

/// Which HTML elements a rule removes.
#[derive(Debug, Clone)]
pub enum HtmlMatcher {
    /// Every element matching a CSS selector.
    Selector(String),
    /// Elements matching `scope` whose whole (whitespace-collapsed) text is at
    /// most `max_len` characters and contains `phrase`, case-insensitively.
    ShortText {
        scope: String,
        phrase: String,
        max_len: usize,
    },
    /// Elements matching the selector with no text and no embedded media.
    Empty(String),
}

impl HtmlMatcher {
    /// Shorthand for [`HtmlMatcher::Selector`].
    pub fn selector(css: impl Into<String>) -> Self {
        Self::Selector(css.into())
    }

    /// Shorthand for [`HtmlMatcher::ShortText`].
    pub fn short_text(scope: impl Into<String>, phrase: impl Into<String>, max_len: usize) -> Self {
        Self::ShortText {
            scope: scope.into(),
            phrase: phrase.into().to_lowercase(),
            max_len,
        }
    }
}

/// What a line rule does with a matching Markdown line.
#[derive(Debug, Clone)]
pub enum LineAction {
    /// Remove the whole line.
    Drop,
    /// Replace every match within the line.
    Replace(String),
}

/// A pattern applied line by line to converted Markdown.
#[derive(Debug, Clone)]
pub struct LineRule {
    pub pattern: Regex,
    pub action: LineAction,
}

impl LineRule {
    /// Build a rule from a regex source. Invalid patterns are rejected.
    pub fn new(pattern: &str, action: LineAction) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(pattern) => Some(Self { pattern, action }),
            Err(e) => {
                warn!(pattern, error = %e, "ignoring invalid line rule");
                None
            }
        }
    }
}

/// Ordered boilerplate rule table.
#[derive(Debug, Clone, Default)]
pub struct BoilerplateRules {
    pub html: Vec<HtmlMatcher>,
    pub lines: Vec<LineRule>,
}

// ---------------------------------------------------------------------------
// Presets
// ---------------------------------------------------------------------------

/// Block containers inspected by phrase rules.
const PHRASE_SCOPE: &str = "div, section, aside, p, ul, li, span";

const WEB_SELECTORS: &[&str] = &[
    "nav",
    "header",
    "footer",
    "aside",
    "form",
    "iframe",
    "noscript",
    "script",
    "style",
    "button",
    r#"[role="navigation"]"#,
    r#"[role="banner"]"#,
    r#"[role="contentinfo"]"#,
    r#"[role="complementary"]"#,
    ".breadcrumb",
    ".breadcrumbs",
    ".share",
    ".sharing",
    r#"[class*="share-"]"#,
    r#"[class*="social"]"#,
    r#"[class*="newsletter"]"#,
    ".subscribe",
    ".related",
    r#"[class*="related-"]"#,
    ".recommended",
    ".comments",
    "#comments",
    ".advertisement",
    ".ad",
    ".ads",
    ".promo",
    r#"[class*="cookie"]"#,
    ".author-bio",
    ".tags",
];

const WEB_PHRASES: &[&str] = &[
    "share this",
    "share on",
    "subscribe to our",
    "sign up for our",
    "newsletter",
    "related articles",
    "related posts",
    "you may also like",
    "you might also like",
    "recommended for you",
    "follow us",
    "we use cookies",
    "advertisement",
    "all rights reserved",
];

const WEB_LINE_DROPS: &[&str] = &[
    r"(?i)^#{1,6}\s*(related (articles|posts|stories|content)|share this( article| post| story)?|more from .*|you (may|might) also like|recommended( for you)?|comments|leave a (comment|reply)|newsletter|sign up.*)\s*$",
    r"(?i)^\s*(share|tweet|pin it|email|print|advertisement)\s*$",
    r"(?i)^\s*\[?skip to (main )?content\]?.*$",
];

const WIKIPEDIA_SELECTORS: &[&str] = &[
    ".infobox",
    ".navbox",
    ".vertical-navbox",
    ".sidebar",
    ".mw-editsection",
    ".hatnote",
    ".metadata",
    ".ambox",
    ".mw-empty-elt",
    ".noprint",
    ".shortdescription",
    "sup.reference",
    "#toc",
    ".toc",
    "style",
    "link",
];

impl BoilerplateRules {
    /// An empty table; conversion keeps everything.
    pub fn none() -> Self {
        Self::default()
    }

    /// Rules for arbitrary web articles.
    pub fn web_defaults() -> Self {
        let mut html: Vec<HtmlMatcher> =
            WEB_SELECTORS.iter().map(|s| HtmlMatcher::selector(*s)).collect();
        html.extend(
            WEB_PHRASES
                .iter()
                .map(|p| HtmlMatcher::short_text(PHRASE_SCOPE, *p, 200)),
        );
        html.push(HtmlMatcher::Empty("p".into()));

        let lines = WEB_LINE_DROPS
            .iter()
            .filter_map(|p| LineRule::new(p, LineAction::Drop))
            .collect();

        Self { html, lines }
    }

    /// Rules for encyclopedia article HTML.
    pub fn wikipedia_defaults() -> Self {
        let mut html: Vec<HtmlMatcher> = WIKIPEDIA_SELECTORS
            .iter()
            .map(|s| HtmlMatcher::selector(*s))
            .collect();
        html.push(HtmlMatcher::Empty("p".into()));

        let lines = [
            LineRule::new(r"^\s*\[edit\]\s*$", LineAction::Drop),
            LineRule::new(r"\s*\[edit\]", LineAction::Replace(String::new())),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self { html, lines }
    }

    /// Append another table's rules after this one's.
    pub fn extend(mut self, other: BoilerplateRules) -> Self {
        self.html.extend(other.html);
        self.lines.extend(other.lines);
        self
    }

    // -----------------------------------------------------------------------
    // Filter passes
    // -----------------------------------------------------------------------

    /// Detach every element matched by the HTML table.
    pub fn apply_html(&self, html: &str) -> String {
        if self.html.is_empty() {
            return html.to_string();
        }

        static MEDIA_SEL: LazyLock<Selector> = LazyLock::new(|| {
            Selector::parse("img, svg, picture, video, audio, math, iframe").expect("valid selector")
        });

        let mut doc = Html::parse_fragment(html);
        let mut doomed = Vec::new();

        for matcher in &self.html {
            match matcher {
                HtmlMatcher::Selector(css) => {
                    let Some(sel) = parse_selector(css) else {
                        continue;
                    };
                    doomed.extend(doc.select(&sel).map(|el| el.id()));
                }
                HtmlMatcher::ShortText {
                    scope,
                    phrase,
                    max_len,
                } => {
                    let Some(sel) = parse_selector(scope) else {
                        continue;
                    };
                    for el in doc.select(&sel) {
                        let text = collapse_whitespace(&el.text().collect::<String>());
                        if text.chars().count() <= *max_len && text.to_lowercase().contains(phrase.as_str())
                        {
                            doomed.push(el.id());
                        }
                    }
                }
                HtmlMatcher::Empty(css) => {
                    let Some(sel) = parse_selector(css) else {
                        continue;
                    };
                    for el in doc.select(&sel) {
                        let has_text = el.text().any(|t| !t.trim().is_empty());
                        if !has_text && el.select(&MEDIA_SEL).next().is_none() {
                            doomed.push(el.id());
                        }
                    }
                }
            }
        }

        if doomed.is_empty() {
            return html.to_string();
        }

        debug!(removed = doomed.len(), "boilerplate elements removed");

        for id in doomed {
            if let Some(mut node) = doc.tree.get_mut(id) {
                node.detach();
            }
        }

        doc.root_element().inner_html()
    }

    /// Apply line rules to Markdown, leaving fenced code untouched.
    pub fn apply_lines(&self, md: &str) -> String {
        if self.lines.is_empty() {
            return md.to_string();
        }

        let mut out: Vec<String> = Vec::new();
        let mut in_code_block = false;

        'lines: for line in md.lines() {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                out.push(line.to_string());
                continue;
            }
            if in_code_block {
                out.push(line.to_string());
                continue;
            }

            let mut current = line.to_string();
            for rule in &self.lines {
                if !rule.pattern.is_match(&current) {
                    continue;
                }
                match &rule.action {
                    LineAction::Drop => continue 'lines,
                    LineAction::Replace(with) => {
                        current = rule.pattern.replace_all(&current, with.as_str()).into_owned();
                    }
                }
            }
            out.push(current);
        }

        out.join("\n")
    }
}

fn parse_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(sel) => Some(sel),
        Err(e) => {
            warn!(selector = css, error = %e, "ignoring invalid boilerplate selector");
            None
        }
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_rule_detaches_elements() {
        let rules = BoilerplateRules {
            html: vec![HtmlMatcher::selector(".ad")],
            lines: Vec::new(),
        };
        let out = rules.apply_html(r#"<p>Keep</p><div class="ad">Buy now</div>"#);
        assert!(out.contains("Keep"));
        assert!(!out.contains("Buy now"));
    }

    #[test]
    fn short_text_rule_ignores_long_blocks() {
        let rules = BoilerplateRules {
            html: vec![HtmlMatcher::short_text("p", "newsletter", 40)],
            lines: Vec::new(),
        };
        let long = "Our newsletter archive from 1990 documents every price change in detail across many markets.";
        let html = format!("<p>Join the Newsletter</p><p>{long}</p>");
        let out = rules.apply_html(&html);
        assert!(!out.contains("Join the Newsletter"));
        assert!(out.contains("archive from 1990"));
    }

    #[test]
    fn empty_rule_keeps_image_paragraphs() {
        let rules = BoilerplateRules {
            html: vec![HtmlMatcher::Empty("p".into())],
            lines: Vec::new(),
        };
        let out = rules.apply_html(r#"<p>  </p><p><img src="a.png"></p><p>Text</p>"#);
        assert!(!out.contains("<p>  </p>"));
        assert!(out.contains("a.png"));
        assert!(out.contains("Text"));
    }

    #[test]
    fn invalid_selector_is_skipped() {
        let rules = BoilerplateRules {
            html: vec![HtmlMatcher::selector("[[["), HtmlMatcher::selector("aside")],
            lines: Vec::new(),
        };
        let out = rules.apply_html("<p>Body</p><aside>Side</aside>");
        assert!(out.contains("Body"));
        assert!(!out.contains("Side"));
    }

    #[test]
    fn line_rules_drop_and_replace() {
        let rules = BoilerplateRules::wikipedia_defaults();
        let md = "## History [edit]\n\n[edit]\n\nText";
        let out = rules.apply_lines(md);
        assert_eq!(out, "## History\n\n\nText");
    }

    #[test]
    fn line_rules_skip_code_fences() {
        let rules = BoilerplateRules::web_defaults();
        let md = "```\nShare\n```\nShare";
        let out = rules.apply_lines(md);
        assert_eq!(out, "```\nShare\n```");
    }

    #[test]
    fn web_defaults_strip_boilerplate_headings() {
        let rules = BoilerplateRules::web_defaults();
        let out = rules.apply_lines("# Title\n\n## You may also like\n\nBody");
        assert!(!out.contains("also like"));
        assert!(out.contains("# Title"));
        assert!(out.contains("Body"));
    }

    #[test]
    fn wikipedia_defaults_remove_chrome() {
        let html = r#"
            <table class="infobox"><tr><td>Born 1723</td></tr></table>
            <p>Adam Smith was an economist.<sup class="reference">[1]</sup></p>
            <h2>Life<span class="mw-editsection">[edit]</span></h2>
            <div class="navbox">Economists navigation</div>
            <p></p>
        "#;
        let out = BoilerplateRules::wikipedia_defaults().apply_html(html);
        assert!(out.contains("Adam Smith was an economist."));
        assert!(!out.contains("Born 1723"));
        assert!(!out.contains("[1]"));
        assert!(!out.contains("[edit]"));
        assert!(!out.contains("Economists navigation"));
        assert!(!out.contains("<p></p>"));
    }
}
