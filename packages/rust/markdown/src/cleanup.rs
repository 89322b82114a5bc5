//! Tidying of converted Markdown, and fragment shaping for assembly.
//!
//! [`run_pipeline`] makes one pass over the prose lines (fenced code is
//! copied verbatim), then collapses blank runs. [`shift_headings`] and
//! [`strip_leading_title`] nest a fragment under the item heading.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

static ATX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})(\s+.*)$").expect("valid regex"));

/// Layout wrappers that carry no meaning in a compiled document.
static WRAPPER_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary|main|font|center)(?:\s[^>]*)?>",
    )
    .expect("valid regex")
});

/// `language-js`, `lang-python` and `highlight-rust` fence hints.
static FENCE_HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
});

/// `[text](href "title")`, also matching the tail of an image.
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[([^\]]*)\]\(([^)\s]+)((?:\s+"[^"]*")?)\)"#).expect("valid regex")
});

static BLANK_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Tidy freshly converted Markdown; the result ends with one newline.
pub(crate) fn run_pipeline(md: &str, base_url: Option<&Url>) -> String {
    let mut fences = Fences::default();
    let mut seen_h1 = false;

    let lines: Vec<String> = md
        .lines()
        .map(|line| {
            if fences.is_marker(line) {
                return FENCE_HINT_RE.replace(line.trim_end(), "$1```$2").into_owned();
            }
            if fences.open {
                return line.trim_end().to_string();
            }
            tidy_prose_line(line, &mut seen_h1, base_url)
        })
        .collect();

    let joined = lines.join("\n");
    let collapsed = BLANK_RUN_RE.replace_all(joined.trim_matches('\n'), "\n\n");
    format!("{collapsed}\n")
}

/// Only the first H1 survives; wrappers go, relative links become absolute.
fn tidy_prose_line(line: &str, seen_h1: &mut bool, base_url: Option<&Url>) -> String {
    let line = WRAPPER_TAG_RE.replace_all(line, "");
    let line = line.trim_end();

    let demoted = match ATX_RE.captures(line) {
        Some(caps) if &caps[1] == "#" => {
            let repeat = std::mem::replace(seen_h1, true);
            repeat.then(|| format!("##{}", &caps[2]))
        }
        _ => None,
    };
    let line = demoted.as_deref().unwrap_or(line);

    match base_url {
        Some(base) => absolutize_links(line, base),
        None => line.to_string(),
    }
}

fn absolutize_links(line: &str, base: &Url) -> String {
    LINK_RE
        .replace_all(line, |caps: &Captures| {
            let href = &caps[2];
            if is_absolute_href(href) {
                return caps[0].to_string();
            }
            match base.join(href) {
                Ok(resolved) => format!("[{}]({resolved}{})", &caps[1], &caps[3]),
                Err(_) => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn is_absolute_href(href: &str) -> bool {
    href.starts_with('#')
        || ["http://", "https://", "mailto:", "data:"]
            .iter()
            .any(|scheme| href.starts_with(scheme))
}

/// Tracks whether the current line sits inside a fenced code block.
#[derive(Default)]
struct Fences {
    open: bool,
}

impl Fences {
    /// True when `line` opens or closes a fence.
    fn is_marker(&mut self, line: &str) -> bool {
        let marker = line.trim_start().starts_with("```");
        if marker {
            self.open = !self.open;
        }
        marker
    }
}

// ---------------------------------------------------------------------------
// Fragment shaping
// ---------------------------------------------------------------------------

/// Shift every ATX heading so the shallowest one lands on `min_level`.
///
/// Headings never go deeper than level 6; fenced code is left alone.
pub fn shift_headings(md: &str, min_level: usize) -> String {
    let min_level = min_level.clamp(1, 6);

    let mut shallowest: Option<usize> = None;
    for_each_prose_line(md, |line| {
        if let Some(caps) = ATX_RE.captures(line) {
            let level = caps[1].len();
            shallowest = Some(shallowest.map_or(level, |s| s.min(level)));
        }
    });

    let Some(shallowest) = shallowest else {
        return md.to_string();
    };
    if shallowest >= min_level {
        return md.to_string();
    }
    let offset = min_level - shallowest;

    let mut fences = Fences::default();
    md.lines()
        .map(|line| {
            if fences.is_marker(line) || fences.open {
                return line.to_string();
            }
            match ATX_RE.captures(line) {
                Some(caps) => {
                    let level = (caps[1].len() + offset).min(6);
                    format!("{}{}", "#".repeat(level), &caps[2])
                }
                None => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drop a leading heading whose text equals `title` (case-insensitive).
///
/// Pages usually repeat their own title as an H1, which would duplicate the
/// heading the assembler emits for the item.
pub fn strip_leading_title(md: &str, title: &str) -> String {
    let trimmed = md.trim_start();
    let Some(first_line) = trimmed.lines().next() else {
        return md.to_string();
    };

    if let Some(caps) = ATX_RE.captures(first_line) {
        if caps[2].trim().eq_ignore_ascii_case(title.trim()) {
            let rest = &trimmed[first_line.len()..];
            return rest.trim_start_matches(['\n', '\r']).to_string();
        }
    }

    md.to_string()
}

fn for_each_prose_line(md: &str, mut f: impl FnMut(&str)) {
    let mut fences = Fences::default();
    for line in md.lines() {
        if !fences.is_marker(line) && !fences.open {
            f(line);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tidy(md: &str) -> String {
        run_pipeline(md, None)
    }

    #[test]
    fn only_first_h1_survives() {
        assert_eq!(
            tidy("# Title\n\nText\n\n# Another\n\n## Sub"),
            "# Title\n\nText\n\n## Another\n\n## Sub\n"
        );
    }

    #[test]
    fn blank_runs_collapse_to_one_line() {
        assert_eq!(tidy("\n\nLine 1\n\n\n\n\nLine 2\n\n\n"), "Line 1\n\nLine 2\n");
    }

    #[test]
    fn wrappers_are_dropped_outside_code() {
        let out = tidy("<div class=\"note\">Keep this</div>  \n\n```html\n<div>Preserved</div>\n```");
        assert_eq!(out, "Keep this\n\n```html\n<div>Preserved</div>\n```\n");
    }

    #[test]
    fn fence_hints_lose_their_prefix() {
        assert!(tidy("```language-python\nprint('hi')\n```").starts_with("```python\n"));
        assert_eq!(tidy("```rust\nfn main() {}\n```"), "```rust\nfn main() {}\n```\n");
    }

    #[test]
    fn headings_inside_code_are_left_alone() {
        let out = tidy("# One\n\n```\n# two\n```\n\n# Three");
        assert_eq!(out, "# One\n\n```\n# two\n```\n\n## Three\n");
    }

    #[test]
    fn relative_links_are_resolved() {
        let base = Url::parse("https://example.com/blog/post").unwrap();
        let out = run_pipeline(
            "[Next](/api/ref) [Other](https://other.com/p) [Top](#top)\n\n![Chart](img/c.png \"Figure 1\")",
            Some(&base),
        );
        assert_eq!(
            out,
            "[Next](https://example.com/api/ref) [Other](https://other.com/p) [Top](#top)\n\n![Chart](https://example.com/blog/img/c.png \"Figure 1\")\n"
        );
    }

    #[test]
    fn links_in_code_are_not_resolved() {
        let base = Url::parse("https://example.com/").unwrap();
        let out = run_pipeline("```\n[x](y)\n```", Some(&base));
        assert_eq!(out, "```\n[x](y)\n```\n");
    }

    #[test]
    fn shift_headings_moves_top_level_down() {
        let input = "# Intro\n\n## Detail\n\n```\n# not a heading\n```";
        let result = shift_headings(input, 2);
        assert_eq!(result, "## Intro\n\n### Detail\n\n```\n# not a heading\n```");
    }

    #[test]
    fn shift_headings_clamps_at_six() {
        let result = shift_headings("# A\n###### F", 3);
        assert_eq!(result, "### A\n###### F");
    }

    #[test]
    fn shift_headings_keeps_deep_content() {
        let input = "### Already deep";
        assert_eq!(shift_headings(input, 2), input);
    }

    #[test]
    fn strip_leading_title_removes_duplicate() {
        let input = "\n# Supply and Demand\n\nBody text";
        assert_eq!(strip_leading_title(input, "supply and demand"), "Body text");
        assert_eq!(strip_leading_title("Body", "Body"), "Body");
        assert_eq!(strip_leading_title("# Other\n\nX", "Title"), "# Other\n\nX");
    }

}
