//! Source citations for the closing section of an export.

use std::collections::HashSet;

use bindery_fetch::WIKIPEDIA_LICENSE;
use bindery_markdown::directives;
use bindery_shared::{AttributionEntry, AttributionKind, ProjectSnapshot};

/// Title of the appended section.
pub const SECTION_TITLE: &str = "Sources and attribution";

/// Citations gathered while items are normalized.
#[derive(Debug, Default)]
pub struct AttributionCollector {
    entries: Vec<AttributionEntry>,
    seen: HashSet<(AttributionKind, String)>,
}

impl AttributionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry. A URL already cited under the same kind is ignored.
    pub fn record(&mut self, entry: AttributionEntry) {
        if self.seen.insert((entry.kind, entry.url.clone())) {
            self.entries.push(entry);
        }
    }

    /// The closing section, or `None` when nothing was fetched.
    pub fn render(&self, project: &ProjectSnapshot) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }

        let mut out = vec![directives::heading(SECTION_TITLE, 1), banner(project)];

        let wiki: Vec<&AttributionEntry> = self.of_kind(AttributionKind::Wikipedia);
        if !wiki.is_empty() {
            out.push(directives::heading("Wikipedia", 2));
            out.push(format!(
                "Text from Wikipedia is available under the {WIKIPEDIA_LICENSE} license. \
                 Articles are cited at the revision that was retrieved."
            ));
            out.push(bullet_list(&wiki));
        }

        let web = self.of_kind(AttributionKind::Web);
        if !web.is_empty() {
            out.push(directives::heading("Web sources", 2));
            out.push(bullet_list(&web));
        }

        let images = self.of_kind(AttributionKind::Image);
        if !images.is_empty() {
            out.push(directives::heading("Images", 2));
            out.push(bullet_list(&images));
        }

        Some(out.join("\n\n"))
    }

    fn of_kind(&self, kind: AttributionKind) -> Vec<&AttributionEntry> {
        self.entries.iter().filter(|e| e.kind == kind).collect()
    }
}

fn banner(project: &ProjectSnapshot) -> String {
    let editor = project.editor.as_deref().filter(|s| !s.trim().is_empty());
    let original = project
        .original_author
        .as_deref()
        .filter(|s| !s.trim().is_empty());

    match (editor, original) {
        (Some(editor), Some(original)) if original != editor => {
            format!("*Compiled by {editor}, based on the work of {original}.*")
        }
        (Some(editor), _) => format!("*Compiled by {editor}.*"),
        (None, Some(original)) => format!("*Based on the work of {original}.*"),
        (None, None) => "*Compiled with Bindery.*".to_string(),
    }
}

fn bullet_list(entries: &[&AttributionEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            let mut line = format!("- {}, <{}>", e.title, e.url);
            if let Some(rev) = &e.revision {
                line.push_str(&format!(", revision {rev}"));
            }
            line.push_str(&format!(", accessed {}", e.accessed.format("%Y-%m-%d")));
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(kind: AttributionKind, title: &str, url: &str) -> AttributionEntry {
        AttributionEntry {
            kind,
            title: title.into(),
            url: url.into(),
            revision: None,
            accessed: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        }
    }

    fn project(editor: Option<&str>, original: Option<&str>) -> ProjectSnapshot {
        ProjectSnapshot {
            id: "p".into(),
            name: "Econ 101".into(),
            editor: editor.map(String::from),
            original_author: original.map(String::from),
            items: vec![],
        }
    }

    #[test]
    fn empty_collector_renders_nothing() {
        let collector = AttributionCollector::new();
        assert!(collector.render(&project(Some("Ada"), None)).is_none());
    }

    #[test]
    fn wikipedia_listed_separately_with_license() {
        let mut collector = AttributionCollector::new();
        let mut wiki = entry(
            AttributionKind::Wikipedia,
            "Supply and demand",
            "https://en.wikipedia.org/w/index.php?title=Supply_and_demand&oldid=42",
        );
        wiki.revision = Some("42".into());
        collector.record(wiki);
        collector.record(entry(AttributionKind::Web, "Blog", "https://blog.example/post"));
        collector.record(entry(AttributionKind::Image, "Curve", "https://img.example/c.png"));

        let section = collector.render(&project(Some("Ada"), None)).unwrap();
        assert!(section.starts_with("# Sources and attribution\n\n*Compiled by Ada.*"));
        assert!(section.contains("## Wikipedia"));
        assert!(section.contains("CC BY-SA 4.0"));
        assert!(section.contains("revision 42, accessed 2024-03-01"));
        let wiki_at = section.find("## Wikipedia").unwrap();
        let web_at = section.find("## Web sources").unwrap();
        let img_at = section.find("## Images").unwrap();
        assert!(wiki_at < web_at && web_at < img_at);
    }

    #[test]
    fn derivative_copy_credits_original_author() {
        let mut collector = AttributionCollector::new();
        collector.record(entry(AttributionKind::Web, "Blog", "https://blog.example/post"));
        let section = collector.render(&project(Some("Ada"), Some("Grace"))).unwrap();
        assert!(section.contains("*Compiled by Ada, based on the work of Grace.*"));
        assert!(!section.contains("## Wikipedia"));
    }

    #[test]
    fn duplicate_urls_are_recorded_once() {
        let mut collector = AttributionCollector::new();
        collector.record(entry(AttributionKind::Web, "A", "https://x.example"));
        collector.record(entry(AttributionKind::Web, "A again", "https://x.example"));
        collector.record(entry(AttributionKind::Image, "A", "https://x.example"));
        let section = collector.render(&project(None, None)).unwrap();
        assert_eq!(section.matches("<https://x.example>").count(), 2);
        assert!(!section.contains("A again"));
    }
}
