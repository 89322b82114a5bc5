//! Ordering of normalized items into render elements.
//!
//! A page break goes before every emitted item except the first one and
//! except when the previously emitted item was heading-like. For PDF output,
//! native PDFs and title pages each become their own element and split the
//! surrounding Markdown into separate batches; other formats get a single
//! Markdown stream.

use std::path::PathBuf;

use bindery_shared::ExportFormat;

use crate::normalizer::{Fragment, NormalizedItem};

/// A Markdown fragment in sequence order.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedFragment {
    pub item_id: String,
    pub title: String,
    pub markdown: String,
    pub page_break_before: bool,
}

/// One element of the assembly sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// Consecutive Markdown fragments rendered together.
    Batch(Vec<SequencedFragment>),
    /// An existing PDF, merged as-is.
    Native {
        item_id: String,
        title: String,
        path: PathBuf,
    },
    /// A title page, typeset in isolation.
    TitlePage { item_id: String, markdown: String },
}

/// Builds the assembly sequence one item at a time.
#[derive(Debug)]
pub struct Sequencer {
    format: ExportFormat,
    elements: Vec<Element>,
    batch: Vec<SequencedFragment>,
    emitted: usize,
    previous_heading: bool,
}

impl Sequencer {
    pub fn new(format: ExportFormat) -> Self {
        Self {
            format,
            elements: Vec::new(),
            batch: Vec::new(),
            emitted: 0,
            previous_heading: false,
        }
    }

    /// Append an item. Failed items are never pushed, so they do not affect
    /// page breaks.
    pub fn push(&mut self, item: NormalizedItem) {
        let page_break_before = self.emitted > 0 && !self.previous_heading;
        self.emitted += 1;
        self.previous_heading = item.heading_like;

        match (item.fragment, self.format) {
            (Fragment::Native(path), ExportFormat::Pdf) => {
                self.flush();
                self.elements.push(Element::Native {
                    item_id: item.item_id,
                    title: item.title,
                    path,
                });
            }
            (Fragment::TitlePage(markdown), ExportFormat::Pdf) => {
                self.flush();
                self.elements.push(Element::TitlePage {
                    item_id: item.item_id,
                    markdown,
                });
            }
            (Fragment::Markdown(markdown) | Fragment::TitlePage(markdown), _) => {
                self.batch.push(SequencedFragment {
                    item_id: item.item_id,
                    title: item.title,
                    markdown,
                    page_break_before,
                });
            }
            (Fragment::Native(path), _) => {
                // Only PDF output embeds native artifacts; keep a link otherwise.
                self.batch.push(SequencedFragment {
                    item_id: item.item_id,
                    markdown: format!("[{}](<{}>)", item.title, path.display()),
                    title: item.title,
                    page_break_before,
                });
            }
        }
    }

    pub fn finish(mut self) -> Vec<Element> {
        self.flush();
        self.elements
    }

    fn flush(&mut self) {
        if !self.batch.is_empty() {
            self.elements
                .push(Element::Batch(std::mem::take(&mut self.batch)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(id: &str, heading: bool) -> NormalizedItem {
        NormalizedItem {
            item_id: id.into(),
            title: id.into(),
            heading_like: heading,
            fragment: Fragment::Markdown(format!("content {id}")),
            attribution: None,
        }
    }

    fn native(id: &str) -> NormalizedItem {
        NormalizedItem {
            fragment: Fragment::Native(PathBuf::from(format!("/uploads/{id}.pdf"))),
            ..md(id, false)
        }
    }

    fn breaks(elements: &[Element]) -> Vec<(String, bool)> {
        elements
            .iter()
            .flat_map(|e| match e {
                Element::Batch(frags) => frags
                    .iter()
                    .map(|f| (f.item_id.clone(), f.page_break_before))
                    .collect::<Vec<_>>(),
                _ => vec![],
            })
            .collect()
    }

    #[test]
    fn no_break_after_heading_or_before_first() {
        let mut seq = Sequencer::new(ExportFormat::Epub);
        seq.push(md("h1", true));
        seq.push(md("a", false));
        seq.push(md("b", false));
        seq.push(md("h2", true));
        seq.push(md("h3", true));
        seq.push(md("c", false));
        let elements = seq.finish();

        assert_eq!(elements.len(), 1);
        assert_eq!(
            breaks(&elements),
            vec![
                ("h1".to_string(), false),
                ("a".to_string(), false),
                ("b".to_string(), true),
                ("h2".to_string(), true),
                ("h3".to_string(), false),
                ("c".to_string(), false),
            ]
        );
    }

    #[test]
    fn native_pdf_splits_batches_in_order() {
        let mut seq = Sequencer::new(ExportFormat::Pdf);
        seq.push(md("a", false));
        seq.push(native("p1"));
        seq.push(native("p2"));
        seq.push(md("b", false));
        let elements = seq.finish();

        let order: Vec<String> = elements
            .iter()
            .map(|e| match e {
                Element::Batch(frags) => format!("batch:{}", frags[0].item_id),
                Element::Native { item_id, .. } => format!("native:{item_id}"),
                Element::TitlePage { item_id, .. } => format!("title:{item_id}"),
            })
            .collect();
        assert_eq!(order, ["batch:a", "native:p1", "native:p2", "batch:b"]);
    }

    #[test]
    fn title_page_is_its_own_element_for_pdf() {
        let mut seq = Sequencer::new(ExportFormat::Pdf);
        seq.push(NormalizedItem {
            fragment: Fragment::TitlePage("```{=latex}\n```".into()),
            ..md("t", true)
        });
        seq.push(md("a", false));
        let elements = seq.finish();

        assert!(matches!(elements[0], Element::TitlePage { .. }));
        assert_eq!(breaks(&elements), vec![("a".to_string(), false)]);
    }

    #[test]
    fn non_pdf_keeps_single_stream() {
        let mut seq = Sequencer::new(ExportFormat::Markdown);
        seq.push(md("a", false));
        seq.push(native("p"));
        seq.push(md("b", false));
        let elements = seq.finish();
        assert_eq!(elements.len(), 1);
    }
}
