//! Core domain types for Bindery exports.
//!
//! Items and project snapshots arrive from the persistence layer as JSON with
//! camelCase keys; job progress is reported back in the same shape.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for export job identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// The kind of content an item holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Heading,
    Titlepage,
    Url,
    Wikipedia,
    Image,
    Pdf,
    Docx,
}

impl ItemType {
    /// Headings and title pages suppress the page break before the next item.
    pub fn is_heading_like(self) -> bool {
        matches!(self, Self::Heading | Self::Titlepage)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heading => "heading",
            Self::Titlepage => "titlepage",
            Self::Url => "url",
            Self::Wikipedia => "wikipedia",
            Self::Image => "image",
            Self::Pdf => "pdf",
            Self::Docx => "docx",
        }
    }
}

/// Per-type options. Every field is optional; unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemOptions {
    /// Heading level (1–6).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    /// Title page subtitle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// Title page author line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Title page date line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Image caption.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Image width in percent of the text width.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
}

/// Previously normalized content supplied by the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedContent {
    /// Normalized markdown for the item.
    pub markdown: String,
    /// When the content was originally fetched.
    pub fetched_at: DateTime<Utc>,
    /// Encyclopedia revision the cache was built from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// One atomic content unit of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(default)]
    pub title: Option<String>,
    /// URL, encyclopedia reference, or local file handle.
    #[serde(default)]
    pub source_ref: Option<String>,
    #[serde(default)]
    pub options: ItemOptions,
    /// Ordering key; ties keep insertion order.
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_content: Option<CachedContent>,
}

impl Item {
    /// Title for display, falling back to `Untitled`.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => "Untitled",
        }
    }
}

/// The read-only project snapshot an export works on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// The user currently editing the project.
    #[serde(default)]
    pub editor: Option<String>,
    /// Set when the project is a derivative copy of someone else's work.
    #[serde(default)]
    pub original_author: Option<String>,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl ProjectSnapshot {
    /// Items in export order: by `position`, ties broken by insertion order.
    pub fn ordered_items(&self) -> Vec<Item> {
        let mut items = self.items.clone();
        // `sort_by_key` is stable, which preserves insertion order on ties.
        items.sort_by_key(|item| item.position);
        items
    }
}

// ---------------------------------------------------------------------------
// Export request
// ---------------------------------------------------------------------------

/// Target document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Epub,
    Markdown,
}

impl ExportFormat {
    /// File extension of the output artifact.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Epub => "epub",
            Self::Markdown => "md",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pdf => "pdf",
            Self::Epub => "epub",
            Self::Markdown => "markdown",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pdf" => Ok(Self::Pdf),
            "epub" => Ok(Self::Epub),
            "markdown" | "md" => Ok(Self::Markdown),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

/// Caller-facing export options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    pub include_toc: bool,
    pub show_page_numbers: bool,
}

// ---------------------------------------------------------------------------
// Job progress
// ---------------------------------------------------------------------------

/// Why an item was left out of the export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FetchError,
    BotProtection,
    MissingLocalFile,
    ConversionError,
    NoExtractableText,
}

/// An item recorded as failed during normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub item_id: String,
    pub title: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Observable state of one export job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub step: u32,
    pub total: u32,
    pub message: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub failed_items: Vec<FailedItem>,
}

impl JobProgress {
    /// Fresh state for a job that has not started yet.
    pub fn queued(total: u32) -> Self {
        Self {
            step: 0,
            total,
            message: "Queued".into(),
            ..Self::default()
        }
    }

    /// `true` once the job finished without a job-level error.
    pub fn succeeded(&self) -> bool {
        self.done && self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// Attribution
// ---------------------------------------------------------------------------

/// Source category of a citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributionKind {
    Wikipedia,
    Web,
    Image,
}

/// One citation collected while normalizing a fetched item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionEntry {
    pub kind: AttributionKind,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    pub accessed: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let s = id.to_string();
        let parsed: JobId = s.parse().expect("parse JobId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn item_deserializes_from_ingestion_shape() {
        let json = r#"{
            "id": "42",
            "type": "image",
            "title": "Diagram",
            "sourceRef": "https://example.com/a.png",
            "options": { "caption": "Supply curve", "width": 60 },
            "createdAt": "2024-03-01T10:00:00Z"
        }"#;
        let item: Item = serde_json::from_str(json).expect("deserialize item");
        assert_eq!(item.item_type, ItemType::Image);
        assert_eq!(item.options.width, Some(60));
        assert_eq!(item.position, 0);
        assert!(item.cached_content.is_none());
    }

    #[test]
    fn ordered_items_is_stable_on_ties() {
        let make = |id: &str, position| Item {
            id: id.into(),
            item_type: ItemType::Heading,
            title: Some(id.into()),
            source_ref: None,
            options: ItemOptions::default(),
            position,
            created_at: None,
            cached_content: None,
        };
        let project = ProjectSnapshot {
            id: "p".into(),
            name: "Project".into(),
            editor: None,
            original_author: None,
            items: vec![make("c", 2), make("a", 1), make("b", 1), make("d", 0)],
        };
        let ids: Vec<String> = project.ordered_items().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn display_title_falls_back() {
        let mut item: Item =
            serde_json::from_str(r#"{"id":"1","type":"url","title":"  "}"#).unwrap();
        assert_eq!(item.display_title(), "Untitled");
        item.title = Some("Hello".into());
        assert_eq!(item.display_title(), "Hello");
    }

    #[test]
    fn export_format_parsing() {
        assert_eq!("PDF".parse::<ExportFormat>().unwrap(), ExportFormat::Pdf);
        assert_eq!("md".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert!("docx".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Epub.extension(), "epub");
    }

    #[test]
    fn progress_serializes_camel_case() {
        let progress = JobProgress {
            output_path: Some(PathBuf::from("/tmp/out.pdf")),
            failed_items: vec![FailedItem {
                item_id: "7".into(),
                title: "Blocked".into(),
                kind: FailureKind::BotProtection,
                reason: "challenge".into(),
            }],
            ..JobProgress::queued(5)
        };
        let json = serde_json::to_string(&progress).expect("serialize");
        assert!(json.contains("\"outputPath\""));
        assert!(json.contains("\"failedItems\""));
        assert!(json.contains("\"bot_protection\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn fixture_project_parses_in_position_order() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/projects/econ101.json");
        let raw = std::fs::read_to_string(&path).expect("read fixture");
        let project: ProjectSnapshot = serde_json::from_str(&raw).expect("parse fixture");

        assert_eq!(project.name, "Econ 101");
        assert!(project.original_author.is_none());
        let types: Vec<ItemType> = project.ordered_items().iter().map(|i| i.item_type).collect();
        assert_eq!(
            types,
            [
                ItemType::Titlepage,
                ItemType::Heading,
                ItemType::Wikipedia,
                ItemType::Image,
                ItemType::Pdf
            ]
        );
        assert_eq!(project.items[3].options.width, Some(60));
    }
}
