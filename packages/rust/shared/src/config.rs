//! Application configuration for Bindery.
//!
//! User config lives at `~/.bindery/bindery.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BinderyError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "bindery.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".bindery";

// ---------------------------------------------------------------------------
// Config structs (matching bindery.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// HTTP fetching.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// External tool chains.
    #[serde(default)]
    pub render: RenderConfig,

    /// Image handling.
    #[serde(default)]
    pub images: ImagesConfig,

    /// Job bookkeeping.
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Where finished exports are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Canonical upload storage, searched by file name when a stored path moved.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    /// Root for per-job temporary directories (empty = system temp dir).
    #[serde(default)]
    pub work_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            storage_dir: default_storage_dir(),
            work_dir: String::new(),
        }
    }
}

fn default_output_dir() -> String {
    "~/bindery-exports".into()
}
fn default_storage_dir() -> String {
    "~/bindery-uploads".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Encyclopedia API endpoint; `{lang}` is replaced by the article language.
    #[serde(default = "default_wikipedia_api")]
    pub wikipedia_api: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            wikipedia_api: default_wikipedia_api(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_wikipedia_api() -> String {
    "https://{lang}.wikipedia.org/w/api.php".into()
}

/// `[render]` section. Every list is tried in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// The pandoc binary used for typesetting and DOCX conversion.
    #[serde(default = "default_pandoc")]
    pub pandoc: String,

    /// Candidate `--pdf-engine` values, highest priority first.
    #[serde(default = "default_pdf_engines")]
    pub pdf_engines: Vec<String>,

    /// Candidate PDF merge tools.
    #[serde(default = "default_merge_tools")]
    pub merge_tools: Vec<String>,

    /// Candidate PDF text extractors.
    #[serde(default = "default_text_extractors")]
    pub text_extractors: Vec<String>,

    /// Candidate SVG rasterizers.
    #[serde(default = "default_rasterizers")]
    pub rasterizers: Vec<String>,

    /// Table-of-contents depth for EPUB and PDF.
    #[serde(default = "default_toc_depth")]
    pub toc_depth: u8,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            pandoc: default_pandoc(),
            pdf_engines: default_pdf_engines(),
            merge_tools: default_merge_tools(),
            text_extractors: default_text_extractors(),
            rasterizers: default_rasterizers(),
            toc_depth: default_toc_depth(),
        }
    }
}

fn default_pandoc() -> String {
    "pandoc".into()
}
fn default_pdf_engines() -> Vec<String> {
    ["xelatex", "lualatex", "pdflatex", "tectonic"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_merge_tools() -> Vec<String> {
    ["qpdf", "pdfunite", "pdftk", "gs"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_text_extractors() -> Vec<String> {
    ["pdftotext", "mutool"].into_iter().map(String::from).collect()
}
fn default_rasterizers() -> Vec<String> {
    ["rsvg-convert", "inkscape", "magick"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_toc_depth() -> u8 {
    2
}

/// `[images]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    /// Raster images larger than this (either side, in pixels) are downscaled.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
        }
    }
}

fn default_max_dimension() -> u32 {
    2000
}

/// `[jobs]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Seconds a finished job stays in the in-memory store.
    #[serde(default = "default_retain_secs")]
    pub retain_secs: u64,

    /// Optional libSQL database for durable job records (empty = memory only).
    #[serde(default)]
    pub database: String,

    /// Days a job record stays in the database (0 = forever).
    #[serde(default = "default_history_days")]
    pub history_days: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retain_secs: default_retain_secs(),
            database: String::new(),
            history_days: default_history_days(),
        }
    }
}

fn default_retain_secs() -> u64 {
    3600
}

fn default_history_days() -> u32 {
    30
}

// ---------------------------------------------------------------------------
// Export config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime export configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Directory receiving finished exports.
    pub output_dir: PathBuf,
    /// Canonical upload storage for name-based file lookup.
    pub storage_dir: PathBuf,
    /// Root for per-job temp dirs; `None` uses the system temp dir.
    pub work_root: Option<PathBuf>,
    /// HTTP timeout in seconds.
    pub fetch_timeout_secs: u64,
    /// Encyclopedia API template.
    pub wikipedia_api: String,
    /// pandoc binary.
    pub pandoc: String,
    /// `--pdf-engine` candidates, highest priority first.
    pub pdf_engines: Vec<String>,
    /// Merge tool candidates.
    pub merge_tools: Vec<String>,
    /// PDF text extractor candidates.
    pub text_extractors: Vec<String>,
    /// SVG rasterizer candidates.
    pub rasterizers: Vec<String>,
    /// TOC depth.
    pub toc_depth: u8,
    /// Maximum raster image side in pixels.
    pub max_image_dimension: u32,
    /// Seconds to keep finished jobs in memory.
    pub retain_secs: u64,
}

impl From<&AppConfig> for ExportConfig {
    fn from(config: &AppConfig) -> Self {
        let work_root = if config.defaults.work_dir.trim().is_empty() {
            None
        } else {
            Some(expand_home(&config.defaults.work_dir))
        };

        Self {
            output_dir: expand_home(&config.defaults.output_dir),
            storage_dir: expand_home(&config.defaults.storage_dir),
            work_root,
            fetch_timeout_secs: config.fetch.timeout_secs,
            wikipedia_api: config.fetch.wikipedia_api.clone(),
            pandoc: config.render.pandoc.clone(),
            pdf_engines: config.render.pdf_engines.clone(),
            merge_tools: config.render.merge_tools.clone(),
            text_extractors: config.render.text_extractors.clone(),
            rasterizers: config.render.rasterizers.clone(),
            toc_depth: config.render.toc_depth,
            max_image_dimension: config.images.max_dimension,
            retain_secs: config.jobs.retain_secs,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.bindery/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BinderyError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.bindery/bindery.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BinderyError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| BinderyError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BinderyError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| BinderyError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BinderyError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("output_dir"));
        assert!(toml_str.contains("xelatex"));
        assert!(toml_str.contains("qpdf"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.render.toc_depth, 2);
        assert_eq!(parsed.images.max_dimension, 2000);
        assert_eq!(parsed.render.pdf_engines[0], "xelatex");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[render]
pdf_engines = ["tectonic"]

[images]
max_dimension = 1200
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.render.pdf_engines, vec!["tectonic"]);
        assert_eq!(config.render.pandoc, "pandoc");
        assert_eq!(config.images.max_dimension, 1200);
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.jobs.history_days, 30);
    }

    #[test]
    fn export_config_from_app_config() {
        let app = AppConfig::default();
        let export = ExportConfig::from(&app);
        assert!(export.work_root.is_none());
        assert_eq!(export.fetch_timeout_secs, 30);
        assert_eq!(export.merge_tools.len(), 4);
        assert_eq!(export.retain_secs, 3600);
    }

    #[test]
    fn expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/var/data"), PathBuf::from("/var/data"));
        assert_eq!(expand_home("relative/dir"), PathBuf::from("relative/dir"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/exports"), home.join("exports"));
        }
    }
}
