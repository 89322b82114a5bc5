//! pandoc adapters: typesetting (PDF via a LaTeX engine, EPUB) and DOCX import.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use bindery_shared::ExportFormat;

use super::{DocumentConverter, RenderRequest, ToolError, Typesetter, run_tool};

const PDF_MARGIN: &str = "geometry:margin=2.5cm";

/// pandoc, optionally bound to one `--pdf-engine`.
#[derive(Debug, Clone)]
pub struct PandocTypesetter {
    program: PathBuf,
    engine: Option<String>,
    name: String,
}

impl PandocTypesetter {
    pub fn pdf(program: PathBuf, engine: impl Into<String>) -> Self {
        let engine = engine.into();
        Self {
            program,
            name: engine.clone(),
            engine: Some(engine),
        }
    }

    pub fn epub(program: PathBuf) -> Self {
        Self {
            program,
            engine: None,
            name: "pandoc".into(),
        }
    }

    fn args(&self, req: &RenderRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            req.input.clone().into(),
            "-o".into(),
            req.output.clone().into(),
            "--from=markdown".into(),
            "--standalone".into(),
        ];
        let mut resource_path = OsString::from("--resource-path=");
        resource_path.push(&req.resource_dir);
        args.push(resource_path);

        match req.format {
            ExportFormat::Pdf => {
                if let Some(engine) = &self.engine {
                    args.push(format!("--pdf-engine={engine}").into());
                }
                args.push("-V".into());
                args.push(PDF_MARGIN.into());
                if req.empty_page_style || !req.page_numbers {
                    args.push("-V".into());
                    args.push("pagestyle=empty".into());
                }
            }
            ExportFormat::Epub => {
                args.push(format!("--metadata=title:{}", req.title).into());
                if let Some(css) = &req.stylesheet {
                    let mut flag = OsString::from("--css=");
                    flag.push(css);
                    args.push(flag);
                }
            }
            ExportFormat::Markdown => {}
        }

        if req.toc {
            args.push("--toc".into());
            args.push(format!("--toc-depth={}", req.toc_depth).into());
        }
        args
    }
}

#[async_trait]
impl Typesetter for PandocTypesetter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn render(&self, request: &RenderRequest) -> Result<(), ToolError> {
        run_tool(&self.name, &self.program, &self.args(request)).await?;
        Ok(())
    }
}

/// pandoc as a DOCX → Markdown converter.
#[derive(Debug, Clone)]
pub struct PandocConverter {
    program: PathBuf,
}

impl PandocConverter {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

#[async_trait]
impl DocumentConverter for PandocConverter {
    fn name(&self) -> &str {
        "pandoc"
    }

    async fn to_markdown(&self, input: &Path, media_dir: &Path) -> Result<String, ToolError> {
        let mut extract = OsString::from("--extract-media=");
        extract.push(media_dir);
        let args: Vec<OsString> = vec![
            input.into(),
            "--from=docx".into(),
            "--to=markdown-raw_html-native_divs-native_spans".into(),
            "--wrap=none".into(),
            extract,
        ];
        let stdout = run_tool("pandoc", &self.program, &args).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}
