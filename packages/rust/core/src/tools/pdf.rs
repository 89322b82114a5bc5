//! PDF command-line tools: merging, text extraction and page counting.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{PageCounter, PdfMerger, TextExtractor, ToolError, run_tool};

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Known merge programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeTool {
    Qpdf,
    Pdfunite,
    Pdftk,
    Ghostscript,
}

impl MergeTool {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "qpdf" => Some(Self::Qpdf),
            "pdfunite" => Some(Self::Pdfunite),
            "pdftk" => Some(Self::Pdftk),
            "gs" | "gswin64c" | "gswin32c" => Some(Self::Ghostscript),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Qpdf => "qpdf",
            Self::Pdfunite => "pdfunite",
            Self::Pdftk => "pdftk",
            Self::Ghostscript => "gs",
        }
    }

    fn args(self, inputs: &[PathBuf], output: &Path) -> Vec<OsString> {
        let inputs = inputs.iter().map(|p| p.clone().into_os_string());
        let mut args: Vec<OsString> = Vec::new();
        match self {
            Self::Qpdf => {
                args.extend([OsString::from("--empty"), OsString::from("--pages")]);
                args.extend(inputs);
                args.push("--".into());
                args.push(output.into());
            }
            Self::Pdfunite => {
                args.extend(inputs);
                args.push(output.into());
            }
            Self::Pdftk => {
                args.extend(inputs);
                args.extend([OsString::from("cat"), OsString::from("output")]);
                args.push(output.into());
            }
            Self::Ghostscript => {
                let mut out = OsString::from("-sOutputFile=");
                out.push(output);
                args.extend([
                    "-dBATCH".into(),
                    "-dNOPAUSE".into(),
                    "-q".into(),
                    "-sDEVICE=pdfwrite".into(),
                    out,
                ]);
                args.extend(inputs);
            }
        }
        args
    }
}

#[derive(Debug, Clone)]
pub struct CommandMerger {
    kind: MergeTool,
    program: PathBuf,
}

impl CommandMerger {
    pub fn new(kind: MergeTool, program: PathBuf) -> Self {
        Self { kind, program }
    }
}

#[async_trait]
impl PdfMerger for CommandMerger {
    fn name(&self) -> &str {
        self.kind.name()
    }

    async fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError> {
        run_tool(self.kind.name(), &self.program, &self.kind.args(inputs, output)).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Text extraction
// ---------------------------------------------------------------------------

/// Known PDF text extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextTool {
    Pdftotext,
    Mutool,
}

impl TextTool {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pdftotext" => Some(Self::Pdftotext),
            "mutool" => Some(Self::Mutool),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Pdftotext => "pdftotext",
            Self::Mutool => "mutool",
        }
    }

    fn args(self, pdf: &Path) -> Vec<OsString> {
        match self {
            Self::Pdftotext => vec!["-enc".into(), "UTF-8".into(), pdf.into(), "-".into()],
            Self::Mutool => vec![
                "draw".into(),
                "-q".into(),
                "-F".into(),
                "txt".into(),
                "-o".into(),
                "-".into(),
                pdf.into(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandTextExtractor {
    kind: TextTool,
    program: PathBuf,
}

impl CommandTextExtractor {
    pub fn new(kind: TextTool, program: PathBuf) -> Self {
        Self { kind, program }
    }
}

#[async_trait]
impl TextExtractor for CommandTextExtractor {
    fn name(&self) -> &str {
        self.kind.name()
    }

    async fn extract_text(&self, pdf: &Path) -> Result<String, ToolError> {
        let stdout = run_tool(self.kind.name(), &self.program, &self.kind.args(pdf)).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

// ---------------------------------------------------------------------------
// Page count
// ---------------------------------------------------------------------------

/// `pdfinfo` page counter.
#[derive(Debug, Clone)]
pub struct PdfInfo {
    program: PathBuf,
}

impl PdfInfo {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

/// The `Pages:` line of `pdfinfo` output.
fn parse_page_count(info: &str) -> Option<u32> {
    info.lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|rest| rest.trim().parse().ok())
}

#[async_trait]
impl PageCounter for PdfInfo {
    fn name(&self) -> &str {
        "pdfinfo"
    }

    async fn count_pages(&self, pdf: &Path) -> Result<u32, ToolError> {
        let stdout = run_tool("pdfinfo", &self.program, &[OsString::from(pdf)]).await?;
        let info = String::from_utf8_lossy(&stdout);
        parse_page_count(&info).ok_or_else(|| ToolError::Failed {
            tool: "pdfinfo".into(),
            status: "ok".into(),
            stderr: "no page count in output".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn merge_args_preserve_input_order() {
        let inputs = vec![PathBuf::from("a.pdf"), PathBuf::from("b.pdf")];
        let out = Path::new("out.pdf");

        assert_eq!(
            strings(MergeTool::Qpdf.args(&inputs, out)),
            ["--empty", "--pages", "a.pdf", "b.pdf", "--", "out.pdf"]
        );
        assert_eq!(
            strings(MergeTool::Pdfunite.args(&inputs, out)),
            ["a.pdf", "b.pdf", "out.pdf"]
        );
        assert_eq!(
            strings(MergeTool::Pdftk.args(&inputs, out)),
            ["a.pdf", "b.pdf", "cat", "output", "out.pdf"]
        );
        let gs = strings(MergeTool::Ghostscript.args(&inputs, out));
        assert!(gs.contains(&"-sOutputFile=out.pdf".to_string()));
        assert_eq!(&gs[gs.len() - 2..], ["a.pdf", "b.pdf"]);
    }

    #[test]
    fn tool_names_resolve() {
        assert_eq!(MergeTool::from_name("gs"), Some(MergeTool::Ghostscript));
        assert_eq!(MergeTool::from_name("cat"), None);
        assert_eq!(TextTool::from_name("mutool"), Some(TextTool::Mutool));
    }

    #[test]
    fn pdftotext_writes_to_stdout() {
        let args = strings(TextTool::Pdftotext.args(Path::new("doc.pdf")));
        assert_eq!(args, ["-enc", "UTF-8", "doc.pdf", "-"]);
    }

    #[test]
    fn parses_pdfinfo_output() {
        let info = "Title:          Reader\nProducer:       xdvipdfmx\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_page_count(info), Some(12));
        assert_eq!(parse_page_count("Title: x\n"), None);
    }
}
