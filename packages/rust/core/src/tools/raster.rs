//! Vector-to-raster converters.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Rasterizer, ToolError, run_tool};

/// Output resolution for rasterized vector images.
const DPI: u32 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterTool {
    RsvgConvert,
    Inkscape,
    ImageMagick,
}

impl RasterTool {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rsvg-convert" => Some(Self::RsvgConvert),
            "inkscape" => Some(Self::Inkscape),
            "magick" | "convert" => Some(Self::ImageMagick),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::RsvgConvert => "rsvg-convert",
            Self::Inkscape => "inkscape",
            Self::ImageMagick => "magick",
        }
    }

    fn args(self, svg: &Path, png: &Path) -> Vec<OsString> {
        match self {
            Self::RsvgConvert => vec![
                "--format=png".into(),
                format!("--dpi-x={DPI}").into(),
                format!("--dpi-y={DPI}").into(),
                "-o".into(),
                png.into(),
                svg.into(),
            ],
            Self::Inkscape => {
                let mut out = OsString::from("--export-filename=");
                out.push(png);
                vec![
                    svg.into(),
                    "--export-type=png".into(),
                    format!("--export-dpi={DPI}").into(),
                    out,
                ]
            }
            Self::ImageMagick => vec![
                "-density".into(),
                DPI.to_string().into(),
                svg.into(),
                png.into(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRasterizer {
    kind: RasterTool,
    program: PathBuf,
}

impl CommandRasterizer {
    pub fn new(kind: RasterTool, program: PathBuf) -> Self {
        Self { kind, program }
    }
}

#[async_trait]
impl Rasterizer for CommandRasterizer {
    fn name(&self) -> &str {
        self.kind.name()
    }

    async fn rasterize(&self, svg: &Path, png: &Path) -> Result<(), ToolError> {
        run_tool(self.kind.name(), &self.program, &self.kind.args(svg, png)).await?;
        if !png.exists() {
            return Err(ToolError::Failed {
                tool: self.kind.name().into(),
                status: "ok".into(),
                stderr: format!("no output written to {}", png.display()),
            });
        }
        Ok(())
    }
}
