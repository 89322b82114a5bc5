//! Rasterization of vector images referenced from Markdown fragments.
//!
//! LaTeX engines cannot embed SVG, so before a PDF render every Markdown
//! image and raw `<img>` tag pointing at an `.svg` is converted to PNG with
//! the first rasterizer that succeeds. An image that cannot be rasterized is
//! replaced by its italic caption.

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use bindery_fetch::{FetchClient, url_hash};
use bindery_markdown::directives;

use crate::images::is_svg;
use crate::tools::Rasterizer;

static MD_IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"!\[(?P<alt>(?:\\.|[^\]\\])*)\]\((?P<target><[^>\n]+>|[^)\s]+)(?:\s+"[^"]*")?\)(?P<attrs>\{[^}\n]*\})?"#,
    )
    .expect("valid regex")
});

static HTML_IMG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["'](?P<src>[^"']+)["'][^>]*>"#)
        .expect("valid regex")
});

static ALT_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\balt\s*=\s*["'](?P<alt>[^"']*)["']"#).expect("valid regex")
});

/// An image reference found in a fragment.
#[derive(Debug)]
struct ImageRef {
    span: Range<usize>,
    target: String,
    alt: String,
    kind: RefKind,
}

#[derive(Debug)]
enum RefKind {
    Markdown { attrs: String },
    Html { src: Range<usize> },
}

/// Rewrites SVG image references to rasterized PNGs.
pub struct SvgResolver<'a> {
    fetch: &'a FetchClient,
    rasterizers: &'a [Arc<dyn Rasterizer>],
    work_dir: &'a Path,
}

impl<'a> SvgResolver<'a> {
    pub fn new(
        fetch: &'a FetchClient,
        rasterizers: &'a [Arc<dyn Rasterizer>],
        work_dir: &'a Path,
    ) -> Self {
        Self {
            fetch,
            rasterizers,
            work_dir,
        }
    }

    /// Return `markdown` with every SVG reference rasterized or replaced.
    pub async fn resolve(&self, markdown: &str) -> String {
        let refs = find_svg_refs(markdown);
        if refs.is_empty() {
            return markdown.to_string();
        }

        let mut done: HashMap<String, Option<PathBuf>> = HashMap::new();
        let mut out = String::with_capacity(markdown.len());
        let mut cursor = 0;

        for image in refs {
            out.push_str(&markdown[cursor..image.span.start]);
            cursor = image.span.end;

            let png = match done.get(&image.target) {
                Some(cached) => cached.clone(),
                None => {
                    let result = match self.rasterize(&image.target).await {
                        Ok(png) => Some(png),
                        Err(reason) => {
                            warn!(target = %image.target, %reason, "vector image replaced by caption");
                            None
                        }
                    };
                    done.insert(image.target.clone(), result.clone());
                    result
                }
            };

            match (png, &image.kind) {
                (Some(png), RefKind::Markdown { attrs }) => {
                    out.push_str(&format!("![{}](<{}>){}", image.alt, png.display(), attrs));
                }
                (Some(png), RefKind::Html { src }) => {
                    let tag = &markdown[image.span.clone()];
                    let src = (src.start - image.span.start)..(src.end - image.span.start);
                    out.push_str(&tag[..src.start]);
                    out.push_str(&png.display().to_string());
                    out.push_str(&tag[src.end..]);
                }
                (None, _) => out.push_str(&directives::image_placeholder(&unescape_alt(&image.alt))),
            }
        }
        out.push_str(&markdown[cursor..]);
        out
    }

    async fn rasterize(&self, target: &str) -> Result<PathBuf, String> {
        if self.rasterizers.is_empty() {
            return Err("no rasterizer available".into());
        }

        let svg = self.local_copy(target).await?;
        let png = self.work_dir.join(format!("{}.png", url_hash(target)));

        let mut last_error = String::new();
        for rasterizer in self.rasterizers {
            match rasterizer.rasterize(&svg, &png).await {
                Ok(()) => {
                    debug!(tool = rasterizer.name(), png = %png.display(), "vector image rasterized");
                    return Ok(png);
                }
                Err(e) => {
                    warn!(tool = rasterizer.name(), error = %e, "rasterizer failed, trying next");
                    last_error = e.to_string();
                }
            }
        }
        Err(last_error)
    }

    async fn local_copy(&self, target: &str) -> Result<PathBuf, String> {
        if target.starts_with("http://") || target.starts_with("https://") {
            let file = self
                .fetch
                .download(target, self.work_dir)
                .await
                .map_err(|e| e.to_string())?;
            return Ok(file.path);
        }

        let raw = target.strip_prefix("file://").unwrap_or(target);
        let path = Path::new(raw);
        let path = if path.is_relative() {
            self.work_dir.join(path)
        } else {
            path.to_path_buf()
        };
        if path.is_file() {
            Ok(path)
        } else {
            Err(format!("{} not found", path.display()))
        }
    }
}

/// SVG image references in source order, without overlaps.
fn find_svg_refs(markdown: &str) -> Vec<ImageRef> {
    let mut refs: Vec<ImageRef> = Vec::new();

    for caps in MD_IMAGE_RE.captures_iter(markdown) {
        let Some(whole) = caps.get(0) else { continue };
        let target = caps["target"]
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string();
        if !is_svg(&target) {
            continue;
        }
        refs.push(ImageRef {
            span: whole.range(),
            target,
            alt: caps["alt"].to_string(),
            kind: RefKind::Markdown {
                attrs: caps.name("attrs").map(|m| m.as_str().to_string()).unwrap_or_default(),
            },
        });
    }

    for caps in HTML_IMG_RE.captures_iter(markdown) {
        let (Some(whole), Some(src)) = (caps.get(0), caps.name("src")) else {
            continue;
        };
        if !is_svg(src.as_str()) {
            continue;
        }
        let alt = ALT_ATTR_RE
            .captures(whole.as_str())
            .map(|a| a["alt"].to_string())
            .unwrap_or_default();
        refs.push(ImageRef {
            span: whole.range(),
            target: src.as_str().to_string(),
            alt,
            kind: RefKind::Html { src: src.range() },
        });
    }

    refs.sort_by_key(|r| r.span.start);
    let mut end = 0;
    refs.retain(|r| {
        let keep = r.span.start >= end;
        if keep {
            end = r.span.end;
        }
        keep
    });
    refs
}

fn unescape_alt(alt: &str) -> String {
    alt.replace("\\[", "[").replace("\\]", "]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolError;
    use async_trait::async_trait;

    struct FakeRasterizer {
        name: &'static str,
        succeed: bool,
    }

    #[async_trait]
    impl Rasterizer for FakeRasterizer {
        fn name(&self) -> &str {
            self.name
        }

        async fn rasterize(&self, _svg: &Path, png: &Path) -> Result<(), ToolError> {
            if !self.succeed {
                return Err(ToolError::Failed {
                    tool: self.name.into(),
                    status: "exit status: 1".into(),
                    stderr: "cannot parse".into(),
                });
            }
            std::fs::write(png, b"png").map_err(|e| ToolError::Io {
                tool: self.name.into(),
                source: e,
            })
        }
    }

    fn tools(list: Vec<FakeRasterizer>) -> Vec<Arc<dyn Rasterizer>> {
        list.into_iter()
            .map(|r| Arc::new(r) as Arc<dyn Rasterizer>)
            .collect()
    }

    #[test]
    fn finds_markdown_and_html_refs() {
        let md = "![Chart](<a b/chart.svg>){width=50%}\n\n![Photo](photo.png)\n\n<img alt=\"Logo\" src=\"logo.svg\">";
        let refs = find_svg_refs(md);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].target, "a b/chart.svg");
        assert_eq!(refs[1].target, "logo.svg");
        assert_eq!(refs[1].alt, "Logo");
    }

    #[tokio::test]
    async fn falls_back_to_second_rasterizer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chart.svg"), "<svg/>").unwrap();
        let fetch = FetchClient::new(5).unwrap();
        let rasterizers = tools(vec![
            FakeRasterizer { name: "broken", succeed: false },
            FakeRasterizer { name: "works", succeed: true },
        ]);

        let resolver = SvgResolver::new(&fetch, &rasterizers, dir.path());
        let out = resolver
            .resolve("Intro\n\n![Chart](chart.svg){width=50%}\n\nOutro")
            .await;

        let png = dir.path().join(format!("{}.png", url_hash("chart.svg")));
        assert!(png.exists());
        assert!(out.contains(&format!("![Chart](<{}>){{width=50%}}", png.display())));
        assert!(out.starts_with("Intro\n\n"));
        assert!(out.ends_with("\n\nOutro"));
    }

    #[tokio::test]
    async fn no_rasterizer_leaves_caption_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = FetchClient::new(5).unwrap();
        let resolver = SvgResolver::new(&fetch, &[], dir.path());

        let out = resolver
            .resolve("![Supply \\[curve\\]](chart.svg)\n\n![Photo](photo.png)")
            .await;
        assert_eq!(out, "*[image: Supply [curve]]*\n\n![Photo](photo.png)");
    }

    #[tokio::test]
    async fn html_img_src_is_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("logo.svg"), "<svg/>").unwrap();
        let fetch = FetchClient::new(5).unwrap();
        let rasterizers = tools(vec![FakeRasterizer { name: "ok", succeed: true }]);

        let resolver = SvgResolver::new(&fetch, &rasterizers, dir.path());
        let out = resolver.resolve(r#"<img class="x" src="logo.svg" alt="Logo">"#).await;
        assert!(out.starts_with(r#"<img class="x" src=""#));
        assert!(out.contains(".png\" alt=\"Logo\">"));
    }

    #[tokio::test]
    async fn missing_local_svg_becomes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let fetch = FetchClient::new(5).unwrap();
        let rasterizers = tools(vec![FakeRasterizer { name: "ok", succeed: true }]);

        let resolver = SvgResolver::new(&fetch, &rasterizers, dir.path());
        let out = resolver.resolve("![Gone](gone.svg)").await;
        assert_eq!(out, "*[image: Gone]*");
    }
}
