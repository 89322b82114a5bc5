//! Raster image preparation for embedding.

use std::path::{Path, PathBuf};

use image::ImageReader;
use image::imageops::FilterType;
use tracing::{debug, warn};

/// True when `reference` (path or URL) names a vector image.
pub fn is_svg(reference: &str) -> bool {
    let path = reference
        .split(['?', '#'])
        .next()
        .unwrap_or(reference)
        .to_ascii_lowercase();
    path.ends_with(".svg") || path.ends_with(".svgz")
}

/// Downscale `path` so neither side exceeds `max_dimension` pixels.
///
/// Returns the path of the image to embed: a scaled copy next to the
/// original, or the original itself when it is small enough, in a format the
/// decoder does not handle, or unreadable.
pub async fn downscale_if_needed(path: &Path, max_dimension: u32) -> PathBuf {
    let source = path.to_path_buf();
    let result =
        tokio::task::spawn_blocking(move || downscale_blocking(&source, max_dimension)).await;

    match result {
        Ok(Ok(Some(scaled))) => scaled,
        Ok(Ok(None)) => path.to_path_buf(),
        Ok(Err(e)) => {
            warn!(path = %path.display(), error = %e, "image left at original size");
            path.to_path_buf()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "image resize task failed");
            path.to_path_buf()
        }
    }
}

fn downscale_blocking(path: &Path, max_dimension: u32) -> image::ImageResult<Option<PathBuf>> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let Some(format) = reader.format() else {
        return Ok(None);
    };

    let (width, height) = reader.into_dimensions()?;
    if width <= max_dimension && height <= max_dimension {
        return Ok(None);
    }

    let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let scaled = img.resize(max_dimension, max_dimension, FilterType::Lanczos3);

    let ext = format.extensions_str().first().copied().unwrap_or("png");
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".into());
    let out = path.with_file_name(format!("{stem}-scaled.{ext}"));
    scaled.save_with_format(&out, format)?;

    debug!(
        from = ?(width, height),
        to = ?(scaled.width(), scaled.height()),
        path = %out.display(),
        "image downscaled"
    );
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage};

    #[test]
    fn svg_detection_ignores_query() {
        assert!(is_svg("https://example.com/chart.svg?v=3"));
        assert!(is_svg("/uploads/Logo.SVG"));
        assert!(!is_svg("https://example.com/photo.png"));
        assert!(!is_svg("https://example.com/svg/photo.jpg"));
    }

    #[tokio::test]
    async fn large_image_is_scaled_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.png");
        RgbImage::new(3000, 1000).save(&path).unwrap();

        let out = downscale_if_needed(&path, 2000).await;
        assert_ne!(out, path);
        let (w, h) = image::open(&out).unwrap().dimensions();
        assert_eq!(w, 2000);
        assert!((666..=667).contains(&h));
    }

    #[tokio::test]
    async fn small_image_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.png");
        RgbImage::new(40, 30).save(&path).unwrap();
        assert_eq!(downscale_if_needed(&path, 2000).await, path);
    }

    #[tokio::test]
    async fn undecodable_image_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();
        assert_eq!(downscale_if_needed(&path, 10).await, path);
    }
}
