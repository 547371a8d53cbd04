//! Image loading and saving.
//!
//! Reference datasets use non-Latin file names, so images are always read as
//! raw bytes and decoded in memory instead of handing the path to a
//! path-aware decoder.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, ImageFormat};
use tracing::{debug, instrument};

use crate::error::{MatchError, Result};

/// JPEG quality used when writing `.jpg`/`.jpeg` outputs.
pub const JPEG_QUALITY: u8 = 95;

/// Raster extensions recognised when scanning reference directories.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif"];

/// Result of loading one reference image.
///
/// Unlike [`load_image`], this never fails: callers comparing against many
/// references record the outcome and move on.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(DynamicImage),
    Missing,
    Unreadable(String),
}

/// Load and decode an image from disk.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    let bytes = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MatchError::ImageNotFound(path.to_path_buf())
        } else {
            MatchError::ImageDecode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })?;

    let image = image::load_from_memory(&bytes).map_err(|e| MatchError::ImageDecode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    debug!(
        bytes = bytes.len(),
        width = image.width(),
        height = image.height(),
        "Decoded image"
    );
    Ok(image)
}

/// Load an image, mapping every failure to a [`LoadOutcome`] variant.
pub fn try_load(path: &Path) -> LoadOutcome {
    match load_image(path) {
        Ok(image) => LoadOutcome::Loaded(image),
        Err(MatchError::ImageNotFound(_)) => LoadOutcome::Missing,
        Err(e) => LoadOutcome::Unreadable(e.to_string()),
    }
}

/// Grayscale (luma) view of an image.
pub fn to_gray(image: &DynamicImage) -> GrayImage {
    image.to_luma8()
}

/// Whether the path has one of the [`IMAGE_EXTENSIONS`].
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

/// Encode an image with the format implied by the file extension.
///
/// JPEG has no alpha channel, so it is dropped and the image is written at
/// [`JPEG_QUALITY`]. Other formats go through `image`'s default encoders
/// (WebP is lossless).
pub fn encode_for_path(image: &DynamicImage, path: &Path) -> Result<Vec<u8>> {
    let format = ImageFormat::from_path(path).map_err(|e| MatchError::ImageEncode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut buffer = Cursor::new(Vec::new());
    let encoded = match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY);
            rgb.write_with_encoder(encoder)
        }
        ImageFormat::WebP => {
            // The WebP encoder only accepts 8-bit RGB(A).
            DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut buffer, format)
        }
        _ => image.write_to(&mut buffer, format),
    };

    encoded.map_err(|e| MatchError::ImageEncode {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(buffer.into_inner())
}

/// Save an image, creating parent directories as needed.
pub fn save_image(image: &DynamicImage, path: &Path) -> Result<()> {
    let bytes = encode_for_path(image, path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    debug!(path = %path.display(), "Saved image");
    Ok(())
}

/// Re-encode `src` into `dst` (format chosen by `dst`'s extension).
pub fn convert_file(src: &Path, dst: &Path) -> Result<()> {
    let image = load_image(src)?;
    save_image(&image, dst)
}

/// `dir/stem.ext` for a source file, used by batch conversion.
pub fn converted_path(src: &Path, out_dir: &Path, extension: &str) -> PathBuf {
    let stem = src.file_stem().unwrap_or_default();
    out_dir.join(stem).with_extension(extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn sample() -> DynamicImage {
        let img = RgbImage::from_fn(16, 12, |x, y| Rgb([(x * 10) as u8, (y * 20) as u8, 128]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_load_unicode_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("退休人员.png");
        save_image(&sample(), &path).unwrap();

        let loaded = load_image(&path).unwrap();
        assert_eq!((loaded.width(), loaded.height()), (16, 12));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nope.png");
        assert!(matches!(load_image(&path), Err(MatchError::ImageNotFound(_))));
        assert!(matches!(try_load(&path), LoadOutcome::Missing));
    }

    #[test]
    fn test_corrupt_file_is_unreadable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();
        assert!(matches!(try_load(&path), LoadOutcome::Unreadable(_)));
    }

    #[test]
    fn test_convert_png_to_webp() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("icon.png");
        save_image(&sample(), &src).unwrap();

        let dst = converted_path(&src, &temp.path().join("out"), "webp");
        convert_file(&src, &dst).unwrap();

        let bytes = std::fs::read(&dst).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::WebP);
    }

    #[test]
    fn test_has_image_extension() {
        assert!(has_image_extension(Path::new("a/b.PNG")));
        assert!(has_image_extension(Path::new("c.webp")));
        assert!(!has_image_extension(Path::new("monsters_db.json")));
        assert!(!has_image_extension(Path::new("noext")));
    }
}
