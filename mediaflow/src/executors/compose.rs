//! Watermark compositing.
//!
//! Pure image work with no I/O except [`write_jpeg_atomic`]. Everything here
//! is CPU-bound and meant to run on a blocking thread.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageError, RgbaImage};
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Default JPEG quality for artifacts.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Errors raised while compositing or writing an artifact.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// The source image could not be decoded.
    #[error("Source image is not decodable: {0}")]
    InvalidSource(#[source] ImageError),

    /// The watermark could not be decoded.
    #[error("Watermark is not decodable: {0}")]
    InvalidWatermark(#[source] ImageError),

    /// JPEG encoding failed.
    #[error("Failed to encode artifact: {0}")]
    Encode(#[source] ImageError),

    /// Writing the artifact failed.
    #[error("Failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a scaled watermark lands on the base image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Left edge in pixels.
    pub x: u32,
    /// Top edge in pixels.
    pub y: u32,
    /// Scaled watermark width.
    pub width: u32,
    /// Scaled watermark height.
    pub height: u32,
}

/// Scales `(width, height)` down to fit inside `(max_width, max_height)`.
///
/// Preserves aspect ratio and never scales up. Each side is at least 1.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = (f64::from(max_width) / f64::from(width))
        .min(f64::from(max_height) / f64::from(height));
    let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).max(1);
    (
        scaled(width).min(max_width.max(1)),
        scaled(height).min(max_height.max(1)),
    )
}

/// Top-right corner position for a mark of `mark_width` on a base of `base_width`.
///
/// The horizontal position is clamped at 0 when the mark plus margin is
/// wider than the base.
#[must_use]
pub const fn watermark_position(base_width: u32, mark_width: u32, margin: u32) -> (u32, u32) {
    (
        base_width.saturating_sub(mark_width.saturating_add(margin)),
        margin,
    )
}

/// Largest box a watermark may occupy on a `width` x `height` base.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn max_watermark_box(width: u32, height: u32, fraction: f32) -> (u32, u32) {
    let side = |len: u32| ((f64::from(len) * f64::from(fraction)).floor() as u32).max(1);
    (side(width), side(height))
}

/// Decodes both images and overlays the scaled watermark in the top-right corner.
///
/// # Errors
///
/// Returns [`ComposeError::InvalidSource`] or [`ComposeError::InvalidWatermark`]
/// when either input cannot be decoded.
pub fn composite_watermark(
    source: &[u8],
    watermark: &[u8],
    max_fraction: f32,
    margin: u32,
) -> Result<(RgbaImage, Placement), ComposeError> {
    let base = image::load_from_memory(source).map_err(ComposeError::InvalidSource)?;
    let mark = image::load_from_memory(watermark).map_err(ComposeError::InvalidWatermark)?;
    Ok(overlay_watermark(&base, &mark, max_fraction, margin))
}

/// Overlays `mark` on `base`, alpha-blending with the mark's alpha channel.
#[must_use]
pub fn overlay_watermark(
    base: &DynamicImage,
    mark: &DynamicImage,
    max_fraction: f32,
    margin: u32,
) -> (RgbaImage, Placement) {
    let mut canvas = base.to_rgba8();
    let (base_w, base_h) = canvas.dimensions();

    let (max_w, max_h) = max_watermark_box(base_w, base_h, max_fraction);
    let (mark_w, mark_h) = fit_within(mark.width(), mark.height(), max_w, max_h);

    let mark = if (mark_w, mark_h) == (mark.width(), mark.height()) {
        mark.to_rgba8()
    } else {
        imageops::resize(&mark.to_rgba8(), mark_w, mark_h, FilterType::Lanczos3)
    };

    let (x, y) = watermark_position(base_w, mark_w, margin);
    imageops::overlay(&mut canvas, &mark, i64::from(x), i64::from(y));

    (
        canvas,
        Placement {
            x,
            y,
            width: mark_w,
            height: mark_h,
        },
    )
}

/// Encodes `image` as JPEG and moves it to `path` in one rename.
///
/// The temporary file lives next to `path`, so a crash leaves either the
/// previous artifact or the complete new one.
///
/// # Errors
///
/// Returns an error if encoding or any filesystem step fails.
pub fn write_jpeg_atomic(image: &RgbaImage, path: &Path, quality: u8) -> Result<(), ComposeError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();

    let temp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        JpegEncoder::new_with_quality(&mut writer, quality)
            .encode_image(&rgb)
            .map_err(ComposeError::Encode)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| ComposeError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: Rgba<u8>) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, color);
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_fit_within_keeps_small_images() {
        assert_eq!(fit_within(184, 60, 200, 160), (184, 60));
    }

    #[test]
    fn test_fit_within_scales_down_preserving_aspect() {
        assert_eq!(fit_within(400, 100, 200, 160), (200, 50));
        assert_eq!(fit_within(100, 400, 200, 160), (40, 160));
    }

    #[test]
    fn test_fit_within_never_zero() {
        assert_eq!(fit_within(1000, 1, 10, 10), (10, 1));
    }

    #[test]
    fn test_watermark_position_top_right() {
        assert_eq!(watermark_position(1000, 184, 10), (806, 10));
    }

    #[test]
    fn test_watermark_position_clamped() {
        assert_eq!(watermark_position(50, 45, 10), (0, 10));
    }

    #[test]
    fn test_max_watermark_box() {
        assert_eq!(max_watermark_box(1000, 800, 0.2), (200, 160));
        assert_eq!(max_watermark_box(3, 3, 0.2), (1, 1));
    }

    #[test]
    fn test_composite_places_mark_top_right() {
        let source = png_bytes(1000, 800, Rgba([0, 0, 255, 255]));
        let mark = png_bytes(400, 100, Rgba([255, 0, 0, 255]));

        let (canvas, placement) = composite_watermark(&source, &mark, 0.2, 10).unwrap();

        assert_eq!(canvas.dimensions(), (1000, 800));
        assert_eq!(
            placement,
            Placement {
                x: 790,
                y: 10,
                width: 200,
                height: 50
            }
        );
        assert_eq!(canvas.get_pixel(800, 20), &Rgba([255, 0, 0, 255]));
        assert_eq!(canvas.get_pixel(5, 5), &Rgba([0, 0, 255, 255]));
        assert_eq!(canvas.get_pixel(995, 20), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_transparent_mark_leaves_base() {
        let source = png_bytes(100, 100, Rgba([0, 255, 0, 255]));
        let mark = png_bytes(10, 10, Rgba([255, 0, 0, 0]));

        let (canvas, _) = composite_watermark(&source, &mark, 0.2, 10).unwrap();
        assert_eq!(canvas.get_pixel(85, 15), &Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn test_invalid_source_rejected() {
        let mark = png_bytes(10, 10, Rgba([255, 0, 0, 255]));
        let err = composite_watermark(b"not an image", &mark, 0.2, 10).unwrap_err();
        assert!(matches!(err, ComposeError::InvalidSource(_)));
    }

    #[test]
    fn test_invalid_watermark_rejected() {
        let source = png_bytes(10, 10, Rgba([255, 0, 0, 255]));
        let err = composite_watermark(&source, b"<html>", 0.2, 10).unwrap_err();
        assert!(matches!(err, ComposeError::InvalidWatermark(_)));
    }

    #[test]
    fn test_write_jpeg_atomic_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jpg");
        std::fs::write(&path, b"old").unwrap();

        let img = RgbaImage::from_pixel(32, 16, Rgba([10, 20, 30, 255]));
        write_jpeg_atomic(&img, &path, DEFAULT_JPEG_QUALITY).unwrap();

        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 16));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
