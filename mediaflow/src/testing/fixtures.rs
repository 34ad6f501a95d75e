//! Image fixtures.

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;

/// Encodes a solid-color PNG.
pub fn png_bytes(width: u32, height: u32, color: Rgba<u8>) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, color))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode fixture png");
    bytes
}

/// Writes a solid-color PNG to `path`.
pub fn write_png(path: &Path, width: u32, height: u32, color: Rgba<u8>) {
    std::fs::write(path, png_bytes(width, height, color)).expect("write fixture png");
}
