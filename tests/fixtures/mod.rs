//! Small real images written on demand.

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::path::{Path, PathBuf};

fn sample(width: u32, height: u32) -> DynamicImage {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    DynamicImage::ImageRgb8(img)
}

/// Write a `width`×`height` image at `dir/rel`, encoded after its extension.
pub fn write_image(dir: &Path, rel: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let format = ImageFormat::from_path(&path).unwrap_or(ImageFormat::Png);
    sample(width, height).save_with_format(&path, format).unwrap();
    path
}

pub fn write_file(dir: &Path, rel: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, contents).unwrap();
    path
}

/// A tiny PNG, handy for driving the OCR client directly.
pub fn png_bytes() -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    sample(16, 16).write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}
