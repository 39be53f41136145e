use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::DynamicImage;

use crate::models::task::ImageFormat;

/// Output settings for compressed copies.
#[derive(Debug, Clone, Copy)]
pub struct CompressSettings {
    /// Longest side allowed, in pixels.
    pub max_pixel: u32,
    pub jpeg_quality: u8,
}

/// Target size fitting `width`×`height` inside a `max_pixel` square, keeping the
/// aspect ratio. `None` when no resize is needed.
pub fn fit_within(width: u32, height: u32, max_pixel: u32) -> Option<(u32, u32)> {
    if max_pixel == 0 || (width <= max_pixel && height <= max_pixel) {
        return None;
    }
    let scale = |side: u32, long: u32| {
        let scaled = u64::from(side) * u64::from(max_pixel) / u64::from(long);
        (scaled as u32).max(1)
    };
    if width > height {
        Some((max_pixel, scale(height, width)))
    } else {
        Some((scale(width, height), max_pixel))
    }
}

/// Decode `bytes`, shrink to `settings.max_pixel` and re-encode in `format`.
///
/// CPU bound; run it on the blocking pool.
pub fn shrink(
    bytes: &[u8],
    format: ImageFormat,
    settings: CompressSettings,
) -> Result<Vec<u8>, ImagingError> {
    let decoded = image::load_from_memory_with_format(bytes, format.codec())?;
    let resized = resize(decoded, settings.max_pixel);
    encode(&resized, format, settings.jpeg_quality)
}

pub fn resize(img: DynamicImage, max_pixel: u32) -> DynamicImage {
    match fit_within(img.width(), img.height(), max_pixel) {
        Some((width, height)) => img.resize_exact(width, height, FilterType::Triangle),
        None => img,
    }
}

pub fn encode(img: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>, ImagingError> {
    let mut buf = Cursor::new(Vec::new());
    match format.codec() {
        image::ImageFormat::Png => {
            let encoder = PngEncoder::new_with_quality(&mut buf, CompressionType::Best, PngFilter::Adaptive);
            img.write_with_encoder(encoder)?;
        }
        _ => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            rgb.write_with_encoder(encoder)?;
        }
    }
    Ok(buf.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum ImagingError {
    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),
}
