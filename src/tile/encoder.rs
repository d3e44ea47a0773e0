//! Image encoding for persisted tiles and overview products.
//!
//! Raw tiles, masks and maps are written losslessly as PNG. Products meant for
//! viewing or transport (the compressed overview, annotated flake images) are
//! JPEG at a configurable quality.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageBuffer, ImageError, Pixel, RgbImage};

use crate::error::StorageError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// JPEG Encoder
// =============================================================================

/// JPEG encoder with a fixed quality.
#[derive(Debug, Clone, Copy)]
pub struct JpegTileEncoder {
    quality: u8,
}

impl Default for JpegTileEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl JpegTileEncoder {
    /// Create an encoder. Out-of-range qualities are clamped.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: clamp_quality(quality),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Encode an RGB image to JPEG bytes.
    pub fn encode(&self, image: &RgbImage) -> Result<Bytes, ImageError> {
        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, self.quality);
        encoder.encode_image(image)?;
        Ok(Bytes::from(output))
    }

    /// Encode and write to `path`.
    pub fn write(&self, image: &RgbImage, path: &Path) -> Result<(), StorageError> {
        let bytes = self.encode(image).map_err(|e| StorageError::image(path, e))?;
        std::fs::write(path, &bytes).map_err(|e| StorageError::io(path, e))
    }

    /// Round-trip `image` through the encoder, returning what a reader of the
    /// written file would see.
    pub fn compress(&self, image: &RgbImage) -> Result<RgbImage, ImageError> {
        let bytes = self.encode(image)?;
        let decoded = image::load(Cursor::new(bytes.as_ref()), image::ImageFormat::Jpeg)?;
        Ok(decoded.to_rgb8())
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Write any image losslessly as PNG.
pub fn write_png<P>(image: &ImageBuffer<P, Vec<P::Subpixel>>, path: &Path) -> Result<(), StorageError>
where
    P: Pixel + image::PixelWithColorType,
    [P::Subpixel]: image::EncodableLayout,
{
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| StorageError::image(path, e))
}

/// Load an image from disk as 8-bit RGB.
pub fn read_rgb(path: &Path) -> Result<RgbImage, StorageError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|e| StorageError::image(path, e))
}

/// Shrink an image by an integer factor using bilinear filtering.
///
/// Output dimensions truncate, so a 1921 px wide tile with factor 4 becomes
/// 480 px.
pub fn downscale(image: &RgbImage, factor: u32) -> RgbImage {
    if factor <= 1 {
        return image.clone();
    }
    let width = (image.width() / factor).max(1);
    let height = (image.height() / factor).max(1);
    image::imageops::resize(image, width, height, FilterType::Triangle)
}

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}
