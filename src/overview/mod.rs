//! Overview image, foreground mask and scan-area map.
//!
//! # Pipeline
//!
//! ```text
//! dense tiles ──► ImageStitcher ──► OverviewImage ──► create_mask ──► AreaMapBuilder
//!  (Pictures)      (natural sort,                     (blur, Otsu,     (cell occupancy,
//!                   snake undo,                        morphology)      cleanup, labels)
//!                   trim)                                                    │
//!                                                                            ▼
//!                                                                      ScanAreaMap
//! ```

mod area_map;
mod labeling;
mod mask;
pub mod morphology;
mod stitcher;

use image::RgbImage;

pub use area_map::{AreaMapBuilder, AreaMapSettings, ScanAreaMap};
pub use labeling::label_components;
pub use mask::{create_mask, MaskSettings};
pub use stitcher::{compress_overview, ImageStitcher, StitchSettings, COMPRESSED_OVERVIEW_SIZE};

/// A stitched overview together with the physical extent it covers.
#[derive(Debug, Clone)]
pub struct OverviewImage {
    image: RgbImage,
    extent_mm: (f64, f64),
}

impl OverviewImage {
    pub fn new(image: RgbImage, extent_mm: (f64, f64)) -> Self {
        Self { image, extent_mm }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn extent_mm(&self) -> (f64, f64) {
        self.extent_mm
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Pixels per mm along `(x, y)`.
    pub fn pixels_per_mm(&self) -> (f64, f64) {
        let (width, height) = self.dimensions();
        (
            width as f64 / self.extent_mm.0,
            height as f64 / self.extent_mm.1,
        )
    }

    /// Resized copy covering the same extent.
    pub fn compressed(&self) -> OverviewImage {
        OverviewImage::new(compress_overview(&self.image), self.extent_mm)
    }
}
