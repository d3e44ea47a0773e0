//! Foreground mask extraction from the stitched overview.
//!
//! ```text
//! RGB overview ─► grayscale ─► gaussian blur ─► Otsu threshold
//!                                                    │
//!          mask ◄─ close(21, 5) ◄─ dilate(5, 4) ◄─ erode(5, 4)
//! ```
//!
//! Kernel sizes are in overview pixels, so the mask is meant to be built at
//! the resolution the overview was stitched at.

use image::{imageops, GrayImage, RgbImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::gaussian_blur_f32;
use tracing::debug;

use super::morphology::{close, dilate, erode};

/// Parameters of the mask pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskSettings {
    /// Gaussian sigma in pixels; 0 disables the blur
    pub blur_sigma: f32,
    pub erode_kernel: usize,
    pub erode_iterations: usize,
    pub dilate_kernel: usize,
    pub dilate_iterations: usize,
    pub close_kernel: usize,
    pub close_iterations: usize,
}

impl Default for MaskSettings {
    fn default() -> Self {
        Self {
            // Kernel radius is ceil(2 sigma): a 5x5 smoothing window
            blur_sigma: 1.0,
            erode_kernel: 5,
            erode_iterations: 4,
            dilate_kernel: 5,
            dilate_iterations: 4,
            close_kernel: 21,
            close_iterations: 5,
        }
    }
}

/// Separate wafer material from background substrate.
///
/// Returns a mask with 255 for foreground and 0 for background.
pub fn create_mask(overview: &RgbImage, settings: &MaskSettings) -> GrayImage {
    let gray = imageops::grayscale(overview);
    let blurred = if settings.blur_sigma > 0.0 {
        gaussian_blur_f32(&gray, settings.blur_sigma)
    } else {
        gray
    };
    let level = otsu_level(&blurred);
    debug!(level, "Otsu threshold for overview mask");

    let binary = threshold(&blurred, level, ThresholdType::Binary);
    let opened = dilate(
        &erode(&binary, settings.erode_kernel, settings.erode_iterations),
        settings.dilate_kernel,
        settings.dilate_iterations,
    );
    close(&opened, settings.close_kernel, settings.close_iterations)
}
