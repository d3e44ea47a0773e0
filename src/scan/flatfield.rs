use std::path::Path;

use image::{Rgb, RgbImage};
use tracing::{debug, warn};

use crate::error::{PreconditionError, ScanError};
use crate::tile::read_rgb;

/// Ceiling applied to corrected pixel values.
pub const CORRECTED_CEILING: u8 = 241;

/// Illumination correction applied to every tile before detection.
pub trait VignetteCorrector: Send + Sync {
    fn remove_vignette(&self, image: &RgbImage) -> RgbImage;
}

/// Divides each tile by a reference flatfield and rescales by its mean.
///
/// Per channel: `min(image / flatfield * mean(flatfield), 241)`.
#[derive(Debug, Clone)]
pub struct FlatfieldCorrector {
    flatfield: RgbImage,
    channel_means: [f64; 3],
}

impl FlatfieldCorrector {
    pub fn new(flatfield: RgbImage) -> Self {
        let channel_means = channel_means(&flatfield);
        debug!(?channel_means, "Flatfield channel means");
        Self {
            flatfield,
            channel_means,
        }
    }

    /// Load the flatfield for a material/thickness/magnification.
    ///
    /// A missing file is a precondition failure, reported before any motion.
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        if !path.is_file() {
            return Err(PreconditionError::MissingFlatfield(path.to_path_buf()).into());
        }
        Ok(Self::new(read_rgb(path)?))
    }

    pub fn flatfield(&self) -> &RgbImage {
        &self.flatfield
    }

    pub fn channel_means(&self) -> [f64; 3] {
        self.channel_means
    }
}

impl VignetteCorrector for FlatfieldCorrector {
    fn remove_vignette(&self, image: &RgbImage) -> RgbImage {
        if image.dimensions() != self.flatfield.dimensions() {
            warn!(
                image = ?image.dimensions(),
                flatfield = ?self.flatfield.dimensions(),
                "Flatfield size does not match tile, leaving tile uncorrected"
            );
            return image.clone();
        }

        RgbImage::from_fn(image.width(), image.height(), |x, y| {
            let pixel = image.get_pixel(x, y);
            let reference = self.flatfield.get_pixel(x, y);
            let mut out = [0u8; 3];
            for k in 0..3 {
                // Zero flatfield pixels would divide by zero.
                let ff = reference[k].max(1) as f64;
                let value = (pixel[k] as f64 * self.channel_means[k] / ff) as u32;
                out[k] = value.min(CORRECTED_CEILING as u32) as u8;
            }
            Rgb(out)
        })
    }
}

/// A corrector that returns tiles unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCorrection;

impl VignetteCorrector for NoCorrection {
    fn remove_vignette(&self, image: &RgbImage) -> RgbImage {
        image.clone()
    }
}

fn channel_means(image: &RgbImage) -> [f64; 3] {
    let count = (image.width() as u64 * image.height() as u64).max(1) as f64;
    let mut sums = [0u64; 3];
    for pixel in image.pixels() {
        for k in 0..3 {
            sums[k] += pixel[k] as u64;
        }
    }
    sums.map(|s| s as f64 / count)
}
