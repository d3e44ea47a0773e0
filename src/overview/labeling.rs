//! Connected component labeling with 8-connectivity.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

/// Label the set regions of a binary `mask`.
///
/// Returns row-major labels (0 = background) and the number of components.
/// Labels are dense `1..=k` and numbered in order of each component's first
/// pixel in a row-major scan. Set pixels must share one value.
pub fn label_components(mask: &GrayImage) -> (Vec<u32>, u32) {
    if mask.width() == 0 || mask.height() == 0 {
        return (Vec::new(), 0);
    }
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8])).into_raw();
    let count = labels.iter().copied().max().unwrap_or(0);
    (labels, count)
}
