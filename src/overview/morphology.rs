//! Square-kernel morphology on binary masks.
//!
//! Masks are `GrayImage`s where any non-zero pixel is set; results use 255 and
//! 0. `n` iterations of a `k x k` kernel are one chessboard-distance pass of
//! radius `n * (k / 2)`, which is what `imageproc` computes with `Norm::LInf`.
//! Pixels outside the image never influence the result.

use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology;

pub fn erode(mask: &GrayImage, kernel: usize, iterations: usize) -> GrayImage {
    by_radius(mask, radius(kernel, iterations), morphology::erode)
}

pub fn dilate(mask: &GrayImage, kernel: usize, iterations: usize) -> GrayImage {
    by_radius(mask, radius(kernel, iterations), morphology::dilate)
}

/// Dilate then erode, each `iterations` times.
pub fn close(mask: &GrayImage, kernel: usize, iterations: usize) -> GrayImage {
    erode(&dilate(mask, kernel, iterations), kernel, iterations)
}

/// Dilation minus erosion: a band around every boundary.
pub fn gradient(mask: &GrayImage, kernel: usize) -> GrayImage {
    let dilated = dilate(mask, kernel, 1);
    let eroded = erode(mask, kernel, 1);
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let band = dilated.get_pixel(x, y)[0] > 0 && eroded.get_pixel(x, y)[0] == 0;
        image::Luma([if band { 255 } else { 0 }])
    })
}

/// Number of set pixels.
pub fn foreground_count(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p[0] > 0).count()
}

/// Whether every set pixel of `inner` is also set in `outer`.
pub fn is_subset(inner: &GrayImage, outer: &GrayImage) -> bool {
    inner.dimensions() == outer.dimensions()
        && inner
            .pixels()
            .zip(outer.pixels())
            .all(|(a, b)| a[0] == 0 || b[0] > 0)
}

fn radius(kernel: usize, iterations: usize) -> usize {
    (kernel / 2) * iterations
}

/// `imageproc` takes the radius as `u8`; larger radii are split into passes,
/// which compose exactly under the chessboard norm.
fn by_radius(
    mask: &GrayImage,
    radius: usize,
    op: fn(&GrayImage, Norm, u8) -> GrayImage,
) -> GrayImage {
    let mut out = mask.clone();
    let mut remaining = radius;
    while remaining > 0 {
        let step = remaining.min(u8::MAX as usize);
        out = op(&out, Norm::LInf, step as u8);
        remaining -= step;
    }
    out
}
