//! A contrast-threshold detector for simulated runs.
//!
//! Real material classification is an external collaborator behind
//! [`Detector`]. This one finds connected regions whose luma differs from the
//! tile's median by more than a fixed fraction, which is enough to exercise
//! the scanning pipeline end to end.

use image::{imageops, GrayImage, Luma, RgbImage};
use tracing::debug;

use super::flake::{Detector, Flake};
use crate::calibration::PixelPoint;
use crate::error::DetectionError;
use crate::overview::label_components;

#[derive(Debug, Clone, PartialEq)]
pub struct ContrastDetectorSettings {
    /// Minimum `|pixel - background| / background` for a flake pixel
    pub min_contrast: f64,
    /// Regions smaller than this are ignored (pixels)
    pub min_area_px: usize,
    /// Label written as the flake thickness
    pub thickness: String,
}

impl Default for ContrastDetectorSettings {
    fn default() -> Self {
        Self {
            min_contrast: 0.1,
            min_area_px: 200,
            thickness: "unclassified".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContrastDetector {
    settings: ContrastDetectorSettings,
}

impl ContrastDetector {
    pub fn new(settings: ContrastDetectorSettings) -> Self {
        Self { settings }
    }
}

impl Detector for ContrastDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Flake>, DetectionError> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        if width == 0 || height == 0 {
            return Err(DetectionError("empty tile".to_string()));
        }

        let gray = imageops::grayscale(image);
        let background_luma = median(gray.as_raw()).max(1) as f64;
        let background_rgb = channel_medians(image);

        let candidates = GrayImage::from_fn(width as u32, height as u32, |x, y| {
            let value = gray.get_pixel(x, y)[0] as f64;
            let contrast = ((value - background_luma) / background_luma).abs();
            Luma([if contrast > self.settings.min_contrast { 255 } else { 0 }])
        });
        let (labels, count) = label_components(&candidates);

        let mut regions: Vec<Region> = (0..count).map(|_| Region::default()).collect();
        for (idx, &label) in labels.iter().enumerate() {
            if label == 0 {
                continue;
            }
            let (x, y) = (idx % width, idx / width);
            let pixel = image.get_pixel(x as u32, y as u32);
            regions[label as usize - 1].add(x, y, pixel.0, gray.get_pixel(x as u32, y as u32)[0]);
        }

        let flakes: Vec<Flake> = regions
            .iter()
            .enumerate()
            .filter(|(_, region)| region.area >= self.settings.min_area_px)
            .map(|(i, region)| {
                let label = i as u32 + 1;
                let mask = GrayImage::from_fn(width as u32, height as u32, |x, y| {
                    let idx = y as usize * width + x as usize;
                    Luma([if labels[idx] == label { 255 } else { 0 }])
                });
                region.to_flake(mask, background_rgb, &self.settings)
            })
            .collect();

        debug!(
            candidates = count,
            flakes = flakes.len(),
            background = background_luma,
            "Contrast detection"
        );
        Ok(flakes)
    }
}

#[derive(Debug, Clone)]
struct Region {
    area: usize,
    sum_x: f64,
    sum_y: f64,
    min: (usize, usize),
    max: (usize, usize),
    channel_sums: [f64; 3],
    histogram: [u32; 256],
}

impl Default for Region {
    fn default() -> Self {
        Self {
            area: 0,
            sum_x: 0.0,
            sum_y: 0.0,
            min: (usize::MAX, usize::MAX),
            max: (0, 0),
            channel_sums: [0.0; 3],
            histogram: [0; 256],
        }
    }
}

impl Region {
    fn add(&mut self, x: usize, y: usize, rgb: [u8; 3], luma: u8) {
        self.area += 1;
        self.sum_x += x as f64;
        self.sum_y += y as f64;
        self.min = (self.min.0.min(x), self.min.1.min(y));
        self.max = (self.max.0.max(x), self.max.1.max(y));
        for (sum, value) in self.channel_sums.iter_mut().zip(rgb) {
            *sum += value as f64;
        }
        self.histogram[luma as usize] += 1;
    }

    fn to_flake(&self, mask: GrayImage, background: [f64; 3], settings: &ContrastDetectorSettings) -> Flake {
        let area = self.area as f64;
        let width = (self.max.0 - self.min.0 + 1) as f64;
        let height = (self.max.1 - self.min.1 + 1) as f64;
        let (long, short) = (width.max(height), width.min(height));

        let mut mean_contrast = [0.0; 3];
        for k in 0..3 {
            let mean = self.channel_sums[k] / area;
            mean_contrast[k] = (mean - background[k]) / background[k].max(1.0);
        }

        // Small regions are more likely to be dirt.
        let false_positive_probability = (settings.min_area_px as f64 / area).clamp(0.0, 1.0) * 0.5;

        Flake {
            mask,
            center: PixelPoint::new(self.sum_x / area, self.sum_y / area),
            size_px: area,
            thickness: settings.thickness.clone(),
            entropy: entropy(&self.histogram, self.area),
            aspect_ratio: long / short,
            max_sidelength_px: long,
            min_sidelength_px: short,
            mean_contrast,
            false_positive_probability,
        }
    }
}

/// Shannon entropy in bits.
fn entropy(histogram: &[u32; 256], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    histogram
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

fn median(values: &[u8]) -> u8 {
    let mut histogram = [0usize; 256];
    for &v in values {
        histogram[v as usize] += 1;
    }
    let half = values.len() / 2;
    let mut seen = 0;
    for (value, &count) in histogram.iter().enumerate() {
        seen += count;
        if seen > half {
            return value as u8;
        }
    }
    0
}

fn channel_medians(image: &RgbImage) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (k, slot) in out.iter_mut().enumerate() {
        let channel: Vec<u8> = image.pixels().map(|p| p[k]).collect();
        *slot = median(&channel) as f64;
    }
    out
}
