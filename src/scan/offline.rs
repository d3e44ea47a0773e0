//! Detection over an already recorded pass.
//!
//! Reads `<mag>x/Pictures` and `<mag>x/Meta` as written by
//! [`record_scan_area`](super::record_scan_area) and writes
//!
//! ```text
//! <scan>/<mag>x/Masked_Images/<n>.png           tiles with at least one flake
//! <scan>/<mag>x/Masked_Images_Meta/<k>_<n>.json one per accepted flake
//! <scan>/overview_marked.png                    if overview.png exists
//! ```

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::flake::{Detector, Flake};
use super::flatfield::VignetteCorrector;
use super::marker::mark_on_overview;
use crate::calibration::{CoordinateTransform, MagnificationLevel};
use crate::error::{ScanError, StorageError};
use crate::overview::morphology::gradient;
use crate::raster::ProgressTracker;
use crate::storage::{read_json, sorted_files, write_json, ScanDirectory, OVERVIEW_FILE};
use crate::tile::{read_rgb, write_png, TileMetadata};

pub const MASKED_IMAGES_DIR: &str = "Masked_Images";
pub const MASKED_META_DIR: &str = "Masked_Images_Meta";
pub const DATASET_OVERVIEW_FILE: &str = "overview_marked.png";

const PICTURES_DIR: &str = "Pictures";
const META_DIR: &str = "Meta";
const OUTLINE: Rgb<u8> = Rgb([255, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatasetSettings {
    pub level: MagnificationLevel,
    /// Minimum `1 - false_positive_probability` for a flake to be kept
    pub confidence_threshold: f64,
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            level: MagnificationLevel::X20,
            confidence_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetReport {
    pub images: usize,
    /// Images with at least one accepted flake
    pub images_with_flakes: usize,
    pub flakes: usize,
    pub rejected: usize,
    /// Written only when the scan has an overview
    pub marked_overview: Option<PathBuf>,
}

/// Detector output as persisted next to the masked images, in pixels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedFlake {
    pub center_x: f64,
    pub center_y: f64,
    pub size: f64,
    pub thickness: String,
    pub entropy: f64,
    pub aspect_ratio: f64,
    pub max_sidelength: f64,
    pub min_sidelength: f64,
    pub mean_contrast: [f64; 3],
    pub false_positive_probability: f64,
}

impl From<&Flake> for DetectedFlake {
    fn from(flake: &Flake) -> Self {
        Self {
            center_x: flake.center.x,
            center_y: flake.center.y,
            size: flake.size_px,
            thickness: flake.thickness.clone(),
            entropy: flake.entropy,
            aspect_ratio: flake.aspect_ratio,
            max_sidelength: flake.max_sidelength_px,
            min_sidelength: flake.min_sidelength_px,
            mean_contrast: flake.mean_contrast,
            false_positive_probability: flake.false_positive_probability,
        }
    }
}

/// Run `detector` over every recorded tile of the pass at `settings.level`.
///
/// Images and metadata are paired in natural order. Flake numbers in the
/// `Masked_Images_Meta` file names count across the whole pass.
pub fn detect_dataset(
    scan_dir: &ScanDirectory,
    transform: &CoordinateTransform,
    detector: &dyn Detector,
    corrector: &dyn VignetteCorrector,
    settings: DatasetSettings,
) -> Result<DatasetReport, ScanError> {
    let pass_root = scan_dir.pass_root(settings.level);
    let pictures = pass_root.join(PICTURES_DIR);
    let meta_dir = pass_root.join(META_DIR);
    let image_names = sorted_files(&pictures)?;
    let meta_names = sorted_files(&meta_dir)?;
    if image_names.len() != meta_names.len() {
        warn!(
            images = image_names.len(),
            metadata = meta_names.len(),
            "Pictures and Meta differ in length, extra files are ignored"
        );
    }

    let masked_images = pass_root.join(MASKED_IMAGES_DIR);
    let masked_meta = pass_root.join(MASKED_META_DIR);
    create_dir(&masked_images)?;
    create_dir(&masked_meta)?;

    let overview_path = scan_dir.file(OVERVIEW_FILE);
    let mut overview = if overview_path.exists() {
        Some(read_rgb(&overview_path)?)
    } else {
        debug!(path = %overview_path.display(), "No overview, skipping overview marks");
        None
    };

    let total = image_names.len().min(meta_names.len());
    let mut progress = ProgressTracker::new("dataset", total);
    let mut report = DatasetReport::default();

    for (image_name, meta_name) in image_names.iter().zip(&meta_names) {
        let tile = read_rgb(&pictures.join(image_name))?;
        let mut corrected = corrector.remove_vignette(&tile);
        let candidates = detector.detect(&corrected)?;
        report.images += 1;

        let mut accepted = 0;
        for flake in &candidates {
            if !flake.is_confident(settings.confidence_threshold) {
                report.rejected += 1;
                continue;
            }
            accepted += 1;
            report.flakes += 1;
            outline_flake(&mut corrected, flake);
            write_json(
                &masked_meta.join(format!("{}_{}", report.flakes, meta_name)),
                &DetectedFlake::from(flake),
            )?;
        }

        if accepted > 0 {
            report.images_with_flakes += 1;
            info!(image = %image_name, flakes = accepted, "Flakes found");
            if let Some(ref mut overview) = overview {
                let metadata: TileMetadata = read_json(&meta_dir.join(meta_name))?;
                let pixel = transform.stage_to_overview_pixel(metadata.stage, overview.dimensions());
                *overview = mark_on_overview(overview, pixel, None);
            }
            write_png(&corrected, &masked_images.join(image_name))?;
        }
        progress.advance();
    }

    if let Some(overview) = overview {
        let path = scan_dir.file(DATASET_OVERVIEW_FILE);
        write_png(&overview, &path)?;
        report.marked_overview = Some(path);
    }

    info!(
        images = report.images,
        with_flakes = report.images_with_flakes,
        flakes = report.flakes,
        rejected = report.rejected,
        elapsed_ms = progress.elapsed().as_millis() as u64,
        "Dataset detection complete"
    );
    Ok(report)
}

fn outline_flake(image: &mut RgbImage, flake: &Flake) {
    let outline = gradient(&flake.mask, 3);
    for (x, y, pixel) in outline.enumerate_pixels() {
        if pixel[0] > 0 && x < image.width() && y < image.height() {
            image.put_pixel(x, y, OUTLINE);
        }
    }
}

fn create_dir(path: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(path).map_err(|e| StorageError::io(path, e))
}
