use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info};

use super::flake::{Detector, FlakeMeta, FlakeRecord};
use super::flatfield::VignetteCorrector;
use super::marker::{mark_flake, mark_on_overview};
use crate::calibration::{CoordinateTransform, MagnificationLevel};
use crate::error::ScanError;
use crate::hardware::{AcquisitionSettings, Camera, Microscope, Optics, Stage};
use crate::overview::{OverviewImage, ScanAreaMap};
use crate::raster::{RasterStep, SparseRaster, SparseRasterPlan};
use crate::storage::ScanDirectory;
use crate::tile::{write_png, ImageTile, JpegTileEncoder};

pub const OVERVIEW_MARKED_FILE: &str = "overview_marked.jpg";
pub const FLAKE_MASK_FILE: &str = "flake_mask.png";
pub const RAW_IMAGE_FILE: &str = "raw_img.png";
pub const EVAL_IMAGE_FILE: &str = "eval_img.jpg";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScannerSettings {
    pub detection_level: MagnificationLevel,
    /// Minimum `1 - false_positive_probability` for a flake to be kept
    pub confidence_threshold: f64,
    pub settle: Duration,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            detection_level: MagnificationLevel::X20,
            confidence_threshold: 0.5,
            settle: Duration::from_millis(200),
        }
    }
}

/// What a high-magnification pass found.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub tiles: usize,
    pub flakes: Vec<FlakeRecord>,
    /// Candidates dropped by the confidence filter
    pub rejected: usize,
}

/// Sparse pass at the detection magnification with per-tile detection.
///
/// Each accepted flake gets `Chip_<id>/Flake_<n>` with `n` counting from 1
/// per chip. Files are written as soon as the flake is found.
pub struct HighMagScanner<'a> {
    transform: &'a CoordinateTransform,
    detector: &'a dyn Detector,
    corrector: &'a dyn VignetteCorrector,
    scan_dir: &'a ScanDirectory,
    overview: &'a OverviewImage,
    settings: ScannerSettings,
    encoder: JpegTileEncoder,
    flake_counts: BTreeMap<u32, u32>,
}

impl<'a> HighMagScanner<'a> {
    /// `overview` is the image flakes are marked on, normally the compressed
    /// overview.
    pub fn new(
        transform: &'a CoordinateTransform,
        detector: &'a dyn Detector,
        corrector: &'a dyn VignetteCorrector,
        scan_dir: &'a ScanDirectory,
        overview: &'a OverviewImage,
        settings: ScannerSettings,
    ) -> Self {
        Self {
            transform,
            detector,
            corrector,
            scan_dir,
            overview,
            settings,
            encoder: JpegTileEncoder::default(),
            flake_counts: BTreeMap::new(),
        }
    }

    /// Flakes recorded so far in `chip_id`.
    pub fn flake_count(&self, chip_id: u32) -> u32 {
        self.flake_counts.get(&chip_id).copied().unwrap_or(0)
    }

    pub async fn run<S: Stage, O: Optics, C: Camera>(
        &mut self,
        rig: &mut Microscope<S, O, C>,
        map: &ScanAreaMap,
        acquisition: &AcquisitionSettings,
    ) -> Result<ScanReport, ScanError> {
        let plan = SparseRasterPlan {
            level: self.settings.detection_level,
            settle: self.settings.settle,
        };
        let mut raster = SparseRaster::start(rig, self.transform, map, plan, acquisition).await?;
        let mut report = ScanReport::default();

        while let Some(step) = raster.next_step().await? {
            let RasterStep::Captured(tile) = step else {
                continue;
            };
            report.tiles += 1;
            let (accepted, rejected) = self.process_tile(&tile)?;
            report.rejected += rejected;
            report.flakes.extend(accepted);
        }

        info!(
            tiles = report.tiles,
            flakes = report.flakes.len(),
            rejected = report.rejected,
            "High-magnification scan complete"
        );
        Ok(report)
    }

    /// Correct, detect and persist the flakes of one tile.
    ///
    /// Returns the new records and the number of rejected candidates.
    pub fn process_tile(&mut self, tile: &ImageTile) -> Result<(Vec<FlakeRecord>, usize), ScanError> {
        let corrected = self.corrector.remove_vignette(&tile.image);
        let candidates = self.detector.detect(&corrected)?;
        let chip_id = tile.chip_id().unwrap_or_default();

        let mut records = Vec::new();
        let mut rejected = 0;
        for flake in candidates {
            if !flake.is_confident(self.settings.confidence_threshold) {
                debug!(
                    confidence = flake.confidence(),
                    threshold = self.settings.confidence_threshold,
                    "Dropping low-confidence flake"
                );
                rejected += 1;
                continue;
            }

            let count = self.flake_counts.entry(chip_id).or_insert(0);
            *count += 1;
            let flake_id = *count;

            let dir = self.scan_dir.create_flake_dir(chip_id, flake_id)?;
            let position = self.transform.flake_centroid_to_stage(
                tile.position(),
                flake.center,
                tile.dimensions(),
                tile.level(),
            );
            let meta = FlakeMeta::from_flake(
                &flake,
                chip_id,
                flake_id,
                position,
                tile.level(),
                self.transform,
                &dir,
            );

            let marker = self
                .transform
                .stage_to_overview_pixel(tile.position(), self.overview.dimensions());
            self.encoder.write(
                &mark_on_overview(self.overview.image(), marker, Some(flake_id)),
                &dir.join(OVERVIEW_MARKED_FILE),
            )?;
            let record = FlakeRecord { dir, meta };
            record.save()?;
            write_png(&flake.mask, &record.dir.join(FLAKE_MASK_FILE))?;
            write_png(&tile.image, &record.dir.join(RAW_IMAGE_FILE))?;
            self.encoder.write(
                &mark_flake(&corrected, &flake.mask),
                &record.dir.join(EVAL_IMAGE_FILE),
            )?;

            info!(
                chip = chip_id,
                flake = flake_id,
                x_mm = position.x_mm,
                y_mm = position.y_mm,
                size_um2 = record.meta.size,
                "Recorded flake"
            );
            records.push(record);
        }

        Ok((records, rejected))
    }
}
