//! End-to-end scan run.
//!
//! ```text
//! preconditions ──► scan dir, meta.json, flatfield.png
//!                        │
//!                        ▼
//! dense pass (2.5x) ──► stitch ──► overview.png / overview_compressed.jpg
//!                                        │
//!                                        ▼
//!                        mask.png ──► scan_area_map.png
//!                                        │
//!        [auto-focus warm-up] ◄──────────┘
//!                 │
//!                 ▼
//! high-magnification scan ──► revisits ──► lamp off
//! ```
//!
//! Every failure propagates to the caller as a [`ScanError`]. Whatever was
//! written before the failure stays on disk.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::info;

use crate::calibration::{Calibration, CoordinateTransform, MagnificationLevel};
use crate::error::{PreconditionError, ScanError};
use crate::hardware::{AcquisitionProfile, Camera, Microscope, Optics, ParameterPaths, Stage};
use crate::overview::{
    create_mask, AreaMapBuilder, AreaMapSettings, ImageStitcher, MaskSettings, OverviewImage,
    StitchSettings,
};
use crate::raster::{DenseRaster, DenseRasterPlan};
use crate::scan::{
    Detector, FlatfieldCorrector, HighMagScanner, RevisitReport, RevisitScheduler, RevisitSettings,
    ScannerSettings,
};
use crate::storage::{
    write_json, ScanDirectory, ScanMeta, FLATFIELD_FILE, MASK_FILE, OVERVIEW_COMPRESSED_FILE,
    OVERVIEW_FILE, SCAN_AREA_MAP_FILE, SCAN_META_FILE,
};
use crate::tile::{write_png, JpegTileEncoder};

/// Everything a run needs besides the hardware and the detector.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory to create for this scan; must not exist yet
    pub scan_dir: PathBuf,
    pub parameters: ParameterPaths,
    pub scan_name: String,
    pub scan_user: String,
    pub material: String,
    pub chip_thickness: String,
    pub comment: String,
    pub detection_level: MagnificationLevel,
    pub confidence_threshold: f64,
    pub use_auto_focus: bool,
    /// Keep the dense tiles after stitching
    pub keep_overview_tiles: bool,
    pub dense: DenseRasterPlan,
    pub stitch: StitchSettings,
    pub mask: MaskSettings,
    pub area_map: AreaMapSettings,
    pub scanner_settle: Duration,
    pub revisit: RevisitSettings,
}

impl PipelineConfig {
    pub fn new(
        scan_dir: impl Into<PathBuf>,
        parameters: ParameterPaths,
        material: impl Into<String>,
        chip_thickness: impl Into<String>,
    ) -> Self {
        let scan_dir = scan_dir.into();
        let scan_name = scan_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            scan_dir,
            parameters,
            scan_name,
            scan_user: String::new(),
            material: material.into(),
            chip_thickness: chip_thickness.into(),
            comment: String::new(),
            detection_level: MagnificationLevel::X20,
            confidence_threshold: 0.5,
            use_auto_focus: true,
            keep_overview_tiles: false,
            dense: DenseRasterPlan::default(),
            stitch: StitchSettings::default(),
            mask: MaskSettings::default(),
            area_map: AreaMapSettings {
                extra_erosion: 1,
                ..AreaMapSettings::default()
            },
            scanner_settle: Duration::from_millis(200),
            revisit: RevisitSettings::default(),
        }
    }

    /// Check that the pieces agree with each other.
    pub fn validate(&self) -> Result<(), String> {
        if self.dense.rows != self.stitch.rows || self.dense.columns != self.stitch.columns {
            return Err(format!(
                "dense grid is {}x{} but stitching expects {}x{}",
                self.dense.rows, self.dense.columns, self.stitch.rows, self.stitch.columns
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.area_map.percentage_threshold) {
            return Err(format!(
                "percentage_threshold must be in [0, 1], got {}",
                self.area_map.percentage_threshold
            ));
        }
        if self.area_map.level != self.detection_level
            || self.revisit.detection_level != self.detection_level
        {
            return Err("area map, scanner and revisits must share the detection magnification".to_string());
        }
        Ok(())
    }

    fn scan_meta(&self) -> ScanMeta {
        ScanMeta {
            scan_name: self.scan_name.clone(),
            scan_user: self.scan_user.clone(),
            material: self.material.clone(),
            chip_thickness: self.chip_thickness.clone(),
            detection_magnification: self.detection_level,
            confidence_threshold: self.confidence_threshold,
            percentage_threshold: self.area_map.percentage_threshold,
            use_auto_focus: self.use_auto_focus,
            comment: self.comment.clone(),
            started_at: Utc::now(),
        }
    }
}

/// Counts and timings of a finished run.
#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub dense_tiles: usize,
    pub overview_size: (u32, u32),
    pub chips: u32,
    pub occupied_cells: usize,
    pub high_mag_tiles: usize,
    pub flakes: usize,
    pub rejected: usize,
    pub revisits: RevisitReport,
    pub dense_elapsed: Duration,
    pub mapping_elapsed: Duration,
    pub scan_elapsed: Duration,
    pub revisit_elapsed: Duration,
}

impl ScanSummary {
    pub fn total_elapsed(&self) -> Duration {
        self.dense_elapsed + self.mapping_elapsed + self.scan_elapsed + self.revisit_elapsed
    }
}

pub struct ScanPipeline {
    transform: CoordinateTransform,
    config: PipelineConfig,
}

impl ScanPipeline {
    pub fn new(calibration: Calibration, config: PipelineConfig) -> Self {
        Self {
            transform: CoordinateTransform::new(calibration),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run<S: Stage, O: Optics, C: Camera>(
        &self,
        rig: &mut Microscope<S, O, C>,
        detector: &dyn Detector,
    ) -> Result<ScanSummary, ScanError> {
        let config = &self.config;
        let detection = config.detection_level;
        let mut summary = ScanSummary::default();

        // Everything that can fail without touching the hardware goes first.
        config
            .validate()
            .map_err(PreconditionError::InvalidConfiguration)?;
        ScanDirectory::ensure_absent(&config.scan_dir)?;
        let profile = AcquisitionProfile::load(&config.parameters, &config.material, detection)?;
        let corrector = FlatfieldCorrector::load(&config.parameters.flatfield(
            &config.material,
            &config.chip_thickness,
            detection,
        ))?;

        let scan_dir = ScanDirectory::create(&config.scan_dir)?;
        write_json(&scan_dir.file(SCAN_META_FILE), &config.scan_meta())?;
        write_png(corrector.flatfield(), &scan_dir.file(FLATFIELD_FILE))?;
        info!(scan = %scan_dir.root().display(), material = %config.material, "Starting scan");

        rig.lamp_on().await?;

        // Dense pass
        let started = Instant::now();
        let pass = scan_dir.create_pass(config.dense.level)?;
        let raster =
            DenseRaster::start(rig, config.dense, &profile.for_level(config.dense.level)).await?;
        summary.dense_tiles = raster.record(&pass).await?;
        summary.dense_elapsed = started.elapsed();

        // Overview products
        let started = Instant::now();
        let stitched = ImageStitcher::new(config.stitch).stitch_directory(&pass.pictures)?;
        let overview = OverviewImage::new(stitched, self.transform.calibration().overview.extent_mm);
        summary.overview_size = overview.dimensions();
        write_png(overview.image(), &scan_dir.file(OVERVIEW_FILE))?;
        let compressed = overview.compressed();
        JpegTileEncoder::default()
            .write(compressed.image(), &scan_dir.file(OVERVIEW_COMPRESSED_FILE))?;

        // Kernel sizes are in pixels of the stitched overview
        let mask = create_mask(overview.image(), &config.mask);
        write_png(&mask, &scan_dir.file(MASK_FILE))?;
        let map = AreaMapBuilder::new(self.transform.clone(), config.area_map).build(&mask);
        map.save(&scan_dir.file(SCAN_AREA_MAP_FILE))?;
        summary.chips = map.chip_count();
        summary.occupied_cells = map.occupied_cells();

        if !config.keep_overview_tiles {
            scan_dir.remove_pass(config.dense.level)?;
        }
        summary.mapping_elapsed = started.elapsed();

        if config.use_auto_focus {
            rig.auto_focus_warm_up(detection, &profile.for_level(detection))
                .await?;
        }

        // Flake search
        let started = Instant::now();
        let mut scanner = HighMagScanner::new(
            &self.transform,
            detector,
            &corrector,
            &scan_dir,
            &compressed,
            ScannerSettings {
                detection_level: detection,
                confidence_threshold: config.confidence_threshold,
                settle: config.scanner_settle,
            },
        );
        let report = scanner.run(rig, &map, &profile.for_level(detection)).await?;
        summary.high_mag_tiles = report.tiles;
        summary.flakes = report.flakes.len();
        summary.rejected = report.rejected;
        summary.scan_elapsed = started.elapsed();

        // Revisits
        let started = Instant::now();
        summary.revisits =
            RevisitScheduler::new(&self.transform, &scan_dir, &profile, config.revisit.clone())
                .run(rig)
                .await?;
        summary.revisit_elapsed = started.elapsed();

        rig.lamp_off().await?;

        info!(
            chips = summary.chips,
            flakes = summary.flakes,
            revisits = summary.revisits.total(),
            elapsed_secs = summary.total_elapsed().as_secs(),
            "Scan finished"
        );
        Ok(summary)
    }
}
