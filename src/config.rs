//! Command-line configuration.
//!
//! Every option can also be set through an environment variable with the
//! `FLAKE_` prefix:
//!
//! - `FLAKE_WAFER_IMAGE` - Wafer picture imaged by the simulated microscope
//! - `FLAKE_OUTPUT_DIR` - Parent directory of scan directories (default: scans)
//! - `FLAKE_SCAN_NAME` - Name of the scan directory to create
//! - `FLAKE_MATERIAL` - Material, selects parameter files and flatfield
//! - `FLAKE_CHIP_THICKNESS` - Substrate oxide thickness, selects the flatfield
//! - `FLAKE_PARAMETERS_DIR` - Parameter root (default: parameters)
//! - `FLAKE_MAGNIFICATION` - Detection magnification (default: 20)
//! - `FLAKE_CONFIDENCE_THRESHOLD` - Minimum detection confidence (default: 0.5)
//! - `FLAKE_PERCENTAGE_THRESHOLD` - Minimum cell foreground fraction (default: 0.95)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::calibration::MagnificationLevel;
use crate::hardware::ParameterPaths;
use crate::overview::{AreaMapSettings, StitchSettings};
use crate::pipeline::PipelineConfig;
use crate::scan::{ContrastDetectorSettings, DatasetSettings, RevisitSettings};
use crate::tile::is_valid_quality;

// =============================================================================
// Default Values
// =============================================================================

pub const DEFAULT_OUTPUT_DIR: &str = "scans";

pub const DEFAULT_PARAMETERS_DIR: &str = "parameters";

/// Detection magnification as a nominal value.
pub const DEFAULT_MAGNIFICATION: f64 = 20.0;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

pub const DEFAULT_PERCENTAGE_THRESHOLD: f64 = 0.95;

/// Extra erosion used by full scans on top of the single cleanup erosion.
pub const DEFAULT_EXTRA_EROSION: usize = 1;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Flake Scanner - automated wafer scanning on a motorised microscope.
#[derive(Parser, Debug, Clone)]
#[command(name = "flake-scanner")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a full scan against the simulated microscope
    Scan(ScanConfig),

    /// Stitch a directory of dense-pass tiles into an overview
    Stitch(StitchConfig),

    /// Build the foreground mask and scan-area map of an overview image
    Map(MapConfig),

    /// Run flake detection over a pass recorded without detection
    Detect(DetectConfig),
}

// =============================================================================
// Scan
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ScanConfig {
    /// Wafer picture imaged by the simulated microscope.
    #[arg(long, env = "FLAKE_WAFER_IMAGE")]
    pub wafer_image: PathBuf,

    /// Directory the scan directory is created in.
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR, env = "FLAKE_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Name of the scan; the scan directory must not exist yet.
    #[arg(long, env = "FLAKE_SCAN_NAME")]
    pub scan_name: String,

    #[arg(long, default_value = "", env = "FLAKE_SCAN_USER")]
    pub scan_user: String,

    /// Material name, e.g. graphene.
    #[arg(long, env = "FLAKE_MATERIAL")]
    pub material: String,

    /// Substrate thickness, e.g. 90nm.
    #[arg(long, env = "FLAKE_CHIP_THICKNESS")]
    pub chip_thickness: String,

    /// Root of Camera_Parameters, Microscope_Parameters and Flatfields.
    #[arg(long, default_value = DEFAULT_PARAMETERS_DIR, env = "FLAKE_PARAMETERS_DIR")]
    pub parameters_dir: PathBuf,

    /// Detection magnification (2.5, 5, 20, 50 or 100).
    #[arg(long, default_value_t = DEFAULT_MAGNIFICATION, env = "FLAKE_MAGNIFICATION")]
    pub magnification: f64,

    /// Keep flakes with 1 - false_positive_probability at or above this.
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, env = "FLAKE_CONFIDENCE_THRESHOLD")]
    pub confidence_threshold: f64,

    /// Minimum foreground fraction for a scan-area cell.
    #[arg(long, default_value_t = DEFAULT_PERCENTAGE_THRESHOLD, env = "FLAKE_PERCENTAGE_THRESHOLD")]
    pub percentage_threshold: f64,

    #[arg(long, default_value_t = DEFAULT_EXTRA_EROSION, env = "FLAKE_EXTRA_EROSION")]
    pub extra_erosion: usize,

    /// Skip the auto-focus warm-up before the high-magnification pass.
    #[arg(long, default_value_t = false, env = "FLAKE_NO_AUTO_FOCUS")]
    pub no_auto_focus: bool,

    /// Keep the dense tiles after stitching.
    #[arg(long, default_value_t = false, env = "FLAKE_KEEP_OVERVIEW_TILES")]
    pub keep_overview_tiles: bool,

    /// Also re-image flakes at the detection magnification.
    #[arg(long, default_value_t = false)]
    pub include_detection_level: bool,

    /// Log failed revisits and carry on instead of aborting.
    #[arg(long, default_value_t = false)]
    pub continue_on_failure: bool,

    /// Minimum relative contrast of a flake pixel for the built-in detector.
    #[arg(long, default_value_t = 0.1)]
    pub min_contrast: f64,

    /// Minimum flake area in pixels for the built-in detector.
    #[arg(long, default_value_t = 200)]
    pub min_flake_area: usize,

    #[arg(long, default_value = "", env = "FLAKE_COMMENT")]
    pub comment: String,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.scan_name.trim().is_empty() {
            return Err("scan_name must not be empty. Set --scan-name or FLAKE_SCAN_NAME".to_string());
        }
        if self.scan_name.contains(['/', '\\']) {
            return Err("scan_name must be a single path component".to_string());
        }
        if self.material.trim().is_empty() {
            return Err("material must not be empty. Set --material or FLAKE_MATERIAL".to_string());
        }
        self.detection_level()?;
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err("confidence_threshold must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.percentage_threshold) {
            return Err("percentage_threshold must be between 0 and 1".to_string());
        }
        if self.min_contrast <= 0.0 {
            return Err("min_contrast must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn detection_level(&self) -> Result<MagnificationLevel, String> {
        MagnificationLevel::from_magnification(self.magnification).map_err(|e| e.to_string())
    }

    pub fn scan_dir(&self) -> PathBuf {
        self.output_dir.join(&self.scan_name)
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig, String> {
        let level = self.detection_level()?;
        let mut config = PipelineConfig::new(
            self.scan_dir(),
            ParameterPaths::new(&self.parameters_dir),
            &self.material,
            &self.chip_thickness,
        );
        config.scan_user = self.scan_user.clone();
        config.comment = self.comment.clone();
        config.detection_level = level;
        config.confidence_threshold = self.confidence_threshold;
        config.use_auto_focus = !self.no_auto_focus;
        config.keep_overview_tiles = self.keep_overview_tiles;
        config.area_map = AreaMapSettings {
            percentage_threshold: self.percentage_threshold,
            extra_erosion: self.extra_erosion,
            level,
        };
        config.revisit = RevisitSettings {
            detection_level: level,
            include_detection_level: self.include_detection_level,
            continue_on_failure: self.continue_on_failure,
            ..RevisitSettings::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn detector_settings(&self) -> ContrastDetectorSettings {
        ContrastDetectorSettings {
            min_contrast: self.min_contrast,
            min_area_px: self.min_flake_area,
            ..ContrastDetectorSettings::default()
        }
    }
}

// =============================================================================
// Stitch
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct StitchConfig {
    /// Directory of dense-pass tiles (`<n>.png`).
    pub pictures_dir: PathBuf,

    /// Output overview image.
    #[arg(short, long, default_value = "overview.png")]
    pub output: PathBuf,

    /// Also write the 2000x2000 JPEG overview here.
    #[arg(long)]
    pub compressed_output: Option<PathBuf>,

    #[arg(long, default_value_t = 21, env = "FLAKE_STITCH_ROWS")]
    pub rows: usize,

    #[arg(long, default_value_t = 31, env = "FLAKE_STITCH_COLUMNS")]
    pub columns: usize,

    /// Integer shrink factor applied to each tile.
    #[arg(long, default_value_t = 4)]
    pub downscale: u32,

    #[arg(long, default_value_t = 77)]
    pub trim_x: u32,

    #[arg(long, default_value_t = 27)]
    pub trim_y: u32,

    /// JPEG quality tiles are round-tripped through; 0 disables it.
    #[arg(long, default_value_t = 80)]
    pub jpeg_quality: u8,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl StitchConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.rows == 0 || self.columns == 0 {
            return Err("rows and columns must be greater than 0".to_string());
        }
        if self.downscale == 0 {
            return Err("downscale must be greater than 0".to_string());
        }
        if self.jpeg_quality != 0 && !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100, or 0 to disable".to_string());
        }
        Ok(())
    }

    pub fn settings(&self) -> StitchSettings {
        StitchSettings {
            rows: self.rows,
            columns: self.columns,
            downscale: self.downscale,
            trim_x: self.trim_x,
            trim_y: self.trim_y,
            jpeg_quality: (self.jpeg_quality != 0).then_some(self.jpeg_quality),
        }
    }
}

// =============================================================================
// Map
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct MapConfig {
    /// Stitched overview, normally overview.png; mask kernels assume its resolution.
    pub overview: PathBuf,

    /// Where mask.png and scan_area_map.png are written.
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Magnification whose view field sets the cell size.
    #[arg(long, default_value_t = DEFAULT_MAGNIFICATION, env = "FLAKE_MAGNIFICATION")]
    pub magnification: f64,

    #[arg(long, default_value_t = DEFAULT_PERCENTAGE_THRESHOLD, env = "FLAKE_PERCENTAGE_THRESHOLD")]
    pub percentage_threshold: f64,

    #[arg(long, default_value_t = 0)]
    pub extra_erosion: usize,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl MapConfig {
    pub fn validate(&self) -> Result<(), String> {
        MagnificationLevel::from_magnification(self.magnification).map_err(|e| e.to_string())?;
        if !(0.0..=1.0).contains(&self.percentage_threshold) {
            return Err("percentage_threshold must be between 0 and 1".to_string());
        }
        Ok(())
    }

    pub fn settings(&self) -> Result<AreaMapSettings, String> {
        Ok(AreaMapSettings {
            percentage_threshold: self.percentage_threshold,
            extra_erosion: self.extra_erosion,
            level: MagnificationLevel::from_magnification(self.magnification)
                .map_err(|e| e.to_string())?,
        })
    }
}

// =============================================================================
// Detect
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct DetectConfig {
    /// Scan directory holding `<mag>x/Pictures` and `<mag>x/Meta`.
    pub scan_dir: PathBuf,

    /// Material name, selects the flatfield.
    #[arg(long, env = "FLAKE_MATERIAL")]
    pub material: String,

    /// Substrate thickness, selects the flatfield.
    #[arg(long, env = "FLAKE_CHIP_THICKNESS")]
    pub chip_thickness: String,

    #[arg(long, default_value = DEFAULT_PARAMETERS_DIR, env = "FLAKE_PARAMETERS_DIR")]
    pub parameters_dir: PathBuf,

    /// Magnification of the recorded pass.
    #[arg(long, default_value_t = DEFAULT_MAGNIFICATION, env = "FLAKE_MAGNIFICATION")]
    pub magnification: f64,

    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, env = "FLAKE_CONFIDENCE_THRESHOLD")]
    pub confidence_threshold: f64,

    /// Minimum relative contrast of a flake pixel for the built-in detector.
    #[arg(long, default_value_t = 0.1)]
    pub min_contrast: f64,

    /// Minimum flake area in pixels for the built-in detector.
    #[arg(long, default_value_t = 200)]
    pub min_flake_area: usize,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl DetectConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.material.trim().is_empty() {
            return Err("material must not be empty. Set --material or FLAKE_MATERIAL".to_string());
        }
        MagnificationLevel::from_magnification(self.magnification).map_err(|e| e.to_string())?;
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err("confidence_threshold must be between 0 and 1".to_string());
        }
        if self.min_contrast <= 0.0 {
            return Err("min_contrast must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn settings(&self) -> Result<DatasetSettings, String> {
        Ok(DatasetSettings {
            level: MagnificationLevel::from_magnification(self.magnification)
                .map_err(|e| e.to_string())?,
            confidence_threshold: self.confidence_threshold,
        })
    }

    pub fn flatfield_path(&self) -> Result<PathBuf, String> {
        let level = self.settings()?.level;
        Ok(ParameterPaths::new(&self.parameters_dir).flatfield(
            &self.material,
            &self.chip_thickness,
            level,
        ))
    }

    pub fn detector_settings(&self) -> ContrastDetectorSettings {
        ContrastDetectorSettings {
            min_contrast: self.min_contrast,
            min_area_px: self.min_flake_area,
            ..ContrastDetectorSettings::default()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
