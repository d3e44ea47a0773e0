//! # Flake Scanner
//!
//! Spatial orchestration for an automated microscope that searches silicon
//! wafer chips for exfoliated 2D-material flakes.
//!
//! A run images the whole wafer at low magnification, stitches an overview,
//! segments it into chips, then rasters every chip cell at high
//! magnification, records the flakes a detector finds, and finally revisits
//! each flake at the other objectives.
//!
//! ## Architecture
//!
//! ```text
//!               ┌───────────────────────────┐
//!               │       ScanPipeline        │
//!               └─────────────┬─────────────┘
//!        ┌──────────────┬─────┴──────┬───────────────┐
//!        ▼              ▼            ▼               ▼
//!    raster         overview       scan          storage
//!  (dense/sparse)  (stitch/mask/  (detect/      (scan directory
//!        │          area map)     revisit)       layout)
//!        ▼
//!    hardware ──► calibration
//! (Microscope rig)  (stage ⇄ grid ⇄ overview pixels)
//! ```
//!
//! - [`calibration`] - Magnification levels and coordinate transforms
//! - [`hardware`] - Stage, optics and camera traits plus the rig that drives them
//! - [`raster`] - Dense and sparse serpentine acquisition
//! - [`overview`] - Stitching, foreground mask and scan-area map
//! - [`scan`] - Flake detection, flake records and revisits
//! - [`storage`] - Scan directory layout and JSON records
//! - [`tile`] - Captured tiles and image encoding
//! - [`pipeline`] - The end-to-end run
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use flake_scanner::hardware::simulated::{SimulatedMicroscope, SimulationConfig};
//! use flake_scanner::{
//!     Calibration, ContrastDetector, ParameterPaths, PipelineConfig, ScanPipeline,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let wafer = image::open("wafer.png").unwrap().to_rgb8();
//!     let sim = SimulatedMicroscope::new(wafer, SimulationConfig::default());
//!     let mut rig = sim.rig();
//!
//!     let config = PipelineConfig::new(
//!         "scans/run1",
//!         ParameterPaths::new("parameters"),
//!         "Graphene",
//!         "90nm",
//!     );
//!     let pipeline = ScanPipeline::new(Calibration::default(), config);
//!     let summary = pipeline
//!         .run(&mut rig, &ContrastDetector::default())
//!         .await
//!         .unwrap();
//!     println!("{} flakes", summary.flakes);
//! }
//! ```

pub mod calibration;
pub mod config;
pub mod error;
pub mod hardware;
pub mod overview;
pub mod pipeline;
pub mod raster;
pub mod scan;
pub mod storage;
pub mod tile;

// Re-export commonly used types
pub use calibration::{
    Calibration, CoordinateTransform, GridCell, LevelTable, MagnificationLevel, OverviewGeometry,
    PixelPoint, PixelWindow, StageOffset, StagePosition,
};
pub use config::{Cli, Command, DetectConfig, MapConfig, ScanConfig, StitchConfig};
pub use error::{
    CalibrationError, DetectionError, Device, HardwareError, PreconditionError, ScanError,
    StitchError, StorageError,
};
pub use hardware::{
    AcquisitionProfile, AcquisitionSettings, Camera, CameraProperties, CameraSettings,
    DeviceSnapshot, LampSettings, Microscope, Optics, OpticsProperties, ParameterPaths, Stage,
    Z_HEIGHT_UNKNOWN,
};
pub use overview::{
    create_mask, AreaMapBuilder, AreaMapSettings, ImageStitcher, MaskSettings, OverviewImage,
    ScanAreaMap, StitchSettings,
};
pub use pipeline::{PipelineConfig, ScanPipeline, ScanSummary};
pub use raster::{
    DenseRaster, DenseRasterPlan, RasterStep, SparseRaster, SparseRasterPlan, SparseTarget,
};
pub use scan::{
    detect_dataset, record_scan_area, ContrastDetector, ContrastDetectorSettings, DatasetReport,
    DatasetSettings, Detector, Flake, FlakeMeta, FlakeRecord, FlatfieldCorrector, HighMagScanner,
    NoCorrection, RevisitReport, RevisitScheduler, RevisitSettings, ScanReport, ScannerSettings,
    VignetteCorrector,
};
pub use storage::{PassDirectory, ScanDirectory, ScanMeta};
pub use tile::{ImageTile, JpegTileEncoder, TileMetadata};
