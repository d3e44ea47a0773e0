//! High-magnification flake search and revisits.
//!
//! ```text
//!                  ScanAreaMap
//!                       │
//!                       ▼
//!  SparseRaster ──► VignetteCorrector ──► Detector ──► confidence filter
//!  (detection mag)                                          │
//!                                                           ▼
//!                                      Chip_<id>/Flake_<n>/{meta.json, images}
//!                                                           │
//!                                                           ▼
//!                                      RevisitScheduler (other magnifications)
//! ```
//!
//! The detector and the vignette corrector are traits: [`ContrastDetector`]
//! and [`FlatfieldCorrector`] are the implementations shipped here.
//! [`detect_dataset`] runs the same detection offline over a pass recorded
//! with [`record_scan_area`].

mod dataset;
mod detector;
mod flake;
mod flatfield;
mod marker;
mod offline;
mod revisit;
mod scanner;

pub use dataset::record_scan_area;
pub use detector::{ContrastDetector, ContrastDetectorSettings};
pub use flake::{Detector, Flake, FlakeMeta, FlakeRecord, RevisitImage, FLAKE_META_FILE};
pub use flatfield::{FlatfieldCorrector, NoCorrection, VignetteCorrector, CORRECTED_CEILING};
pub use marker::{mark_flake, mark_on_overview, rotated_box};
pub use offline::{
    detect_dataset, DatasetReport, DatasetSettings, DetectedFlake, DATASET_OVERVIEW_FILE,
    MASKED_IMAGES_DIR, MASKED_META_DIR,
};
pub use revisit::{RevisitReport, RevisitScheduler, RevisitSettings, REVISIT_ORDER};
pub use scanner::{
    HighMagScanner, ScanReport, ScannerSettings, EVAL_IMAGE_FILE, FLAKE_MASK_FILE,
    OVERVIEW_MARKED_FILE, RAW_IMAGE_FILE,
};
