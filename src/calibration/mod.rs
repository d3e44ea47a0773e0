//! Calibration constants and coordinate arithmetic.
//!
//! A [`Calibration`] is built once at startup and never changes during a run.
//! All geometric decisions go through a [`CoordinateTransform`] that holds it.

mod magnification;
mod transform;

use std::time::Duration;

pub use magnification::{LevelTable, MagnificationLevel, SENSOR_HEIGHT_PX, SENSOR_WIDTH_PX};
pub use transform::{
    CoordinateTransform, GridCell, PixelPoint, PixelWindow, StageOffset, StagePosition,
    STAGE_POSITION_DECIMALS,
};

/// Physical geometry of the stitched overview.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverviewGeometry {
    /// Physical extent covered by the overview, `(x_mm, y_mm)`.
    pub extent_mm: (f64, f64),

    /// Stage-to-overview offset.
    pub alignment_offset_mm: StageOffset,

    /// Stage travel covered by the scan-area grid, `(x_mm, y_mm)`.
    pub stage_travel_mm: (f64, f64),
}

impl Default for OverviewGeometry {
    fn default() -> Self {
        Self {
            extent_mm: (105.0, 103.333),
            alignment_offset_mm: StageOffset::new(2.6121, 1.1672),
            stage_travel_mm: (100.0, 100.0),
        }
    }
}

/// Per-instrument constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Parallax bias between objectives, applied when revisiting a flake.
    pub revisit_offsets: LevelTable<StageOffset>,

    /// Settle time after a revisit move at each level.
    pub revisit_settle: LevelTable<Duration>,

    /// Stage position of grid cell (0, 0) at each level.
    pub cell_origin: LevelTable<StageOffset>,

    pub overview: OverviewGeometry,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            revisit_offsets: LevelTable::new([
                StageOffset::new(0.0406, -0.4534),
                StageOffset::new(0.0406, -0.2428),
                StageOffset::ZERO,
                StageOffset::new(0.01, -0.01),
                StageOffset::new(-0.03, 0.03),
            ]),
            revisit_settle: LevelTable::new([
                Duration::from_millis(200),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ]),
            cell_origin: LevelTable::uniform(StageOffset::ZERO),
            overview: OverviewGeometry::default(),
        }
    }
}
