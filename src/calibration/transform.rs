//! Coordinate arithmetic between pixel, grid-cell and stage-millimeter spaces.
//!
//! Three frames are in play:
//!
//! - **Stage frame**: absolute stage coordinates in mm, as reported by the stage.
//! - **Overview frame**: mm measured on the stitched overview image. It differs
//!   from the stage frame by the fixed alignment offset of the calibration.
//! - **Pixel frames**: one per magnification level, scaled by that level's
//!   micrometers-per-pixel constant.
//!
//! Everything here is pure arithmetic.

use serde::{Deserialize, Serialize};

use super::magnification::MagnificationLevel;
use super::Calibration;

/// Decimal places kept for derived stage positions.
pub const STAGE_POSITION_DECIMALS: i32 = 5;

// =============================================================================
// Geometry Types
// =============================================================================

/// An absolute stage position in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StagePosition {
    pub x_mm: f64,
    pub y_mm: f64,
}

impl StagePosition {
    pub const fn new(x_mm: f64, y_mm: f64) -> Self {
        Self { x_mm, y_mm }
    }

    /// Shift by an offset.
    pub fn offset(self, offset: StageOffset) -> Self {
        Self {
            x_mm: self.x_mm + offset.dx_mm,
            y_mm: self.y_mm + offset.dy_mm,
        }
    }

    /// Round both axes to [`STAGE_POSITION_DECIMALS`] places.
    pub fn rounded(self) -> Self {
        Self {
            x_mm: round_decimals(self.x_mm, STAGE_POSITION_DECIMALS),
            y_mm: round_decimals(self.y_mm, STAGE_POSITION_DECIMALS),
        }
    }

    /// Whether either axis is negative.
    pub fn is_negative(&self) -> bool {
        self.x_mm < 0.0 || self.y_mm < 0.0
    }
}

/// A relative displacement in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StageOffset {
    pub dx_mm: f64,
    pub dy_mm: f64,
}

impl StageOffset {
    pub const ZERO: StageOffset = StageOffset::new(0.0, 0.0);

    pub const fn new(dx_mm: f64, dy_mm: f64) -> Self {
        Self { dx_mm, dy_mm }
    }
}

/// A cell of a raster grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
    pub row: usize,
    pub col: usize,
}

impl GridCell {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// A sub-pixel location inside an image, `x` to the right and `y` down.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Half-open pixel window `[x_start, x_end) x [y_start, y_end)`.
///
/// Bounds may lie outside the image; callers clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub x_start: i64,
    pub y_start: i64,
    pub x_end: i64,
    pub y_end: i64,
}

// =============================================================================
// Coordinate Transform
// =============================================================================

/// Pure mapping between pixel, grid-cell and stage spaces.
///
/// Cheap to clone; every component that makes a geometric decision holds one.
#[derive(Debug, Clone)]
pub struct CoordinateTransform {
    calibration: Calibration,
}

impl CoordinateTransform {
    pub fn new(calibration: Calibration) -> Self {
        Self { calibration }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Stage position for a scan-area cell at `level`.
    ///
    /// `stage = cell * view_field(level) + cell_origin(level)`; columns run
    /// along x, rows along y.
    pub fn cell_to_stage(&self, cell: GridCell, level: MagnificationLevel) -> StagePosition {
        let (field_w, field_h) = level.view_field_mm();
        let origin = self.calibration.cell_origin.get(level);
        StagePosition::new(
            field_w * cell.col as f64 + origin.dx_mm,
            field_h * cell.row as f64 + origin.dy_mm,
        )
    }

    /// Inverse of [`Self::cell_to_stage`], rounding to the nearest cell.
    ///
    /// Returns `None` for positions before the first cell.
    pub fn stage_to_cell(&self, position: StagePosition, level: MagnificationLevel) -> Option<GridCell> {
        let (field_w, field_h) = level.view_field_mm();
        let origin = self.calibration.cell_origin.get(level);
        let col = ((position.x_mm - origin.dx_mm) / field_w).round();
        let row = ((position.y_mm - origin.dy_mm) / field_h).round();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        Some(GridCell::new(row as usize, col as usize))
    }

    /// Scale a pixel length to micrometers.
    pub fn pixel_length_to_micrometers(&self, pixels: f64, level: MagnificationLevel) -> f64 {
        pixels * level.micrometers_per_pixel()
    }

    /// Scale a pixel area to square micrometers (the calibration constant squared).
    pub fn pixel_area_to_square_micrometers(&self, pixels: f64, level: MagnificationLevel) -> f64 {
        let um = level.micrometers_per_pixel();
        pixels * um * um
    }

    /// Inverse of [`Self::pixel_area_to_square_micrometers`].
    pub fn square_micrometers_to_pixel_area(&self, square_um: f64, level: MagnificationLevel) -> f64 {
        let um = level.micrometers_per_pixel();
        square_um / (um * um)
    }

    /// Absolute stage position of a flake centroid found in a tile.
    ///
    /// The tile's stage position is taken as the position of the tile center;
    /// the centroid displacement from that center is scaled by the level's
    /// calibration and the result rounded to 5 decimals.
    pub fn flake_centroid_to_stage(
        &self,
        tile_position: StagePosition,
        centroid: PixelPoint,
        tile_dimensions: (u32, u32),
        level: MagnificationLevel,
    ) -> StagePosition {
        let (width, height) = tile_dimensions;
        let mm_per_px = level.micrometers_per_pixel() / 1000.0;
        StagePosition::new(
            tile_position.x_mm + (centroid.x - width as f64 / 2.0) * mm_per_px,
            tile_position.y_mm + (centroid.y - height as f64 / 2.0) * mm_per_px,
        )
        .rounded()
    }

    /// Fixed parallax bias applied when revisiting at `level`.
    pub fn magnification_offset_correction(&self, level: MagnificationLevel) -> StageOffset {
        self.calibration.revisit_offsets.get(level)
    }

    /// Where to drive the stage to see a detected flake at `level`.
    pub fn revisit_target(&self, detected: StagePosition, level: MagnificationLevel) -> StagePosition {
        detected.offset(self.magnification_offset_correction(level))
    }

    /// Dimensions `(rows, cols)` of the scan-area grid at `level`.
    pub fn scan_grid_dimensions(&self, level: MagnificationLevel) -> (usize, usize) {
        let (field_w, field_h) = level.view_field_mm();
        let (travel_x, travel_y) = self.calibration.overview.stage_travel_mm;
        ((travel_y / field_h) as usize, (travel_x / field_w) as usize)
    }

    /// Overview pixels per mm along `(x, y)` for an overview of the given size.
    pub fn overview_pixels_per_mm(&self, overview_dimensions: (u32, u32)) -> (f64, f64) {
        let (extent_x, extent_y) = self.calibration.overview.extent_mm;
        (
            overview_dimensions.0 as f64 / extent_x,
            overview_dimensions.1 as f64 / extent_y,
        )
    }

    /// Overview pixel window seen by `cell` at `level`.
    ///
    /// The window starts at the alignment offset, the same offset that relates
    /// the stage frame to the overview frame.
    pub fn cell_overview_window(
        &self,
        cell: GridCell,
        level: MagnificationLevel,
        pixels_per_mm: (f64, f64),
    ) -> PixelWindow {
        let (field_w, field_h) = level.view_field_mm();
        let (res_x, res_y) = pixels_per_mm;
        let cell_px_w = res_x * field_w;
        let cell_px_h = res_y * field_h;
        let offset = self.calibration.overview.alignment_offset_mm;
        let offset_x = offset.dx_mm * res_x;
        let offset_y = offset.dy_mm * res_y;

        PixelWindow {
            x_start: (cell.col as f64 * cell_px_w + offset_x) as i64,
            y_start: (cell.row as f64 * cell_px_h + offset_y) as i64,
            x_end: ((cell.col + 1) as f64 * cell_px_w + offset_x) as i64,
            y_end: ((cell.row + 1) as f64 * cell_px_h + offset_y) as i64,
        }
    }

    /// Overview pixel under a stage position.
    pub fn stage_to_overview_pixel(
        &self,
        position: StagePosition,
        overview_dimensions: (u32, u32),
    ) -> (i64, i64) {
        let (res_x, res_y) = self.overview_pixels_per_mm(overview_dimensions);
        let offset = self.calibration.overview.alignment_offset_mm;
        (
            ((position.x_mm + offset.dx_mm) * res_x) as i64,
            ((position.y_mm + offset.dy_mm) * res_y) as i64,
        )
    }
}

fn round_decimals(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
