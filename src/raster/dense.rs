use std::time::Duration;

use tracing::info;

use super::progress::ProgressTracker;
use super::snake::snake_order;
use crate::calibration::{GridCell, MagnificationLevel, StagePosition};
use crate::error::{HardwareError, ScanError};
use crate::hardware::{AcquisitionSettings, Camera, DeviceSnapshot, Microscope, Optics, Stage};
use crate::storage::PassDirectory;
use crate::tile::ImageTile;

/// Fixed full-plate grid for the low-magnification pass.
///
/// Rows step along stage x, columns along stage y. The 2.5x view field is
/// about 5.9 x 3.7 mm, so 5 x 3.333 mm steps leave roughly 18% and 11%
/// overlap for the stitcher to trim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DenseRasterPlan {
    pub rows: usize,
    pub columns: usize,
    pub x_step_mm: f64,
    pub y_step_mm: f64,
    pub settle: Duration,
    pub level: MagnificationLevel,
}

impl Default for DenseRasterPlan {
    fn default() -> Self {
        Self {
            rows: 21,
            columns: 31,
            x_step_mm: 5.0,
            y_step_mm: 3.333,
            settle: Duration::from_millis(200),
            level: MagnificationLevel::X2_5,
        }
    }
}

impl DenseRasterPlan {
    pub fn tile_count(&self) -> usize {
        self.rows * self.columns
    }

    pub fn position(&self, cell: GridCell) -> StagePosition {
        StagePosition::new(
            cell.row as f64 * self.x_step_mm,
            cell.col as f64 * self.y_step_mm,
        )
    }

    /// Cells and stage positions in acquisition order.
    pub fn positions(&self) -> impl Iterator<Item = (GridCell, StagePosition)> + '_ {
        snake_order(self.rows, self.columns).map(move |cell| (cell, self.position(cell)))
    }
}

/// Lazy dense raster: each call to [`DenseRaster::next_tile`] moves, settles
/// and captures one tile.
pub struct DenseRaster<'a, S, O, C> {
    rig: &'a mut Microscope<S, O, C>,
    plan: DenseRasterPlan,
    snapshot: DeviceSnapshot,
    cells: Box<dyn Iterator<Item = GridCell> + Send>,
    progress: ProgressTracker,
}

impl<'a, S: Stage, O: Optics, C: Camera> DenseRaster<'a, S, O, C> {
    /// Home the stage, apply the pass settings and read the device properties
    /// stamped on every tile.
    pub async fn start(
        rig: &'a mut Microscope<S, O, C>,
        plan: DenseRasterPlan,
        settings: &AcquisitionSettings,
    ) -> Result<Self, HardwareError> {
        rig.move_absolute(StagePosition::new(0.0, 0.0)).await?;
        let snapshot = rig.apply_settings(plan.level, settings).await?;
        info!(
            rows = plan.rows,
            columns = plan.columns,
            magnification = %plan.level.label(),
            "Starting dense raster"
        );

        Ok(Self {
            rig,
            plan,
            snapshot,
            cells: Box::new(snake_order(plan.rows, plan.columns)),
            progress: ProgressTracker::new("dense", plan.tile_count()),
        })
    }

    /// Capture the next tile, or `None` once the grid is exhausted.
    pub async fn next_tile(&mut self) -> Result<Option<(GridCell, ImageTile)>, HardwareError> {
        let Some(cell) = self.cells.next() else {
            return Ok(None);
        };
        self.rig
            .move_to(self.plan.position(cell), self.plan.settle)
            .await?;
        let tile = self
            .rig
            .capture_tile(self.plan.level, &self.snapshot, None)
            .await?;
        self.progress.advance();
        Ok(Some((cell, tile)))
    }

    /// Run the pass to completion, writing `<n>.png` / `<n>.json` with `n`
    /// counting from 1 in acquisition order.
    ///
    /// Returns the number of tiles written.
    pub async fn record(mut self, pass: &PassDirectory) -> Result<usize, ScanError> {
        let mut written = 0;
        while let Some((_, tile)) = self.next_tile().await? {
            written += 1;
            pass.write_tile(written, &tile)?;
        }
        info!(
            tiles = written,
            elapsed_secs = self.progress.elapsed().as_secs(),
            "Dense raster complete"
        );
        Ok(written)
    }
}
