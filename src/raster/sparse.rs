use std::time::Duration;

use tracing::{info, warn};

use super::progress::ProgressTracker;
use super::snake::snake_order;
use crate::calibration::{CoordinateTransform, GridCell, MagnificationLevel, StagePosition};
use crate::error::HardwareError;
use crate::hardware::{AcquisitionSettings, Camera, DeviceSnapshot, Microscope, Optics, Stage};
use crate::overview::ScanAreaMap;
use crate::tile::ImageTile;

/// High-magnification pass over the occupied cells of a scan-area map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparseRasterPlan {
    pub level: MagnificationLevel,
    pub settle: Duration,
}

impl Default for SparseRasterPlan {
    fn default() -> Self {
        Self {
            level: MagnificationLevel::X20,
            settle: Duration::from_millis(200),
        }
    }
}

/// One occupied cell to visit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SparseTarget {
    pub cell: GridCell,
    pub chip_id: u32,
    pub position: StagePosition,
}

/// Occupied cells of `map` in snake order, with their stage positions.
///
/// Background cells are skipped. Cells whose stage position comes out
/// negative are dropped with a warning.
pub fn sparse_targets(
    map: &ScanAreaMap,
    transform: &CoordinateTransform,
    level: MagnificationLevel,
) -> Vec<SparseTarget> {
    snake_order(map.rows(), map.cols())
        .filter_map(|cell| {
            let chip_id = map.label(cell);
            if chip_id == 0 {
                return None;
            }
            let position = transform.cell_to_stage(cell, level);
            if position.is_negative() {
                warn!(
                    row = cell.row,
                    col = cell.col,
                    x_mm = position.x_mm,
                    y_mm = position.y_mm,
                    "Skipping cell with negative stage position"
                );
                return None;
            }
            Some(SparseTarget {
                cell,
                chip_id,
                position,
            })
        })
        .collect()
}

/// One element of the sparse sequence.
///
/// The first element is always `NotPositioned`: the stage has only just been
/// sent to the first cell. Every later element carries the tile of the cell
/// visited one step earlier, captured after its settle time.
#[derive(Debug, Clone)]
pub enum RasterStep {
    NotPositioned,
    Captured(ImageTile),
}

impl RasterStep {
    pub fn is_positioned(&self) -> bool {
        matches!(self, RasterStep::Captured(_))
    }

    pub fn tile(&self) -> Option<&ImageTile> {
        match self {
            RasterStep::NotPositioned => None,
            RasterStep::Captured(tile) => Some(tile),
        }
    }

    pub fn into_tile(self) -> Option<ImageTile> {
        match self {
            RasterStep::NotPositioned => None,
            RasterStep::Captured(tile) => Some(tile),
        }
    }
}

/// Lazy sparse raster with a one-capture lag.
///
/// For `N` targets the sequence has `N + 1` elements:
///
/// ```text
/// call 1      move(t1)                                   -> NotPositioned
/// call k      settle, capture(t[k-1]), move(t[k])        -> Captured(t[k-1])
/// call N + 1  settle, capture(tN)                        -> Captured(tN)
/// ```
///
/// The consumer works on a tile while the stage is already travelling to the
/// next cell.
pub struct SparseRaster<'a, S, O, C> {
    rig: &'a mut Microscope<S, O, C>,
    plan: SparseRasterPlan,
    snapshot: DeviceSnapshot,
    targets: std::vec::IntoIter<SparseTarget>,
    awaiting_capture: Option<u32>,
    started: bool,
    progress: ProgressTracker,
}

impl<'a, S: Stage, O: Optics, C: Camera> SparseRaster<'a, S, O, C> {
    /// Apply the pass settings and plan the targets. No stage motion happens
    /// until the first [`SparseRaster::next_step`].
    pub async fn start(
        rig: &'a mut Microscope<S, O, C>,
        transform: &CoordinateTransform,
        map: &ScanAreaMap,
        plan: SparseRasterPlan,
        settings: &AcquisitionSettings,
    ) -> Result<Self, HardwareError> {
        let snapshot = rig.apply_settings(plan.level, settings).await?;
        let targets = sparse_targets(map, transform, plan.level);
        info!(
            targets = targets.len(),
            chips = map.chip_count(),
            magnification = %plan.level.label(),
            "Starting sparse raster"
        );

        Ok(Self {
            rig,
            plan,
            snapshot,
            progress: ProgressTracker::new("sparse", targets.len()),
            targets: targets.into_iter(),
            awaiting_capture: None,
            started: false,
        })
    }

    pub fn remaining(&self) -> usize {
        self.targets.len() + usize::from(self.awaiting_capture.is_some())
    }

    /// Advance the sequence; `None` once the last tile has been flushed.
    pub async fn next_step(&mut self) -> Result<Option<RasterStep>, HardwareError> {
        if !self.started {
            self.started = true;
            self.advance_stage().await?;
            return Ok(Some(RasterStep::NotPositioned));
        }

        let Some(chip_id) = self.awaiting_capture.take() else {
            return Ok(None);
        };

        tokio::time::sleep(self.plan.settle).await;
        let tile = self
            .rig
            .capture_tile(self.plan.level, &self.snapshot, Some(chip_id))
            .await?;
        self.progress.advance();

        self.advance_stage().await?;
        Ok(Some(RasterStep::Captured(tile)))
    }

    async fn advance_stage(&mut self) -> Result<(), HardwareError> {
        if let Some(target) = self.targets.next() {
            self.rig.move_absolute(target.position).await?;
            self.awaiting_capture = Some(target.chip_id);
        }
        Ok(())
    }
}
