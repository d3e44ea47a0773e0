//! Scan-area map: which high-magnification cells are worth imaging.
//!
//! The foreground mask is partitioned into cells the size of one
//! high-magnification view field. A cell is occupied when nearly all of it is
//! foreground, which keeps cells straddling the chip edge out of the scan.
//! After a light cleanup, each 8-connected blob of occupied cells becomes a
//! chip with its own label.

use std::path::Path;

use image::{GrayImage, ImageBuffer, Luma};
use tracing::{info, warn};

use super::labeling::label_components;
use super::morphology::{dilate, erode, foreground_count};
use crate::calibration::{CoordinateTransform, GridCell, MagnificationLevel};
use crate::error::StorageError;
use crate::tile::write_png;

/// Parameters of the area map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaMapSettings {
    /// Minimum foreground fraction of an occupied cell
    pub percentage_threshold: f64,
    /// Erosions added to the single cleanup erosion
    pub extra_erosion: usize,
    /// Magnification whose view field defines the cell size
    pub level: MagnificationLevel,
}

impl Default for AreaMapSettings {
    fn default() -> Self {
        Self {
            percentage_threshold: 0.95,
            extra_erosion: 0,
            level: MagnificationLevel::X20,
        }
    }
}

// =============================================================================
// Scan Area Map
// =============================================================================

/// Labelled grid of high-magnification cells.
///
/// Label 0 is background; labels `1..=chip_count()` are chips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanAreaMap {
    rows: usize,
    cols: usize,
    labels: Vec<u32>,
    level: MagnificationLevel,
}

impl ScanAreaMap {
    /// All-background map.
    pub fn new(rows: usize, cols: usize, level: MagnificationLevel) -> Self {
        Self {
            rows,
            cols,
            labels: vec![0; rows * cols],
            level,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn level(&self) -> MagnificationLevel {
        self.level
    }

    pub fn label(&self, cell: GridCell) -> u32 {
        self.labels[cell.row * self.cols + cell.col]
    }

    pub fn set_label(&mut self, cell: GridCell, label: u32) {
        self.labels[cell.row * self.cols + cell.col] = label;
    }

    /// Row-major labels.
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Number of cells with a non-zero label.
    pub fn occupied_cells(&self) -> usize {
        self.labels.iter().filter(|&&l| l != 0).count()
    }

    pub fn chip_count(&self) -> u32 {
        self.labels.iter().copied().max().unwrap_or(0)
    }

    /// Labels as a 16-bit grayscale image, one pixel per cell.
    ///
    /// Labels above `u16::MAX` are clamped and logged.
    pub fn to_image(&self) -> ImageBuffer<Luma<u16>, Vec<u16>> {
        let chips = self.chip_count();
        if chips > u16::MAX as u32 {
            warn!(
                chips,
                max = u16::MAX,
                "Scan-area map has more chips than a 16-bit image holds; clamping labels"
            );
        }
        ImageBuffer::from_fn(self.cols as u32, self.rows as u32, |x, y| {
            let label = self.label(GridCell::new(y as usize, x as usize));
            Luma([label.min(u16::MAX as u32) as u16])
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        write_png(&self.to_image(), path)
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Turns an overview foreground mask into a [`ScanAreaMap`].
#[derive(Debug, Clone)]
pub struct AreaMapBuilder {
    transform: CoordinateTransform,
    settings: AreaMapSettings,
}

impl AreaMapBuilder {
    pub fn new(transform: CoordinateTransform, settings: AreaMapSettings) -> Self {
        Self { transform, settings }
    }

    pub fn settings(&self) -> &AreaMapSettings {
        &self.settings
    }

    /// Cells whose foreground fraction meets the threshold, before cleanup.
    ///
    /// One pixel per cell, `cols` wide and `rows` high, 255 where occupied.
    pub fn occupancy(&self, mask: &GrayImage) -> GrayImage {
        let level = self.settings.level;
        let (rows, cols) = self.transform.scan_grid_dimensions(level);
        let pixels_per_mm = self.transform.overview_pixels_per_mm(mask.dimensions());
        let (width, height) = (mask.width() as i64, mask.height() as i64);

        GrayImage::from_fn(cols as u32, rows as u32, |col, row| {
            let cell = GridCell::new(row as usize, col as usize);
            let window = self.transform.cell_overview_window(cell, level, pixels_per_mm);
            let x0 = window.x_start.clamp(0, width);
            let x1 = window.x_end.clamp(0, width);
            let y0 = window.y_start.clamp(0, height);
            let y1 = window.y_end.clamp(0, height);
            if x1 <= x0 || y1 <= y0 {
                return Luma([0]);
            }

            let mut foreground = 0u64;
            for y in y0..y1 {
                for x in x0..x1 {
                    if mask.get_pixel(x as u32, y as u32)[0] > 0 {
                        foreground += 1;
                    }
                }
            }
            let area = ((x1 - x0) * (y1 - y0)) as f64;
            let occupied = foreground as f64 / area >= self.settings.percentage_threshold;
            Luma([if occupied { 255 } else { 0 }])
        })
    }

    /// Build the labelled map.
    pub fn build(&self, mask: &GrayImage) -> ScanAreaMap {
        let occupancy = self.occupancy(mask);
        let cleaned = dilate(&erode(&occupancy, 3, 1 + self.settings.extra_erosion), 3, 1);
        let (labels, chips) = label_components(&cleaned);
        let (cols, rows) = cleaned.dimensions();

        info!(
            rows,
            cols,
            occupied = foreground_count(&occupancy),
            after_cleanup = foreground_count(&cleaned),
            chips,
            "Built scan-area map"
        );

        ScanAreaMap {
            rows: rows as usize,
            cols: cols as usize,
            labels,
            level: self.settings.level,
        }
    }
}
