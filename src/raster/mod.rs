//! Stage raster scheduling.
//!
//! Both passes walk a grid in snake order so the stage never travels back
//! across a row:
//!
//! ```text
//!   row 0   ──►──►──►──►──┐
//!   row 1   ┌──◄──◄──◄──◄─┘
//!   row 2   └──►──►──►──►──┐
//!   ...                    ▼
//! ```
//!
//! - [`DenseRaster`] covers the whole plate at low magnification and yields
//!   one tile per cell.
//! - [`SparseRaster`] visits only the labelled cells of a scan-area map and
//!   reports each tile one step late, so detection on one tile overlaps the
//!   move to the next.

mod dense;
mod progress;
mod snake;
mod sparse;

pub use dense::{DenseRaster, DenseRasterPlan};
pub use progress::{ProgressTracker, DEFAULT_REPORT_INTERVAL};
pub use snake::snake_order;
pub use sparse::{sparse_targets, RasterStep, SparseRaster, SparseRasterPlan, SparseTarget};
