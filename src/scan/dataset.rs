use tracing::info;

use crate::calibration::CoordinateTransform;
use crate::error::ScanError;
use crate::hardware::{AcquisitionSettings, Camera, Microscope, Optics, Stage};
use crate::overview::ScanAreaMap;
use crate::raster::{SparseRaster, SparseRasterPlan};
use crate::storage::ScanDirectory;

/// Image every occupied cell of `map` without detection.
///
/// Tiles land in `<mag>x/Pictures/<n>.png` with their metadata, chip id
/// included, in `<mag>x/Meta/<n>.json`. Returns the number of tiles written.
pub async fn record_scan_area<S: Stage, O: Optics, C: Camera>(
    rig: &mut Microscope<S, O, C>,
    transform: &CoordinateTransform,
    map: &ScanAreaMap,
    plan: SparseRasterPlan,
    settings: &AcquisitionSettings,
    scan_dir: &ScanDirectory,
) -> Result<usize, ScanError> {
    let pass = scan_dir.create_pass(plan.level)?;
    let mut raster = SparseRaster::start(rig, transform, map, plan, settings).await?;

    let mut written = 0;
    while let Some(step) = raster.next_step().await? {
        if let Some(tile) = step.into_tile() {
            written += 1;
            pass.write_tile(written, &tile)?;
        }
    }

    info!(
        tiles = written,
        magnification = %plan.level.label(),
        "Scan area recorded"
    );
    Ok(written)
}
