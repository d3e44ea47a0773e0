use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use super::flake::{FlakeRecord, RevisitImage};
use crate::calibration::{CoordinateTransform, MagnificationLevel};
use crate::error::ScanError;
use crate::hardware::{AcquisitionProfile, Camera, DeviceSnapshot, Microscope, Optics, Stage};
use crate::storage::ScanDirectory;
use crate::tile::write_png;

/// Magnifications in the order they are revisited: the highest useful ones
/// first, then the lowest.
pub const REVISIT_ORDER: [MagnificationLevel; 5] = [
    MagnificationLevel::X20,
    MagnificationLevel::X50,
    MagnificationLevel::X100,
    MagnificationLevel::X2_5,
    MagnificationLevel::X5,
];

#[derive(Debug, Clone, PartialEq)]
pub struct RevisitSettings {
    pub order: Vec<MagnificationLevel>,
    pub detection_level: MagnificationLevel,
    /// Also re-image at the detection magnification
    pub include_detection_level: bool,
    /// Log and skip a failed flake instead of aborting the run
    pub continue_on_failure: bool,
}

impl Default for RevisitSettings {
    fn default() -> Self {
        Self {
            order: REVISIT_ORDER.to_vec(),
            detection_level: MagnificationLevel::X20,
            include_detection_level: false,
            continue_on_failure: false,
        }
    }
}

impl RevisitSettings {
    /// Levels that will actually be visited, in order.
    pub fn levels(&self) -> Vec<MagnificationLevel> {
        self.order
            .iter()
            .copied()
            .filter(|&level| self.include_detection_level || level != self.detection_level)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevisitReport {
    /// Images captured per magnification label
    pub captured: BTreeMap<String, usize>,
    pub failed: usize,
}

impl RevisitReport {
    pub fn total(&self) -> usize {
        self.captured.values().sum()
    }
}

/// Re-images every recorded flake at the other magnifications.
///
/// The level loop is the outer one, so the nosepiece turns once per level
/// rather than once per flake. Each image is written as `<mag>x.png` in the
/// flake directory and registered in its `meta.json`.
pub struct RevisitScheduler<'a> {
    transform: &'a CoordinateTransform,
    scan_dir: &'a ScanDirectory,
    profile: &'a AcquisitionProfile,
    settings: RevisitSettings,
}

impl<'a> RevisitScheduler<'a> {
    pub fn new(
        transform: &'a CoordinateTransform,
        scan_dir: &'a ScanDirectory,
        profile: &'a AcquisitionProfile,
        settings: RevisitSettings,
    ) -> Self {
        Self {
            transform,
            scan_dir,
            profile,
            settings,
        }
    }

    pub async fn run<S: Stage, O: Optics, C: Camera>(
        &self,
        rig: &mut Microscope<S, O, C>,
    ) -> Result<RevisitReport, ScanError> {
        let flakes = self.scan_dir.walk_flake_directories()?;
        let mut report = RevisitReport::default();
        if flakes.is_empty() {
            info!("No flakes to revisit");
            return Ok(report);
        }

        for level in self.settings.levels() {
            let snapshot = rig
                .apply_settings(level, &self.profile.for_level(level))
                .await?;
            let settle = self.transform.calibration().revisit_settle.get(level);
            info!(
                magnification = %level.label(),
                flakes = flakes.len(),
                settle_ms = settle.as_millis() as u64,
                "Revisiting flakes"
            );

            for dir in &flakes {
                match self.revisit(rig, dir, level, &snapshot, settle).await {
                    Ok(()) => *report.captured.entry(level.label()).or_insert(0) += 1,
                    Err(e) if self.settings.continue_on_failure => {
                        warn!(
                            flake = %dir.display(),
                            magnification = %level.label(),
                            error = %e,
                            "Revisit failed, continuing"
                        );
                        report.failed += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(report)
    }

    async fn revisit<S: Stage, O: Optics, C: Camera>(
        &self,
        rig: &mut Microscope<S, O, C>,
        dir: &Path,
        level: MagnificationLevel,
        snapshot: &DeviceSnapshot,
        settle: Duration,
    ) -> Result<(), ScanError> {
        let mut record = FlakeRecord::load(dir)?;
        let target = self.transform.revisit_target(record.meta.position(), level);
        rig.move_to(target, settle).await?;
        let tile = rig
            .capture_tile(level, snapshot, Some(record.meta.chip_id))
            .await?;

        let file = format!("{}.png", level.label());
        write_png(&tile.image, &dir.join(&file))?;
        record.add_image(
            level,
            RevisitImage {
                file,
                metadata: tile.metadata,
            },
        );
        record.save()?;
        Ok(())
    }
}
