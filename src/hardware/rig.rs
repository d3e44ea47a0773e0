use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::drivers::{Camera, CameraProperties, Optics, OpticsProperties, Stage, Z_HEIGHT_UNKNOWN};
use super::settings::AcquisitionSettings;
use crate::calibration::{MagnificationLevel, StagePosition};
use crate::error::HardwareError;
use crate::tile::{ImageTile, TileMetadata};

/// Settle time after each step of a settings change.
pub const DEFAULT_SETTINGS_SETTLE: Duration = Duration::from_millis(500);

/// Auto-focus warm-up delays: after the first settings pass, after rotating
/// the nosepiece away, and after returning.
pub const AUTOFOCUS_WARMUP_DELAYS: [Duration; 3] = [
    Duration::from_secs(10),
    Duration::from_secs(20),
    Duration::from_secs(20),
];

/// Camera and optics properties read once per pass and stamped on each tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSnapshot {
    pub camera: CameraProperties,
    pub optics: OpticsProperties,
}

/// The stage, optical head and camera of one microscope.
///
/// This is the single owner of the hardware. Every move, settings change and
/// capture in a run goes through one `&mut Microscope`, so hardware calls are
/// serialised by the borrow checker rather than by locks.
pub struct Microscope<S, O, C> {
    stage: S,
    optics: O,
    camera: C,
    settings_settle: Duration,
}

impl<S: Stage, O: Optics, C: Camera> Microscope<S, O, C> {
    pub fn new(stage: S, optics: O, camera: C) -> Self {
        Self {
            stage,
            optics,
            camera,
            settings_settle: DEFAULT_SETTINGS_SETTLE,
        }
    }

    /// Override the delay after each settings step.
    pub fn with_settings_settle(mut self, settle: Duration) -> Self {
        self.settings_settle = settle;
        self
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn optics(&self) -> &O {
        &self.optics
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn into_parts(self) -> (S, O, C) {
        (self.stage, self.optics, self.camera)
    }

    /// Switch to `level` and apply its acquisition settings.
    ///
    /// Nosepiece, camera and lamp are set in that order with a settle delay
    /// after each, then the actual properties are read back and logged.
    pub async fn apply_settings(
        &mut self,
        level: MagnificationLevel,
        settings: &AcquisitionSettings,
    ) -> Result<DeviceSnapshot, HardwareError> {
        self.optics.set_magnification(level).await?;
        tokio::time::sleep(self.settings_settle).await;

        self.camera.set_properties(&settings.camera).await?;
        tokio::time::sleep(self.settings_settle).await;

        self.optics.set_lamp_voltage(settings.lamp.light_voltage).await?;
        self.optics.set_lamp_aperture_stop(settings.lamp.aperture).await?;
        tokio::time::sleep(self.settings_settle).await;

        let snapshot = self.snapshot().await?;
        info!(
            magnification = %level.label(),
            nosepiece = snapshot.optics.nosepiece,
            voltage = snapshot.optics.voltage,
            aperture = snapshot.optics.aperture,
            "Applied acquisition settings"
        );
        debug!(
            requested = ?settings.camera,
            actual_exposure = snapshot.camera.exposure,
            actual_gain = snapshot.camera.gain,
            actual_gamma = snapshot.camera.gamma,
            actual_white_balance = ?snapshot.camera.white_balance,
            "Camera settings read back"
        );
        if snapshot.optics.nosepiece != level.index() {
            warn!(
                expected = level.index(),
                actual = snapshot.optics.nosepiece,
                "Nosepiece reports a different position than requested"
            );
        }

        Ok(snapshot)
    }

    /// Read the current camera and optics properties.
    ///
    /// A failed Z-height read is logged and replaced by [`Z_HEIGHT_UNKNOWN`].
    pub async fn snapshot(&mut self) -> Result<DeviceSnapshot, HardwareError> {
        let camera = self.camera.properties().await?;
        let mut optics = self.optics.properties().await?;
        optics.z_height = match self.optics.z_height().await {
            Ok(height) => height,
            Err(e) => {
                warn!(error = %e, "Z-height read failed, recording sentinel");
                Z_HEIGHT_UNKNOWN
            }
        };
        Ok(DeviceSnapshot { camera, optics })
    }

    pub async fn position(&mut self) -> Result<StagePosition, HardwareError> {
        self.stage.position().await
    }

    /// Issue an absolute move without waiting for the stage to settle.
    pub async fn move_absolute(&mut self, target: StagePosition) -> Result<(), HardwareError> {
        self.stage.move_absolute(target).await
    }

    /// Move to `target` and wait `settle` before returning.
    pub async fn move_to(&mut self, target: StagePosition, settle: Duration) -> Result<(), HardwareError> {
        self.stage.move_absolute(target).await?;
        tokio::time::sleep(settle).await;
        Ok(())
    }

    /// Capture a tile at the current stage position.
    ///
    /// The stage position is read back after the capture.
    pub async fn capture_tile(
        &mut self,
        level: MagnificationLevel,
        snapshot: &DeviceSnapshot,
        chip_id: Option<u32>,
    ) -> Result<ImageTile, HardwareError> {
        let image = self.camera.capture_frame().await?;
        let acquired_at = Utc::now();
        let stage = self.stage.position().await?;

        Ok(ImageTile {
            image,
            metadata: TileMetadata {
                camera: snapshot.camera,
                optics: snapshot.optics,
                stage,
                magnification: level,
                acquired_at,
                chip_id,
            },
        })
    }

    /// Cycle the nosepiece once so the focus drive re-engages at `level`.
    pub async fn auto_focus_warm_up(
        &mut self,
        level: MagnificationLevel,
        settings: &AcquisitionSettings,
    ) -> Result<(), HardwareError> {
        info!(magnification = %level.label(), "Warming up auto-focus");
        self.apply_settings(level, settings).await?;
        tokio::time::sleep(AUTOFOCUS_WARMUP_DELAYS[0]).await;
        self.optics.rotate_nosepiece_backward().await?;
        tokio::time::sleep(AUTOFOCUS_WARMUP_DELAYS[1]).await;
        self.apply_settings(level, settings).await?;
        tokio::time::sleep(AUTOFOCUS_WARMUP_DELAYS[2]).await;
        Ok(())
    }

    pub async fn lamp_on(&mut self) -> Result<(), HardwareError> {
        self.optics.lamp_on().await
    }

    pub async fn lamp_off(&mut self) -> Result<(), HardwareError> {
        self.optics.lamp_off().await
    }
}
