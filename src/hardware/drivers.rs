use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::calibration::{MagnificationLevel, StagePosition};
use crate::error::HardwareError;

/// Sentinel stored when the optical Z-height cannot be read.
pub const Z_HEIGHT_UNKNOWN: f64 = -1.0;

/// Red, green and blue white-balance gains as the camera reports them.
pub type WhiteBalance = (u32, u32, u32);

// =============================================================================
// Property Records
// =============================================================================

/// Camera properties to apply. Unset fields are left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Exposure time in seconds
    pub exposure: Option<f64>,
    /// Gain in logical units, 0 is normal gain
    pub gain: Option<i64>,
    pub white_balance: Option<WhiteBalance>,
    /// Gamma times 100
    pub gamma: Option<i64>,
}

/// Camera properties read back from the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraProperties {
    pub exposure: f64,
    pub gain: i64,
    pub gamma: i64,
    pub white_balance: WhiteBalance,
    pub time: DateTime<Utc>,
}

/// Optical head properties read back from the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpticsProperties {
    /// Nosepiece position, equal to the active magnification index
    pub nosepiece: u8,
    pub aperture: f64,
    /// Lamp voltage in volts
    pub voltage: f64,
    /// Focus height in µm, [`Z_HEIGHT_UNKNOWN`] when the read failed
    pub z_height: f64,
}

// =============================================================================
// Driver Capabilities
// =============================================================================

/// Motorised XY stage.
///
/// Methods take `&mut self`: the physical device has one owner and
/// every call is serialised through it.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Current absolute position.
    async fn position(&mut self) -> Result<StagePosition, HardwareError>;

    /// Move to an absolute position. Returns once the move has been issued.
    async fn move_absolute(&mut self, target: StagePosition) -> Result<(), HardwareError>;

    async fn move_relative(&mut self, dx_mm: f64, dy_mm: f64) -> Result<(), HardwareError>;
}

/// Microscope optical head: nosepiece, epi lamp and focus drive.
#[async_trait]
pub trait Optics: Send + Sync {
    /// Rotate the nosepiece to the objective of `level`.
    async fn set_magnification(&mut self, level: MagnificationLevel) -> Result<(), HardwareError>;

    async fn set_lamp_voltage(&mut self, voltage: f64) -> Result<(), HardwareError>;

    async fn set_lamp_aperture_stop(&mut self, aperture: f64) -> Result<(), HardwareError>;

    async fn rotate_nosepiece_forward(&mut self) -> Result<(), HardwareError>;

    async fn rotate_nosepiece_backward(&mut self) -> Result<(), HardwareError>;

    async fn lamp_on(&mut self) -> Result<(), HardwareError>;

    async fn lamp_off(&mut self) -> Result<(), HardwareError>;

    /// Nosepiece, aperture and voltage. Implementations that cannot read the
    /// focus drive report [`Z_HEIGHT_UNKNOWN`].
    async fn properties(&mut self) -> Result<OpticsProperties, HardwareError>;

    /// Focus height in µm. Known to fail intermittently on real hardware.
    async fn z_height(&mut self) -> Result<f64, HardwareError>;
}

/// Color camera on the microscope's photo port.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn set_properties(&mut self, settings: &CameraSettings) -> Result<(), HardwareError>;

    async fn properties(&mut self) -> Result<CameraProperties, HardwareError>;

    /// Snap one frame. Implementations return the frame upright and with the
    /// sensor dark level already removed.
    async fn capture_frame(&mut self) -> Result<RgbImage, HardwareError>;
}
