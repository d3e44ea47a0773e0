//! Objective magnification levels.
//!
//! The microscope carries five objectives on its nosepiece. Each is identified
//! by a magnification index (1-5) that doubles as the nosepiece position, and
//! each has a fixed pixel calibration measured on the camera sensor.
//!
//! | Index | Objective | µm / px |
//! |-------|-----------|---------|
//! | 1     | 2.5x      | 3.0754  |
//! | 2     | 5x        | 1.5377  |
//! | 3     | 20x       | 0.3844  |
//! | 4     | 50x       | 0.1538  |
//! | 5     | 100x      | 0.0769  |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Sensor width in pixels used for the view-field calibration.
pub const SENSOR_WIDTH_PX: u32 = 1920;

/// Sensor height in pixels used for the view-field calibration.
pub const SENSOR_HEIGHT_PX: u32 = 1200;

/// One of the five objectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MagnificationLevel {
    X2_5,
    X5,
    X20,
    X50,
    X100,
}

impl MagnificationLevel {
    /// All levels in ascending index order.
    pub const ALL: [MagnificationLevel; 5] = [
        MagnificationLevel::X2_5,
        MagnificationLevel::X5,
        MagnificationLevel::X20,
        MagnificationLevel::X50,
        MagnificationLevel::X100,
    ];

    /// Look up a level by its magnification index.
    ///
    /// Anything outside 1-5 is an input-contract violation.
    pub fn from_index(index: u8) -> Result<Self, CalibrationError> {
        match index {
            1 => Ok(MagnificationLevel::X2_5),
            2 => Ok(MagnificationLevel::X5),
            3 => Ok(MagnificationLevel::X20),
            4 => Ok(MagnificationLevel::X50),
            5 => Ok(MagnificationLevel::X100),
            other => Err(CalibrationError::InvalidMagnificationIndex(other)),
        }
    }

    /// Look up a level by its nominal magnification (e.g. `20.0`).
    pub fn from_magnification(magnification: f64) -> Result<Self, CalibrationError> {
        Self::ALL
            .into_iter()
            .find(|level| (level.magnification() - magnification).abs() < 1e-9)
            .ok_or(CalibrationError::UnknownMagnification(magnification))
    }

    /// Magnification index, which is also the nosepiece position.
    pub const fn index(self) -> u8 {
        match self {
            MagnificationLevel::X2_5 => 1,
            MagnificationLevel::X5 => 2,
            MagnificationLevel::X20 => 3,
            MagnificationLevel::X50 => 4,
            MagnificationLevel::X100 => 5,
        }
    }

    /// Nominal magnification of the objective.
    pub const fn magnification(self) -> f64 {
        match self {
            MagnificationLevel::X2_5 => 2.5,
            MagnificationLevel::X5 => 5.0,
            MagnificationLevel::X20 => 20.0,
            MagnificationLevel::X50 => 50.0,
            MagnificationLevel::X100 => 100.0,
        }
    }

    /// Calibrated micrometers per camera pixel.
    pub const fn micrometers_per_pixel(self) -> f64 {
        match self {
            MagnificationLevel::X2_5 => 3.0754,
            MagnificationLevel::X5 => 1.5377,
            MagnificationLevel::X20 => 0.3844,
            MagnificationLevel::X50 => 0.1538,
            MagnificationLevel::X100 => 0.0769,
        }
    }

    /// Physical footprint of one captured frame as `(width_mm, height_mm)`.
    pub fn view_field_mm(self) -> (f64, f64) {
        let mm_per_px = self.micrometers_per_pixel() / 1000.0;
        (
            SENSOR_WIDTH_PX as f64 * mm_per_px,
            SENSOR_HEIGHT_PX as f64 * mm_per_px,
        )
    }

    /// Label used for directory and file names, e.g. `20x` or `2.5x`.
    pub fn label(self) -> String {
        format!("{}x", self)
    }

    /// Position of this level in [`Self::ALL`].
    pub(crate) const fn slot(self) -> usize {
        self.index() as usize - 1
    }
}

impl fmt::Display for MagnificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MagnificationLevel::X2_5 => write!(f, "2.5"),
            MagnificationLevel::X5 => write!(f, "5"),
            MagnificationLevel::X20 => write!(f, "20"),
            MagnificationLevel::X50 => write!(f, "50"),
            MagnificationLevel::X100 => write!(f, "100"),
        }
    }
}

impl TryFrom<u8> for MagnificationLevel {
    type Error = CalibrationError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::from_index(index)
    }
}

impl From<MagnificationLevel> for u8 {
    fn from(level: MagnificationLevel) -> Self {
        level.index()
    }
}

/// A value per magnification level, indexed by [`MagnificationLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelTable<T>([T; 5]);

impl<T: Copy> LevelTable<T> {
    /// Build a table from values in index order (2.5x first).
    pub const fn new(values: [T; 5]) -> Self {
        Self(values)
    }

    /// Table with the same value for every level.
    pub const fn uniform(value: T) -> Self {
        Self([value; 5])
    }

    pub fn get(&self, level: MagnificationLevel) -> T {
        self.0[level.slot()]
    }

    pub fn set(&mut self, level: MagnificationLevel, value: T) {
        self.0[level.slot()] = value;
    }
}
