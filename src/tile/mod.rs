//! Captured image tiles and their metadata.
//!
//! An [`ImageTile`] is created once per capture and never mutated afterwards.
//! Its [`TileMetadata`] is the typed record persisted next to every tile:
//!
//! ```text
//! {
//!   "camera": { "exposure", "gain", "gamma", "white_balance", "time" },
//!   "optics": { "nosepiece", "aperture", "voltage", "z_height" },
//!   "stage":  { "x_mm", "y_mm" },
//!   "magnification": 3,
//!   "acquired_at": "2024-05-01T12:00:00Z",
//!   "chip_id": 4                      (high-magnification tiles only)
//! }
//! ```

mod encoder;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::calibration::{MagnificationLevel, StagePosition};
use crate::hardware::{CameraProperties, OpticsProperties};

pub use encoder::{
    clamp_quality, downscale, is_valid_quality, read_rgb, write_png, JpegTileEncoder,
    DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};

/// Metadata recorded with every captured tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMetadata {
    pub camera: CameraProperties,
    pub optics: OpticsProperties,
    pub stage: StagePosition,
    pub magnification: MagnificationLevel,
    pub acquired_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chip_id: Option<u32>,
}

/// A captured frame with its acquisition metadata.
#[derive(Debug, Clone)]
pub struct ImageTile {
    pub image: RgbImage,
    pub metadata: TileMetadata,
}

impl ImageTile {
    pub fn position(&self) -> StagePosition {
        self.metadata.stage
    }

    pub fn level(&self) -> MagnificationLevel {
        self.metadata.magnification
    }

    pub fn chip_id(&self) -> Option<u32> {
        self.metadata.chip_id
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
