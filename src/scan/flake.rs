use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::calibration::{CoordinateTransform, MagnificationLevel, PixelPoint, StagePosition};
use crate::error::{DetectionError, StorageError};
use crate::storage::{read_json, write_json};
use crate::tile::TileMetadata;

/// Name of the per-flake metadata file.
pub const FLAKE_META_FILE: &str = "meta.json";

/// Path components kept in [`FlakeMeta::path`]: scan, chip and flake.
const RELATIVE_PATH_DEPTH: usize = 3;

/// A candidate region returned by a [`Detector`].
#[derive(Debug, Clone)]
pub struct Flake {
    /// Flake pixels are non-zero. Same size as the tile.
    pub mask: GrayImage,
    /// Centroid in tile pixels.
    pub center: PixelPoint,
    /// Area in pixels.
    pub size_px: f64,
    pub thickness: String,
    pub entropy: f64,
    pub aspect_ratio: f64,
    pub max_sidelength_px: f64,
    pub min_sidelength_px: f64,
    /// Mean contrast against the background, per RGB channel.
    pub mean_contrast: [f64; 3],
    pub false_positive_probability: f64,
}

impl Flake {
    pub fn confidence(&self) -> f64 {
        1.0 - self.false_positive_probability
    }

    /// Whether the flake passes `1 - false_positive_probability >= threshold`.
    pub fn is_confident(&self, threshold: f64) -> bool {
        self.confidence() >= threshold
    }
}

/// Material classification on a corrected tile.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Flake>, DetectionError>;
}

/// An image captured while revisiting a flake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisitImage {
    /// File name inside the flake directory, e.g. `50x.png`.
    pub file: String,
    pub metadata: TileMetadata,
}

/// Persisted description of one flake, `Chip_<id>/Flake_<n>/meta.json`.
///
/// Lengths are in µm and the size in µm².
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlakeMeta {
    pub chip_id: u32,
    pub flake_id: u32,
    pub position_x: f64,
    pub position_y: f64,
    pub size: f64,
    pub thickness: String,
    pub entropy: f64,
    pub aspect_ratio: f64,
    pub max_sidelength: f64,
    pub min_sidelength: f64,
    pub mean_contrast_r: f64,
    pub mean_contrast_g: f64,
    pub mean_contrast_b: f64,
    pub false_positive_probability: f64,
    /// `<scan>/Chip_<id>/Flake_<n>`
    pub path: String,
    /// Revisit images keyed by magnification label.
    #[serde(default)]
    pub images: BTreeMap<String, RevisitImage>,
}

impl FlakeMeta {
    /// Convert a detected flake to physical units.
    ///
    /// `position` is the already corrected stage position of the centroid.
    pub fn from_flake(
        flake: &Flake,
        chip_id: u32,
        flake_id: u32,
        position: StagePosition,
        level: MagnificationLevel,
        transform: &CoordinateTransform,
        dir: &Path,
    ) -> Self {
        let [r, g, b] = flake.mean_contrast;
        Self {
            chip_id,
            flake_id,
            position_x: position.x_mm,
            position_y: position.y_mm,
            size: transform.pixel_area_to_square_micrometers(flake.size_px, level),
            thickness: flake.thickness.clone(),
            entropy: flake.entropy,
            aspect_ratio: flake.aspect_ratio,
            max_sidelength: transform.pixel_length_to_micrometers(flake.max_sidelength_px, level),
            min_sidelength: transform.pixel_length_to_micrometers(flake.min_sidelength_px, level),
            mean_contrast_r: r,
            mean_contrast_g: g,
            mean_contrast_b: b,
            false_positive_probability: flake.false_positive_probability,
            path: relative_path(dir),
            images: BTreeMap::new(),
        }
    }

    pub fn position(&self) -> StagePosition {
        StagePosition::new(self.position_x, self.position_y)
    }
}

/// A persisted flake and its directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FlakeRecord {
    pub dir: PathBuf,
    pub meta: FlakeMeta,
}

impl FlakeRecord {
    pub fn load(dir: &Path) -> Result<Self, StorageError> {
        let meta = read_json(&dir.join(FLAKE_META_FILE))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            meta,
        })
    }

    pub fn save(&self) -> Result<(), StorageError> {
        write_json(&self.dir.join(FLAKE_META_FILE), &self.meta)
    }

    /// Record a revisit image under its magnification key, replacing any
    /// earlier image at that level.
    pub fn add_image(&mut self, level: MagnificationLevel, image: RevisitImage) {
        self.meta.images.insert(level.label(), image);
    }

    pub fn has_image(&self, level: MagnificationLevel) -> bool {
        self.meta.images.contains_key(&level.label())
    }
}

fn relative_path(dir: &Path) -> String {
    let components: Vec<_> = dir
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let start = components.len().saturating_sub(RELATIVE_PATH_DEPTH);
    components[start..].join("/")
}
