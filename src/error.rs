use std::path::{Path, PathBuf};

use thiserror::Error;

/// The physical device a hardware command was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Stage,
    Optics,
    Camera,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Stage => write!(f, "stage"),
            Device::Optics => write!(f, "optics"),
            Device::Camera => write!(f, "camera"),
        }
    }
}

/// A driver call failed.
///
/// Hardware failures are fatal for the run: nothing in the pipeline retries.
#[derive(Debug, Clone, Error)]
#[error("{device} command `{command}` failed: {message}")]
pub struct HardwareError {
    pub device: Device,
    pub command: &'static str,
    pub message: String,
}

impl HardwareError {
    pub fn stage(command: &'static str, message: impl Into<String>) -> Self {
        Self {
            device: Device::Stage,
            command,
            message: message.into(),
        }
    }

    pub fn optics(command: &'static str, message: impl Into<String>) -> Self {
        Self {
            device: Device::Optics,
            command,
            message: message.into(),
        }
    }

    pub fn camera(command: &'static str, message: impl Into<String>) -> Self {
        Self {
            device: Device::Camera,
            command,
            message: message.into(),
        }
    }
}

/// Errors in magnification lookup.
#[derive(Debug, Clone, Error)]
pub enum CalibrationError {
    /// Magnification index outside 1-5
    #[error("Invalid magnification index {0}: expected 1 (2.5x) through 5 (100x)")]
    InvalidMagnificationIndex(u8),

    /// Magnification value with no matching objective
    #[error("Unknown magnification {0}x: expected one of 2.5, 5, 20, 50, 100")]
    UnknownMagnification(f64),
}

/// Conditions checked before any hardware motion begins.
#[derive(Debug, Clone, Error)]
pub enum PreconditionError {
    /// Refuse to overwrite a previous scan
    #[error("Scan directory already exists: {}", .0.display())]
    ScanDirectoryExists(PathBuf),

    /// A parameter file required for the requested material/magnification is missing
    #[error("Missing calibration file: {}", .0.display())]
    MissingCalibration(PathBuf),

    /// No flatfield image for the requested material/thickness/magnification
    #[error("Missing flatfield image: {}", .0.display())]
    MissingFlatfield(PathBuf),

    /// Parameter file present but unusable
    #[error("Invalid settings in {}: {message}", path.display())]
    InvalidSettings { path: PathBuf, message: String },

    /// Run configuration whose parts disagree with each other
    #[error("Invalid scan configuration: {0}")]
    InvalidConfiguration(String),
}

/// The material detector failed on a tile.
#[derive(Debug, Clone, Error)]
#[error("Detection failed: {0}")]
pub struct DetectionError(pub String);

/// Errors reading or writing the scan directory.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Filesystem error
    #[error("I/O error at {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    /// Image could not be decoded or encoded
    #[error("Image codec error at {}: {message}", path.display())]
    Image { path: PathBuf, message: String },

    /// JSON metadata could not be parsed or serialised
    #[error("JSON error at {}: {message}", path.display())]
    Json { path: PathBuf, message: String },
}

impl StorageError {
    pub(crate) fn io(path: &Path, err: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    pub(crate) fn image(path: &Path, err: image::ImageError) -> Self {
        StorageError::Image {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }

    pub(crate) fn json(path: &Path, err: serde_json::Error) -> Self {
        StorageError::Json {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Errors assembling the overview image.
#[derive(Debug, Clone, Error)]
pub enum StitchError {
    /// The dense tile set is incomplete or has extra tiles
    #[error("Expected {expected} tiles ({rows} rows x {columns} columns), found {found}")]
    TileCount {
        expected: usize,
        found: usize,
        rows: usize,
        columns: usize,
    },

    /// A tile differs in size from the first tile of the set
    #[error("Tile {id} is {width}x{height}, expected {expected_width}x{expected_height}")]
    TileDimensions {
        id: String,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    /// Trimming would leave nothing of the tile
    #[error("Trim of {trim_x}x{trim_y} px leaves nothing of a {width}x{height} tile")]
    TrimTooLarge {
        trim_x: u32,
        trim_y: u32,
        width: u32,
        height: u32,
    },

    /// Re-encoding a tile before stitching failed
    #[error("Tile {id} could not be re-encoded: {message}")]
    TileCodec { id: String, message: String },

    /// A tile could not be loaded
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Top-level failure of a scan run.
///
/// The run loop decides what is fatal; everything already written to the scan
/// directory stays on disk.
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    #[error("{0}")]
    Detection(#[from] DetectionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Stitching error: {0}")]
    Stitch(#[from] StitchError),
}
