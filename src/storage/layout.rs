use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::natural::sort_natural;
use crate::calibration::MagnificationLevel;
use crate::error::{PreconditionError, StorageError};
use crate::tile::{write_png, ImageTile};

pub const SCAN_META_FILE: &str = "meta.json";
pub const OVERVIEW_FILE: &str = "overview.png";
pub const OVERVIEW_COMPRESSED_FILE: &str = "overview_compressed.jpg";
pub const MASK_FILE: &str = "mask.png";
pub const SCAN_AREA_MAP_FILE: &str = "scan_area_map.png";
pub const FLATFIELD_FILE: &str = "flatfield.png";

const PICTURES_DIR: &str = "Pictures";
const META_DIR: &str = "Meta";
const CHIP_PREFIX: &str = "Chip";

/// One scan's output directory.
///
/// ```text
/// <scan>/
/// ├── meta.json
/// ├── flatfield.png
/// ├── overview.png, overview_compressed.jpg, mask.png, scan_area_map.png
/// ├── <mag>x/Pictures/<n>.png, <mag>x/Meta/<n>.json
/// └── Chip_<id>/Flake_<n>/...
/// ```
#[derive(Debug, Clone)]
pub struct ScanDirectory {
    root: PathBuf,
}

impl ScanDirectory {
    /// Fail if `root` already exists. A scan never overwrites a previous one.
    pub fn ensure_absent(root: &Path) -> Result<(), PreconditionError> {
        if root.exists() {
            return Err(PreconditionError::ScanDirectoryExists(root.to_path_buf()));
        }
        Ok(())
    }

    /// Create a fresh scan directory.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StorageError::io(&root, e))?;
        Ok(Self { root })
    }

    /// Use an existing scan directory.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Directory for a raster pass at `level`, e.g. `<scan>/2.5x`.
    pub fn pass_root(&self, level: MagnificationLevel) -> PathBuf {
        self.root.join(level.label())
    }

    /// Create the `Pictures` and `Meta` directories for a pass.
    pub fn create_pass(&self, level: MagnificationLevel) -> Result<PassDirectory, StorageError> {
        let root = self.pass_root(level);
        let pass = PassDirectory {
            pictures: root.join(PICTURES_DIR),
            meta: root.join(META_DIR),
        };
        for dir in [&pass.pictures, &pass.meta] {
            std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
        }
        Ok(pass)
    }

    /// Delete a pass directory and everything in it.
    pub fn remove_pass(&self, level: MagnificationLevel) -> Result<(), StorageError> {
        let root = self.pass_root(level);
        debug!(path = %root.display(), "Removing pass directory");
        std::fs::remove_dir_all(&root).map_err(|e| StorageError::io(&root, e))
    }

    pub fn chip_dir(&self, chip_id: u32) -> PathBuf {
        self.root.join(format!("{}_{}", CHIP_PREFIX, chip_id))
    }

    pub fn flake_dir(&self, chip_id: u32, flake_id: u32) -> PathBuf {
        self.chip_dir(chip_id).join(format!("Flake_{}", flake_id))
    }

    /// Create the directory for a newly found flake.
    ///
    /// Fails if it already exists: flake ids are never reused.
    pub fn create_flake_dir(&self, chip_id: u32, flake_id: u32) -> Result<PathBuf, StorageError> {
        let chip = self.chip_dir(chip_id);
        std::fs::create_dir_all(&chip).map_err(|e| StorageError::io(&chip, e))?;
        let flake = self.flake_dir(chip_id, flake_id);
        std::fs::create_dir(&flake).map_err(|e| StorageError::io(&flake, e))?;
        Ok(flake)
    }

    /// All flake directories, chips and flakes each in natural order.
    pub fn walk_flake_directories(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut flakes = Vec::new();
        for chip in sorted_subdirectories(&self.root)? {
            if !chip.starts_with(CHIP_PREFIX) {
                continue;
            }
            let chip_dir = self.root.join(&chip);
            for flake in sorted_subdirectories(&chip_dir)? {
                flakes.push(chip_dir.join(flake));
            }
        }
        Ok(flakes)
    }
}

/// `Pictures` and `Meta` directories of one raster pass.
#[derive(Debug, Clone)]
pub struct PassDirectory {
    pub pictures: PathBuf,
    pub meta: PathBuf,
}

impl PassDirectory {
    /// Write `<n>.png` and `<n>.json`.
    pub fn write_tile(&self, index: usize, tile: &ImageTile) -> Result<(), StorageError> {
        write_png(&tile.image, &self.pictures.join(format!("{}.png", index)))?;
        write_json(&self.meta.join(format!("{}.json", index)), &tile.metadata)
    }
}

/// Pretty-printed JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| StorageError::json(path, e))?;
    std::fs::write(path, json).map_err(|e| StorageError::io(path, e))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let contents = std::fs::read_to_string(path).map_err(|e| StorageError::io(path, e))?;
    serde_json::from_str(&contents).map_err(|e| StorageError::json(path, e))
}

/// Names of the regular files in `dir`, in natural order.
pub fn sorted_files(dir: &Path) -> Result<Vec<String>, StorageError> {
    sorted_entries(dir, false)
}

fn sorted_subdirectories(dir: &Path) -> Result<Vec<String>, StorageError> {
    sorted_entries(dir, true)
}

fn sorted_entries(dir: &Path, directories: bool) -> Result<Vec<String>, StorageError> {
    let entries = std::fs::read_dir(dir).map_err(|e| StorageError::io(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io(dir, e))?;
        let file_type = entry.file_type().map_err(|e| StorageError::io(&entry.path(), e))?;
        let wanted = if directories {
            file_type.is_dir()
        } else {
            file_type.is_file()
        };
        if wanted {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    sort_natural(&mut names);
    Ok(names)
}
