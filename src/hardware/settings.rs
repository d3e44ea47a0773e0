//! Per-magnification acquisition settings and the parameter directory layout.
//!
//! ```text
//! <parameters>/
//! ├── Camera_Parameters/<material>_<mag>x.json       {"1": {...}, ..., "5": {...}}
//! ├── Microscope_Parameters/<material>_<mag>x.json   {"1": {"light_voltage", "aperture"}, ...}
//! └── Flatfields/<material>_<thickness>_<mag>x.png
//! ```
//!
//! The `<mag>` in the file names is the detection magnification; each file
//! carries one entry per magnification index.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::drivers::CameraSettings;
use crate::calibration::{LevelTable, MagnificationLevel};
use crate::error::PreconditionError;

/// Epi lamp settings for one magnification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LampSettings {
    pub light_voltage: f64,
    pub aperture: f64,
}

/// Everything applied to the rig when switching to a magnification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionSettings {
    pub camera: CameraSettings,
    pub lamp: LampSettings,
}

/// Acquisition settings for all five levels.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionProfile {
    levels: LevelTable<AcquisitionSettings>,
}

impl AcquisitionProfile {
    pub fn new(levels: LevelTable<AcquisitionSettings>) -> Self {
        Self { levels }
    }

    /// Same settings at every level.
    pub fn uniform(settings: AcquisitionSettings) -> Self {
        Self {
            levels: LevelTable::uniform(settings),
        }
    }

    pub fn for_level(&self, level: MagnificationLevel) -> AcquisitionSettings {
        self.levels.get(level)
    }

    /// Load the camera and microscope parameter files for `material`.
    ///
    /// Both files must exist and contain an entry for every magnification
    /// index.
    pub fn load(
        paths: &ParameterPaths,
        material: &str,
        detection_level: MagnificationLevel,
    ) -> Result<Self, PreconditionError> {
        let camera_path = paths.camera_settings(material, detection_level);
        let lamp_path = paths.microscope_settings(material, detection_level);

        let camera: BTreeMap<String, CameraSettings> = read_json(&camera_path)?;
        let lamp: BTreeMap<String, LampSettings> = read_json(&lamp_path)?;

        let mut values = Vec::with_capacity(MagnificationLevel::ALL.len());
        for level in MagnificationLevel::ALL {
            let key = level.index().to_string();
            let camera = *camera.get(&key).ok_or_else(|| missing_entry(&camera_path, level))?;
            let lamp = *lamp.get(&key).ok_or_else(|| missing_entry(&lamp_path, level))?;
            values.push(AcquisitionSettings { camera, lamp });
        }

        let levels: [AcquisitionSettings; 5] =
            values
                .try_into()
                .map_err(|_| PreconditionError::InvalidSettings {
                    path: camera_path.clone(),
                    message: "expected five magnification entries".to_string(),
                })?;

        Ok(Self::new(LevelTable::new(levels)))
    }
}

/// Locations of parameter files under a parameter root.
#[derive(Debug, Clone)]
pub struct ParameterPaths {
    root: PathBuf,
}

impl ParameterPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn camera_settings(&self, material: &str, level: MagnificationLevel) -> PathBuf {
        self.root
            .join("Camera_Parameters")
            .join(format!("{}_{}.json", material.to_lowercase(), level.label()))
    }

    pub fn microscope_settings(&self, material: &str, level: MagnificationLevel) -> PathBuf {
        self.root
            .join("Microscope_Parameters")
            .join(format!("{}_{}.json", material.to_lowercase(), level.label()))
    }

    pub fn flatfield(&self, material: &str, thickness: &str, level: MagnificationLevel) -> PathBuf {
        self.root.join("Flatfields").join(format!(
            "{}_{}_{}.png",
            material.to_lowercase(),
            thickness,
            level.label()
        ))
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PreconditionError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|_| PreconditionError::MissingCalibration(path.to_path_buf()))?;
    serde_json::from_str(&contents).map_err(|e| PreconditionError::InvalidSettings {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn missing_entry(path: &Path, level: MagnificationLevel) -> PreconditionError {
    PreconditionError::InvalidSettings {
        path: path.to_path_buf(),
        message: format!("no entry for magnification index {} ({})", level.index(), level.label()),
    }
}
