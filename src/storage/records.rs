use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calibration::MagnificationLevel;

/// Scan-level parameters written to `<scan>/meta.json` before any motion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanMeta {
    pub scan_name: String,
    pub scan_user: String,
    pub material: String,
    pub chip_thickness: String,
    pub detection_magnification: MagnificationLevel,
    pub confidence_threshold: f64,
    pub percentage_threshold: f64,
    pub use_auto_focus: bool,
    #[serde(default)]
    pub comment: String,
    pub started_at: DateTime<Utc>,
}
