//! Hardware capability contracts and the single-owner microscope rig.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Raster / Scanner / Revisit passes     │
//! └────────────────────┬────────────────────┘
//!                      │ &mut
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │        Microscope<S, O, C>              │
//! │  (settings sequence, snapshots,         │
//! │   moves with settle, tile capture)      │
//! └──────┬──────────────┬──────────────┬────┘
//!        ▼              ▼              ▼
//! ┌────────────┐ ┌────────────┐ ┌────────────┐
//! │   Stage    │ │   Optics   │ │   Camera   │
//! └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! The core only depends on the [`Stage`], [`Optics`] and [`Camera`] traits.
//! [`simulated`] provides a backend that renders frames from a wafer image.

mod drivers;
mod rig;
mod settings;
pub mod simulated;

pub use drivers::{
    Camera, CameraProperties, CameraSettings, Optics, OpticsProperties, Stage, WhiteBalance,
    Z_HEIGHT_UNKNOWN,
};
pub use rig::{DeviceSnapshot, Microscope, AUTOFOCUS_WARMUP_DELAYS, DEFAULT_SETTINGS_SETTLE};
pub use settings::{AcquisitionProfile, AcquisitionSettings, LampSettings, ParameterPaths};
