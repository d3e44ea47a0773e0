//! A software microscope that images a wafer picture.
//!
//! The three simulated drivers share one state: the stage position and the
//! active objective decide which part of the wafer image the camera renders.
//! Every move is logged so callers can inspect the path the stage took.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use image::{Rgb, RgbImage};
use tokio::sync::Mutex;
use tracing::debug;

use super::drivers::{Camera, CameraProperties, CameraSettings, Optics, OpticsProperties, Stage};
use super::rig::Microscope;
use crate::calibration::{
    LevelTable, MagnificationLevel, OverviewGeometry, StageOffset, StagePosition, SENSOR_HEIGHT_PX,
    SENSOR_WIDTH_PX,
};
use crate::error::HardwareError;

/// How the simulated wafer is imaged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    /// Size of each rendered frame.
    pub frame_size: (u32, u32),

    /// Physical extent covered by the wafer image, `(x_mm, y_mm)`.
    pub wafer_extent_mm: (f64, f64),

    /// Wafer coordinate of the frame's top-left corner relative to the stage
    /// position, per objective.
    pub view_offsets: LevelTable<StageOffset>,

    /// Colour outside the wafer image.
    pub background: Rgb<u8>,

    /// Focus height reported by the optics.
    pub z_height_um: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        let geometry = OverviewGeometry::default();
        let mut view_offsets = LevelTable::uniform(geometry.alignment_offset_mm);
        view_offsets.set(MagnificationLevel::X2_5, StageOffset::ZERO);
        Self {
            frame_size: (SENSOR_WIDTH_PX, SENSOR_HEIGHT_PX),
            wafer_extent_mm: geometry.extent_mm,
            view_offsets,
            background: Rgb([0, 0, 0]),
            z_height_um: 0.0,
        }
    }
}

#[derive(Debug)]
struct SimState {
    position: StagePosition,
    level: MagnificationLevel,
    lamp_on: bool,
    voltage: f64,
    aperture: f64,
    camera: CameraProperties,
    moves: Vec<StagePosition>,
    captures: usize,
}

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<SimState>>,
    wafer: Arc<RgbImage>,
    config: SimulationConfig,
}

/// Handle to a simulated instrument. Clones share the same state.
#[derive(Clone)]
pub struct SimulatedMicroscope {
    shared: Shared,
}

impl SimulatedMicroscope {
    pub fn new(wafer: RgbImage, config: SimulationConfig) -> Self {
        let state = SimState {
            position: StagePosition::default(),
            level: MagnificationLevel::X2_5,
            lamp_on: true,
            voltage: 0.0,
            aperture: 0.0,
            camera: CameraProperties {
                exposure: 0.05,
                gain: 0,
                gamma: 100,
                white_balance: (64, 64, 64),
                time: Utc::now(),
            },
            moves: Vec::new(),
            captures: 0,
        };
        Self {
            shared: Shared {
                state: Arc::new(Mutex::new(state)),
                wafer: Arc::new(wafer),
                config,
            },
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.shared.config
    }

    /// Build a rig whose drivers all act on this instrument.
    pub fn rig(&self) -> Microscope<SimulatedStage, SimulatedOptics, SimulatedCamera> {
        Microscope::new(
            SimulatedStage(self.shared.clone()),
            SimulatedOptics(self.shared.clone()),
            SimulatedCamera(self.shared.clone()),
        )
    }

    /// Every absolute target the stage was sent to, in order.
    pub async fn moves(&self) -> Vec<StagePosition> {
        self.shared.state.lock().await.moves.clone()
    }

    pub async fn captures(&self) -> usize {
        self.shared.state.lock().await.captures
    }

    pub async fn level(&self) -> MagnificationLevel {
        self.shared.state.lock().await.level
    }

    pub async fn lamp_is_on(&self) -> bool {
        self.shared.state.lock().await.lamp_on
    }
}

impl Shared {
    /// Nearest-neighbour render of the wafer region under the objective.
    fn render(&self, state: &SimState) -> RgbImage {
        let (frame_w, frame_h) = self.config.frame_size;
        if !state.lamp_on {
            return RgbImage::new(frame_w, frame_h);
        }

        let (field_w, field_h) = state.level.view_field_mm();
        let origin = state.position.offset(self.config.view_offsets.get(state.level));
        let (wafer_w, wafer_h) = self.wafer.dimensions();
        let (extent_x, extent_y) = self.config.wafer_extent_mm;

        let xs = sample_axis(origin.x_mm, field_w, frame_w, extent_x, wafer_w);
        let ys = sample_axis(origin.y_mm, field_h, frame_h, extent_y, wafer_h);
        let background = self.config.background;

        RgbImage::from_fn(frame_w, frame_h, |x, y| {
            match (xs[x as usize], ys[y as usize]) {
                (Some(sx), Some(sy)) => *self.wafer.get_pixel(sx, sy),
                _ => background,
            }
        })
    }
}

/// Source pixel for each of `count` output samples spanning `span_mm` from
/// `start_mm`, or `None` outside the image.
fn sample_axis(start_mm: f64, span_mm: f64, count: u32, extent_mm: f64, size: u32) -> Vec<Option<u32>> {
    (0..count)
        .map(|i| {
            let mm = start_mm + (i as f64 + 0.5) / count as f64 * span_mm;
            let px = (mm / extent_mm * size as f64).floor();
            (px >= 0.0 && px < size as f64).then_some(px as u32)
        })
        .collect()
}

// =============================================================================
// Drivers
// =============================================================================

pub struct SimulatedStage(Shared);

#[async_trait]
impl Stage for SimulatedStage {
    async fn position(&mut self) -> Result<StagePosition, HardwareError> {
        Ok(self.0.state.lock().await.position)
    }

    async fn move_absolute(&mut self, target: StagePosition) -> Result<(), HardwareError> {
        let mut state = self.0.state.lock().await;
        debug!(x_mm = target.x_mm, y_mm = target.y_mm, "Simulated stage move");
        state.position = target;
        state.moves.push(target);
        Ok(())
    }

    async fn move_relative(&mut self, dx_mm: f64, dy_mm: f64) -> Result<(), HardwareError> {
        let mut state = self.0.state.lock().await;
        let target = state.position.offset(StageOffset::new(dx_mm, dy_mm));
        state.position = target;
        state.moves.push(target);
        Ok(())
    }
}

pub struct SimulatedOptics(Shared);

impl SimulatedOptics {
    async fn rotate(&mut self, command: &'static str, step: u8) -> Result<(), HardwareError> {
        let mut state = self.0.state.lock().await;
        let index = (state.level.index() - 1 + step) % 5 + 1;
        state.level = MagnificationLevel::from_index(index)
            .map_err(|e| HardwareError::optics(command, e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Optics for SimulatedOptics {
    async fn set_magnification(&mut self, level: MagnificationLevel) -> Result<(), HardwareError> {
        self.0.state.lock().await.level = level;
        Ok(())
    }

    async fn set_lamp_voltage(&mut self, voltage: f64) -> Result<(), HardwareError> {
        self.0.state.lock().await.voltage = voltage;
        Ok(())
    }

    async fn set_lamp_aperture_stop(&mut self, aperture: f64) -> Result<(), HardwareError> {
        self.0.state.lock().await.aperture = aperture;
        Ok(())
    }

    async fn rotate_nosepiece_forward(&mut self) -> Result<(), HardwareError> {
        self.rotate("rotate_nosepiece_forward", 1).await
    }

    async fn rotate_nosepiece_backward(&mut self) -> Result<(), HardwareError> {
        self.rotate("rotate_nosepiece_backward", 4).await
    }

    async fn lamp_on(&mut self) -> Result<(), HardwareError> {
        self.0.state.lock().await.lamp_on = true;
        Ok(())
    }

    async fn lamp_off(&mut self) -> Result<(), HardwareError> {
        self.0.state.lock().await.lamp_on = false;
        Ok(())
    }

    async fn properties(&mut self) -> Result<OpticsProperties, HardwareError> {
        let state = self.0.state.lock().await;
        Ok(OpticsProperties {
            nosepiece: state.level.index(),
            aperture: state.aperture,
            voltage: state.voltage,
            z_height: self.0.config.z_height_um,
        })
    }

    async fn z_height(&mut self) -> Result<f64, HardwareError> {
        Ok(self.0.config.z_height_um)
    }
}

pub struct SimulatedCamera(Shared);

#[async_trait]
impl Camera for SimulatedCamera {
    async fn set_properties(&mut self, settings: &CameraSettings) -> Result<(), HardwareError> {
        let mut state = self.0.state.lock().await;
        if let Some(exposure) = settings.exposure {
            state.camera.exposure = exposure;
        }
        if let Some(gain) = settings.gain {
            state.camera.gain = gain;
        }
        if let Some(gamma) = settings.gamma {
            state.camera.gamma = gamma;
        }
        if let Some(white_balance) = settings.white_balance {
            state.camera.white_balance = white_balance;
        }
        Ok(())
    }

    async fn properties(&mut self) -> Result<CameraProperties, HardwareError> {
        let mut properties = self.0.state.lock().await.camera;
        properties.time = Utc::now();
        Ok(properties)
    }

    async fn capture_frame(&mut self) -> Result<RgbImage, HardwareError> {
        let mut state = self.0.state.lock().await;
        state.captures += 1;
        Ok(self.0.render(&state))
    }
}
