//! Test utilities for integration tests.
//!
//! This module provides recording mock drivers, a scripted detector and
//! helpers that lay out parameter directories the way a real instrument
//! install does.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use image::{GrayImage, Luma, Rgb, RgbImage};
use tokio::sync::RwLock;

use flake_scanner::error::{DetectionError, HardwareError};
use flake_scanner::hardware::{
    AcquisitionProfile, AcquisitionSettings, Camera, CameraProperties, CameraSettings,
    LampSettings, Microscope, Optics, OpticsProperties, Stage,
};
use flake_scanner::scan::{Detector, Flake};
use flake_scanner::{GridCell, MagnificationLevel, PixelPoint, ScanAreaMap, StagePosition};

// =============================================================================
// Event Log
// =============================================================================

/// A driver call, as seen by the mocks.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Move(StagePosition),
    MoveRelative(f64, f64),
    SetMagnification(MagnificationLevel),
    LampVoltage(f64),
    Aperture(f64),
    RotateForward,
    RotateBackward,
    LampOn,
    LampOff,
    SetCamera,
    Capture,
}

/// Ordered record of every driver call, shared by the three mocks.
#[derive(Clone, Default)]
pub struct EventLog(Arc<RwLock<Vec<Event>>>);

impl EventLog {
    async fn push(&self, event: Event) {
        self.0.write().await.push(event);
    }

    pub async fn events(&self) -> Vec<Event> {
        self.0.read().await.clone()
    }

    pub async fn moves(&self) -> Vec<StagePosition> {
        self.events()
            .await
            .into_iter()
            .filter_map(|e| match e {
                Event::Move(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub async fn magnifications(&self) -> Vec<MagnificationLevel> {
        self.events()
            .await
            .into_iter()
            .filter_map(|e| match e {
                Event::SetMagnification(level) => Some(level),
                _ => None,
            })
            .collect()
    }

    pub async fn captures(&self) -> usize {
        self.events()
            .await
            .iter()
            .filter(|e| **e == Event::Capture)
            .count()
    }

    /// Only stage moves and captures, in order.
    pub async fn motion(&self) -> Vec<Event> {
        self.events()
            .await
            .into_iter()
            .filter(|e| matches!(e, Event::Move(_) | Event::Capture))
            .collect()
    }

    pub async fn clear(&self) {
        self.0.write().await.clear();
    }
}

// =============================================================================
// Mock Drivers
// =============================================================================

pub struct MockStage {
    log: EventLog,
    position: StagePosition,
    moves: usize,
    fail_move_at: Option<usize>,
}

impl MockStage {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            position: StagePosition::default(),
            moves: 0,
            fail_move_at: None,
        }
    }

    /// Fail the `n`-th absolute move (1-based).
    pub fn failing_move_at(mut self, n: usize) -> Self {
        self.fail_move_at = Some(n);
        self
    }
}

#[async_trait]
impl Stage for MockStage {
    async fn position(&mut self) -> Result<StagePosition, HardwareError> {
        Ok(self.position)
    }

    async fn move_absolute(&mut self, target: StagePosition) -> Result<(), HardwareError> {
        self.moves += 1;
        if self.fail_move_at == Some(self.moves) {
            return Err(HardwareError::stage("move_absolute", "axis fault"));
        }
        self.log.push(Event::Move(target)).await;
        self.position = target;
        Ok(())
    }

    async fn move_relative(&mut self, dx_mm: f64, dy_mm: f64) -> Result<(), HardwareError> {
        self.log.push(Event::MoveRelative(dx_mm, dy_mm)).await;
        self.position = StagePosition::new(self.position.x_mm + dx_mm, self.position.y_mm + dy_mm);
        Ok(())
    }
}

pub struct MockOptics {
    log: EventLog,
    level: MagnificationLevel,
    voltage: f64,
    aperture: f64,
    fail_z_height: bool,
}

impl MockOptics {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            level: MagnificationLevel::X2_5,
            voltage: 0.0,
            aperture: 0.0,
            fail_z_height: false,
        }
    }

    pub fn failing_z_height(mut self) -> Self {
        self.fail_z_height = true;
        self
    }
}

#[async_trait]
impl Optics for MockOptics {
    async fn set_magnification(&mut self, level: MagnificationLevel) -> Result<(), HardwareError> {
        self.log.push(Event::SetMagnification(level)).await;
        self.level = level;
        Ok(())
    }

    async fn set_lamp_voltage(&mut self, voltage: f64) -> Result<(), HardwareError> {
        self.log.push(Event::LampVoltage(voltage)).await;
        self.voltage = voltage;
        Ok(())
    }

    async fn set_lamp_aperture_stop(&mut self, aperture: f64) -> Result<(), HardwareError> {
        self.log.push(Event::Aperture(aperture)).await;
        self.aperture = aperture;
        Ok(())
    }

    async fn rotate_nosepiece_forward(&mut self) -> Result<(), HardwareError> {
        self.log.push(Event::RotateForward).await;
        Ok(())
    }

    async fn rotate_nosepiece_backward(&mut self) -> Result<(), HardwareError> {
        self.log.push(Event::RotateBackward).await;
        Ok(())
    }

    async fn lamp_on(&mut self) -> Result<(), HardwareError> {
        self.log.push(Event::LampOn).await;
        Ok(())
    }

    async fn lamp_off(&mut self) -> Result<(), HardwareError> {
        self.log.push(Event::LampOff).await;
        Ok(())
    }

    async fn properties(&mut self) -> Result<OpticsProperties, HardwareError> {
        Ok(OpticsProperties {
            nosepiece: self.level.index(),
            aperture: self.aperture,
            voltage: self.voltage,
            z_height: 0.0,
        })
    }

    async fn z_height(&mut self) -> Result<f64, HardwareError> {
        if self.fail_z_height {
            return Err(HardwareError::optics("z_height", "focus drive timeout"));
        }
        Ok(1234.5)
    }
}

pub struct MockCamera {
    log: EventLog,
    frame: RgbImage,
    captures: usize,
    fail_capture_at: Option<usize>,
}

impl MockCamera {
    pub fn new(log: EventLog, frame: RgbImage) -> Self {
        Self {
            log,
            frame,
            captures: 0,
            fail_capture_at: None,
        }
    }

    /// Fail the `n`-th capture (1-based).
    pub fn failing_capture_at(mut self, n: usize) -> Self {
        self.fail_capture_at = Some(n);
        self
    }
}

#[async_trait]
impl Camera for MockCamera {
    async fn set_properties(&mut self, _settings: &CameraSettings) -> Result<(), HardwareError> {
        self.log.push(Event::SetCamera).await;
        Ok(())
    }

    async fn properties(&mut self) -> Result<CameraProperties, HardwareError> {
        Ok(CameraProperties {
            exposure: 0.05,
            gain: 0,
            gamma: 100,
            white_balance: (64, 64, 64),
            time: Utc::now(),
        })
    }

    async fn capture_frame(&mut self) -> Result<RgbImage, HardwareError> {
        self.captures += 1;
        if self.fail_capture_at == Some(self.captures) {
            return Err(HardwareError::camera("capture_frame", "frame timeout"));
        }
        self.log.push(Event::Capture).await;
        Ok(self.frame.clone())
    }
}

pub type MockMicroscope = Microscope<MockStage, MockOptics, MockCamera>;

/// Assemble a rig with no settings delay.
pub fn rig(stage: MockStage, optics: MockOptics, camera: MockCamera) -> MockMicroscope {
    Microscope::new(stage, optics, camera).with_settings_settle(Duration::ZERO)
}

/// A rig whose camera returns `frame`, plus the log of its calls.
pub fn mock_rig(frame: RgbImage) -> (MockMicroscope, EventLog) {
    let log = EventLog::default();
    let rig = rig(
        MockStage::new(log.clone()),
        MockOptics::new(log.clone()),
        MockCamera::new(log.clone(), frame),
    );
    (rig, log)
}

/// A uniform gray frame.
pub fn gray_frame(width: u32, height: u32, value: u8) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb([value, value, value]))
}

// =============================================================================
// Scripted Detector
// =============================================================================

/// Replays queued detection results, one per tile; empty once exhausted.
#[derive(Default)]
pub struct ScriptedDetector {
    responses: Mutex<VecDeque<Result<Vec<Flake>, DetectionError>>>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new(responses: Vec<Result<Vec<Flake>, DetectionError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for ScriptedDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Flake>, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        responses.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// A 4 x 4 px flake centred at `center` on a `width` x `height` tile.
pub fn flake(center: (f64, f64), false_positive_probability: f64, (width, height): (u32, u32)) -> Flake {
    let (cx, cy) = center;
    let mask = GrayImage::from_fn(width, height, |x, y| {
        let inside = (x as f64 - cx).abs() < 2.0 && (y as f64 - cy).abs() < 2.0;
        Luma([if inside { 255 } else { 0 }])
    });
    Flake {
        mask,
        center: PixelPoint::new(cx, cy),
        size_px: 16.0,
        thickness: "1L".to_string(),
        entropy: 0.5,
        aspect_ratio: 1.0,
        max_sidelength_px: 4.0,
        min_sidelength_px: 4.0,
        mean_contrast: [-0.1, -0.1, -0.1],
        false_positive_probability,
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// The same settings at every level, with a recognisable lamp voltage.
pub fn uniform_profile() -> AcquisitionProfile {
    AcquisitionProfile::uniform(AcquisitionSettings {
        camera: CameraSettings {
            exposure: Some(0.07),
            ..CameraSettings::default()
        },
        lamp: LampSettings {
            light_voltage: 6.0,
            aperture: 2.0,
        },
    })
}

/// Write camera and microscope parameter files for `material` at `level`.
pub fn write_parameters(root: &Path, material: &str, level: MagnificationLevel) {
    let camera_dir = root.join("Camera_Parameters");
    let micro_dir = root.join("Microscope_Parameters");
    std::fs::create_dir_all(&camera_dir).unwrap();
    std::fs::create_dir_all(&micro_dir).unwrap();

    let mut camera = serde_json::Map::new();
    let mut micro = serde_json::Map::new();
    for level in MagnificationLevel::ALL {
        let key = level.index().to_string();
        camera.insert(
            key.clone(),
            serde_json::json!({"exposure": 0.05, "gain": 0, "white_balance": [64, 64, 64], "gamma": 100}),
        );
        micro.insert(
            key,
            serde_json::json!({"light_voltage": 5.0 + level.index() as f64, "aperture": 2.0}),
        );
    }

    let name = format!("{}_{}.json", material.to_lowercase(), level.label());
    std::fs::write(camera_dir.join(&name), serde_json::Value::Object(camera).to_string()).unwrap();
    std::fs::write(micro_dir.join(&name), serde_json::Value::Object(micro).to_string()).unwrap();
}

/// Write a uniform flatfield for `material`/`thickness` at `level`.
pub fn write_flatfield(
    root: &Path,
    material: &str,
    thickness: &str,
    level: MagnificationLevel,
    (width, height): (u32, u32),
) {
    let dir = root.join("Flatfields");
    std::fs::create_dir_all(&dir).unwrap();
    let name = format!("{}_{}_{}.png", material.to_lowercase(), thickness, level.label());
    gray_frame(width, height, 200).save(dir.join(name)).unwrap();
}

/// A 20x scan-area map with the given labelled cells.
pub fn area_map(rows: usize, cols: usize, cells: &[(usize, usize, u32)]) -> ScanAreaMap {
    let mut map = ScanAreaMap::new(rows, cols, MagnificationLevel::X20);
    for &(row, col, label) in cells {
        map.set_label(GridCell::new(row, col), label);
    }
    map
}

/// Compare stage positions to 1e-9 mm.
pub fn assert_close(actual: StagePosition, expected: StagePosition) {
    assert!(
        (actual.x_mm - expected.x_mm).abs() < 1e-9 && (actual.y_mm - expected.y_mm).abs() < 1e-9,
        "expected {:?}, got {:?}",
        expected,
        actual
    );
}
