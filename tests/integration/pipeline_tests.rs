//! End-to-end pipeline integration tests.
//!
//! Tests verify:
//! - A full run against the simulated microscope produces every scan product
//! - Preconditions fail before the stage moves
//! - A hardware failure leaves what was already written on disk

use std::path::Path;

use image::{Rgb, RgbImage};

use flake_scanner::error::{PreconditionError, ScanError};
use flake_scanner::hardware::simulated::{SimulatedMicroscope, SimulationConfig};
use flake_scanner::overview::StitchSettings;
use flake_scanner::scan::FlakeRecord;
use flake_scanner::storage::{
    read_json, sorted_files, ScanDirectory, ScanMeta, FLATFIELD_FILE, MASK_FILE,
    OVERVIEW_COMPRESSED_FILE, OVERVIEW_FILE, SCAN_AREA_MAP_FILE, SCAN_META_FILE,
};
use flake_scanner::{
    Calibration, MagnificationLevel, ParameterPaths, PipelineConfig, ScanPipeline,
};

use super::test_utils::{
    flake, gray_frame, rig, write_flatfield, write_parameters, EventLog, MockCamera, MockOptics,
    MockStage, ScriptedDetector,
};

/// Rendered frame size; small enough to keep 651 dense tiles cheap.
const FRAME: (u32, u32) = (24, 15);

/// 10 px/mm wafer with one bright 12 x 12 mm chip at (40, 40) mm.
fn wafer() -> RgbImage {
    RgbImage::from_fn(1050, 1033, |x, y| {
        if (400..520).contains(&x) && (400..520).contains(&y) {
            Rgb([200, 200, 200])
        } else {
            Rgb([40, 40, 40])
        }
    })
}

fn simulator() -> SimulatedMicroscope {
    SimulatedMicroscope::new(
        wafer(),
        SimulationConfig {
            frame_size: FRAME,
            ..SimulationConfig::default()
        },
    )
}

fn write_fixtures(parameters: &Path) {
    write_parameters(parameters, "Graphene", MagnificationLevel::X20);
    write_flatfield(parameters, "Graphene", "90nm", MagnificationLevel::X20, FRAME);
}

fn config(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::new(
        root.join("scans").join("run1"),
        ParameterPaths::new(root.join("parameters")),
        "Graphene",
        "90nm",
    );
    config.scan_user = "lab".to_string();
    // A 24 px wide tile spans 5.9 mm; 20 px matches the 5 mm step
    config.stitch = StitchSettings {
        downscale: 1,
        trim_x: 4,
        trim_y: 1,
        jpeg_quality: None,
        ..StitchSettings::default()
    };
    config
}

#[tokio::test(start_paused = true)]
async fn test_full_run_on_simulated_microscope() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(&dir.path().join("parameters"));
    let config = config(dir.path());
    let scan_root = config.scan_dir.clone();

    let sim = simulator();
    let mut rig = sim.rig();
    let detector = ScriptedDetector::new(vec![Ok(vec![flake(
        (12.0, 7.5),
        0.1,
        FRAME,
    )])]);
    let pipeline = ScanPipeline::new(Calibration::default(), config);

    let summary = pipeline.run(&mut rig, &detector).await.unwrap();

    // Dense pass and overview products
    assert_eq!(summary.dense_tiles, 651);
    assert_eq!(summary.overview_size, (20 * 21, 14 * 31));
    for name in [
        SCAN_META_FILE,
        FLATFIELD_FILE,
        OVERVIEW_FILE,
        OVERVIEW_COMPRESSED_FILE,
        MASK_FILE,
        SCAN_AREA_MAP_FILE,
    ] {
        assert!(scan_root.join(name).is_file(), "missing {}", name);
    }
    assert!(!scan_root.join("2.5x").exists());
    // The mask is built at the stitched resolution, not from the JPEG
    let mask = image::open(scan_root.join(MASK_FILE)).unwrap().to_luma8();
    assert_eq!(mask.dimensions(), summary.overview_size);
    let compressed = image::open(scan_root.join(OVERVIEW_COMPRESSED_FILE)).unwrap();
    assert_eq!((compressed.width(), compressed.height()), (2000, 2000));

    // One chip, every occupied cell imaged once
    assert_eq!(summary.chips, 1);
    assert!(summary.occupied_cells > 0);
    assert_eq!(summary.high_mag_tiles, summary.occupied_cells);
    assert_eq!(detector.calls(), summary.high_mag_tiles);

    // One flake, revisited at the four other objectives
    assert_eq!(summary.flakes, 1);
    assert_eq!(summary.rejected, 0);
    assert_eq!(summary.revisits.total(), 4);
    let scan = ScanDirectory::open(&scan_root);
    let record = FlakeRecord::load(&scan.flake_dir(1, 1)).unwrap();
    assert_eq!(record.meta.images.len(), 4);
    assert_eq!(record.meta.path, "run1/Chip_1/Flake_1");

    let meta: ScanMeta = read_json(&scan_root.join(SCAN_META_FILE)).unwrap();
    assert_eq!(meta.scan_name, "run1");
    assert_eq!(meta.material, "Graphene");
    assert_eq!(meta.detection_magnification, MagnificationLevel::X20);

    // The run ends on the last revisit level with the lamp off
    assert_eq!(sim.level().await, MagnificationLevel::X5);
    assert!(!sim.lamp_is_on().await);
}

#[tokio::test(start_paused = true)]
async fn test_keep_overview_tiles() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(&dir.path().join("parameters"));
    let mut config = config(dir.path());
    config.keep_overview_tiles = true;
    config.use_auto_focus = false;
    let scan_root = config.scan_dir.clone();

    let sim = simulator();
    let mut rig = sim.rig();
    let pipeline = ScanPipeline::new(Calibration::default(), config);
    let summary = pipeline
        .run(&mut rig, &ScriptedDetector::default())
        .await
        .unwrap();

    assert_eq!(summary.flakes, 0);
    assert_eq!(summary.revisits.total(), 0);
    let pictures = scan_root.join("2.5x").join("Pictures");
    assert_eq!(sorted_files(&pictures).unwrap().len(), 651);
}

#[tokio::test(start_paused = true)]
async fn test_existing_scan_directory_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(&dir.path().join("parameters"));
    let config = config(dir.path());
    std::fs::create_dir_all(&config.scan_dir).unwrap();

    let sim = simulator();
    let mut rig = sim.rig();
    let pipeline = ScanPipeline::new(Calibration::default(), config);
    let result = pipeline.run(&mut rig, &ScriptedDetector::default()).await;

    assert!(matches!(
        result,
        Err(ScanError::Precondition(PreconditionError::ScanDirectoryExists(_)))
    ));
    assert!(sim.moves().await.is_empty());
    assert_eq!(sim.captures().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_parameters_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let scan_root = config.scan_dir.clone();

    let sim = simulator();
    let mut rig = sim.rig();
    let pipeline = ScanPipeline::new(Calibration::default(), config);
    let result = pipeline.run(&mut rig, &ScriptedDetector::default()).await;

    match result {
        Err(ScanError::Precondition(PreconditionError::MissingCalibration(path))) => {
            assert!(path.ends_with("Camera_Parameters/graphene_20x.json"));
        }
        other => panic!("Expected MissingCalibration, got {:?}", other.map(|s| s.flakes)),
    }
    assert!(!scan_root.exists());
    assert!(sim.moves().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_flatfield_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    write_parameters(&dir.path().join("parameters"), "Graphene", MagnificationLevel::X20);
    let config = config(dir.path());
    let scan_root = config.scan_dir.clone();

    let sim = simulator();
    let mut rig = sim.rig();
    let pipeline = ScanPipeline::new(Calibration::default(), config);
    let result = pipeline.run(&mut rig, &ScriptedDetector::default()).await;

    match result {
        Err(ScanError::Precondition(PreconditionError::MissingFlatfield(path))) => {
            assert!(path.ends_with("Flatfields/graphene_90nm_20x.png"));
        }
        other => panic!("Expected MissingFlatfield, got {:?}", other.map(|s| s.flakes)),
    }
    assert!(!scan_root.exists());
    assert!(sim.moves().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_inconsistent_config_is_refused_before_motion() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(&dir.path().join("parameters"));
    let mut config = config(dir.path());
    config.dense.rows = 3;
    config.dense.columns = 4;
    let scan_root = config.scan_dir.clone();

    let sim = simulator();
    let mut rig = sim.rig();
    let pipeline = ScanPipeline::new(Calibration::default(), config);
    let result = pipeline.run(&mut rig, &ScriptedDetector::default()).await;

    match result {
        Err(ScanError::Precondition(PreconditionError::InvalidConfiguration(message))) => {
            assert!(message.contains("dense grid"), "{}", message);
        }
        other => panic!("Expected InvalidConfiguration, got {:?}", other.map(|s| s.flakes)),
    }
    assert!(!scan_root.exists());
    assert!(sim.moves().await.is_empty());
    assert_eq!(sim.captures().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_hardware_failure_keeps_partial_scan() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(&dir.path().join("parameters"));
    let config = config(dir.path());
    let scan_root = config.scan_dir.clone();

    let log = EventLog::default();
    let mut rig = rig(
        MockStage::new(log.clone()).failing_move_at(10),
        MockOptics::new(log.clone()),
        MockCamera::new(log.clone(), gray_frame(FRAME.0, FRAME.1, 100)),
    );
    let pipeline = ScanPipeline::new(Calibration::default(), config);
    let result = pipeline.run(&mut rig, &ScriptedDetector::default()).await;

    assert!(matches!(result, Err(ScanError::Hardware(_))));
    assert!(scan_root.join(SCAN_META_FILE).is_file());
    assert!(scan_root.join(FLATFIELD_FILE).is_file());
    // Homing move, eight tiles, then the failing move
    let pictures = scan_root.join("2.5x").join("Pictures");
    assert_eq!(sorted_files(&pictures).unwrap().len(), 8);
    assert!(!scan_root.join(OVERVIEW_FILE).exists());
}

#[test]
fn test_config_validation() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    assert!(config.validate().is_ok());

    config.stitch.rows = 20;
    assert!(config.validate().is_err());
}
