//! High-magnification scan integration tests.
//!
//! Tests verify:
//! - Flake ids count from 1 within each chip
//! - Every accepted flake gets its directory and files
//! - The confidence filter is inclusive
//! - Detector and hardware failures stop the scan

use image::RgbImage;

use flake_scanner::calibration::Calibration;
use flake_scanner::error::{DetectionError, ScanError};
use flake_scanner::raster::SparseRasterPlan;
use flake_scanner::scan::{
    record_scan_area, FlakeRecord, HighMagScanner, NoCorrection, ScannerSettings,
    EVAL_IMAGE_FILE, FLAKE_MASK_FILE, OVERVIEW_MARKED_FILE, RAW_IMAGE_FILE,
};
use flake_scanner::storage::{sorted_files, ScanDirectory};
use flake_scanner::{
    CoordinateTransform, GridCell, MagnificationLevel, OverviewImage, TileMetadata,
};

use super::test_utils::{
    area_map, assert_close, flake, gray_frame, mock_rig, uniform_profile, ScriptedDetector,
};

const FRAME: (u32, u32) = (40, 30);

fn overview() -> OverviewImage {
    OverviewImage::new(RgbImage::new(200, 200), (105.0, 103.333))
}

fn settings() -> ScannerSettings {
    ScannerSettings::default()
}

#[tokio::test(start_paused = true)]
async fn test_flake_ids_are_per_chip() {
    let dir = tempfile::tempdir().unwrap();
    let scan = ScanDirectory::create(dir.path().join("run1")).unwrap();
    let transform = CoordinateTransform::new(Calibration::default());
    let overview = overview();
    let map = area_map(2, 3, &[(0, 0, 1), (0, 1, 1), (1, 2, 2)]);
    let detector = ScriptedDetector::new(vec![
        Ok(vec![flake((20.0, 15.0), 0.1, FRAME)]),
        Ok(vec![flake((10.0, 10.0), 0.2, FRAME)]),
        Ok(vec![flake((30.0, 20.0), 0.0, FRAME)]),
    ]);
    let (mut rig, _log) = mock_rig(gray_frame(FRAME.0, FRAME.1, 100));

    let mut scanner = HighMagScanner::new(
        &transform,
        &detector,
        &NoCorrection,
        &scan,
        &overview,
        settings(),
    );
    let report = scanner
        .run(&mut rig, &map, &uniform_profile().for_level(MagnificationLevel::X20))
        .await
        .unwrap();

    assert_eq!(report.tiles, 3);
    assert_eq!(detector.calls(), 3);
    let ids: Vec<(u32, u32)> = report
        .flakes
        .iter()
        .map(|r| (r.meta.chip_id, r.meta.flake_id))
        .collect();
    assert_eq!(ids, vec![(1, 1), (1, 2), (2, 1)]);
    assert_eq!(scanner.flake_count(1), 2);
    assert_eq!(scanner.flake_count(2), 1);
    assert_eq!(scanner.flake_count(3), 0);

    assert_eq!(
        scan.walk_flake_directories().unwrap(),
        vec![
            scan.flake_dir(1, 1),
            scan.flake_dir(1, 2),
            scan.flake_dir(2, 1),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_flake_files_and_position() {
    let dir = tempfile::tempdir().unwrap();
    let scan = ScanDirectory::create(dir.path().join("run1")).unwrap();
    let transform = CoordinateTransform::new(Calibration::default());
    let overview = overview();
    let map = area_map(1, 2, &[(0, 1, 4)]);
    let detector = ScriptedDetector::new(vec![Ok(vec![flake((20.0, 15.0), 0.1, FRAME)])]);
    let (mut rig, _log) = mock_rig(gray_frame(FRAME.0, FRAME.1, 100));

    let mut scanner = HighMagScanner::new(
        &transform,
        &detector,
        &NoCorrection,
        &scan,
        &overview,
        settings(),
    );
    scanner
        .run(&mut rig, &map, &uniform_profile().for_level(MagnificationLevel::X20))
        .await
        .unwrap();

    let flake_dir = scan.flake_dir(4, 1);
    let mut files = sorted_files(&flake_dir).unwrap();
    files.sort();
    let mut expected = vec![
        EVAL_IMAGE_FILE,
        FLAKE_MASK_FILE,
        "meta.json",
        OVERVIEW_MARKED_FILE,
        RAW_IMAGE_FILE,
    ];
    expected.sort();
    assert_eq!(files, expected);

    let record = FlakeRecord::load(&flake_dir).unwrap();
    assert_eq!(record.meta.path, "run1/Chip_4/Flake_1");
    assert!(record.meta.images.is_empty());
    // Centroid at the tile centre lands on the tile's stage position,
    // rounded like every stored flake position
    let expected = transform
        .cell_to_stage(GridCell::new(0, 1), MagnificationLevel::X20)
        .rounded();
    assert_close(record.meta.position(), expected);
    let um = MagnificationLevel::X20.micrometers_per_pixel();
    assert!((record.meta.size - 16.0 * um * um).abs() < 1e-9);

    let raw = image::open(flake_dir.join(RAW_IMAGE_FILE)).unwrap().to_rgb8();
    assert_eq!(raw.dimensions(), FRAME);
    let marked = image::open(flake_dir.join(OVERVIEW_MARKED_FILE)).unwrap();
    assert_eq!((marked.width(), marked.height()), (200, 200));
}

#[tokio::test(start_paused = true)]
async fn test_confidence_filter_is_inclusive() {
    let dir = tempfile::tempdir().unwrap();
    let scan = ScanDirectory::create(dir.path().join("run1")).unwrap();
    let transform = CoordinateTransform::new(Calibration::default());
    let overview = overview();
    let map = area_map(1, 1, &[(0, 0, 1)]);
    let detector = ScriptedDetector::new(vec![Ok(vec![
        flake((5.0, 5.0), 0.5, FRAME),
        flake((15.0, 5.0), 0.51, FRAME),
        flake((25.0, 5.0), 0.9, FRAME),
    ])]);
    let (mut rig, _log) = mock_rig(gray_frame(FRAME.0, FRAME.1, 100));

    let mut scanner = HighMagScanner::new(
        &transform,
        &detector,
        &NoCorrection,
        &scan,
        &overview,
        settings(),
    );
    let report = scanner
        .run(&mut rig, &map, &uniform_profile().for_level(MagnificationLevel::X20))
        .await
        .unwrap();

    assert_eq!(report.flakes.len(), 1);
    assert_eq!(report.rejected, 2);
    assert_eq!(report.flakes[0].meta.false_positive_probability, 0.5);
    assert_eq!(scan.walk_flake_directories().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_detection_error_stops_scan() {
    let dir = tempfile::tempdir().unwrap();
    let scan = ScanDirectory::create(dir.path().join("run1")).unwrap();
    let transform = CoordinateTransform::new(Calibration::default());
    let overview = overview();
    let map = area_map(1, 3, &[(0, 0, 1), (0, 1, 1), (0, 2, 1)]);
    let detector = ScriptedDetector::new(vec![
        Ok(vec![flake((20.0, 15.0), 0.1, FRAME)]),
        Err(DetectionError("model crashed".to_string())),
    ]);
    let (mut rig, log) = mock_rig(gray_frame(FRAME.0, FRAME.1, 100));

    let mut scanner = HighMagScanner::new(
        &transform,
        &detector,
        &NoCorrection,
        &scan,
        &overview,
        settings(),
    );
    let result = scanner
        .run(&mut rig, &map, &uniform_profile().for_level(MagnificationLevel::X20))
        .await;

    match result {
        Err(ScanError::Detection(e)) => assert!(e.to_string().contains("model crashed")),
        other => panic!("Expected detection error, got {:?}", other.map(|r| r.tiles)),
    }
    assert_eq!(detector.calls(), 2);
    assert_eq!(log.captures().await, 2);
    // The flake found before the failure stays on disk
    assert!(scan.flake_dir(1, 1).join("meta.json").is_file());
}

#[tokio::test(start_paused = true)]
async fn test_record_scan_area_writes_tiles_with_chip_ids() {
    let dir = tempfile::tempdir().unwrap();
    let scan = ScanDirectory::create(dir.path().join("run1")).unwrap();
    let transform = CoordinateTransform::new(Calibration::default());
    let map = area_map(2, 2, &[(0, 0, 1), (1, 0, 2), (1, 1, 2)]);
    let (mut rig, log) = mock_rig(gray_frame(FRAME.0, FRAME.1, 100));
    let plan = SparseRasterPlan::default();

    let written = record_scan_area(
        &mut rig,
        &transform,
        &map,
        plan,
        &uniform_profile().for_level(plan.level),
        &scan,
    )
    .await
    .unwrap();

    assert_eq!(written, 3);
    assert_eq!(log.captures().await, 3);
    let pass = scan.pass_root(MagnificationLevel::X20);
    assert_eq!(
        sorted_files(&pass.join("Pictures")).unwrap(),
        vec!["1.png", "2.png", "3.png"]
    );
    let meta: TileMetadata = serde_json::from_str(
        &std::fs::read_to_string(pass.join("Meta").join("3.json")).unwrap(),
    )
    .unwrap();
    // Row 1 runs right to left, so (1, 0) comes last
    assert_eq!(meta.chip_id, Some(2));
    assert_close(
        meta.stage,
        transform.cell_to_stage(GridCell::new(1, 0), MagnificationLevel::X20),
    );
}
