//! Offline detection over a recorded pass.
//!
//! Tests verify:
//! - Only images with accepted flakes are copied, outlined
//! - Flake metadata is numbered across the whole pass
//! - The overview is marked when present and skipped when absent

use image::{Rgb, RgbImage};

use flake_scanner::calibration::Calibration;
use flake_scanner::raster::SparseRasterPlan;
use flake_scanner::scan::{
    detect_dataset, record_scan_area, DatasetSettings, NoCorrection, DATASET_OVERVIEW_FILE,
    MASKED_IMAGES_DIR, MASKED_META_DIR,
};
use flake_scanner::storage::{sorted_files, ScanDirectory, OVERVIEW_FILE};
use flake_scanner::{CoordinateTransform, MagnificationLevel};

use super::test_utils::{
    area_map, flake, gray_frame, mock_rig, uniform_profile, ScriptedDetector,
};

const FRAME: (u32, u32) = (40, 30);

/// Three recorded tiles: cells (0, 0), (1, 1) and (1, 0) in that order.
async fn recorded_scan(root: &std::path::Path) -> ScanDirectory {
    let scan = ScanDirectory::create(root.join("run1")).unwrap();
    let transform = CoordinateTransform::new(Calibration::default());
    let map = area_map(2, 2, &[(0, 0, 1), (1, 0, 2), (1, 1, 2)]);
    let (mut rig, _log) = mock_rig(gray_frame(FRAME.0, FRAME.1, 100));
    let plan = SparseRasterPlan::default();
    record_scan_area(
        &mut rig,
        &transform,
        &map,
        plan,
        &uniform_profile().for_level(plan.level),
        &scan,
    )
    .await
    .unwrap();
    scan
}

#[tokio::test(start_paused = true)]
async fn test_detect_dataset_writes_masked_images_and_meta() {
    let dir = tempfile::tempdir().unwrap();
    let scan = recorded_scan(dir.path()).await;
    RgbImage::new(200, 200)
        .save(scan.file(OVERVIEW_FILE))
        .unwrap();

    let detector = ScriptedDetector::new(vec![
        Ok(vec![flake((20.0, 15.0), 0.1, FRAME), flake((5.0, 5.0), 0.9, FRAME)]),
        Ok(Vec::new()),
        Ok(vec![flake((10.0, 10.0), 0.0, FRAME), flake((30.0, 20.0), 0.5, FRAME)]),
    ]);
    let report = detect_dataset(
        &scan,
        &CoordinateTransform::new(Calibration::default()),
        &detector,
        &NoCorrection,
        DatasetSettings::default(),
    )
    .unwrap();

    assert_eq!(detector.calls(), 3);
    assert_eq!(report.images, 3);
    assert_eq!(report.images_with_flakes, 2);
    assert_eq!(report.flakes, 3);
    assert_eq!(report.rejected, 1);

    let pass = scan.pass_root(MagnificationLevel::X20);
    assert_eq!(
        sorted_files(&pass.join(MASKED_IMAGES_DIR)).unwrap(),
        vec!["1.png", "3.png"]
    );
    assert_eq!(
        sorted_files(&pass.join(MASKED_META_DIR)).unwrap(),
        vec!["1_1.json", "2_3.json", "3_3.json"]
    );

    let meta: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(pass.join(MASKED_META_DIR).join("1_1.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(meta["center_x"], 20.0);
    assert_eq!(meta["thickness"], "1L");
    assert!(meta.get("mask").is_none());

    let masked = image::open(pass.join(MASKED_IMAGES_DIR).join("1.png"))
        .unwrap()
        .to_rgb8();
    assert_eq!(masked.get_pixel(18, 15), &Rgb([255, 0, 0]));
    assert_eq!(masked.get_pixel(20, 15), &Rgb([100, 100, 100]));
    // The rejected flake is not outlined
    assert_eq!(masked.get_pixel(3, 5), &Rgb([100, 100, 100]));

    let marked_path = report.marked_overview.unwrap();
    assert_eq!(marked_path, scan.file(DATASET_OVERVIEW_FILE));
    let marked = image::open(&marked_path).unwrap().to_rgb8();
    assert!(marked.pixels().any(|p| *p == Rgb([0, 255, 0])));
}

#[tokio::test(start_paused = true)]
async fn test_detect_dataset_without_overview() {
    let dir = tempfile::tempdir().unwrap();
    let scan = recorded_scan(dir.path()).await;

    let detector = ScriptedDetector::new(vec![Ok(vec![flake((20.0, 15.0), 0.0, FRAME)])]);
    let report = detect_dataset(
        &scan,
        &CoordinateTransform::new(Calibration::default()),
        &detector,
        &NoCorrection,
        DatasetSettings {
            confidence_threshold: 1.0,
            ..DatasetSettings::default()
        },
    )
    .unwrap();

    assert_eq!(report.flakes, 1);
    assert!(report.marked_overview.is_none());
    assert!(!scan.file(DATASET_OVERVIEW_FILE).exists());
}

#[tokio::test(start_paused = true)]
async fn test_detect_dataset_needs_recorded_pass() {
    let dir = tempfile::tempdir().unwrap();
    let scan = ScanDirectory::create(dir.path().join("empty")).unwrap();

    let result = detect_dataset(
        &scan,
        &CoordinateTransform::new(Calibration::default()),
        &ScriptedDetector::default(),
        &NoCorrection,
        DatasetSettings::default(),
    );
    assert!(result.is_err());
}
