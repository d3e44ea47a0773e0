//! Raster acquisition integration tests.
//!
//! Tests verify:
//! - Dense pass visits the grid in snake order and writes numbered tiles
//! - Sparse pass yields N + 1 elements with a one-capture lag
//! - Hardware failures stop both passes

use std::time::Duration;

use flake_scanner::calibration::Calibration;
use flake_scanner::error::{Device, ScanError};
use flake_scanner::raster::{
    DenseRaster, DenseRasterPlan, RasterStep, SparseRaster, SparseRasterPlan,
};
use flake_scanner::storage::{sorted_files, ScanDirectory};
use flake_scanner::{CoordinateTransform, GridCell, MagnificationLevel, StagePosition};

use super::test_utils::{
    area_map, assert_close, gray_frame, mock_rig, rig, uniform_profile, Event, MockCamera,
    MockOptics, MockStage, EventLog,
};

fn small_plan() -> DenseRasterPlan {
    DenseRasterPlan {
        rows: 3,
        columns: 4,
        ..DenseRasterPlan::default()
    }
}

// =============================================================================
// Dense Raster
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_dense_homes_then_applies_settings() {
    let (mut rig, log) = mock_rig(gray_frame(8, 6, 100));
    let settings = uniform_profile().for_level(MagnificationLevel::X2_5);

    let _raster = DenseRaster::start(&mut rig, small_plan(), &settings)
        .await
        .unwrap();

    assert_eq!(
        log.events().await,
        vec![
            Event::Move(StagePosition::new(0.0, 0.0)),
            Event::SetMagnification(MagnificationLevel::X2_5),
            Event::SetCamera,
            Event::LampVoltage(6.0),
            Event::Aperture(2.0),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_dense_visits_snake_order() {
    let (mut rig, log) = mock_rig(gray_frame(8, 6, 100));
    let plan = small_plan();
    let settings = uniform_profile().for_level(plan.level);

    let mut raster = DenseRaster::start(&mut rig, plan, &settings).await.unwrap();
    let mut cells = Vec::new();
    while let Some((cell, tile)) = raster.next_tile().await.unwrap() {
        assert_eq!(tile.chip_id(), None);
        assert_eq!(tile.level(), MagnificationLevel::X2_5);
        assert_close(tile.position(), plan.position(cell));
        cells.push((cell.row, cell.col));
    }

    assert_eq!(
        cells,
        vec![
            (0, 0), (0, 1), (0, 2), (0, 3),
            (1, 3), (1, 2), (1, 1), (1, 0),
            (2, 0), (2, 1), (2, 2), (2, 3),
        ]
    );

    // Homing move, then one move per tile
    let moves = log.moves().await;
    assert_eq!(moves.len(), 13);
    assert_close(moves[5], StagePosition::new(5.0, 3.0 * 3.333));
    assert_close(moves[12], StagePosition::new(10.0, 3.0 * 3.333));
    assert_eq!(log.captures().await, 12);
}

#[tokio::test(start_paused = true)]
async fn test_dense_waits_settle_before_each_capture() {
    let (mut rig, _log) = mock_rig(gray_frame(8, 6, 100));
    let plan = DenseRasterPlan {
        settle: Duration::from_secs(1),
        ..small_plan()
    };
    let settings = uniform_profile().for_level(plan.level);

    let started = tokio::time::Instant::now();
    let mut raster = DenseRaster::start(&mut rig, plan, &settings).await.unwrap();
    while raster.next_tile().await.unwrap().is_some() {}

    assert!(started.elapsed() >= Duration::from_secs(12));
}

#[tokio::test(start_paused = true)]
async fn test_dense_record_writes_numbered_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let scan = ScanDirectory::create(dir.path().join("scan")).unwrap();
    let pass = scan.create_pass(MagnificationLevel::X2_5).unwrap();
    let (mut rig, _log) = mock_rig(gray_frame(8, 6, 100));
    let plan = small_plan();

    let raster = DenseRaster::start(&mut rig, plan, &uniform_profile().for_level(plan.level))
        .await
        .unwrap();
    let written = raster.record(&pass).await.unwrap();

    assert_eq!(written, 12);
    let pictures = sorted_files(&pass.pictures).unwrap();
    assert_eq!(pictures.first().map(String::as_str), Some("1.png"));
    assert_eq!(pictures.last().map(String::as_str), Some("12.png"));
    assert_eq!(sorted_files(&pass.meta).unwrap().len(), 12);

    let meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(pass.meta.join("5.json")).unwrap()).unwrap();
    assert_eq!(meta["stage"]["x_mm"], 5.0);
    assert!(meta.get("chip_id").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_dense_stage_failure_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let scan = ScanDirectory::create(dir.path().join("scan")).unwrap();
    let pass = scan.create_pass(MagnificationLevel::X2_5).unwrap();

    let log = EventLog::default();
    let mut rig = rig(
        MockStage::new(log.clone()).failing_move_at(4),
        MockOptics::new(log.clone()),
        MockCamera::new(log.clone(), gray_frame(8, 6, 100)),
    );
    let plan = small_plan();
    let raster = DenseRaster::start(&mut rig, plan, &uniform_profile().for_level(plan.level))
        .await
        .unwrap();

    match raster.record(&pass).await {
        Err(ScanError::Hardware(e)) => assert_eq!(e.device, Device::Stage),
        other => panic!("Expected stage failure, got {:?}", other.map(|_| ())),
    }
    // Tiles captured before the failure stay on disk
    assert_eq!(sorted_files(&pass.pictures).unwrap().len(), 2);
}

// =============================================================================
// Sparse Raster
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sparse_sequence_has_leading_not_positioned() {
    let transform = CoordinateTransform::new(Calibration::default());
    let map = area_map(3, 4, &[(0, 1, 1), (1, 2, 1), (2, 0, 2)]);
    let (mut rig, log) = mock_rig(gray_frame(8, 6, 100));
    let settings = uniform_profile().for_level(MagnificationLevel::X20);

    let mut raster = SparseRaster::start(
        &mut rig,
        &transform,
        &map,
        SparseRasterPlan::default(),
        &settings,
    )
    .await
    .unwrap();
    assert_eq!(raster.remaining(), 3);

    let mut steps = Vec::new();
    while let Some(step) = raster.next_step().await.unwrap() {
        steps.push(step);
    }

    assert_eq!(steps.len(), 4);
    assert!(matches!(steps[0], RasterStep::NotPositioned));
    let chips: Vec<Option<u32>> = steps[1..]
        .iter()
        .map(|s| s.tile().and_then(|t| t.chip_id()))
        .collect();
    assert_eq!(chips, vec![Some(1), Some(1), Some(2)]);

    let expected = [
        transform.cell_to_stage(GridCell::new(0, 1), MagnificationLevel::X20),
        transform.cell_to_stage(GridCell::new(1, 2), MagnificationLevel::X20),
        transform.cell_to_stage(GridCell::new(2, 0), MagnificationLevel::X20),
    ];
    for (step, position) in steps[1..].iter().zip(expected) {
        assert_close(step.tile().unwrap().position(), position);
    }
    assert_eq!(log.moves().await, expected.to_vec());
}

#[tokio::test(start_paused = true)]
async fn test_sparse_stage_moves_on_before_tile_is_returned() {
    let transform = CoordinateTransform::new(Calibration::default());
    let map = area_map(2, 2, &[(0, 0, 1), (0, 1, 1)]);
    let (mut rig, log) = mock_rig(gray_frame(8, 6, 100));
    let settings = uniform_profile().for_level(MagnificationLevel::X20);

    let mut raster = SparseRaster::start(
        &mut rig,
        &transform,
        &map,
        SparseRasterPlan::default(),
        &settings,
    )
    .await
    .unwrap();
    log.clear().await;

    let t1 = transform.cell_to_stage(GridCell::new(0, 0), MagnificationLevel::X20);
    let t2 = transform.cell_to_stage(GridCell::new(0, 1), MagnificationLevel::X20);

    raster.next_step().await.unwrap();
    assert_eq!(log.motion().await, vec![Event::Move(t1)]);

    let step = raster.next_step().await.unwrap().unwrap();
    assert!(step.is_positioned());
    assert_eq!(
        log.motion().await,
        vec![Event::Move(t1), Event::Capture, Event::Move(t2)]
    );

    raster.next_step().await.unwrap();
    assert_eq!(log.captures().await, 2);
    assert_eq!(raster.remaining(), 0);
    assert!(raster.next_step().await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_sparse_empty_map_yields_only_not_positioned() {
    let transform = CoordinateTransform::new(Calibration::default());
    let map = area_map(2, 2, &[]);
    let (mut rig, log) = mock_rig(gray_frame(8, 6, 100));
    let settings = uniform_profile().for_level(MagnificationLevel::X20);

    let mut raster = SparseRaster::start(
        &mut rig,
        &transform,
        &map,
        SparseRasterPlan::default(),
        &settings,
    )
    .await
    .unwrap();

    assert!(matches!(
        raster.next_step().await.unwrap(),
        Some(RasterStep::NotPositioned)
    ));
    assert!(raster.next_step().await.unwrap().is_none());
    assert!(log.moves().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sparse_capture_failure_propagates() {
    let transform = CoordinateTransform::new(Calibration::default());
    let map = area_map(1, 3, &[(0, 0, 1), (0, 1, 1), (0, 2, 1)]);
    let log = EventLog::default();
    let mut rig = rig(
        MockStage::new(log.clone()),
        MockOptics::new(log.clone()),
        MockCamera::new(log.clone(), gray_frame(8, 6, 100)).failing_capture_at(2),
    );
    let settings = uniform_profile().for_level(MagnificationLevel::X20);

    let mut raster = SparseRaster::start(
        &mut rig,
        &transform,
        &map,
        SparseRasterPlan::default(),
        &settings,
    )
    .await
    .unwrap();

    assert!(raster.next_step().await.is_ok());
    assert!(raster.next_step().await.is_ok());
    let err = raster.next_step().await.unwrap_err();
    assert_eq!(err.device, Device::Camera);
    assert_eq!(err.command, "capture_frame");
}
