//! Flake Scanner - automated wafer scanning.
//!
//! `scan` runs the full pipeline against the simulated microscope; `stitch`
//! and `map` rebuild the overview products of an existing scan; `detect`
//! runs flake detection over a recorded pass.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flake_scanner::{
    config::{Cli, Command, DetectConfig, MapConfig, ScanConfig, StitchConfig},
    hardware::simulated::{SimulatedMicroscope, SimulationConfig},
    overview::{create_mask, AreaMapBuilder, ImageStitcher, MaskSettings, OverviewImage},
    scan::{detect_dataset, FlatfieldCorrector},
    storage::{ScanDirectory, MASK_FILE, SCAN_AREA_MAP_FILE},
    tile::{read_rgb, write_png, JpegTileEncoder},
    Calibration, ContrastDetector, CoordinateTransform, ScanPipeline,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Scan(config) => run_scan(config).await,
        Command::Stitch(config) => run_stitch(config),
        Command::Map(config) => run_map(config),
        Command::Detect(config) => run_detect(config),
    }
}

// =============================================================================
// Scan Command
// =============================================================================

async fn run_scan(config: ScanConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let pipeline_config = match config.pipeline_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let wafer = match read_rgb(&config.wafer_image) {
        Ok(image) => image,
        Err(e) => {
            error!("Failed to load wafer image: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Configuration:");
    info!("  Scan directory: {}", pipeline_config.scan_dir.display());
    info!("  Parameters: {}", config.parameters_dir.display());
    info!(
        "  Material: {} on {}",
        pipeline_config.material, pipeline_config.chip_thickness
    );
    info!(
        "  Detection: {} (confidence >= {})",
        pipeline_config.detection_level.label(),
        pipeline_config.confidence_threshold
    );
    info!(
        "  Wafer image: {} ({}x{} px)",
        config.wafer_image.display(),
        wafer.width(),
        wafer.height()
    );

    let sim = SimulatedMicroscope::new(wafer, SimulationConfig::default());
    let mut rig = sim.rig();
    let detector = ContrastDetector::new(config.detector_settings());
    let pipeline = ScanPipeline::new(Calibration::default(), pipeline_config);

    match pipeline.run(&mut rig, &detector).await {
        Ok(summary) => {
            info!("────────────────────────────────────────────────────────────────");
            info!("  Dense tiles:      {}", summary.dense_tiles);
            info!("  Chips:            {}", summary.chips);
            info!("  Scan cells:       {}", summary.occupied_cells);
            info!("  High-mag tiles:   {}", summary.high_mag_tiles);
            info!(
                "  Flakes:           {} ({} rejected)",
                summary.flakes, summary.rejected
            );
            info!(
                "  Revisit images:   {} ({} failed)",
                summary.revisits.total(),
                summary.revisits.failed
            );
            info!("  Elapsed:          {:?}", summary.total_elapsed());
            info!("────────────────────────────────────────────────────────────────");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Scan failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Stitch Command
// =============================================================================

fn run_stitch(config: StitchConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let stitched = match ImageStitcher::new(config.settings()).stitch_directory(&config.pictures_dir)
    {
        Ok(image) => image,
        Err(e) => {
            error!("Stitching failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = write_png(&stitched, &config.output) {
        error!("Failed to write overview: {}", e);
        return ExitCode::FAILURE;
    }
    info!(
        "Wrote {}x{} overview to {}",
        stitched.width(),
        stitched.height(),
        config.output.display()
    );

    if let Some(ref path) = config.compressed_output {
        let overview = OverviewImage::new(stitched, Calibration::default().overview.extent_mm);
        if let Err(e) = JpegTileEncoder::default().write(overview.compressed().image(), path) {
            error!("Failed to write compressed overview: {}", e);
            return ExitCode::FAILURE;
        }
        info!("Wrote compressed overview to {}", path.display());
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Map Command
// =============================================================================

fn run_map(config: MapConfig) -> ExitCode {
    init_logging(config.verbose);

    let settings = match config.validate().and_then(|()| config.settings()) {
        Ok(s) => s,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let overview = match read_rgb(&config.overview) {
        Ok(image) => image,
        Err(e) => {
            error!("Failed to load overview: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mask = create_mask(&overview, &MaskSettings::default());
    let map = AreaMapBuilder::new(CoordinateTransform::new(Calibration::default()), settings)
        .build(&mask);

    let mask_path = config.output_dir.join(MASK_FILE);
    let map_path = config.output_dir.join(SCAN_AREA_MAP_FILE);
    let written = write_png(&mask, &mask_path).and_then(|()| map.save(&map_path));
    if let Err(e) = written {
        error!("Failed to write map: {}", e);
        return ExitCode::FAILURE;
    }

    info!(
        "Found {} chip(s) over {} cell(s) of a {}x{} grid at {}",
        map.chip_count(),
        map.occupied_cells(),
        map.rows(),
        map.cols(),
        map.level().label()
    );
    info!("Wrote {} and {}", mask_path.display(), map_path.display());
    ExitCode::SUCCESS
}

// =============================================================================
// Detect Command
// =============================================================================

fn run_detect(config: DetectConfig) -> ExitCode {
    init_logging(config.verbose);

    let prepared = config
        .validate()
        .and_then(|()| Ok((config.settings()?, config.flatfield_path()?)));
    let (settings, flatfield_path) = match prepared {
        Ok(p) => p,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let corrector = match FlatfieldCorrector::load(&flatfield_path) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        "Detecting flakes in {} at {}",
        config.scan_dir.display(),
        settings.level.label()
    );

    let scan_dir = ScanDirectory::open(&config.scan_dir);
    let detector = ContrastDetector::new(config.detector_settings());
    let transform = CoordinateTransform::new(Calibration::default());
    match detect_dataset(&scan_dir, &transform, &detector, &corrector, settings) {
        Ok(report) => {
            info!(
                "Found {} flake(s) in {} of {} image(s), {} rejected",
                report.flakes, report.images_with_flakes, report.images, report.rejected
            );
            if let Some(path) = report.marked_overview {
                info!("Wrote {}", path.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Detection failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "flake_scanner=debug"
    } else {
        "flake_scanner=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
