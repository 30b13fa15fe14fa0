//! Marker head tracker: runs the tracker and reports the head pose.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use marker_head_tracker::{
    calibration::CalibrationController,
    config::{Config, SharedConfig, EXAMPLE_CONFIG},
    tracker::{create_tracker, default_sink},
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML format)
    #[arg(short = 'C', long)]
    config: Option<String>,

    /// Tracker implementation
    #[arg(short, long, default_value = "aruco")]
    tracker: String,

    /// Camera name or index, overrides the configuration
    #[arg(long)]
    cam: Option<String>,

    /// Diagonal field of view in degrees, overrides the configuration
    #[arg(long)]
    fov: Option<f64>,

    /// Do not open a display window
    #[arg(long)]
    headless: bool,

    /// Calibrate the head offset for this many seconds after starting
    #[arg(long)]
    calibrate: Option<u64>,

    /// Stop after this many seconds (runs until the window is closed otherwise)
    #[arg(long)]
    duration: Option<u64>,

    /// Interval between pose log lines in milliseconds
    #[arg(long, default_value = "500")]
    report_ms: u64,

    /// Print an example configuration file and exit
    #[arg(long)]
    example_config: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    if args.example_config {
        print!("{EXAMPLE_CONFIG}");
        return Ok(());
    }

    info!("Marker Head Tracker");

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {path}");
            match Config::from_file(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!("Failed to load config file: {e}. Using defaults.");
                    Config::default()
                }
            }
        }
        None => Config::default(),
    };

    if let Some(cam) = &args.cam {
        config.camera.name.clone_from(cam);
    }
    if let Some(fov) = args.fov {
        config.camera.fov = fov;
    }
    if args.headless {
        config.display.enabled = false;
    }
    config.validate().context("Invalid configuration")?;

    let config = config.into_shared();
    let mut tracker = create_tracker(&args.tracker, Arc::clone(&config), Box::new(default_sink))?;
    tracker.start().context("Failed to start tracker")?;

    let started = Instant::now();
    let deadline = args.duration.map(|secs| started + Duration::from_secs(secs));
    let report_every = Duration::from_millis(args.report_ms.max(1));

    let mut calibration = CalibrationController::new(Arc::clone(&config), tracker.pose_state());
    let mut calibration_end = None;
    if let Some(secs) = args.calibrate {
        info!("Rotate your head slowly around all axes for {secs} s");
        calibration.start()?;
        calibration_end = Some(started + Duration::from_secs(secs));
    }

    let mut last_report = started;
    while !tracker.quit_requested() && deadline.map_or(true, |d| Instant::now() < d) {
        thread::sleep(Duration::from_millis(10));

        if calibration_end.is_some_and(|end| Instant::now() >= end) {
            calibration_end = None;
            finish_calibration(&mut calibration, &config, args.config.as_deref());
        }

        if last_report.elapsed() >= report_every {
            last_report = Instant::now();
            let pose = tracker.data();
            info!(
                "yaw {:7.2} pitch {:7.2} roll {:7.2} | x {:7.2} y {:7.2} z {:7.2}",
                pose.yaw, pose.pitch, pose.roll, pose.tx, pose.ty, pose.tz
            );
        }
    }

    if calibration.is_running() {
        finish_calibration(&mut calibration, &config, args.config.as_deref());
    }

    tracker.stop()?;
    info!("Tracker shut down");
    Ok(())
}

fn finish_calibration(
    calibration: &mut CalibrationController,
    config: &SharedConfig,
    path: Option<&str>,
) {
    match calibration.finish() {
        Ok(offset) => {
            info!("Head offset: [{:.2}, {:.2}, {:.2}]", offset[0], offset[1], offset[2]);
            if let Some(path) = path {
                match config.read().to_file(path) {
                    Ok(()) => info!("Saved configuration to {path}"),
                    Err(e) => warn!("Failed to save configuration: {e}"),
                }
            }
        }
        Err(e) => warn!("Calibration failed: {e}"),
    }
}
