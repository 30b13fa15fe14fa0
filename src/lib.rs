//! Real-time 6DoF head tracking from a single square fiducial marker.
//!
//! The marker is worn on the head (for example clipped to a cap) and watched
//! by one camera. Each frame goes through:
//! 1. Marker detection, first inside a region predicted from the previous
//!    pose, then across the full frame
//! 2. Pose recovery with `PnP` against a square model shifted by the head
//!    offset
//! 3. Publication of yaw, pitch, roll and translation to shared state
//! 4. Prediction of the next frame's search region
//!
//! A separate calibration step estimates the head offset: the distance from
//! the marker to the point the head actually rotates about.
//!
//! # Examples
//!
//! ## Running a tracker
//!
//! ```no_run
//! use marker_head_tracker::{config::Config, tracker::{create_tracker, default_sink}};
//! use std::{thread, time::Duration};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("tracker.yaml")?.into_shared();
//! let mut tracker = create_tracker("aruco", config, Box::new(default_sink))?;
//! tracker.start()?;
//!
//! for _ in 0..100 {
//!     let pose = tracker.data();
//!     println!("yaw {:.1} pitch {:.1} roll {:.1}", pose.yaw, pose.pitch, pose.roll);
//!     thread::sleep(Duration::from_millis(50));
//! }
//!
//! tracker.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Single-frame tracking
//!
//! ```no_run
//! use marker_head_tracker::worker::{TrackingOutcome, TrackingPipeline};
//! use opencv::{imgcodecs, prelude::*};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let gray = imgcodecs::imread("marker.png", imgcodecs::IMREAD_GRAYSCALE)?;
//! let mut pipeline = TrackingPipeline::default();
//!
//! match pipeline.process(&gray, 56.0, [0.0, 0.0, 0.0])? {
//!     TrackingOutcome::Tracked { channels, .. } => println!("{:?}", channels),
//!     TrackingOutcome::MarkerNotFound => println!("no marker"),
//!     TrackingOutcome::PoseNotConverged => println!("no pose"),
//! }
//! # Ok(())
//! # }
//! ```

/// Frame acquisition and device access
pub mod camera;

/// Square marker detection
pub mod marker_detection;

/// Search region prediction
pub mod roi;

/// Marker pose recovery using `PnP`
pub mod pose_estimation;

/// Frame rate smoothing
pub mod rate_estimator;

/// Shared latest-pose state
pub mod pose_state;

/// Head offset calibration
pub mod calibration;

/// Diagnostic overlay and frame sinks
pub mod display;

/// Tracking loop
pub mod worker;

/// Tracker lifecycle and registry
pub mod tracker;

/// Error types and result handling
pub mod error;

/// Constants used throughout the tracker
pub mod constants;

/// Configuration management
pub mod config;

pub use error::{Error, Result};
