//! Helper functions and utilities for tests
#![allow(dead_code)]

use marker_head_tracker::{
    camera::FrameSource,
    display::FrameSink,
    marker_detection::MarkerObservation,
    pose_estimation::{project_points, CameraIntrinsics, ObjectModel, Pose, PoseEstimator, PoseSolver},
    Error, Result,
};
use opencv::{
    core::{Mat, Point, Scalar, Size, Vec3d, Vector, CV_8UC3},
    imgproc,
    prelude::*,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Frame size used by the synthetic scenes
pub const FRAME_SIZE: Size = Size {
    width: 640,
    height: 480,
};

/// Diagonal field of view used by the synthetic scenes
pub const FOV: f64 = 56.0;

/// Build a pose from plain arrays
pub fn pose(rvec: [f64; 3], tvec: [f64; 3]) -> Result<Pose> {
    Pose::from_vectors(Vec3d::from(rvec), Vec3d::from(tvec))
}

/// Intrinsics for the synthetic scenes
pub fn intrinsics() -> Result<CameraIntrinsics> {
    CameraIntrinsics::from_diagonal_fov(FOV, FRAME_SIZE)
}

/// A white BGR frame
pub fn blank_frame() -> Result<Mat> {
    Ok(Mat::new_rows_cols_with_default(
        FRAME_SIZE.height,
        FRAME_SIZE.width,
        CV_8UC3,
        Scalar::all(255.0),
    )?)
}

/// A white BGR frame with the model's square drawn black at `pose`
pub fn render_marker(model: &ObjectModel, pose: &Pose) -> Result<Mat> {
    let mut frame = blank_frame()?;
    draw_marker(&mut frame, model, pose)?;
    Ok(frame)
}

/// Draw the model's square black onto `frame` at `pose`
#[allow(clippy::cast_possible_truncation)]
pub fn draw_marker(frame: &mut Mat, model: &ObjectModel, pose: &Pose) -> Result<()> {
    let projected = project_points(model.points(), pose, &intrinsics()?)?;
    let corners: Vec<Point> = projected
        .iter()
        .map(|p| Point::new(p.x.round() as i32, p.y.round() as i32))
        .collect();
    imgproc::fill_convex_poly(
        frame,
        &Vector::<Point>::from_slice(&corners),
        Scalar::all(0.0),
        imgproc::LINE_8,
        0,
    )?;
    Ok(())
}

/// One scripted camera response
pub enum Scripted {
    Frame(Mat),
    Empty,
    Fail,
}

/// Frame source that replays a script, then repeats a frame or runs dry
pub struct ScriptedSource {
    script: VecDeque<Scripted>,
    repeat: Option<Mat>,
    releases: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: script.into(),
            repeat: None,
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Yields `frame` forever
    pub fn looping(frame: Mat) -> Self {
        Self {
            script: VecDeque::new(),
            repeat: Some(frame),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }
}

impl FrameSource for ScriptedSource {
    fn read(&mut self, frame: &mut Mat) -> Result<bool> {
        match self.script.pop_front() {
            Some(Scripted::Frame(next)) => {
                *frame = next;
                Ok(true)
            }
            Some(Scripted::Empty) => Ok(false),
            Some(Scripted::Fail) => Err(Error::InvalidInput("scripted read failure".to_string())),
            None => match &self.repeat {
                Some(next) => {
                    *frame = next.try_clone()?;
                    Ok(true)
                }
                None => Ok(false),
            },
        }
    }

    fn release(&mut self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that counts presented frames
pub struct CountingSink {
    shown: Arc<AtomicUsize>,
}

impl CountingSink {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let shown = Arc::new(AtomicUsize::new(0));
        (
            Self {
                shown: Arc::clone(&shown),
            },
            shown,
        )
    }
}

impl FrameSink for CountingSink {
    fn show(&mut self, _frame: &Mat) -> Result<()> {
        self.shown.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that raises the quit flag on the first frame, as a key press would
pub struct QuitOnShowSink {
    quit: Arc<AtomicBool>,
}

impl QuitOnShowSink {
    pub fn new(quit: Arc<AtomicBool>) -> Self {
        Self { quit }
    }
}

impl FrameSink for QuitOnShowSink {
    fn show(&mut self, _frame: &Mat) -> Result<()> {
        self.quit.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Solver that converges for the first `successes` calls, then never again
#[derive(Debug)]
pub struct LimitedSolver {
    successes: AtomicUsize,
}

impl LimitedSolver {
    pub fn new(successes: usize) -> Self {
        Self {
            successes: AtomicUsize::new(successes),
        }
    }
}

impl PoseEstimator for LimitedSolver {
    fn solve(
        &self,
        observation: &MarkerObservation,
        model: &ObjectModel,
        intrinsics: &CameraIntrinsics,
    ) -> Result<Option<Pose>> {
        let granted = self
            .successes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if granted {
            PoseSolver.solve(observation, model, intrinsics)
        } else {
            Ok(None)
        }
    }
}

/// Assert two pose channel values agree within `tolerance`
pub fn assert_near(actual: f64, expected: f64, tolerance: f64, what: &str) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "{what}: {actual:.3} vs expected {expected:.3}"
    );
}
