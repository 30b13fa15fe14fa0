//! The acquire → detect → solve → predict loop.

use crate::{
    camera::{with_camera, Frame, SharedCamera},
    config::SharedConfig,
    constants::READ_RETRY_DELAY_MS,
    display::{annotate, FrameSink},
    marker_detection::{Detection, MarkerDetector, MarkerObservation},
    pose_estimation::{project_points, CameraIntrinsics, ObjectModel, Pose, PoseEstimator, PoseSolver},
    pose_state::{PoseChannels, RawPose, SharedPoseState},
    rate_estimator::RateEstimator,
    roi::{Roi, RoiPredictor},
    Result,
};
use log::{debug, info, warn};
use opencv::{
    core::{Mat, Point2f, Point3f},
    prelude::*,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Result of one detect-then-solve step
#[derive(Debug, Clone, Copy)]
pub enum TrackingOutcome {
    /// Marker found and pose solved
    Tracked {
        detection: Detection,
        pose: Pose,
        channels: PoseChannels,
        /// Head centre projected into the image
        centre: Point2f,
    },
    /// No single marker candidate in the ROI or the full frame
    MarkerNotFound,
    /// A marker was found but `PnP` did not converge
    PoseNotConverged,
}

impl TrackingOutcome {
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        matches!(self, Self::Tracked { .. })
    }
}

/// Per-frame tracking state: detector, solver, and the ROI and corner
/// labelling carried between frames
#[derive(Debug)]
pub struct TrackingPipeline {
    detector: MarkerDetector,
    solver: Box<dyn PoseEstimator>,
    predictor: RoiPredictor,
    roi: Roi,
    last_observation: Option<MarkerObservation>,
    rate: RateEstimator,
}

impl Default for TrackingPipeline {
    fn default() -> Self {
        Self::new(MarkerDetector::default(), RoiPredictor::default())
    }
}

impl TrackingPipeline {
    #[must_use]
    pub fn new(detector: MarkerDetector, predictor: RoiPredictor) -> Self {
        Self {
            detector,
            solver: Box::new(PoseSolver),
            predictor,
            roi: Roi::Unset,
            last_observation: None,
            rate: RateEstimator::new(),
        }
    }

    /// Replace the pose solver
    #[must_use]
    pub fn with_solver(mut self, solver: Box<dyn PoseEstimator>) -> Self {
        self.solver = solver;
        self
    }

    /// Track the marker in one grayscale frame.
    ///
    /// `fov` and `head_offset` are taken per call so configuration changes
    /// apply from the next frame. Every non-tracked outcome, and every
    /// error, leaves the ROI unset and drops the corner labelling.
    ///
    /// # Errors
    ///
    /// Returns an error if an `OpenCV` operation fails
    pub fn process(&mut self, gray: &Mat, fov: f64, head_offset: [f64; 3]) -> Result<TrackingOutcome> {
        self.rate.tick();
        let outcome = self.track(gray, fov, head_offset);
        match &outcome {
            Ok(TrackingOutcome::Tracked { detection, .. }) => {
                self.last_observation = Some(detection.observation);
            }
            _ => self.reset(),
        }
        outcome
    }

    fn track(&mut self, gray: &Mat, fov: f64, head_offset: [f64; 3]) -> Result<TrackingOutcome> {
        let frame_size = gray.size()?;
        let intrinsics = CameraIntrinsics::from_diagonal_fov(fov, frame_size)?;
        let model = ObjectModel::new(head_offset);

        let Some(mut detection) = self.detector.detect(gray, &self.roi)? else {
            return Ok(TrackingOutcome::MarkerNotFound);
        };
        if let Some(previous) = &self.last_observation {
            detection.observation = detection.observation.aligned_to(previous);
        }

        let Some(pose) = self.solver.solve(&detection.observation, &model, &intrinsics)? else {
            return Ok(TrackingOutcome::PoseNotConverged);
        };

        self.roi = match self.predictor.predict(&model, &pose, &intrinsics, frame_size) {
            Ok(roi) => roi,
            Err(e) => {
                debug!("ROI prediction failed: {e}");
                Roi::Unset
            }
        };

        let centre = project_points(&[Point3f::new(0.0, 0.0, 0.0)], &pose, &intrinsics)
            .ok()
            .and_then(|points| points.first().copied())
            .unwrap_or_else(|| detection.observation.centroid());

        Ok(TrackingOutcome::Tracked {
            detection,
            pose,
            channels: pose.channels(),
            centre,
        })
    }

    /// Region the next frame will search first
    #[must_use]
    pub fn roi(&self) -> Roi {
        self.roi
    }

    /// Smoothed loop frequency
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.rate.rate()
    }

    /// Forget the ROI and corner labelling so the next frame searches the
    /// full frame from scratch
    pub fn reset(&mut self) {
        self.roi = Roi::Unset;
        self.last_observation = None;
    }
}

/// What one worker iteration did
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// The camera had nothing to give
    NoFrame,
    /// Frame processed, marker not tracked
    Lost,
    /// Pose published
    Tracked(PoseChannels),
}

/// Owns one tracking session's loop state
pub struct Worker {
    pipeline: TrackingPipeline,
    camera: SharedCamera,
    state: Arc<SharedPoseState>,
    config: SharedConfig,
    sink: Box<dyn FrameSink>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    #[must_use]
    pub fn new(
        camera: SharedCamera,
        state: Arc<SharedPoseState>,
        config: SharedConfig,
        sink: Box<dyn FrameSink>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pipeline: TrackingPipeline::default(),
            camera,
            state,
            config,
            sink,
            stop,
        }
    }

    /// One loop iteration.
    ///
    /// Read failures count as "no frame". Pose state is written only when
    /// the pose is solved, so readers keep the last good value otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if an `OpenCV` operation on the frame fails
    pub fn step(&mut self) -> Result<StepOutcome> {
        let (fov, head_offset, display) = {
            let config = self.config.read();
            (config.camera.fov, config.model.head_offset, config.display.enabled)
        };

        let mut color = Mat::default();
        match with_camera(&self.camera, |camera| camera.read(&mut color)) {
            Ok(true) => {}
            Ok(false) => return Ok(StepOutcome::NoFrame),
            Err(e) => {
                warn!("Frame read failed: {e}");
                return Ok(StepOutcome::NoFrame);
            }
        }

        let mut frame = match Frame::from_color(color) {
            Ok(frame) => frame,
            Err(e) => {
                self.pipeline.reset();
                return Err(e);
            }
        };

        let outcome = self.pipeline.process(&frame.gray, fov, head_offset)?;

        let (observation, centre, step) = match outcome {
            TrackingOutcome::Tracked {
                detection,
                pose,
                channels,
                centre,
            } => {
                self.state.publish(
                    channels,
                    RawPose {
                        rotation: pose.rotation,
                        translation: pose.translation(),
                    },
                );
                (Some(detection.observation), Some(centre), StepOutcome::Tracked(channels))
            }
            TrackingOutcome::MarkerNotFound => (None, None, StepOutcome::Lost),
            TrackingOutcome::PoseNotConverged => {
                debug!("Pose did not converge");
                (None, None, StepOutcome::Lost)
            }
        };

        if display {
            annotate(&mut frame.color, observation.as_ref(), centre, self.pipeline.rate())?;
            self.sink.show(&frame.color)?;
        }

        Ok(step)
    }

    /// Loop until the stop flag is set; the flag is checked once per
    /// iteration
    pub fn run(&mut self) {
        info!("Tracking worker started");
        while !self.stop.load(Ordering::SeqCst) {
            match self.step() {
                Ok(StepOutcome::NoFrame) => thread::sleep(Duration::from_millis(READ_RETRY_DELAY_MS)),
                Ok(_) => {}
                Err(e) => warn!("Tracking iteration failed: {e}"),
            }
        }
        info!("Tracking worker stopped");
    }

    /// Run frames through `pipeline` instead of the default one
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: TrackingPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    #[must_use]
    pub fn pipeline(&self) -> &TrackingPipeline {
        &self.pipeline
    }
}
