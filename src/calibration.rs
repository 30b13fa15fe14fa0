//! Head offset calibration.
//!
//! While the user rotates their head about its natural pivot, the marker
//! moves on a sphere around that pivot. With the pose solved against a
//! marker-centred model, every sample satisfies
//!
//! ```text
//! t_k = R_k · h + c
//! ```
//!
//! where `h` is the head offset to bake into the model and `c` the pivot in
//! camera space. Both are recovered by linear least squares.

use crate::{
    config::SharedConfig,
    constants::{EPSILON, MIN_CALIBRATION_SAMPLES},
    pose_state::{RawPose, SharedPoseState},
    Error, Result,
};
use crossbeam_channel::{bounded, select, tick, Sender};
use log::{debug, info, warn};
use nalgebra::{Matrix3, Matrix3x6, Matrix6, Vector3, Vector6};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Accumulator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationState {
    #[default]
    Idle,
    Accumulating,
}

/// Collects pose samples and fits the head offset
#[derive(Debug, Default)]
pub struct CalibrationAccumulator {
    state: CalibrationState,
    samples: Vec<RawPose>,
    estimate: Vector3<f64>,
    last_sequence: u64,
}

impl CalibrationAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a session: drop previous samples and zero the estimate
    pub fn start(&mut self) {
        self.start_after(0);
    }

    /// Begin a session that only samples poses published after
    /// publication `sequence`
    pub fn start_after(&mut self, sequence: u64) {
        self.samples.clear();
        self.estimate = Vector3::zeros();
        self.last_sequence = sequence;
        self.state = CalibrationState::Accumulating;
        debug!("Calibration accumulation started after publication {sequence}");
    }

    #[must_use]
    pub fn state(&self) -> CalibrationState {
        self.state
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == CalibrationState::Accumulating
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Add a sample; ignored unless accumulating
    pub fn update(&mut self, rotation: Matrix3<f64>, translation: Vector3<f64>) -> bool {
        if !self.is_active() {
            return false;
        }
        self.samples.push(RawPose { rotation, translation });
        true
    }

    /// Copy the latest pose out of `state` and add it if it is newer than
    /// the last one taken.
    ///
    /// Only the copy happens under the pose lock. While tracking is lost the
    /// same publication is never counted twice.
    pub fn sample(&mut self, state: &SharedPoseState) -> bool {
        match state.raw_snapshot() {
            Some((sequence, raw)) if sequence > self.last_sequence => {
                let added = self.update(raw.rotation, raw.translation);
                if added {
                    self.last_sequence = sequence;
                }
                added
            }
            _ => false,
        }
    }

    /// End the session and fit the offset
    ///
    /// # Errors
    ///
    /// Returns `Error::Calibration` if no session is running, too few
    /// samples were collected, or the rotations do not constrain the fit
    pub fn finish(&mut self) -> Result<Vector3<f64>> {
        if !self.is_active() {
            return Err(Error::Calibration("No calibration session is running".to_string()));
        }
        self.state = CalibrationState::Idle;

        let estimate = fit_head_offset(&self.samples)?;
        self.estimate = estimate;
        info!(
            "Calibrated head offset ({:.2}, {:.2}, {:.2}) from {} samples",
            estimate.x,
            estimate.y,
            estimate.z,
            self.samples.len()
        );
        Ok(estimate)
    }

    /// Last fitted offset (zero until a session finishes successfully)
    #[must_use]
    pub fn estimate(&self) -> Vector3<f64> {
        self.estimate
    }
}

/// Solve `[R_k | I] · [h; c] = t_k` over all samples via the normal equations
fn fit_head_offset(samples: &[RawPose]) -> Result<Vector3<f64>> {
    if samples.len() < MIN_CALIBRATION_SAMPLES {
        return Err(Error::Calibration(format!(
            "Need at least {MIN_CALIBRATION_SAMPLES} samples, got {}",
            samples.len()
        )));
    }

    let mut normal = Matrix6::<f64>::zeros();
    let mut rhs = Vector6::<f64>::zeros();

    for sample in samples {
        let mut design = Matrix3x6::<f64>::zeros();
        design.fixed_view_mut::<3, 3>(0, 0).copy_from(&sample.rotation);
        design.fixed_view_mut::<3, 3>(0, 3).fill_with_identity();

        normal += design.transpose() * design;
        rhs += design.transpose() * sample.translation;
    }

    let eigenvalues = normal.symmetric_eigenvalues();
    let largest = eigenvalues.max();
    if eigenvalues.min() <= EPSILON * largest {
        return Err(Error::Calibration(
            "Samples do not cover enough head rotation".to_string(),
        ));
    }

    let solution = normal
        .cholesky()
        .ok_or_else(|| Error::Calibration("Normal equations are not positive definite".to_string()))?
        .solve(&rhs);

    let offset = Vector3::new(solution[0], solution[1], solution[2]);
    if offset.iter().any(|v| !v.is_finite()) {
        return Err(Error::Calibration("Fit produced a non-finite offset".to_string()));
    }
    Ok(offset)
}

struct Session {
    stop: Sender<()>,
    handle: JoinHandle<CalibrationAccumulator>,
}

/// Runs calibration sessions against a live tracker.
///
/// Starting a session zeroes the configured head offset so the tracker
/// reports marker-centred poses; finishing writes the fitted offset back.
pub struct CalibrationController {
    config: SharedConfig,
    state: Arc<SharedPoseState>,
    session: Option<Session>,
}

impl CalibrationController {
    #[must_use]
    pub fn new(config: SharedConfig, state: Arc<SharedPoseState>) -> Self {
        Self {
            config,
            state,
            session: None,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// Start sampling on the configured cadence; no-op if already running
    ///
    /// # Errors
    ///
    /// Returns `Error::Worker` if the sampler thread cannot be spawned
    pub fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let interval = {
            let mut config = self.config.write();
            config.model.head_offset = [0.0; 3];
            Duration::from_millis(config.calibration.interval_ms.max(1))
        };

        // poses already published were solved with the previous offset
        let baseline = self.state.sequence();
        let (stop, stop_rx) = bounded::<()>(1);
        let state = Arc::clone(&self.state);

        let handle = thread::Builder::new()
            .name("calibration".to_string())
            .spawn(move || {
                let mut accumulator = CalibrationAccumulator::new();
                accumulator.start_after(baseline);
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            accumulator.sample(&state);
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }
                accumulator
            })
            .map_err(|e| Error::Worker(format!("Failed to spawn calibration thread: {e}")))?;

        info!("Calibration started, sampling every {} ms", interval.as_millis());
        self.session = Some(Session { stop, handle });
        Ok(())
    }

    /// Stop sampling, fit, and store the offset in the shared configuration
    ///
    /// # Errors
    ///
    /// Returns `Error::Calibration` if no session is running or the fit
    /// fails; the configured offset then stays at zero
    pub fn finish(&mut self) -> Result<[f64; 3]> {
        let session = self
            .session
            .take()
            .ok_or_else(|| Error::Calibration("No calibration session is running".to_string()))?;

        let _ = session.stop.send(());
        let mut accumulator = session
            .handle
            .join()
            .map_err(|_| Error::Worker("Calibration thread panicked".to_string()))?;

        let offset = accumulator.finish()?;
        let offset = [offset.x, offset.y, offset.z];
        self.config.write().model.head_offset = offset;
        Ok(offset)
    }

    /// Start if idle, finish if running; returns the offset when finishing
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start) and [`finish`](Self::finish)
    pub fn toggle(&mut self) -> Result<Option<[f64; 3]>> {
        if self.is_running() {
            self.finish().map(Some)
        } else {
            self.start().map(|()| None)
        }
    }
}

impl Drop for CalibrationController {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!("Calibration abandoned while running");
            let _ = session.stop.send(());
            let _ = session.handle.join();
        }
    }
}
