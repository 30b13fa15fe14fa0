//! Smoothed frames-per-second estimate for the diagnostic overlay.

use crate::constants::{RATE_BIAS, RATE_MIN_DT, RATE_TIME_CONSTANT};
use std::time::Instant;

/// Exponential moving average of the loop frequency
#[derive(Debug, Clone)]
pub struct RateEstimator {
    rc: f64,
    bias: f64,
    freq: f64,
    last: Instant,
}

impl RateEstimator {
    /// Create an estimator with the standard time constant and bias
    #[must_use]
    pub fn new() -> Self {
        Self::with_parameters(RATE_TIME_CONSTANT, RATE_BIAS)
    }

    /// Create an estimator with a custom time constant (seconds) and bias (Hz)
    #[must_use]
    pub fn with_parameters(rc: f64, bias: f64) -> Self {
        Self {
            rc,
            bias,
            freq: 0.0,
            last: Instant::now(),
        }
    }

    /// Fold one inter-frame interval (seconds) into the estimate
    pub fn update(&mut self, dt: f64) -> f64 {
        if dt > RATE_MIN_DT {
            let alpha = dt / (dt + self.rc);
            self.freq = self.freq * (1.0 - alpha) + alpha * (1.0 / dt + self.bias);
        }
        self.freq
    }

    /// Measure the time since the previous tick and update
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        let dt = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        self.update(dt)
    }

    /// Current estimate in Hz
    #[must_use]
    pub fn rate(&self) -> f64 {
        self.freq
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new()
    }
}
