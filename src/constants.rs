//! Constants used throughout the tracker

/// Half of the marker's edge length in model units
pub const MARKER_HALF_EXTENT: f32 = 40.0;

/// Smallest accepted marker perimeter, as a fraction of the searched image
pub const MARKER_SIZE_MIN: f64 = 0.05;

/// Largest accepted marker perimeter, as a fraction of the searched image
pub const MARKER_SIZE_MAX: f64 = 0.3;

/// Clamp range for size bounds rescaled to an ROI
pub const ROI_SIZE_BOUND_FLOOR: f64 = 0.01;
pub const ROI_SIZE_BOUND_CEIL: f64 = 1.0;

/// Polygon approximation tolerance relative to contour perimeter
pub const POLY_APPROX_EPSILON: f64 = 0.05;

/// Minimum squared distance between adjacent marker corners, in pixels
pub const MIN_CORNER_DISTANCE_SQ: f32 = 10.0;

/// Corners closer than this to the searched image edge are rejected
pub const BORDER_MARGIN: f32 = 2.0;

/// Inflation applied to the projected marker when predicting the next ROI
pub const SEARCH_WINDOW_MULTIPLIER: f32 = 1.3;

/// Scale from solver translation units to published units
pub const TRANSLATION_SCALE: f64 = 0.1;

/// Frame-rate EMA time constant, seconds
pub const RATE_TIME_CONSTANT: f64 = 0.25;

/// Additive correction for frame-rate measurement lag
pub const RATE_BIAS: f64 = 0.8;

/// Frame intervals at or below this are ignored by the rate estimator
pub const RATE_MIN_DT: f64 = 1e-3;

/// Default diagonal field of view, degrees
pub const DEFAULT_FOV_DEGREES: f64 = 56.0;

/// Delay before the camera is released after the worker stops
pub const DEFAULT_RELEASE_COOLDOWN_MS: u64 = 1000;

/// Default calibration sampling cadence
pub const DEFAULT_CALIBRATION_INTERVAL_MS: u64 = 250;

/// Back-off between failed frame reads
pub const READ_RETRY_DELAY_MS: u64 = 5;

/// Minimum number of samples for a calibration fit
pub const MIN_CALIBRATION_SAMPLES: usize = 3;

/// Numeric precision epsilon
pub const EPSILON: f64 = 1e-10;
