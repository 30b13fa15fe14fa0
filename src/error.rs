//! Error types for the marker head tracker.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// `OpenCV` operation failed
    #[error("OpenCV error: {0}")]
    OpenCV(#[from] opencv::Error),

    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The camera device could not be opened; the worker never starts
    #[error("Camera open error: {0}")]
    CameraOpen(String),

    /// Invalid input parameters provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Calibration could not produce an estimate
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// No tracker registered under the requested name
    #[error("Unknown tracker: {0}")]
    UnknownTracker(String),

    /// Worker thread lifecycle error
    #[error("Worker error: {0}")]
    Worker(String),
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
