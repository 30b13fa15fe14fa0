//! Configuration management for the marker head tracker

use crate::{
    constants::{DEFAULT_CALIBRATION_INTERVAL_MS, DEFAULT_FOV_DEGREES, DEFAULT_RELEASE_COOLDOWN_MS},
    Error, Result,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Configuration handle shared between the worker, the calibration
/// controller and whoever persists settings
pub type SharedConfig = Arc<RwLock<Config>>;

/// Tracker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera selection and capture hints
    pub camera: CameraConfig,

    /// Head model geometry
    pub model: ModelConfig,

    /// Worker lifecycle
    pub tracker: TrackerConfig,

    /// Calibration cadence
    pub calibration: CalibrationConfig,

    /// Diagnostic display
    pub display: DisplayConfig,
}

/// Camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Logical device name, resolved through a `DeviceResolver`
    pub name: String,

    /// Requested capture resolution
    pub resolution: Resolution,

    /// Requested capture frame rate
    pub fps: FrameRate,

    /// Diagonal field of view in degrees
    pub fov: f64,
}

/// Head model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Offset from the marker centre to the head's rotation centre (x, y, z)
    pub head_offset: [f64; 3],
}

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Wait between stopping the worker and releasing the camera
    pub release_cooldown_ms: u64,
}

/// Calibration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Interval between pose samples while calibrating
    pub interval_ms: u64,
}

/// Display configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Show the annotated camera image
    pub enabled: bool,

    /// Window title
    pub window_name: String,
}

/// Capture resolution choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    /// Leave the device at its own default
    #[default]
    #[serde(rename = "device_default")]
    DeviceDefault,
    /// 640 × 480
    #[serde(rename = "640x480")]
    Vga,
    /// 320 × 240
    #[serde(rename = "320x240")]
    Qvga,
}

impl Resolution {
    /// Width and height to request, `None` for the device default
    #[must_use]
    pub fn dimensions(self) -> Option<(i32, i32)> {
        match self {
            Self::DeviceDefault => None,
            Self::Vga => Some((640, 480)),
            Self::Qvga => Some((320, 240)),
        }
    }
}

/// Capture frame-rate choice, serialized as the plain number (0 = default)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FrameRate {
    /// Leave the device at its own default
    #[default]
    DeviceDefault,
    Fps30,
    Fps60,
    Fps75,
    Fps125,
    Fps200,
}

impl FrameRate {
    /// Frames per second to request, `None` for the device default
    #[must_use]
    pub fn hz(self) -> Option<u32> {
        match u32::from(self) {
            0 => None,
            hz => Some(hz),
        }
    }
}

impl TryFrom<u32> for FrameRate {
    type Error = String;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::DeviceDefault),
            30 => Ok(Self::Fps30),
            60 => Ok(Self::Fps60),
            75 => Ok(Self::Fps75),
            125 => Ok(Self::Fps125),
            200 => Ok(Self::Fps200),
            other => Err(format!("unsupported frame rate {other}, expected one of 0, 30, 60, 75, 125, 200")),
        }
    }
}

impl From<FrameRate> for u32 {
    fn from(rate: FrameRate) -> Self {
        match rate {
            FrameRate::DeviceDefault => 0,
            FrameRate::Fps30 => 30,
            FrameRate::Fps60 => 60,
            FrameRate::Fps75 => 75,
            FrameRate::Fps125 => 125,
            FrameRate::Fps200 => 200,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            model: ModelConfig::default(),
            tracker: TrackerConfig::default(),
            calibration: CalibrationConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            name: "0".to_string(),
            resolution: Resolution::DeviceDefault,
            fps: FrameRate::DeviceDefault,
            fov: DEFAULT_FOV_DEGREES,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { head_offset: [0.0; 3] }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            release_cooldown_ms: DEFAULT_RELEASE_COOLDOWN_MS,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_CALIBRATION_INTERVAL_MS,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_name: "Marker Head Tracker".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to a YAML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Wrap into a handle shared with the worker and calibration controller
    #[must_use]
    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.camera.fov > 0.0 && self.camera.fov < 180.0) {
            return Err(Error::ConfigError(format!(
                "Field of view must be between 0 and 180 degrees, got {}",
                self.camera.fov
            )));
        }
        if self.model.head_offset.iter().any(|v| !v.is_finite()) {
            return Err(Error::ConfigError("Head offset must be finite".to_string()));
        }
        if self.calibration.interval_ms == 0 {
            return Err(Error::ConfigError(
                "Calibration interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Marker Head Tracker Configuration

camera:
  name: "0"
  # device_default, 640x480 or 320x240
  resolution: "640x480"
  # 0 (device default), 30, 60, 75, 125 or 200
  fps: 30
  # diagonal field of view in degrees
  fov: 56.0

model:
  # written back by calibration
  head_offset: [0.0, 0.0, 0.0]

tracker:
  release_cooldown_ms: 1000

calibration:
  interval_ms: 250

display:
  enabled: true
  window_name: "Marker Head Tracker"
"#;
