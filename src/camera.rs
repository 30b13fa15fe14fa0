//! Frame acquisition: camera devices, device naming and per-iteration frames.

use crate::{
    config::{CameraConfig, FrameRate, Resolution},
    Error, Result,
};
use log::{debug, info};
use opencv::{
    core::{Mat, Size},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, CAP_PROP_FPS, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH},
};
use parking_lot::Mutex;
use std::sync::Arc;

/// A device that yields color frames
///
/// `read` returning `Ok(false)` means "no frame this time"; callers skip the
/// iteration and try again.
pub trait FrameSource: Send {
    /// Read the next frame into `frame`
    fn read(&mut self, frame: &mut Mat) -> Result<bool>;

    /// Read a device property (`videoio::CAP_PROP_*`)
    fn property(&self, id: i32) -> Result<f64> {
        Err(Error::InvalidInput(format!("Property {id} is not supported by this source")))
    }

    /// Adjust a device property; returns whether the device accepted it
    fn set_property(&mut self, _id: i32, _value: f64) -> Result<bool> {
        Ok(false)
    }

    /// Release the underlying device
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Camera handle shared between the worker and device-property collaborators
pub type SharedCamera = Arc<Mutex<Box<dyn FrameSource>>>;

/// Wrap a source so it can be shared under the camera lock
#[must_use]
pub fn share(source: Box<dyn FrameSource>) -> SharedCamera {
    Arc::new(Mutex::new(source))
}

/// Run `f` with exclusive access to the camera.
///
/// Property pages use this to read or adjust settings without racing the
/// worker's `read`.
pub fn with_camera<T>(camera: &SharedCamera, f: impl FnOnce(&mut dyn FrameSource) -> T) -> T {
    let mut guard = camera.lock();
    f(&mut **guard)
}

/// `OpenCV` video capture device
pub struct OpenCvCamera {
    capture: VideoCapture,
    index: i32,
}

impl OpenCvCamera {
    /// Open a capture device and apply resolution and frame-rate hints.
    ///
    /// Hints are best effort; the device may ignore them.
    ///
    /// # Errors
    ///
    /// Returns `Error::CameraOpen` if the device cannot be opened
    pub fn open(index: i32, resolution: Resolution, frame_rate: FrameRate) -> Result<Self> {
        info!("Opening camera {index}");
        let mut capture = VideoCapture::new(index, videoio::CAP_ANY)
            .map_err(|e| Error::CameraOpen(format!("device {index}: {e}")))?;

        if !capture.is_opened()? {
            return Err(Error::CameraOpen(format!("device {index} is not available")));
        }

        if let Some((width, height)) = resolution.dimensions() {
            capture.set(CAP_PROP_FRAME_WIDTH, f64::from(width))?;
            capture.set(CAP_PROP_FRAME_HEIGHT, f64::from(height))?;
            debug!("Requested resolution {width}x{height}");
        }
        if let Some(hz) = frame_rate.hz() {
            capture.set(CAP_PROP_FPS, f64::from(hz))?;
            debug!("Requested {hz} fps");
        }

        Ok(Self { capture, index })
    }

    /// Open the device named in the camera configuration
    pub fn from_config(config: &CameraConfig, resolver: &dyn DeviceResolver) -> Result<Self> {
        let index = resolver
            .resolve(&config.name)
            .ok_or_else(|| Error::CameraOpen(format!("no device named '{}'", config.name)))?;
        Self::open(index, config.resolution, config.fps)
    }
}

impl FrameSource for OpenCvCamera {
    fn read(&mut self, frame: &mut Mat) -> Result<bool> {
        Ok(self.capture.read(frame)? && !frame.empty())
    }

    fn property(&self, id: i32) -> Result<f64> {
        Ok(self.capture.get(id)?)
    }

    fn set_property(&mut self, id: i32, value: f64) -> Result<bool> {
        Ok(self.capture.set(id, value)?)
    }

    fn release(&mut self) -> Result<()> {
        info!("Releasing camera {}", self.index);
        self.capture.release()?;
        Ok(())
    }
}

/// Maps logical camera names to device indices
pub trait DeviceResolver: Send + Sync {
    /// Resolve a name, `None` if no such device is known
    fn resolve(&self, name: &str) -> Option<i32>;
}

/// Resolves numeric names (`"1"`), V4L paths (`"/dev/video1"`) and the
/// empty name (first device)
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDeviceResolver;

impl DeviceResolver for DefaultDeviceResolver {
    fn resolve(&self, name: &str) -> Option<i32> {
        let name = name.trim();
        if name.is_empty() {
            return Some(0);
        }
        let digits = name.strip_prefix("/dev/video").unwrap_or(name);
        digits.parse::<i32>().ok().filter(|index| *index >= 0)
    }
}

/// One acquired image and its grayscale derivation
pub struct Frame {
    /// Image as delivered by the device (BGR)
    pub color: Mat,
    /// Single-channel copy used for detection
    pub gray: Mat,
}

impl Frame {
    /// Derive the grayscale image from a color frame
    pub fn from_color(color: Mat) -> Result<Self> {
        let gray = if color.channels() == 1 {
            color.try_clone()?
        } else {
            let mut gray = Mat::default();
            imgproc::cvt_color(&color, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
            gray
        };
        Ok(Self { color, gray })
    }

    /// Frame dimensions
    pub fn size(&self) -> Result<Size> {
        Ok(self.gray.size()?)
    }
}
