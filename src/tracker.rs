//! Tracker lifecycle and the tracker registry.

use crate::{
    camera::{share, with_camera, DefaultDeviceResolver, FrameSource, OpenCvCamera, SharedCamera},
    config::{CameraConfig, DisplayConfig, SharedConfig},
    display::{FrameSink, HighGuiSink, NullSink},
    pose_state::{PoseChannels, SharedPoseState},
    worker::Worker,
    Error, Result,
};
use log::{error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Common interface for head trackers
pub trait Tracker: Send {
    /// Registry name
    fn name(&self) -> &str;

    /// Open the camera and start the worker.
    ///
    /// If the camera cannot be opened no worker is started.
    fn start(&mut self) -> Result<()>;

    /// Stop the worker, wait for the cool-down, release the camera
    fn stop(&mut self) -> Result<()>;

    /// Whether a worker is running
    fn is_running(&self) -> bool;

    /// Latest published pose (zeros before the first one of the current
    /// session)
    fn data(&self) -> PoseChannels;

    /// Whether the user asked to quit from the display since the last start
    fn quit_requested(&self) -> bool;

    /// Pose state handle, for collaborators such as calibration
    fn pose_state(&self) -> Arc<SharedPoseState>;

    /// Camera handle while running, for device-property collaborators
    fn camera(&self) -> Option<SharedCamera>;
}

/// Opens the frame source for a session
pub type SourceOpener = Box<dyn Fn(&CameraConfig) -> Result<Box<dyn FrameSource>> + Send>;

/// Builds the frame sink for a session; the sink raises the flag when the
/// user asks to quit
pub type SinkFactory = Box<dyn Fn(&DisplayConfig, Arc<AtomicBool>) -> Box<dyn FrameSink> + Send>;

struct Session {
    camera: SharedCamera,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Single square-marker tracker
pub struct ArucoTracker {
    config: SharedConfig,
    state: Arc<SharedPoseState>,
    opener: SourceOpener,
    sinks: SinkFactory,
    quit: Arc<AtomicBool>,
    session: Option<Session>,
}

impl ArucoTracker {
    /// Tracker using `OpenCV` capture devices and a `HighGUI` window when
    /// display is enabled
    #[must_use]
    pub fn new(config: SharedConfig) -> Self {
        Self::with_parts(config, Box::new(open_device), Box::new(default_sink))
    }

    /// Tracker with custom source and sink construction
    #[must_use]
    pub fn with_parts(config: SharedConfig, opener: SourceOpener, sinks: SinkFactory) -> Self {
        Self {
            config,
            state: Arc::new(SharedPoseState::new()),
            opener,
            sinks,
            quit: Arc::new(AtomicBool::new(false)),
            session: None,
        }
    }
}

fn open_device(config: &CameraConfig) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(OpenCvCamera::from_config(config, &DefaultDeviceResolver)?))
}

/// `HighGUI` window when display is enabled, otherwise nothing. `q` or Esc
/// in the window raises `quit`.
pub fn default_sink(config: &DisplayConfig, quit: Arc<AtomicBool>) -> Box<dyn FrameSink> {
    if config.enabled {
        Box::new(HighGuiSink::new(&config.window_name, quit))
    } else {
        Box::new(NullSink)
    }
}

impl Tracker for ArucoTracker {
    fn name(&self) -> &str {
        "aruco"
    }

    fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let (camera_config, display_config) = {
            let config = self.config.read();
            (config.camera.clone(), config.display.clone())
        };

        let camera = share((self.opener)(&camera_config)?);
        let stop = Arc::new(AtomicBool::new(false));
        self.quit.store(false, Ordering::SeqCst);
        self.state.reset();

        let mut worker = Worker::new(
            Arc::clone(&camera),
            Arc::clone(&self.state),
            Arc::clone(&self.config),
            (self.sinks)(&display_config, Arc::clone(&self.quit)),
            Arc::clone(&stop),
        );

        let handle = match thread::Builder::new()
            .name("marker-tracker".to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                let _ = with_camera(&camera, |source| source.release());
                return Err(Error::Worker(format!("Failed to spawn tracking thread: {e}")));
            }
        };

        info!("Tracker started on camera '{}'", camera_config.name);
        self.session = Some(Session { camera, stop, handle });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        session.stop.store(true, Ordering::SeqCst);
        let joined = session.handle.join();

        let cooldown = self.config.read().tracker.release_cooldown_ms;
        if cooldown > 0 {
            thread::sleep(Duration::from_millis(cooldown));
        }
        with_camera(&session.camera, |source| source.release())?;

        joined.map_err(|_| Error::Worker("Tracking thread panicked".to_string()))?;
        info!("Tracker stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.session.is_some()
    }

    fn data(&self) -> PoseChannels {
        self.state.channels()
    }

    fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    fn pose_state(&self) -> Arc<SharedPoseState> {
        Arc::clone(&self.state)
    }

    fn camera(&self) -> Option<SharedCamera> {
        self.session.as_ref().map(|session| Arc::clone(&session.camera))
    }
}

impl Drop for ArucoTracker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Failed to stop tracker: {e}");
        }
    }
}

/// Names accepted by [`create_tracker`]
pub const TRACKER_KINDS: &[&str] = &["aruco", "marker"];

/// Create a tracker by name, presenting frames through `sinks`
///
/// # Errors
///
/// Returns `Error::UnknownTracker` for unregistered names
pub fn create_tracker(kind: &str, config: SharedConfig, sinks: SinkFactory) -> Result<Box<dyn Tracker>> {
    match kind.to_lowercase().as_str() {
        "aruco" | "marker" => Ok(Box::new(ArucoTracker::with_parts(config, Box::new(open_device), sinks))),
        _ => Err(Error::UnknownTracker(format!(
            "{kind} (available: {})",
            TRACKER_KINDS.join(", ")
        ))),
    }
}
