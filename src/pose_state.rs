//! Latest-value pose publication shared between the worker and readers.

use nalgebra::{Matrix3, Vector3};
use parking_lot::Mutex;

/// The six published channels: angles in degrees, translation in output units
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoseChannels {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
}

impl PoseChannels {
    /// Channels in publication order
    #[must_use]
    pub fn as_array(&self) -> [f64; 6] {
        [self.yaw, self.pitch, self.roll, self.tx, self.ty, self.tz]
    }
}

/// Camera-frame rotation and translation as solved, before any remapping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

#[derive(Debug, Default)]
struct Published {
    channels: PoseChannels,
    raw: Option<RawPose>,
    sequence: u64,
}

/// Mutex-protected latest pose.
///
/// Writers and readers only copy values in or out while holding the lock;
/// no reference to the stored pose ever escapes. Every publication gets the
/// next sequence number, starting at 1.
#[derive(Debug, Default)]
pub struct SharedPoseState {
    inner: Mutex<Published>,
}

impl SharedPoseState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published pose
    pub fn publish(&self, channels: PoseChannels, raw: RawPose) {
        let mut inner = self.inner.lock();
        inner.channels = channels;
        inner.raw = Some(raw);
        inner.sequence += 1;
    }

    /// Back to zeros with no raw pose. The sequence keeps counting, so
    /// poses published before the reset stay distinguishable.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.channels = PoseChannels::default();
        inner.raw = None;
    }

    /// Sequence number of the latest publication (0 before the first)
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.inner.lock().sequence
    }

    /// Copy of the latest channels (zeros before the first publication)
    #[must_use]
    pub fn channels(&self) -> PoseChannels {
        self.inner.lock().channels
    }

    /// Copy of the latest camera-frame pose
    #[must_use]
    pub fn raw_pose(&self) -> Option<RawPose> {
        self.inner.lock().raw
    }

    /// Latest camera-frame pose together with its sequence number, read
    /// under one lock
    #[must_use]
    pub fn raw_snapshot(&self) -> Option<(u64, RawPose)> {
        let inner = self.inner.lock();
        inner.raw.map(|raw| (inner.sequence, raw))
    }
}
