//! Next-frame search region prediction.

use crate::{
    constants::SEARCH_WINDOW_MULTIPLIER,
    pose_estimation::{project_points, CameraIntrinsics, ObjectModel, Pose},
    Result,
};
use opencv::core::{Point2f, Rect, Size};

/// Where the detector should look on the next frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Roi {
    /// No prior: search the full frame
    #[default]
    Unset,
    /// Search inside this rectangle first
    Region(Rect),
}

impl Roi {
    /// Whether a region is available
    #[must_use]
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Region(_))
    }

    /// The rectangle, if any
    #[must_use]
    pub fn region(&self) -> Option<Rect> {
        match self {
            Self::Unset => None,
            Self::Region(rect) => Some(*rect),
        }
    }

    /// Bounding box of projected points clamped into the frame.
    ///
    /// The result always satisfies `x, y >= 0`,
    /// `1 <= width <= frame_width - 1`, `1 <= height <= frame_height - 1`
    /// and lies inside the frame. Frames smaller than 2 px on a side, or
    /// non-finite projections, give `Roi::Unset`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // pixel coordinates
    pub fn from_projection(points: &[Point2f], frame_size: Size) -> Self {
        if points.is_empty() || frame_size.width < 2 || frame_size.height < 2 {
            return Self::Unset;
        }
        if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Self::Unset;
        }

        let (mut min_x, mut min_y) = (i32::MAX, i32::MAX);
        let (mut max_x, mut max_y) = (i32::MIN, i32::MIN);
        for p in points {
            min_x = min_x.min(p.x as i32);
            min_y = min_y.min(p.y as i32);
            max_x = max_x.max(p.x as i32);
            max_y = max_y.max(p.y as i32);
        }

        let (x0, x1) = clamp_span(min_x, max_x, frame_size.width);
        let (y0, y1) = clamp_span(min_y, max_y, frame_size.height);

        Self::Region(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }
}

/// Clip the near edge to `[0, dim - 2]`, then the far edge to
/// `[near + 1, dim - 1]`
fn clamp_span(min: i32, max: i32, dim: i32) -> (i32, i32) {
    let near = min.clamp(0, dim - 2);
    let far = max.clamp(near + 1, dim - 1);
    (near, far)
}

/// Predicts the next search region from the current pose
#[derive(Debug, Clone, Copy)]
pub struct RoiPredictor {
    search_window: f32,
}

impl RoiPredictor {
    /// Create a predictor that inflates the marker footprint by `search_window`
    #[must_use]
    pub fn new(search_window: f32) -> Self {
        Self { search_window }
    }

    /// Project the inflated marker through `pose` and bound it
    ///
    /// # Errors
    ///
    /// Returns an error if the `OpenCV` projection fails
    pub fn predict(
        &self,
        model: &ObjectModel,
        pose: &Pose,
        intrinsics: &CameraIntrinsics,
        frame_size: Size,
    ) -> Result<Roi> {
        let window = model.search_window(self.search_window);
        let projected = project_points(&window, pose, intrinsics)?;
        Ok(Roi::from_projection(&projected, frame_size))
    }
}

impl Default for RoiPredictor {
    fn default() -> Self {
        Self::new(SEARCH_WINDOW_MULTIPLIER)
    }
}
