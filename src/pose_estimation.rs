//! Marker pose recovery using the `PnP` algorithm.

use crate::{
    constants::{MARKER_HALF_EXTENT, MIN_CORNER_DISTANCE_SQ, TRANSLATION_SCALE},
    marker_detection::MarkerObservation,
    pose_state::PoseChannels,
    Result,
};
use log::debug;
use nalgebra::{Matrix3, Vector3};
use opencv::{
    calib3d,
    core::{Mat, Point2f, Point3f, Size, Vec3d, Vector, CV_64F},
    prelude::*,
};

/// Pinhole intrinsics for one frame
///
/// Focal lengths come from the diagonal field of view split by the frame's
/// aspect ratio; the principal point is the frame centre. Rebuilt every
/// iteration because the device may change frame size.
#[derive(Debug)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    camera_matrix: Mat,
    dist_coeffs: Mat,
}

impl CameraIntrinsics {
    /// Derive intrinsics from a diagonal field of view in degrees
    ///
    /// # Errors
    ///
    /// Returns an error if `OpenCV` matrix construction fails
    pub fn from_diagonal_fov(diagonal_fov_degrees: f64, frame_size: Size) -> Result<Self> {
        let w = f64::from(frame_size.width);
        let h = f64::from(frame_size.height);
        let half_diag_tan = (diagonal_fov_degrees.to_radians() / 2.0).tan();

        let fov_w = 2.0 * (half_diag_tan / (1.0 + (h / w) * (h / w)).sqrt()).atan();
        let fov_h = 2.0 * (half_diag_tan / (1.0 + (w / h) * (w / h)).sqrt()).atan();

        Self::new(0.5 * w / (0.5 * fov_w).tan(), 0.5 * h / (0.5 * fov_h).tan(), w / 2.0, h / 2.0)
    }

    /// Build intrinsics from explicit parameters
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self> {
        let camera_matrix = Mat::from_slice_2d(&[[fx, 0.0, cx], [0.0, fy, cy], [0.0, 0.0, 1.0]])?;
        // no lens distortion model
        let dist_coeffs = Mat::zeros(4, 1, CV_64F)?.to_mat()?;

        Ok(Self {
            fx,
            fy,
            cx,
            cy,
            camera_matrix,
            dist_coeffs,
        })
    }

    /// 3×3 camera matrix
    #[must_use]
    pub fn camera_matrix(&self) -> &Mat {
        &self.camera_matrix
    }

    /// Distortion coefficients (all zero)
    #[must_use]
    pub fn dist_coeffs(&self) -> &Mat {
        &self.dist_coeffs
    }
}

/// The marker square in head coordinates.
///
/// Index order matches `MarkerObservation` corner order:
/// 0 = (−s, +s), 1 = (−s, −s), 2 = (+s, −s), 3 = (+s, +s), each shifted by
/// the head offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectModel {
    offset: Point3f,
    points: [Point3f; 4],
}

impl ObjectModel {
    /// Model of the standard marker shifted by a head offset
    #[must_use]
    pub fn new(head_offset: [f64; 3]) -> Self {
        Self::with_half_extent(MARKER_HALF_EXTENT, head_offset)
    }

    /// Model of a marker with a custom half edge length
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // model coordinates are small
    pub fn with_half_extent(half_extent: f32, head_offset: [f64; 3]) -> Self {
        let offset = Point3f::new(head_offset[0] as f32, head_offset[1] as f32, head_offset[2] as f32);
        let s = half_extent;
        let corner = |x: f32, y: f32| Point3f::new(x + offset.x, y + offset.y, offset.z);

        Self {
            offset,
            points: [corner(-s, s), corner(-s, -s), corner(s, -s), corner(s, s)],
        }
    }

    /// Model corners
    #[must_use]
    pub fn points(&self) -> &[Point3f; 4] {
        &self.points
    }

    /// Corners with the head offset removed and scaled by `multiplier`
    #[must_use]
    pub fn search_window(&self, multiplier: f32) -> [Point3f; 4] {
        self.points.map(|p| {
            Point3f::new(
                (p.x - self.offset.x) * multiplier,
                (p.y - self.offset.y) * multiplier,
                (p.z - self.offset.z) * multiplier,
            )
        })
    }
}

/// A solved marker pose
#[derive(Debug, Clone, Copy)]
pub struct Pose {
    /// Rodrigues rotation vector
    pub rvec: Vec3d,
    /// Camera-frame translation in model units
    pub tvec: Vec3d,
    /// Rotation matrix
    pub rotation: Matrix3<f64>,
    /// RQ-decomposed angles in degrees, about x, y and z
    pub euler: [f64; 3],
}

impl Pose {
    /// Build a pose from a rotation vector and translation
    ///
    /// # Errors
    ///
    /// Returns an error if the Rodrigues conversion or RQ decomposition fails
    pub fn from_vectors(rvec: Vec3d, tvec: Vec3d) -> Result<Self> {
        let mut rotation_mat = Mat::default();
        calib3d::rodrigues(&rvec, &mut rotation_mat, &mut Mat::default())?;

        let euler = calib3d::rq_decomp3x3(
            &rotation_mat,
            &mut Mat::default(),
            &mut Mat::default(),
            &mut Mat::default(),
            &mut Mat::default(),
            &mut Mat::default(),
        )?;

        let mut rotation = Matrix3::zeros();
        for row in 0..3 {
            for col in 0..3 {
                rotation[(row, col)] = *rotation_mat.at_2d::<f64>(row as i32, col as i32)?;
            }
        }

        Ok(Self {
            rvec,
            tvec,
            rotation,
            euler: [euler[0], euler[1], euler[2]],
        })
    }

    /// Camera-frame translation
    #[must_use]
    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.tvec[0], self.tvec[1], self.tvec[2])
    }

    /// Publication channels: axes remapped to yaw/pitch/roll, y flipped and
    /// translation scaled to output units
    #[must_use]
    pub fn channels(&self) -> PoseChannels {
        PoseChannels {
            yaw: self.euler[1],
            pitch: -self.euler[0],
            roll: self.euler[2],
            tx: self.tvec[0] * TRANSLATION_SCALE,
            ty: -self.tvec[1] * TRANSLATION_SCALE,
            tz: self.tvec[2] * TRANSLATION_SCALE,
        }
    }

    fn is_finite(&self) -> bool {
        (0..3).all(|i| self.rvec[i].is_finite() && self.tvec[i].is_finite())
    }
}

/// Recovers a marker pose from four observed corners
pub trait PoseEstimator: std::fmt::Debug + Send {
    /// Solve for the pose, or `Ok(None)` when no pose can be recovered.
    ///
    /// Callers treat `Ok(None)` exactly like a missed detection.
    ///
    /// # Errors
    ///
    /// Returns an error if a post-solve conversion fails
    fn solve(
        &self,
        observation: &MarkerObservation,
        model: &ObjectModel,
        intrinsics: &CameraIntrinsics,
    ) -> Result<Option<Pose>>;
}

/// Iterative `PnP` solver for the four marker corners
#[derive(Debug, Default, Clone, Copy)]
pub struct PoseSolver;

impl PoseEstimator for PoseSolver {
    /// Returns `Ok(None)` for a degenerate quad, or when `solvePnP` fails,
    /// reports no solution, or yields non-finite vectors.
    fn solve(
        &self,
        observation: &MarkerObservation,
        model: &ObjectModel,
        intrinsics: &CameraIntrinsics,
    ) -> Result<Option<Pose>> {
        let area = observation.area();
        if !area.is_finite() || area < MIN_CORNER_DISTANCE_SQ {
            debug!("Degenerate marker quad (area {area})");
            return Ok(None);
        }

        let object_points = Vector::<Point3f>::from_slice(model.points());
        let image_points = Vector::<Point2f>::from_slice(observation.corners());

        let mut rvec = Mat::default();
        let mut tvec = Mat::default();

        let converged = match calib3d::solve_pnp(
            &object_points,
            &image_points,
            intrinsics.camera_matrix(),
            intrinsics.dist_coeffs(),
            &mut rvec,
            &mut tvec,
            false,
            calib3d::SOLVEPNP_ITERATIVE,
        ) {
            Ok(converged) => converged,
            Err(e) => {
                debug!("solvePnP failed: {e}");
                false
            }
        };
        if !converged {
            return Ok(None);
        }

        let pose = Pose::from_vectors(read_vec3(&rvec)?, read_vec3(&tvec)?)?;
        if !pose.is_finite() {
            debug!("solvePnP produced a non-finite pose");
            return Ok(None);
        }

        Ok(Some(pose))
    }
}

/// Project model-space points into the image through a pose
///
/// # Errors
///
/// Returns an error if the `OpenCV` projection fails
pub fn project_points(points: &[Point3f], pose: &Pose, intrinsics: &CameraIntrinsics) -> Result<Vec<Point2f>> {
    let object_points = Vector::<Point3f>::from_slice(points);
    let mut image_points = Vector::<Point2f>::new();

    calib3d::project_points(
        &object_points,
        &pose.rvec,
        &pose.tvec,
        intrinsics.camera_matrix(),
        intrinsics.dist_coeffs(),
        &mut image_points,
        &mut Mat::default(),
        0.0,
    )?;

    Ok(image_points.to_vec())
}

fn read_vec3(mat: &Mat) -> Result<Vec3d> {
    Ok(Vec3d::from([
        *mat.at_2d::<f64>(0, 0)?,
        *mat.at_2d::<f64>(1, 0)?,
        *mat.at_2d::<f64>(2, 0)?,
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_pose() -> Pose {
        Pose::from_vectors(Vec3d::from([0.0, 0.0, 0.0]), Vec3d::from([0.0, 0.0, 0.0])).unwrap()
    }

    #[test]
    fn test_square_frame_intrinsics() {
        let intrinsics = CameraIntrinsics::from_diagonal_fov(60.0, Size::new(400, 400)).unwrap();
        assert!((intrinsics.fx - intrinsics.fy).abs() < 1e-9);
        assert_eq!(intrinsics.cx, 200.0);
        assert_eq!(intrinsics.cy, 200.0);

        // each axis sees atan(tan(30°) / sqrt(2)) either side of centre
        let half_fov = (30f64.to_radians().tan() / 2f64.sqrt()).atan();
        assert!((intrinsics.fx - 200.0 / half_fov.tan()).abs() < 1e-6);
    }

    #[test]
    fn test_wide_frame_intrinsics_share_pixel_aspect() {
        let intrinsics = CameraIntrinsics::from_diagonal_fov(56.0, Size::new(640, 480)).unwrap();
        // square pixels: the diagonal split keeps fx == fy
        assert!((intrinsics.fx - intrinsics.fy).abs() < 1e-6);
        assert_eq!(intrinsics.cx, 320.0);
        assert_eq!(intrinsics.cy, 240.0);
    }

    #[test]
    fn test_model_corner_order() {
        let model = ObjectModel::new([1.0, 2.0, 3.0]);
        let p = model.points();
        assert_eq!(p[0], Point3f::new(-39.0, 42.0, 3.0));
        assert_eq!(p[1], Point3f::new(-39.0, -38.0, 3.0));
        assert_eq!(p[2], Point3f::new(41.0, -38.0, 3.0));
        assert_eq!(p[3], Point3f::new(41.0, 42.0, 3.0));
    }

    #[test]
    fn test_search_window_removes_offset() {
        let model = ObjectModel::new([10.0, -5.0, 100.0]);
        let window = model.search_window(2.0);
        assert_eq!(window[1], Point3f::new(-80.0, -80.0, 0.0));
        assert_eq!(window[3], Point3f::new(80.0, 80.0, 0.0));
    }

    #[test]
    fn test_identity_projection_is_symmetric() {
        let intrinsics = CameraIntrinsics::from_diagonal_fov(56.0, Size::new(480, 480)).unwrap();
        let model = ObjectModel::new([0.0, 0.0, 500.0]);
        let projected = project_points(model.points(), &identity_pose(), &intrinsics).unwrap();

        let (cx, cy) = (intrinsics.cx as f32, intrinsics.cy as f32);
        // opposite corners mirror through the principal point
        for (a, b) in [(0, 2), (1, 3)] {
            assert!((projected[a].x + projected[b].x - 2.0 * cx).abs() < 1e-3);
            assert!((projected[a].y + projected[b].y - 2.0 * cy).abs() < 1e-3);
        }
        // and the square stays square
        let width = projected[2].x - projected[1].x;
        let height = projected[0].y - projected[1].y;
        assert!((width - height).abs() < 1e-3);
    }

    #[test]
    fn test_identity_pose_channels_are_zero() {
        let channels = identity_pose().channels();
        assert!(channels.yaw.abs() < 1e-9);
        assert!(channels.pitch.abs() < 1e-9);
        assert!(channels.roll.abs() < 1e-9);
    }

    #[test]
    fn test_channels_sign_and_scale() {
        let pose = Pose::from_vectors(Vec3d::from([0.0, 0.0, 0.0]), Vec3d::from([10.0, 20.0, 300.0])).unwrap();
        let channels = pose.channels();
        assert!((channels.tx - 1.0).abs() < 1e-9);
        assert!((channels.ty + 2.0).abs() < 1e-9);
        assert!((channels.tz - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_yaw_maps_to_y_rotation() {
        let pose = Pose::from_vectors(Vec3d::from([0.0, 0.3, 0.0]), Vec3d::from([0.0, 0.0, 400.0])).unwrap();
        let channels = pose.channels();
        assert!((channels.yaw - 0.3f64.to_degrees()).abs() < 1e-6);
        assert!(channels.pitch.abs() < 1e-6);

        let pose = Pose::from_vectors(Vec3d::from([0.2, 0.0, 0.0]), Vec3d::from([0.0, 0.0, 400.0])).unwrap();
        assert!((pose.channels().pitch + 0.2f64.to_degrees()).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_quads_do_not_converge() {
        let intrinsics = CameraIntrinsics::from_diagonal_fov(56.0, Size::new(640, 480)).unwrap();
        let model = ObjectModel::new([0.0, 0.0, 0.0]);

        let collapsed = MarkerObservation::new([Point2f::new(320.0, 240.0); 4]);
        assert!(PoseSolver.solve(&collapsed, &model, &intrinsics).unwrap().is_none());

        let collinear = MarkerObservation::new([
            Point2f::new(100.0, 100.0),
            Point2f::new(150.0, 150.0),
            Point2f::new(200.0, 200.0),
            Point2f::new(250.0, 250.0),
        ]);
        assert!(PoseSolver.solve(&collinear, &model, &intrinsics).unwrap().is_none());

        let broken = MarkerObservation::new([
            Point2f::new(f32::NAN, 100.0),
            Point2f::new(100.0, 50.0),
            Point2f::new(200.0, 50.0),
            Point2f::new(200.0, 100.0),
        ]);
        assert!(PoseSolver.solve(&broken, &model, &intrinsics).unwrap().is_none());
    }

    #[test]
    fn test_solve_recovers_projected_pose() {
        let intrinsics = CameraIntrinsics::from_diagonal_fov(56.0, Size::new(640, 480)).unwrap();
        let model = ObjectModel::new([0.0, 0.0, 0.0]);
        let truth = Pose::from_vectors(Vec3d::from([0.1, -0.25, 0.05]), Vec3d::from([15.0, -10.0, 450.0])).unwrap();

        let projected = project_points(model.points(), &truth, &intrinsics).unwrap();
        let observation = MarkerObservation::new([projected[0], projected[1], projected[2], projected[3]]);

        let pose = PoseSolver.solve(&observation, &model, &intrinsics).unwrap().unwrap();
        for i in 0..3 {
            assert!((pose.rvec[i] - truth.rvec[i]).abs() < 1e-3, "rvec[{i}]");
            assert!((pose.tvec[i] - truth.tvec[i]).abs() < 0.5, "tvec[{i}]");
        }
        assert!((pose.rotation.determinant() - 1.0).abs() < 1e-6);
    }
}
