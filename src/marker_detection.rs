//! Square fiducial detection with a region-of-interest fast path.
//!
//! The detector looks for exactly one dark convex quadrilateral whose
//! perimeter falls within configurable bounds. Bounds are fractions of the
//! searched image's longer side, so searching a small region requires the
//! bounds to be rescaled to keep the same absolute marker size window.
//!
//! Corners come back in a canonical order anchored on the on-screen top-left
//! corner. The marker is a plain square, so on first acquisition a roll
//! beyond ±45° is indistinguishable from one 90° the other way; after that
//! the tracking pipeline keeps the order continuous with
//! [`MarkerObservation::aligned_to`].

use crate::{
    constants::{
        BORDER_MARGIN, MARKER_SIZE_MAX, MARKER_SIZE_MIN, MIN_CORNER_DISTANCE_SQ, POLY_APPROX_EPSILON,
        ROI_SIZE_BOUND_CEIL, ROI_SIZE_BOUND_FLOOR,
    },
    roi::Roi,
    Result,
};
use opencv::{
    core::{Mat, Point, Point2f, Rect, Vector},
    imgproc,
    prelude::*,
};
use std::cmp::Ordering;

/// Four marker corners in canonical order: bottom-left, top-left,
/// top-right, bottom-right
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerObservation {
    corners: [Point2f; 4],
}

impl MarkerObservation {
    /// Wrap corners that are already in canonical order
    #[must_use]
    pub fn new(corners: [Point2f; 4]) -> Self {
        Self { corners }
    }

    /// Corner points
    #[must_use]
    pub fn corners(&self) -> &[Point2f; 4] {
        &self.corners
    }

    /// Shift every corner by `(dx, dy)`
    #[must_use]
    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self {
            corners: self.corners.map(|p| Point2f::new(p.x + dx, p.y + dy)),
        }
    }

    /// The same corners cyclically relabelled to sit closest to `previous`.
    ///
    /// A plain square has no preferred corner, so the canonical order flips
    /// by one corner whenever roll crosses ±45°. Matching against the last
    /// tracked frame keeps the labelling, and so the reported roll,
    /// continuous while the marker stays tracked.
    #[must_use]
    pub fn aligned_to(&self, previous: &Self) -> Self {
        let cost = |shift: usize| -> f32 {
            (0..4)
                .map(|i| {
                    let (a, b) = (self.corners[(i + shift) % 4], previous.corners[i]);
                    (a.x - b.x).powi(2) + (a.y - b.y).powi(2)
                })
                .sum()
        };
        let best = (0..4)
            .min_by(|&a, &b| cost(a).partial_cmp(&cost(b)).unwrap_or(Ordering::Equal))
            .unwrap_or(0);

        let mut corners = self.corners;
        corners.rotate_left(best);
        Self { corners }
    }

    /// Enclosed area in square pixels (zero for collapsed or collinear
    /// corners)
    #[must_use]
    pub fn area(&self) -> f32 {
        let c = &self.corners;
        let twice: f32 = (0..4)
            .map(|i| {
                let (a, b) = (c[i], c[(i + 1) % 4]);
                a.x * b.y - b.x * a.y
            })
            .sum();
        twice.abs() / 2.0
    }

    /// Mean of the four corners
    #[must_use]
    pub fn centroid(&self) -> Point2f {
        let sum = self.corners.iter().fold((0.0, 0.0), |acc, p| (acc.0 + p.x, acc.1 + p.y));
        Point2f::new(sum.0 / 4.0, sum.1 / 4.0)
    }
}

/// Accepted marker perimeter range as fractions of `4 × longest side`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeBounds {
    pub min: f64,
    pub max: f64,
}

impl SizeBounds {
    /// Rescale bounds expressed for the whole frame to a region of
    /// `region_width` pixels, clamping each into `[0.01, 1.0]`
    #[must_use]
    pub fn scaled_to_region(self, frame_width: i32, region_width: i32) -> Self {
        let scale = f64::from(frame_width) / f64::from(region_width.max(1));
        Self {
            min: (self.min * scale).clamp(ROI_SIZE_BOUND_FLOOR, ROI_SIZE_BOUND_CEIL),
            max: (self.max * scale).clamp(ROI_SIZE_BOUND_FLOOR, ROI_SIZE_BOUND_CEIL),
        }
    }
}

impl Default for SizeBounds {
    fn default() -> Self {
        Self {
            min: MARKER_SIZE_MIN,
            max: MARKER_SIZE_MAX,
        }
    }
}

/// Which search found the marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPath {
    /// Restricted to the predicted region
    Region,
    /// Whole frame
    FullFrame,
}

/// A successful detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub observation: MarkerObservation,
    pub path: SearchPath,
}

/// Single-marker detector
#[derive(Debug, Clone, Default)]
pub struct MarkerDetector {
    bounds: SizeBounds,
}

impl MarkerDetector {
    /// Create a detector with custom full-frame size bounds
    #[must_use]
    pub fn new(bounds: SizeBounds) -> Self {
        Self { bounds }
    }

    /// Full-frame size bounds
    #[must_use]
    pub fn bounds(&self) -> SizeBounds {
        self.bounds
    }

    /// Search the predicted region first, then fall back to the whole frame
    ///
    /// # Errors
    ///
    /// Returns an error if an `OpenCV` operation fails
    pub fn detect(&self, gray: &Mat, roi: &Roi) -> Result<Option<Detection>> {
        if let Roi::Region(region) = roi {
            if let Some(observation) = self.detect_in_region(gray, *region)? {
                return Ok(Some(Detection {
                    observation,
                    path: SearchPath::Region,
                }));
            }
        }

        Ok(self.detect_full_frame(gray)?.map(|observation| Detection {
            observation,
            path: SearchPath::FullFrame,
        }))
    }

    /// Search only inside `region`; corners are returned in frame coordinates.
    ///
    /// Regions that are degenerate or no longer fit the frame yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if an `OpenCV` operation fails
    #[allow(clippy::cast_precision_loss)] // pixel offsets
    pub fn detect_in_region(&self, gray: &Mat, region: Rect) -> Result<Option<MarkerObservation>> {
        if region.width <= 1 || region.height <= 1 {
            return Ok(None);
        }
        if region.x < 0
            || region.y < 0
            || region.x + region.width > gray.cols()
            || region.y + region.height > gray.rows()
        {
            return Ok(None);
        }

        let crop = Mat::roi(gray, region)?.try_clone()?;
        let bounds = self.bounds.scaled_to_region(gray.cols(), region.width);

        Ok(self
            .find_single(&crop, bounds)?
            .map(|observation| observation.translated(region.x as f32, region.y as f32)))
    }

    /// Search the whole frame with the fixed bounds
    ///
    /// # Errors
    ///
    /// Returns an error if an `OpenCV` operation fails
    pub fn detect_full_frame(&self, gray: &Mat) -> Result<Option<MarkerObservation>> {
        self.find_single(gray, self.bounds)
    }

    /// Succeeds only when exactly one candidate survives
    fn find_single(&self, image: &Mat, bounds: SizeBounds) -> Result<Option<MarkerObservation>> {
        let mut candidates = self.find_candidates(image, bounds)?;
        if candidates.len() == 1 {
            Ok(candidates.pop())
        } else {
            Ok(None)
        }
    }

    /// All quadrilaterals in `image` that pass the size and shape checks
    ///
    /// # Errors
    ///
    /// Returns an error if an `OpenCV` operation fails
    #[allow(clippy::cast_precision_loss)] // pixel coordinates
    pub fn find_candidates(&self, image: &Mat, bounds: SizeBounds) -> Result<Vec<MarkerObservation>> {
        let mut binary = Mat::default();
        imgproc::threshold(
            image,
            &mut binary,
            0.0,
            255.0,
            imgproc::THRESH_BINARY_INV | imgproc::THRESH_OTSU,
        )?;

        let mut contours = Vector::<Vector<Point>>::new();
        imgproc::find_contours(
            &binary,
            &mut contours,
            imgproc::RETR_EXTERNAL,
            imgproc::CHAIN_APPROX_NONE,
            Point::new(0, 0),
        )?;

        let longest_side = f64::from(image.cols().max(image.rows()));
        let min_perimeter = 4.0 * bounds.min * longest_side;
        let max_perimeter = 4.0 * bounds.max * longest_side;

        let mut candidates = Vec::new();
        for contour in contours.iter() {
            let perimeter = imgproc::arc_length(&contour, true)?;
            if perimeter < min_perimeter || perimeter > max_perimeter {
                continue;
            }

            let mut approx = Vector::<Point>::new();
            imgproc::approx_poly_dp(&contour, &mut approx, perimeter * POLY_APPROX_EPSILON, true)?;
            if approx.len() != 4 || !imgproc::is_contour_convex(&approx)? {
                continue;
            }

            let mut corners = [Point2f::default(); 4];
            for (corner, point) in corners.iter_mut().zip(approx.iter()) {
                *corner = Point2f::new(point.x as f32, point.y as f32);
            }

            if !is_well_formed(&corners, image.cols() as f32, image.rows() as f32) {
                continue;
            }

            candidates.push(MarkerObservation::new(canonical_order(corners)));
        }

        Ok(candidates)
    }
}

/// Reject slivers and quads touching the image edge (likely clipped)
fn is_well_formed(corners: &[Point2f; 4], width: f32, height: f32) -> bool {
    let sides_ok = (0..4).all(|i| {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        let (dx, dy) = (a.x - b.x, a.y - b.y);
        dx * dx + dy * dy >= MIN_CORNER_DISTANCE_SQ
    });

    let inside = corners.iter().all(|p| {
        p.x >= BORDER_MARGIN
            && p.y >= BORDER_MARGIN
            && p.x <= width - 1.0 - BORDER_MARGIN
            && p.y <= height - 1.0 - BORDER_MARGIN
    });

    sides_ok && inside
}

/// Sort corners clockwise on screen from the top-left one, then rotate into
/// model order (bottom-left first)
fn canonical_order(mut corners: [Point2f; 4]) -> [Point2f; 4] {
    let cx = corners.iter().map(|p| p.x).sum::<f32>() / 4.0;
    let cy = corners.iter().map(|p| p.y).sum::<f32>() / 4.0;
    let angle = |p: &Point2f| (p.y - cy).atan2(p.x - cx);

    corners.sort_by(|a, b| angle(a).partial_cmp(&angle(b)).unwrap_or(Ordering::Equal));

    let top_left = (0..4)
        .min_by(|&i, &j| {
            (corners[i].x + corners[i].y)
                .partial_cmp(&(corners[j].x + corners[j].y))
                .unwrap_or(Ordering::Equal)
        })
        .unwrap_or(0);
    corners.rotate_left(top_left);

    // [TL, TR, BR, BL] -> [BL, TL, TR, BR]
    [corners[3], corners[0], corners[1], corners[2]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC1};

    fn white_image(width: i32, height: i32) -> Mat {
        Mat::new_rows_cols_with_default(height, width, CV_8UC1, Scalar::all(255.0)).unwrap()
    }

    fn draw_quad(image: &mut Mat, corners: [(i32, i32); 4]) {
        let points = Vector::<Point>::from_slice(&corners.map(|(x, y)| Point::new(x, y)));
        imgproc::fill_convex_poly(image, &points, Scalar::all(0.0), imgproc::LINE_8, 0).unwrap();
    }

    fn square(x: i32, y: i32, side: i32) -> [(i32, i32); 4] {
        [(x, y), (x + side, y), (x + side, y + side), (x, y + side)]
    }

    fn assert_near(a: Point2f, b: (f32, f32)) {
        assert!((a.x - b.0).abs() <= 2.0 && (a.y - b.1).abs() <= 2.0, "{a:?} vs {b:?}");
    }

    #[test]
    fn test_full_frame_finds_square_in_model_order() {
        let mut image = white_image(640, 480);
        draw_quad(&mut image, square(200, 150, 100));

        let observation = MarkerDetector::default().detect_full_frame(&image).unwrap().unwrap();
        let c = observation.corners();
        assert_near(c[0], (200.0, 250.0));
        assert_near(c[1], (200.0, 150.0));
        assert_near(c[2], (300.0, 150.0));
        assert_near(c[3], (300.0, 250.0));
        assert_near(observation.centroid(), (250.0, 200.0));
    }

    #[test]
    fn test_two_markers_are_ambiguous() {
        let mut image = white_image(640, 480);
        draw_quad(&mut image, square(50, 50, 100));
        draw_quad(&mut image, square(400, 250, 100));

        let detector = MarkerDetector::default();
        assert_eq!(detector.find_candidates(&image, detector.bounds()).unwrap().len(), 2);
        assert!(detector.detect_full_frame(&image).unwrap().is_none());
    }

    #[test]
    fn test_size_bounds_reject_small_and_large() {
        let detector = MarkerDetector::default();

        let mut small = white_image(640, 480);
        draw_quad(&mut small, square(300, 200, 20));
        assert!(detector.detect_full_frame(&small).unwrap().is_none());

        let mut large = white_image(640, 480);
        draw_quad(&mut large, square(100, 50, 300));
        assert!(detector.detect_full_frame(&large).unwrap().is_none());
    }

    #[test]
    fn test_blank_frame_has_no_marker() {
        let image = white_image(640, 480);
        assert!(MarkerDetector::default().detect_full_frame(&image).unwrap().is_none());
    }

    #[test]
    fn test_marker_touching_edge_is_rejected() {
        let mut image = white_image(640, 480);
        draw_quad(&mut image, square(0, 100, 100));
        assert!(MarkerDetector::default().detect_full_frame(&image).unwrap().is_none());
    }

    #[test]
    fn test_scaled_bounds_are_clamped() {
        let bounds = SizeBounds::default();

        let tight = bounds.scaled_to_region(640, 64);
        assert!((tight.min - 0.5).abs() < 1e-12);
        assert_eq!(tight.max, 1.0);

        let loose = SizeBounds { min: 0.001, max: 0.002 }.scaled_to_region(640, 640);
        assert_eq!(loose.min, 0.01);
        assert_eq!(loose.max, 0.01);
    }

    #[test]
    fn test_region_detection_matches_crop() {
        let mut image = white_image(640, 480);
        draw_quad(&mut image, square(260, 180, 120));
        let region = Rect::new(230, 150, 180, 180);

        let detector = MarkerDetector::default();
        let in_region = detector.detect_in_region(&image, region).unwrap().unwrap();

        let crop = Mat::roi(&image, region).unwrap().try_clone().unwrap();
        let bounds = detector.bounds().scaled_to_region(image.cols(), region.width);
        let candidates = detector.find_candidates(&crop, bounds).unwrap();
        assert_eq!(candidates.len(), 1);

        let expected = candidates[0].translated(region.x as f32, region.y as f32);
        assert_eq!(in_region, expected);

        let full = detector.detect_full_frame(&image).unwrap().unwrap();
        for (a, b) in in_region.corners().iter().zip(full.corners()) {
            assert!((a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3);
        }
    }

    #[test]
    fn test_detect_falls_back_to_full_frame() {
        let mut image = white_image(640, 480);
        draw_quad(&mut image, square(400, 300, 100));

        let detector = MarkerDetector::default();
        let stale = Roi::Region(Rect::new(10, 10, 150, 150));
        let detection = detector.detect(&image, &stale).unwrap().unwrap();
        assert_eq!(detection.path, SearchPath::FullFrame);

        let fresh = Roi::Region(Rect::new(370, 270, 160, 160));
        let detection = detector.detect(&image, &fresh).unwrap().unwrap();
        assert_eq!(detection.path, SearchPath::Region);
    }

    #[test]
    fn test_degenerate_region_is_skipped() {
        let mut image = white_image(640, 480);
        draw_quad(&mut image, square(200, 150, 100));
        let detector = MarkerDetector::default();
        assert!(detector.detect_in_region(&image, Rect::new(0, 0, 1, 1)).unwrap().is_none());
        assert!(detector.detect_in_region(&image, Rect::new(600, 400, 100, 100)).unwrap().is_none());
    }

    #[test]
    fn test_canonical_order_from_any_rotation() {
        let tl = Point2f::new(10.0, 10.0);
        let tr = Point2f::new(50.0, 12.0);
        let br = Point2f::new(48.0, 52.0);
        let bl = Point2f::new(8.0, 50.0);
        let expected = [bl, tl, tr, br];
        assert_eq!(canonical_order([br, bl, tl, tr]), expected);
        assert_eq!(canonical_order([tl, bl, br, tr]), expected);
    }

    /// Square of half-diagonal 50 around (100, 100), in model order, rolled
    /// by `degrees` on screen
    fn rolled_square(degrees: f32) -> [Point2f; 4] {
        [135.0f32, 225.0, 315.0, 45.0].map(|a| {
            let angle = (a + degrees).to_radians();
            Point2f::new(100.0 + 50.0 * angle.cos(), 100.0 + 50.0 * angle.sin())
        })
    }

    #[test]
    fn test_alignment_keeps_labels_across_45_degrees() {
        let previous = MarkerObservation::new(rolled_square(40.0));
        let truth = rolled_square(50.0);

        // past 45° the top-left anchor moves to the next corner
        let canonical = MarkerObservation::new(canonical_order(truth));
        assert_ne!(canonical.corners(), &truth);

        assert_eq!(canonical.aligned_to(&previous).corners(), &truth);
        assert_eq!(previous.aligned_to(&previous), previous);
    }

    #[test]
    fn test_area() {
        let square = MarkerObservation::new([
            Point2f::new(0.0, 10.0),
            Point2f::new(0.0, 0.0),
            Point2f::new(10.0, 0.0),
            Point2f::new(10.0, 10.0),
        ]);
        assert!((square.area() - 100.0).abs() < 1e-4);
        assert_eq!(MarkerObservation::new([Point2f::new(3.0, 4.0); 4]).area(), 0.0);
    }
}
