//! Diagnostic overlay and frame output.

use crate::{marker_detection::MarkerObservation, Result};
use log::info;
use opencv::{
    core::{Mat, Point, Point2f, Scalar, Vector},
    highgui::{self, WINDOW_NORMAL},
    imgproc::{self, FONT_HERSHEY_PLAIN, LINE_8},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Draw the marker outline, the projected head centre and the loop rate
///
/// # Errors
///
/// Returns an error if an `OpenCV` drawing call fails
#[allow(clippy::cast_possible_truncation)] // pixel coordinates
pub fn annotate(
    frame: &mut Mat,
    observation: Option<&MarkerObservation>,
    centre: Option<Point2f>,
    fps: f64,
) -> Result<()> {
    if let Some(observation) = observation {
        let outline = Vector::<Point>::from_slice(
            &observation
                .corners()
                .map(|p| Point::new(p.x.round() as i32, p.y.round() as i32)),
        );
        let mut polygons = Vector::<Vector<Point>>::new();
        polygons.push(outline);
        imgproc::polylines(frame, &polygons, true, Scalar::new(0.0, 0.0, 255.0, 0.0), 2, LINE_8, 0)?;
    }

    if let Some(centre) = centre.filter(|p| p.x.is_finite() && p.y.is_finite()) {
        imgproc::circle(
            frame,
            Point::new(centre.x.round() as i32, centre.y.round() as i32),
            4,
            Scalar::new(255.0, 0.0, 255.0, 0.0),
            -1,
            LINE_8,
            0,
        )?;
    }

    imgproc::put_text(
        frame,
        &rate_label(fps),
        Point::new(10, 32),
        FONT_HERSHEY_PLAIN,
        2.0,
        Scalar::new(0.0, 255.0, 0.0, 0.0),
        1,
        LINE_8,
        false,
    )?;

    Ok(())
}

/// Overlay text for the loop rate, kept within four digits
#[must_use]
#[allow(clippy::cast_possible_truncation)] // clamped first
pub fn rate_label(fps: f64) -> String {
    // f64::max drops NaN
    let hz = fps.max(0.0).min(9999.0).round() as i32;
    format!("Hz: {hz}")
}

/// Destination for annotated frames
pub trait FrameSink: Send {
    /// Present one frame
    fn show(&mut self, frame: &Mat) -> Result<()>;
}

/// Discards frames
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn show(&mut self, _frame: &Mat) -> Result<()> {
        Ok(())
    }
}

/// `HighGUI` window
pub struct HighGuiSink {
    window_name: String,
    created: bool,
    quit: Arc<AtomicBool>,
}

impl HighGuiSink {
    /// Window is created lazily on the first frame, from the worker thread.
    /// `q` or Esc in the window sets `quit`.
    #[must_use]
    pub fn new(window_name: &str, quit: Arc<AtomicBool>) -> Self {
        Self {
            window_name: window_name.to_string(),
            created: false,
            quit,
        }
    }
}

impl FrameSink for HighGuiSink {
    fn show(&mut self, frame: &Mat) -> Result<()> {
        if !self.created {
            highgui::named_window(&self.window_name, WINDOW_NORMAL)?;
            self.created = true;
        }
        highgui::imshow(&self.window_name, frame)?;

        let key = highgui::wait_key(1)?;
        if key == 27 || key == i32::from(b'q') {
            info!("Exit requested from display window");
            self.quit.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for HighGuiSink {
    fn drop(&mut self) {
        if self.created {
            let _ = highgui::destroy_window(&self.window_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Vec3b, CV_8UC3};
    use opencv::prelude::*;

    fn blank() -> Mat {
        Mat::new_rows_cols_with_default(120, 160, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn test_annotate_draws_outline_and_centre() {
        let mut frame = blank();
        let observation = MarkerObservation::new([
            Point2f::new(40.0, 90.0),
            Point2f::new(40.0, 50.0),
            Point2f::new(100.0, 50.0),
            Point2f::new(100.0, 90.0),
        ]);
        annotate(&mut frame, Some(&observation), Some(Point2f::new(70.0, 70.0)), 30.0).unwrap();

        let edge = *frame.at_2d::<Vec3b>(70, 40).unwrap();
        assert_eq!(edge, Vec3b::from([0, 0, 255]));
        let centre = *frame.at_2d::<Vec3b>(70, 70).unwrap();
        assert_eq!(centre, Vec3b::from([255, 0, 255]));
    }

    #[test]
    fn test_annotate_without_marker_only_writes_rate() {
        let mut frame = blank();
        annotate(&mut frame, None, None, 0.0).unwrap();
        assert_eq!(*frame.at_2d::<Vec3b>(70, 70).unwrap(), Vec3b::from([0, 0, 0]));
        assert_eq!(*frame.at_2d::<Vec3b>(100, 140).unwrap(), Vec3b::from([0, 0, 0]));
    }

    #[test]
    fn test_non_finite_centre_is_skipped() {
        let mut frame = blank();
        annotate(&mut frame, None, Some(Point2f::new(f32::NAN, 5.0)), 12.4).unwrap();
    }

    #[test]
    fn test_rate_label_is_bounded() {
        assert_eq!(rate_label(30.4), "Hz: 30");
        assert_eq!(rate_label(123_456.0), "Hz: 9999");
        assert_eq!(rate_label(-5.0), "Hz: 0");
        assert_eq!(rate_label(f64::INFINITY), "Hz: 9999");
        assert_eq!(rate_label(f64::NAN), "Hz: 0");
    }

    #[test]
    fn test_null_sink_accepts_frames() {
        assert!(NullSink.show(&blank()).is_ok());
    }
}
