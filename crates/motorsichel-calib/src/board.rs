use image::{GrayImage, Luma};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

use crate::CalibrationError;

/// Planar checkerboard target, described by its *inner* corner grid.
///
/// Corners are indexed `k = j * rows + i` with `i in 0..rows` running fastest,
/// and object point `k` sits at `(i * square, j * square, 0)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckerboardSpec {
    /// Inner corners along the fast index.
    pub rows: u32,
    /// Inner corners along the slow index.
    pub cols: u32,
    /// Edge length of one square in millimeters.
    pub square_size_mm: f64,
}

impl Default for CheckerboardSpec {
    /// A 9x7-square board with 20 mm squares.
    fn default() -> Self {
        Self {
            rows: 6,
            cols: 8,
            square_size_mm: 20.0,
        }
    }
}

/// Grid indices used to measure the mm/px ratio: the origin corner and the
/// far corner along each axis of the inner grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScaleSpans {
    pub origin: usize,
    /// Corner `rows - 1` squares away along the fast index.
    pub along_rows: usize,
    pub along_rows_squares: u32,
    /// Corner `cols - 1` squares away along the slow index.
    pub along_cols: usize,
    pub along_cols_squares: u32,
}

impl CheckerboardSpec {
    pub fn new(rows: u32, cols: u32, square_size_mm: f64) -> Result<Self, CalibrationError> {
        let spec = Self {
            rows,
            cols,
            square_size_mm,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.rows < 2 || self.cols < 2 {
            return Err(CalibrationError::InvalidBoard(format!(
                "need at least 2x2 inner corners, got {}x{}",
                self.rows, self.cols
            )));
        }
        if !(self.square_size_mm.is_finite() && self.square_size_mm > 0.0) {
            return Err(CalibrationError::InvalidBoard(format!(
                "square size must be > 0 mm, got {}",
                self.square_size_mm
            )));
        }
        Ok(())
    }

    pub fn point_count(&self) -> usize {
        (self.rows * self.cols) as usize
    }

    pub fn object_point(&self, k: usize) -> Point3<f64> {
        let rows = self.rows as usize;
        Point3::new(
            (k % rows) as f64 * self.square_size_mm,
            (k / rows) as f64 * self.square_size_mm,
            0.0,
        )
    }

    pub fn object_points(&self) -> Vec<Point3<f64>> {
        (0..self.point_count())
            .map(|k| self.object_point(k))
            .collect()
    }

    /// For the default 6x8 grid this is `(0, 5, 42)` spanning 5 and 7 squares.
    pub fn scale_spans(&self) -> ScaleSpans {
        ScaleSpans {
            origin: 0,
            along_rows: (self.rows - 1) as usize,
            along_rows_squares: self.rows - 1,
            along_cols: ((self.cols - 1) * self.rows) as usize,
            along_cols_squares: self.cols - 1,
        }
    }

    /// Render a printable target: `rows + 1` squares across, `cols + 1` down,
    /// surrounded by a white margin. The top-left square is black.
    pub fn render(&self, px_per_square: u32, margin_px: u32) -> GrayImage {
        let sq = px_per_square.max(1);
        let board_w = (self.rows + 1) * sq;
        let board_h = (self.cols + 1) * sq;
        let (w, h) = (board_w + 2 * margin_px, board_h + 2 * margin_px);
        GrayImage::from_fn(w, h, |x, y| {
            let (bx, by) = (x.wrapping_sub(margin_px), y.wrapping_sub(margin_px));
            if bx < board_w && by < board_h && (bx / sq + by / sq) % 2 == 0 {
                Luma([0u8])
            } else {
                Luma([255u8])
            }
        })
    }
}
