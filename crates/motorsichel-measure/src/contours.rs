//! Contour extraction and hole classification.
//!
//! Every closed border of the binary image is traced, filtered by area and
//! measured. A contour is classified as a hole when the diameter estimated
//! from its area and the one estimated from its perimeter agree closely
//! enough.
//!
//! Indices follow trace order. They are what the "Hole N" labels refer to and
//! are not stable across re-extraction of a changed binary image.

use std::f64::consts::PI;

use image::{GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::drawing::draw_line_segment_mut;
use log::{debug, info};
use motorsichel_core::{round_half_up, round_to, MmPerPx};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::ContourError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContourParams {
    /// Contours with area `<= area_low_factor * 500` px² are discarded.
    pub area_low_factor: f64,
    /// Contours with area `>= area_high_factor * 1e6` px² are discarded.
    pub area_high_factor: f64,
    /// Contours with `roundness >= roundness_threshold` are holes.
    pub roundness_threshold: f64,
    /// Also render a 1 px outline mask of the kept contours.
    pub generate_mask: bool,
}

impl Default for ContourParams {
    fn default() -> Self {
        Self {
            area_low_factor: 1.0,
            area_high_factor: 1.0,
            roundness_threshold: 0.9,
            generate_mask: false,
        }
    }
}

impl ContourParams {
    /// Both area factors set to the image scale factor.
    pub fn for_scale(scale_factor: f64, roundness_threshold: f64) -> Self {
        Self {
            area_low_factor: scale_factor,
            area_high_factor: scale_factor,
            roundness_threshold,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ContourError> {
        if !(self.area_low_factor.is_finite() && self.area_low_factor > 0.0) {
            return Err(ContourError::InvalidParameter(format!(
                "area_low_factor must be > 0, got {}",
                self.area_low_factor
            )));
        }
        if !(self.area_high_factor.is_finite() && self.area_high_factor > 0.0) {
            return Err(ContourError::InvalidParameter(format!(
                "area_high_factor must be > 0, got {}",
                self.area_high_factor
            )));
        }
        if !(self.roundness_threshold > 0.0 && self.roundness_threshold < 1.0) {
            return Err(ContourError::InvalidParameter(format!(
                "roundness_threshold must be in (0, 1), got {}",
                self.roundness_threshold
            )));
        }
        Ok(())
    }

    pub fn area_low(&self) -> f64 {
        self.area_low_factor * 500.0
    }

    pub fn area_high(&self) -> f64 {
        self.area_high_factor * 1_000_000.0
    }
}

/// One traced outline and everything measured about it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contour {
    pub index: usize,
    pub points_px: Vec<Point2<f64>>,
    /// Outline relative to the reference point.
    pub points_ref: Option<Vec<Point2<f64>>>,
    pub points_mm: Option<Vec<Point2<f64>>>,
    /// Mean of bounding-box center and moment centroid, snapped to the pixel
    /// grid.
    pub center_px: Point2<f64>,
    pub center_ref: Option<Point2<f64>>,
    /// Set for holes only.
    pub center_mm: Option<Point2<f64>>,
    pub area_px: f64,
    pub perimeter_px: f64,
    pub roundness: f64,
    pub is_hole: bool,
    /// Holds the diameter deviation, not the diameter: the field is written
    /// with the average first and then overwritten. Read
    /// [`Contour::average_diameter_px`] for the diameter itself.
    pub diameter_px: f64,
    pub average_diameter_px: f64,
    pub diameter_mm: Option<f64>,
    pub deviation_px: f64,
    pub deviation_mm: Option<f64>,
    pub set_diameter_manually: bool,
}

/// Result of one extraction run.
#[derive(Clone, Debug, Default)]
pub struct ContourSet {
    pub contours: Vec<Contour>,
    /// Outline mask, present when requested.
    pub mask: Option<GrayImage>,
}

/// Diameter estimates and classification derived from area and perimeter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Roundness {
    pub d_area: f64,
    pub d_perimeter: f64,
    pub roundness: f64,
    pub average_diameter: f64,
    pub max_deviation: f64,
}

impl Roundness {
    pub fn measure(area: f64, perimeter: f64) -> Self {
        let d_area = round_to((4.0 * area / PI).sqrt(), 2);
        let d_perimeter = round_to(perimeter / PI, 2);
        let roundness = round_to(d_area / d_perimeter, 2);
        let average_diameter = round_to((d_area + d_perimeter) / 2.0, 2);
        let dev_area = round_to((average_diameter - d_area).abs(), 2);
        let dev_perimeter = round_to((average_diameter - d_perimeter).abs(), 2);
        Self {
            d_area,
            d_perimeter,
            roundness,
            average_diameter,
            max_deviation: dev_area.max(dev_perimeter),
        }
    }

    #[inline]
    pub fn is_hole(&self, threshold: f64) -> bool {
        is_hole(self.roundness, threshold)
    }
}

/// Threshold inclusive: a roundness equal to the threshold is a hole.
#[inline]
pub fn is_hole(roundness: f64, threshold: f64) -> bool {
    roundness >= threshold
}

/// Signed shoelace area and polygon centroid of a closed outline.
fn polygon_moments(points: &[Point2<f64>]) -> (f64, Point2<f64>) {
    let n = points.len();
    let (mut a2, mut cx, mut cy) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let p = points[i];
        let q = points[(i + 1) % n];
        let cross = p.x * q.y - q.x * p.y;
        a2 += cross;
        cx += (p.x + q.x) * cross;
        cy += (p.y + q.y) * cross;
    }
    let area = a2 / 2.0;
    if area.abs() <= f64::EPSILON {
        return (0.0, points.first().copied().unwrap_or_else(Point2::origin));
    }
    (area, Point2::new(cx / (6.0 * area), cy / (6.0 * area)))
}

fn closed_length(points: &[Point2<f64>]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    (0..n).map(|i| (points[(i + 1) % n] - points[i]).norm()).sum()
}

/// Center of the inclusive integer bounding box, `x + w / 2` with
/// `w = max - min + 1`.
fn bounding_box_center(points: &[Point2<f64>]) -> Point2<f64> {
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Point2::new(
        min_x + (max_x - min_x + 1.0) / 2.0,
        min_y + (max_y - min_y + 1.0) / 2.0,
    )
}

/// Drop interior points of straight horizontal, vertical and diagonal runs.
fn compress_chain(points: Vec<Point2<f64>>) -> Vec<Point2<f64>> {
    let n = points.len();
    if n < 3 {
        return points;
    }
    let step = |a: Point2<f64>, b: Point2<f64>| (b.x - a.x, b.y - a.y);
    let mut out: Vec<Point2<f64>> = Vec::with_capacity(n);
    for i in 0..n {
        let prev = points[(i + n - 1) % n];
        let cur = points[i];
        let next = points[(i + 1) % n];
        if step(prev, cur) != step(cur, next) {
            out.push(cur);
        }
    }
    if out.is_empty() {
        out.push(points[0]);
    }
    out
}

fn draw_outline(mask: &mut GrayImage, points: &[Point2<f64>]) {
    let n = points.len();
    if n == 1 {
        let (x, y) = (points[0].x as u32, points[0].y as u32);
        if x < mask.width() && y < mask.height() {
            mask.put_pixel(x, y, Luma([255]));
        }
        return;
    }
    for i in 0..n {
        let (a, b) = (points[i], points[(i + 1) % n]);
        draw_line_segment_mut(
            mask,
            (a.x as f32, a.y as f32),
            (b.x as f32, b.y as f32),
            Luma([255]),
        );
    }
}

/// Build the measured record for one outline.
pub fn measure_contour(
    index: usize,
    points_px: Vec<Point2<f64>>,
    area_px: f64,
    perimeter_px: f64,
    moment_center: Point2<f64>,
    roundness_threshold: f64,
    mm_per_px: Option<MmPerPx>,
) -> Contour {
    let bbox = bounding_box_center(&points_px);
    let center_px = Point2::new(
        round_half_up((bbox.x + moment_center.x) / 2.0),
        round_half_up((bbox.y + moment_center.y) / 2.0),
    );
    let r = Roundness::measure(area_px, perimeter_px);

    Contour {
        index,
        points_px,
        points_ref: None,
        points_mm: None,
        center_px,
        center_ref: None,
        center_mm: None,
        area_px,
        perimeter_px,
        roundness: r.roundness,
        is_hole: r.is_hole(roundness_threshold),
        // The average lands here first and is then overwritten with the
        // deviation; existing reports depend on the second value.
        diameter_px: r.max_deviation,
        average_diameter_px: r.average_diameter,
        diameter_mm: mm_per_px.map(|k| round_to(k.to_mm(r.average_diameter), 2)),
        deviation_px: r.max_deviation,
        deviation_mm: mm_per_px.map(|k| round_to(k.to_mm(r.max_deviation), 2)),
        set_diameter_manually: false,
    }
}

/// Trace every border of `binary` (non-zero = foreground), keep those with
/// an area strictly between the thresholds and measure them.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(binary, params, mm_per_px), fields(width = binary.width(), height = binary.height()))
)]
pub fn extract_contours(
    binary: &GrayImage,
    params: &ContourParams,
    mm_per_px: Option<MmPerPx>,
) -> Result<ContourSet, ContourError> {
    params.validate()?;
    if binary.width() == 0 || binary.height() == 0 {
        return Err(ContourError::EmptyImage);
    }
    let (low, high) = (params.area_low(), params.area_high());
    let mut mask = params
        .generate_mask
        .then(|| GrayImage::new(binary.width(), binary.height()));

    let traced = find_contours::<u32>(binary);
    debug!("{} raw borders", traced.len());
    let mut contours = Vec::new();
    for raw in traced {
        let points: Vec<Point2<f64>> = raw
            .points
            .iter()
            .map(|p| Point2::new(f64::from(p.x), f64::from(p.y)))
            .collect();
        let points = compress_chain(points);
        let (signed_area, moment_center) = polygon_moments(&points);
        let area = signed_area.abs();
        if area <= low || area >= high {
            continue;
        }
        let perimeter = closed_length(&points);
        if let Some(mask) = mask.as_mut() {
            draw_outline(mask, &points);
        }
        contours.push(measure_contour(
            contours.len(),
            points,
            area,
            perimeter,
            moment_center,
            params.roundness_threshold,
            mm_per_px,
        ));
    }
    info!(
        "{} contours kept, {} holes",
        contours.len(),
        contours.iter().filter(|c| c.is_hole).count()
    );
    Ok(ContourSet { contours, mask })
}

/// Operator override of a hole's diameter. Returns whether the stored value
/// changed.
pub fn correct_diameter(
    contours: &mut [Contour],
    index: usize,
    diameter_mm: f64,
) -> Result<bool, ContourError> {
    if !(diameter_mm.is_finite() && diameter_mm > 0.0) {
        return Err(ContourError::InvalidParameter(format!(
            "diameter must be > 0 mm, got {diameter_mm}"
        )));
    }
    let contour = contours
        .iter_mut()
        .find(|c| c.index == index)
        .ok_or(ContourError::UnknownContour(index))?;
    if !contour.is_hole {
        return Err(ContourError::NotAHole(index));
    }
    if contour.diameter_mm == Some(diameter_mm) {
        return Ok(false);
    }
    info!("hole {index}: diameter set to {diameter_mm} mm");
    contour.diameter_mm = Some(diameter_mm);
    contour.set_diameter_manually = true;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use imageproc::drawing::draw_filled_circle_mut;

    #[test]
    fn reference_contour_classification() {
        let r = Roundness::measure(1000.0, 120.0);
        assert_eq!(r.d_area, 35.68);
        assert_eq!(r.d_perimeter, 38.2);
        assert_eq!(r.roundness, 0.93);
        assert_eq!(r.average_diameter, 36.94);
        assert_eq!(r.max_deviation, 1.26);
        assert!(r.is_hole(0.9));
        assert!(!r.is_hole(0.95));
    }

    #[test]
    fn threshold_boundary_counts_as_hole() {
        assert!(is_hole(0.9, 0.9));
        assert!(!is_hole(0.89, 0.9));
    }

    #[test]
    fn diameter_px_keeps_the_deviation() {
        let c = measure_contour(
            0,
            vec![Point2::new(0.0, 0.0), Point2::new(10.0, 0.0), Point2::new(10.0, 10.0)],
            1000.0,
            120.0,
            Point2::new(5.0, 5.0),
            0.9,
            MmPerPx::new(0.5),
        );
        assert_eq!(c.diameter_px, 1.26);
        assert_eq!(c.deviation_px, 1.26);
        assert_eq!(c.average_diameter_px, 36.94);
        assert_eq!(c.diameter_mm, Some(18.47));
        assert_eq!(c.deviation_mm, Some(0.63));
    }

    #[test]
    fn center_averages_bounding_box_and_moments() {
        let square: Vec<Point2<f64>> = [(10.0, 10.0), (10.0, 29.0), (29.0, 29.0), (29.0, 10.0)]
            .iter()
            .map(|&(x, y)| Point2::new(x, y))
            .collect();
        let (area, centroid) = polygon_moments(&square);
        assert_relative_eq!(area.abs(), 361.0);
        assert_relative_eq!(centroid, Point2::new(19.5, 19.5), epsilon = 1e-12);
        // Box center is 20.0, moment center 19.5, mean 19.75 snaps to 20.
        let c = measure_contour(0, square, 361.0, 76.0, centroid, 0.9, None);
        assert_eq!(c.center_px, Point2::new(20.0, 20.0));
        assert!(c.diameter_mm.is_none());
    }

    #[test]
    fn chain_compression_keeps_corners_only() {
        let pts: Vec<Point2<f64>> = [(0, 0), (1, 0), (2, 0), (2, 1), (2, 2), (1, 2), (0, 2), (0, 1)]
            .iter()
            .map(|&(x, y)| Point2::new(x as f64, y as f64))
            .collect();
        let out = compress_chain(pts.clone());
        assert_eq!(out.len(), 4);
        assert_relative_eq!(closed_length(&out), closed_length(&pts));
    }

    fn disk_image() -> GrayImage {
        let mut img = GrayImage::new(200, 120);
        draw_filled_circle_mut(&mut img, (60, 60), 30, Luma([255]));
        // Square blob: not round enough for a hole.
        for y in 20..100 {
            for x in 120..180 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        // Speck below the area threshold.
        img.put_pixel(5, 5, Luma([255]));
        img
    }

    #[test]
    fn extracts_and_classifies_disk_and_square() {
        let params = ContourParams {
            generate_mask: true,
            ..Default::default()
        };
        let set = extract_contours(&disk_image(), &params, MmPerPx::new(0.1)).unwrap();
        assert_eq!(set.contours.len(), 2);
        let disk = set
            .contours
            .iter()
            .find(|c| (c.center_px.x - 60.0).abs() <= 1.0)
            .expect("disk contour");
        assert!(disk.is_hole, "roundness {}", disk.roundness);
        assert!((disk.center_px.y - 60.0).abs() <= 1.0);
        assert!((disk.average_diameter_px - 60.0).abs() < 3.0);

        let square = set.contours.iter().find(|c| c.index != disk.index).unwrap();
        assert!(!square.is_hole, "roundness {}", square.roundness);

        let indices: Vec<usize> = set.contours.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1]);

        let mask = set.mask.expect("outline mask");
        assert_eq!(mask.get_pixel(120, 50)[0], 255);
        assert_eq!(mask.get_pixel(150, 60)[0], 0);
    }

    #[test]
    fn area_thresholds_are_exclusive() {
        let set = extract_contours(
            &disk_image(),
            &ContourParams {
                area_low_factor: 10.0,
                ..Default::default()
            },
            None,
        )
        .unwrap();
        // Square area 59 * 79 = 4661 < 5000 drops out, disk (~2800) too.
        assert!(set.contours.is_empty());
    }

    #[test]
    fn invalid_threshold_is_rejected() {
        let params = ContourParams {
            roundness_threshold: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            extract_contours(&disk_image(), &params, None),
            Err(ContourError::InvalidParameter(_))
        ));
    }

    #[test]
    fn correction_marks_manual_override() {
        let mut contours = vec![measure_contour(
            3,
            vec![Point2::new(0.0, 0.0)],
            1000.0,
            120.0,
            Point2::new(0.0, 0.0),
            0.9,
            MmPerPx::new(0.5),
        )];
        assert!(correct_diameter(&mut contours, 3, 20.0).unwrap());
        assert!(!correct_diameter(&mut contours, 3, 20.0).unwrap());
        assert_eq!(contours[0].diameter_mm, Some(20.0));
        assert!(contours[0].set_diameter_manually);
        assert!(matches!(
            correct_diameter(&mut contours, 7, 20.0),
            Err(ContourError::UnknownContour(7))
        ));
    }
}
