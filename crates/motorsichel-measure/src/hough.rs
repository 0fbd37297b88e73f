//! Gradient Hough circle search and the center-finding helpers built on it.
//!
//! Edge pixels (Canny) vote along their gradient direction, both ways, into
//! an accumulator `dp` times coarser than the image. Local maxima above the
//! vote threshold are centers; centers closer than `min_dist` to a stronger
//! one are dropped. Each surviving center gets the radius most edge pixels
//! agree on.

use image::GrayImage;
use imageproc::edges::canny;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::preview::StopFlag;

/// Accumulator resolution used by the automatic center search.
pub const DEFAULT_DP: f64 = 1.2;
/// Minimum center distance used by the automatic center search.
pub const DEFAULT_MIN_DIST: f64 = 800.0;
/// Increment of the interactive `dp` control.
pub const DP_STEP: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoughParams {
    /// Image pixels per accumulator cell, `>= 1`.
    pub dp: f64,
    pub min_dist: f64,
    /// Upper Canny threshold, the lower one is half of it.
    pub canny_high: f32,
    /// Votes a center needs.
    pub vote_threshold: f32,
    pub min_radius: u32,
    /// `0` means up to the larger image side.
    pub max_radius: u32,
}

impl Default for HoughParams {
    fn default() -> Self {
        Self {
            dp: DEFAULT_DP,
            min_dist: DEFAULT_MIN_DIST,
            canny_high: 100.0,
            vote_threshold: 100.0,
            min_radius: 0,
            max_radius: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

impl Circle {
    pub fn center(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }

    fn rounded(self) -> Self {
        Self {
            x: self.x.round(),
            y: self.y.round(),
            radius: self.radius.round(),
        }
    }
}

#[inline]
fn bilinear_add(accum: &mut [f32], w: usize, h: usize, x: f64, y: f64) {
    if x < 0.0 || y < 0.0 {
        return;
    }
    let (x0, y0) = (x.floor() as usize, y.floor() as usize);
    if x0 + 1 >= w || y0 + 1 >= h {
        return;
    }
    let (fx, fy) = ((x - x0 as f64) as f32, (y - y0 as f64) as f32);
    let base = y0 * w + x0;
    accum[base] += (1.0 - fx) * (1.0 - fy);
    accum[base + 1] += fx * (1.0 - fy);
    accum[base + w] += (1.0 - fx) * fy;
    accum[base + w + 1] += fx * fy;
}

struct Candidate {
    x: f64,
    y: f64,
    votes: f32,
}

fn local_maxima(accum: &[f32], w: usize, h: usize, threshold: f32, dp: f64) -> Vec<Candidate> {
    let mut out = Vec::new();
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let idx = y * w + x;
            let v = accum[idx];
            if v <= 0.0
                || v <= accum[idx - 1]
                || v < accum[idx + 1]
                || v <= accum[idx - w]
                || v < accum[idx + w]
            {
                continue;
            }
            let mut votes = 0.0;
            for dy in [-1isize, 0, 1] {
                for dx in [-1isize, 0, 1] {
                    votes += accum[(idx as isize + dy * w as isize + dx) as usize];
                }
            }
            if votes >= threshold {
                out.push(Candidate {
                    x: x as f64 * dp,
                    y: y as f64 * dp,
                    votes,
                });
            }
        }
    }
    out.sort_by(|a, b| b.votes.total_cmp(&a.votes));
    out
}

/// Radius most edge pixels agree on, as the mean distance inside the best
/// three-pixel band.
fn estimate_radius(edges: &[(f64, f64)], cx: f64, cy: f64, r_min: f64, r_max: f64) -> Option<f64> {
    let bins = r_max.ceil() as usize + 2;
    let mut count = vec![0u32; bins];
    let mut sum = vec![0f64; bins];
    for &(x, y) in edges {
        let d = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt();
        if d < r_min || d > r_max {
            continue;
        }
        let b = d.round() as usize;
        count[b] += 1;
        sum[b] += d;
    }
    let mut best: Option<(usize, u32)> = None;
    for b in 1..bins - 1 {
        let c = count[b - 1] + count[b] + count[b + 1];
        if best.is_none_or(|(_, bc)| c > bc) {
            best = Some((b, c));
        }
    }
    let (b, c) = best?;
    // A quarter of the circumference must be present.
    let needed = (0.25 * std::f64::consts::TAU * b as f64).max(8.0);
    if (c as f64) < needed {
        return None;
    }
    Some((sum[b - 1] + sum[b] + sum[b + 1]) / c as f64)
}

/// Every circle found, strongest center first.
pub fn detect_circles(gray: &GrayImage, params: &HoughParams) -> Vec<Circle> {
    let (w, h) = gray.dimensions();
    if w < 8 || h < 8 || !params.dp.is_finite() {
        return Vec::new();
    }
    let dp = params.dp.max(1.0);
    let r_min = f64::from(params.min_radius.max(1));
    let r_max = if params.max_radius == 0 {
        f64::from(w.max(h))
    } else {
        f64::from(params.max_radius)
    };
    if r_max < r_min {
        return Vec::new();
    }

    let edges = canny(gray, params.canny_high / 2.0, params.canny_high);
    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);

    let aw = (f64::from(w) / dp).ceil() as usize + 2;
    let ah = (f64::from(h) / dp).ceil() as usize + 2;
    let mut accum = vec![0f32; aw * ah];
    let mut edge_points = Vec::new();
    for (x, y, e) in edges.enumerate_pixels() {
        if e[0] == 0 {
            continue;
        }
        let (dx, dy) = (f64::from(gx.get_pixel(x, y)[0]), f64::from(gy.get_pixel(x, y)[0]));
        let mag = (dx * dx + dy * dy).sqrt();
        if mag < 1e-6 {
            continue;
        }
        let (ux, uy) = (dx / mag / dp, dy / mag / dp);
        let (ax, ay) = (f64::from(x) / dp, f64::from(y) / dp);
        for sign in [-1.0, 1.0] {
            let mut r = r_min;
            while r <= r_max {
                bilinear_add(&mut accum, aw, ah, ax + sign * ux * r, ay + sign * uy * r);
                r += dp;
            }
        }
        edge_points.push((f64::from(x), f64::from(y)));
    }
    if edge_points.is_empty() {
        return Vec::new();
    }

    let mut centers: Vec<Candidate> = Vec::new();
    for cand in local_maxima(&accum, aw, ah, params.vote_threshold, dp) {
        let far = centers
            .iter()
            .all(|c| ((c.x - cand.x).powi(2) + (c.y - cand.y).powi(2)).sqrt() >= params.min_dist);
        if far {
            centers.push(cand);
        }
    }

    let circles: Vec<Circle> = centers
        .iter()
        .filter_map(|c| {
            estimate_radius(&edge_points, c.x, c.y, r_min, r_max).map(|radius| Circle {
                x: c.x,
                y: c.y,
                radius,
            })
        })
        .collect();
    debug!("{} edge pixels, {} circles", edge_points.len(), circles.len());
    circles
}

/// The largest circle for the given accumulator resolution and minimum
/// center distance, with center and radius rounded to whole pixels.
///
/// `None` when no circle is found.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(gray), fields(width = gray.width(), height = gray.height()))
)]
pub fn find_circles(gray: &GrayImage, dp: f64, min_dist: f64) -> Option<Circle> {
    let params = HoughParams {
        dp,
        min_dist,
        ..Default::default()
    };
    detect_circles(gray, &params)
        .into_iter()
        .max_by(|a, b| a.radius.total_cmp(&b.radius))
        .map(Circle::rounded)
}

/// Central quarter (by width and height) of a grayscale frame.
#[derive(Clone, Debug)]
pub struct CenterRegion {
    pub image: GrayImage,
    /// Position of the region's top-left pixel in the full frame.
    pub offset: (u32, u32),
}

impl CenterRegion {
    pub fn to_frame(&self, c: &Circle) -> Circle {
        Circle {
            x: c.x + f64::from(self.offset.0),
            y: c.y + f64::from(self.offset.1),
            radius: c.radius,
        }
    }
}

pub fn center_region(gray: &GrayImage) -> CenterRegion {
    let (w, h) = gray.dimensions();
    let (cw, ch) = (w / 4, h / 4);
    let offset = ((w - cw) / 2, (h - ch) / 2);
    let image = image::imageops::crop_imm(gray, offset.0, offset.1, cw, ch).to_image();
    CenterRegion { image, offset }
}

/// Center of the largest circle in the central region of the frame, in
/// frame coordinates. `None` when the region holds no circle.
pub fn find_object_center(gray: &GrayImage) -> Option<Point2<f64>> {
    let region = center_region(gray);
    let circle = find_circles(&region.image, DEFAULT_DP, DEFAULT_MIN_DIST)?;
    Some(region.to_frame(&circle).center())
}

#[derive(Debug)]
pub enum TunerStep {
    /// Largest circle for the current parameters, in frame coordinates.
    Searched(Option<Circle>),
    Stopped,
}

/// Interactive refinement of the center search over the central region.
pub struct CircleTuner {
    region: CenterRegion,
    dp: f64,
    min_dist: f64,
    stop: StopFlag,
    last: Option<Circle>,
}

impl CircleTuner {
    pub fn new(gray: &GrayImage) -> Self {
        Self {
            region: center_region(gray),
            dp: DEFAULT_DP,
            min_dist: DEFAULT_MIN_DIST,
            stop: StopFlag::new(),
            last: None,
        }
    }

    pub fn region(&self) -> &CenterRegion {
        &self.region
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn dp(&self) -> f64 {
        self.dp
    }

    pub fn min_dist(&self) -> f64 {
        self.min_dist
    }

    /// Move `dp` by whole [`DP_STEP`] increments, never below 1.
    pub fn nudge_dp(&mut self, steps: i32) {
        let dp = self.dp + f64::from(steps) * DP_STEP;
        self.dp = (dp.max(1.0) * 10.0).round() / 10.0;
    }

    pub fn set_min_dist(&mut self, min_dist: f64) {
        self.min_dist = min_dist.max(1.0);
    }

    pub fn step(&mut self) -> TunerStep {
        if self.stop.is_stopped() {
            return TunerStep::Stopped;
        }
        let found = find_circles(&self.region.image, self.dp, self.min_dist)
            .map(|c| self.region.to_frame(&c));
        if found.is_some() {
            self.last = found;
        }
        TunerStep::Searched(found)
    }

    /// Center of the last circle found, in frame coordinates.
    pub fn finish(self) -> Option<Point2<f64>> {
        self.last.map(|c| c.center())
    }
}
