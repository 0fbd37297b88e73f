use image::DynamicImage;
use log::{debug, info, warn};
use motorsichel_core::{estimate_homography, Homography, PixelRect};
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::camera::{project_point, undistort_to_normalized, Distortion, Intrinsics, Pose};
use crate::lm::{minimize, ResidualModel, SolveOptions};
use crate::{detect_checkerboard, CalibrationError, CheckerboardSpec, DetectParams};

/// Fewest accepted checkerboard views a calibration is computed from.
pub const MIN_CALIBRATION_VIEWS: usize = 10;

/// Result of a successful calibration. Only valid at `image_size`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    /// `(width, height)` of the frames the profile was computed from.
    pub image_size: (u32, u32),
    pub camera_matrix: Matrix3<f64>,
    /// Intrinsics of the undistorted image (alpha = 1, all source pixels kept).
    pub optimal_matrix: Matrix3<f64>,
    pub distortion: Distortion,
    pub rvecs: Vec<Vector3<f64>>,
    pub tvecs: Vec<Vector3<f64>>,
    /// Part of the undistorted image free of black border.
    pub roi: PixelRect,
    /// Mean reprojection error in pixels.
    pub mean_error: f64,
    pub board: CheckerboardSpec,
}

impl CalibrationProfile {
    pub fn intrinsics(&self) -> Intrinsics {
        Intrinsics::from_matrix(&self.camera_matrix)
    }

    pub fn optimal_intrinsics(&self) -> Intrinsics {
        Intrinsics::from_matrix(&self.optimal_matrix)
    }

    pub fn poses(&self) -> Vec<Pose> {
        self.rvecs
            .iter()
            .zip(&self.tvecs)
            .map(|(r, t)| Pose { rvec: *r, tvec: *t })
            .collect()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    pub detect: DetectParams,
    pub solve: SolveOptions,
}

/// Calibrate from raw frames of a checkerboard.
///
/// Frames without a complete grid, or with a resolution different from the
/// first accepted frame, are skipped. The solve needs at least
/// [`MIN_CALIBRATION_VIEWS`] accepted frames.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(images, board, params), fields(frames = images.len()))
)]
pub fn calibrate(
    images: &[DynamicImage],
    board: &CheckerboardSpec,
    params: &CalibrationParams,
) -> Result<CalibrationProfile, CalibrationError> {
    board.validate()?;
    if images.len() < MIN_CALIBRATION_VIEWS {
        return Err(CalibrationError::TooFewImages {
            found: images.len(),
            required: MIN_CALIBRATION_VIEWS,
        });
    }

    let mut size = None;
    let mut views = Vec::new();
    for (idx, frame) in images.iter().enumerate() {
        let gray = frame.to_luma8();
        if let Some(expected) = size {
            if gray.dimensions() != expected {
                warn!(
                    "frame {idx}: {:?} differs from calibration size {expected:?}, skipped",
                    gray.dimensions()
                );
                continue;
            }
        }
        match detect_checkerboard(&gray, board, &params.detect) {
            Some(points) => {
                size.get_or_insert(gray.dimensions());
                views.push(points);
            }
            None => debug!("frame {idx}: no checkerboard"),
        }
    }
    info!("checkerboard found in {}/{} frames", views.len(), images.len());

    let Some(size) = size else {
        return Err(CalibrationError::NoBoardDetected {
            frames: images.len(),
        });
    };
    calibrate_from_views(&views, size, board, &params.solve)
}

/// Solve intrinsics, distortion and per-view poses from detected grids.
///
/// Each view lists the image points in board index order.
pub fn calibrate_from_views(
    views: &[Vec<Point2<f64>>],
    image_size: (u32, u32),
    board: &CheckerboardSpec,
    opts: &SolveOptions,
) -> Result<CalibrationProfile, CalibrationError> {
    board.validate()?;
    if views.len() < MIN_CALIBRATION_VIEWS {
        return Err(CalibrationError::TooFewViews {
            accepted: views.len(),
            required: MIN_CALIBRATION_VIEWS,
        });
    }
    let expected = board.point_count();
    if let Some((index, v)) = views.iter().enumerate().find(|(_, v)| v.len() != expected) {
        return Err(CalibrationError::InvalidView {
            index,
            found: v.len(),
            expected,
        });
    }

    let object = board.object_points();
    let plane: Vec<Point2<f64>> = object.iter().map(|p| Point2::new(p.x, p.y)).collect();
    let homographies = views
        .iter()
        .map(|v| estimate_homography(&plane, v))
        .collect::<Option<Vec<_>>>()
        .ok_or(CalibrationError::SolveFailed)?;

    let k0 = zhang_intrinsics(&homographies, image_size).unwrap_or_else(|| {
        debug!("closed-form intrinsics degenerate, starting from a generic camera");
        generic_intrinsics(image_size)
    });
    let poses0 = homographies
        .iter()
        .map(|h| Pose::from_homography(&k0, h))
        .collect::<Option<Vec<_>>>()
        .ok_or(CalibrationError::SolveFailed)?;

    let model = CalibrationModel {
        object: &object,
        views,
    };
    let (x, report) = minimize(&model, model.pack(&k0, &Distortion::default(), &poses0), opts);
    if !report.converged {
        warn!("calibration solver stopped early after {} evaluations", report.evaluations);
    }
    let (k, dist, poses) = CalibrationModel::unpack(&x, views.len());
    let all_finite = x.iter().all(|v| v.is_finite());
    if !all_finite || !k.is_valid() {
        return Err(CalibrationError::SolveFailed);
    }

    let (optimal, roi) = optimal_new_camera_matrix(&k, &dist, image_size)?;
    let mean_error = mean_reprojection_error(&k, &dist, &poses, &object, views);
    info!(
        "calibrated fx={:.1} fy={:.1} cx={:.1} cy={:.1}, mean error {mean_error:.4}px",
        k.fx, k.fy, k.cx, k.cy
    );
    debug!(
        "solver cost {:.6e} after {} evaluations",
        report.cost, report.evaluations
    );

    Ok(CalibrationProfile {
        image_size,
        camera_matrix: k.matrix(),
        optimal_matrix: optimal.matrix(),
        distortion: dist,
        rvecs: poses.iter().map(|p| p.rvec).collect(),
        tvecs: poses.iter().map(|p| p.tvec).collect(),
        roi,
        mean_error,
        board: *board,
    })
}

struct CalibrationModel<'a> {
    object: &'a [Point3<f64>],
    views: &'a [Vec<Point2<f64>>],
}

impl CalibrationModel<'_> {
    const INTRINSIC_PARAMS: usize = 9;

    fn pack(&self, k: &Intrinsics, d: &Distortion, poses: &[Pose]) -> DVector<f64> {
        let mut x = Vec::with_capacity(Self::INTRINSIC_PARAMS + 6 * poses.len());
        x.extend_from_slice(&[k.fx, k.fy, k.cx, k.cy]);
        x.extend_from_slice(&d.coefficients());
        for p in poses {
            x.extend(p.rvec.iter().chain(p.tvec.iter()));
        }
        DVector::from_vec(x)
    }

    fn unpack(x: &DVector<f64>, n_views: usize) -> (Intrinsics, Distortion, Vec<Pose>) {
        let k = Intrinsics {
            fx: x[0],
            fy: x[1],
            cx: x[2],
            cy: x[3],
        };
        let d = Distortion::from_coefficients([x[4], x[5], x[6], x[7], x[8]]);
        let poses = (0..n_views)
            .map(|v| {
                let o = Self::INTRINSIC_PARAMS + 6 * v;
                Pose {
                    rvec: Vector3::new(x[o], x[o + 1], x[o + 2]),
                    tvec: Vector3::new(x[o + 3], x[o + 4], x[o + 5]),
                }
            })
            .collect();
        (k, d, poses)
    }
}

impl ResidualModel for CalibrationModel<'_> {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let (k, d, poses) = Self::unpack(x, self.views.len());
        let mut r = Vec::with_capacity(2 * self.object.len() * self.views.len());
        for (pose, view) in poses.iter().zip(self.views) {
            for (obj, img) in self.object.iter().zip(view) {
                let p = project_point(&k, &d, pose, obj);
                r.push(p.x - img.x);
                r.push(p.y - img.y);
            }
        }
        DVector::from_vec(r)
    }

    // Pose parameters only touch their own view, so their columns are
    // differentiated against that view's residual block alone.
    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let n_pts = self.object.len();
        let rows = 2 * n_pts * self.views.len();
        let mut jac = DMatrix::zeros(rows, x.len());
        let mut xp = x.clone();

        for j in 0..Self::INTRINSIC_PARAMS {
            let h = 1e-6 * x[j].abs().max(1.0);
            xp[j] = x[j] + h;
            let plus = self.residuals(&xp);
            xp[j] = x[j] - h;
            let minus = self.residuals(&xp);
            xp[j] = x[j];
            jac.set_column(j, &((plus - minus) / (2.0 * h)));
        }

        let (k, d, poses) = Self::unpack(x, self.views.len());
        for (v, pose) in poses.iter().enumerate() {
            let mut params = [0.0; 6];
            params[..3].copy_from_slice(pose.rvec.as_slice());
            params[3..].copy_from_slice(pose.tvec.as_slice());
            for j in 0..6 {
                let h = 1e-6 * params[j].abs().max(1.0);
                let eval = |delta: f64| {
                    let mut q = params;
                    q[j] += delta;
                    let pose = Pose {
                        rvec: Vector3::new(q[0], q[1], q[2]),
                        tvec: Vector3::new(q[3], q[4], q[5]),
                    };
                    self.object
                        .iter()
                        .map(move |obj| project_point(&k, &d, &pose, obj))
                        .collect::<Vec<_>>()
                };
                let (plus, minus) = (eval(h), eval(-h));
                let col = Self::INTRINSIC_PARAMS + 6 * v + j;
                for (i, (a, b)) in plus.iter().zip(&minus).enumerate() {
                    let row = 2 * (v * n_pts + i);
                    jac[(row, col)] = (a.x - b.x) / (2.0 * h);
                    jac[(row + 1, col)] = (a.y - b.y) / (2.0 * h);
                }
            }
        }
        jac
    }
}

fn generic_intrinsics(size: (u32, u32)) -> Intrinsics {
    let f = size.0.max(size.1) as f64;
    Intrinsics {
        fx: f,
        fy: f,
        cx: 0.5 * size.0 as f64,
        cy: 0.5 * size.1 as f64,
    }
}

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> [f64; 6] {
    let (hi, hj) = (h.column(i), h.column(j));
    [
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ]
}

/// Zhang's closed-form intrinsics (zero skew) from plane homographies.
///
/// `None` when the views do not constrain the camera, e.g. repeated or
/// parallel board poses, or when the estimate is implausible for the image.
fn zhang_intrinsics(homographies: &[Homography], size: (u32, u32)) -> Option<Intrinsics> {
    if homographies.len() < 3 {
        return None;
    }
    let mut v = DMatrix::<f64>::zeros(2 * homographies.len(), 6);
    for (n, hom) in homographies.iter().enumerate() {
        let h = hom.h / hom.h.column(0).norm().max(1e-12);
        let (v11, v22, v12) = (v_ij(&h, 0, 0), v_ij(&h, 1, 1), v_ij(&h, 0, 1));
        for c in 0..6 {
            v[(2 * n, c)] = v12[c];
            v[(2 * n + 1, c)] = v11[c] - v22[c];
        }
    }
    let svd = v.svd(false, true);
    let v_t = svd.v_t?;
    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[a].total_cmp(&svd.singular_values[b]));
    let largest = svd.singular_values[order[order.len() - 1]];
    if svd.singular_values[order[1]] < 1e-9 * largest {
        return None;
    }
    let b = v_t.row(order[0]);
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    if denom.abs() < 1e-12 * (b11 * b11 + b22 * b22) {
        return None;
    }
    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda.signum() != b11.signum() {
        return None;
    }
    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    let k = Intrinsics {
        fx: alpha,
        fy: beta,
        cx: u0,
        cy: v0,
    };
    let (w, h) = (size.0 as f64, size.1 as f64);
    let plausible = k.is_valid()
        && (0.0..=w).contains(&k.cx)
        && (0.0..=h).contains(&k.cy)
        && (0.5..=2.0).contains(&(k.fx / k.fy));
    plausible.then_some(k)
}

struct Bounds {
    x0: f64,
    x1: f64,
    y0: f64,
    y1: f64,
}

/// Outer and inner bounds of the undistorted image border, sampled on a
/// 9x9 grid, in normalized camera coordinates.
fn undistorted_bounds(k: &Intrinsics, d: &Distortion, size: (u32, u32)) -> (Bounds, Bounds) {
    const N: usize = 9;
    let (w, h) = (size.0 as f64 - 1.0, size.1 as f64 - 1.0);
    let mut outer = Bounds {
        x0: f64::MAX,
        x1: f64::MIN,
        y0: f64::MAX,
        y1: f64::MIN,
    };
    let mut inner = Bounds {
        x0: f64::MIN,
        x1: f64::MAX,
        y0: f64::MIN,
        y1: f64::MAX,
    };
    for i in 0..N {
        for j in 0..N {
            let px = Point2::new(j as f64 * w / (N - 1) as f64, i as f64 * h / (N - 1) as f64);
            let p = undistort_to_normalized(k, d, &px);
            outer.x0 = outer.x0.min(p.x);
            outer.x1 = outer.x1.max(p.x);
            outer.y0 = outer.y0.min(p.y);
            outer.y1 = outer.y1.max(p.y);
            if j == 0 {
                inner.x0 = inner.x0.max(p.x);
            }
            if j == N - 1 {
                inner.x1 = inner.x1.min(p.x);
            }
            if i == 0 {
                inner.y0 = inner.y0.max(p.y);
            }
            if i == N - 1 {
                inner.y1 = inner.y1.min(p.y);
            }
        }
    }
    (outer, inner)
}

/// New intrinsics that keep every source pixel after undistortion (alpha 1),
/// plus the rectangle of the undistorted image that holds only valid pixels.
pub fn optimal_new_camera_matrix(
    k: &Intrinsics,
    d: &Distortion,
    image_size: (u32, u32),
) -> Result<(Intrinsics, PixelRect), CalibrationError> {
    let (w, h) = (image_size.0 as f64, image_size.1 as f64);
    let (outer, inner) = undistorted_bounds(k, d, image_size);
    let (span_x, span_y) = (outer.x1 - outer.x0, outer.y1 - outer.y0);
    if !(span_x.is_finite() && span_y.is_finite() && span_x > 0.0 && span_y > 0.0) {
        return Err(CalibrationError::OptimalMatrix);
    }
    let fx = (w - 1.0) / span_x;
    let fy = (h - 1.0) / span_y;
    let optimal = Intrinsics {
        fx,
        fy,
        cx: -fx * outer.x0,
        cy: -fy * outer.y0,
    };

    let ix0 = optimal.fx * inner.x0 + optimal.cx;
    let iy0 = optimal.fy * inner.y0 + optimal.cy;
    let ix1 = optimal.fx * inner.x1 + optimal.cx;
    let iy1 = optimal.fy * inner.y1 + optimal.cy;
    if ![ix0, iy0, ix1, iy1].iter().all(|v| v.is_finite()) {
        return Err(CalibrationError::OptimalMatrix);
    }
    // Snap values within rounding noise of an integer before ceil/floor.
    const SNAP: f64 = 1e-6;
    let (x, y) = ((ix0 - SNAP).ceil(), (iy0 - SNAP).ceil());
    let (x_end, y_end) = (
        x + (ix1 - ix0 + SNAP).floor(),
        y + (iy1 - iy0 + SNAP).floor(),
    );
    let (x, y) = (x.max(0.0), y.max(0.0));
    let (x_end, y_end) = (x_end.min(w), y_end.min(h));
    let roi = if x_end > x && y_end > y {
        PixelRect::new(x as u32, y as u32, (x_end - x) as u32, (y_end - y) as u32)
    } else {
        PixelRect::default()
    };
    Ok((optimal, roi))
}

/// Mean pixel distance between detected and reprojected corners, averaged
/// per view and then across views.
pub fn mean_reprojection_error(
    k: &Intrinsics,
    d: &Distortion,
    poses: &[Pose],
    object: &[Point3<f64>],
    views: &[Vec<Point2<f64>>],
) -> f64 {
    if views.is_empty() {
        return 0.0;
    }
    let total: f64 = poses
        .iter()
        .zip(views)
        .map(|(pose, view)| {
            let sum: f64 = object
                .iter()
                .zip(view)
                .map(|(obj, img)| (project_point(k, d, pose, obj) - img).norm())
                .sum();
            sum / view.len().max(1) as f64
        })
        .sum();
    total / views.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn truth_k() -> Intrinsics {
        Intrinsics {
            fx: 820.0,
            fy: 800.0,
            cx: 330.0,
            cy: 235.0,
        }
    }

    fn synthetic_view(k: &Intrinsics, d: &Distortion, pose: &Pose) -> Vec<Point2<f64>> {
        CheckerboardSpec::default()
            .object_points()
            .iter()
            .map(|p| project_point(k, d, pose, p))
            .collect()
    }

    fn varied_poses(n: usize) -> Vec<Pose> {
        (0..n)
            .map(|i| {
                let a = i as f64 * 0.6;
                Pose {
                    rvec: Vector3::new(0.35 * a.cos(), 0.3 * a.sin(), 0.1 * (i as f64 - 5.0) / 5.0),
                    tvec: Vector3::new(-70.0 + 4.0 * i as f64, -60.0, 550.0 + 15.0 * i as f64),
                }
            })
            .collect()
    }

    #[test]
    fn recovers_camera_from_varied_views() {
        let d = Distortion {
            k1: -0.12,
            k2: 0.03,
            ..Default::default()
        };
        let views: Vec<_> = varied_poses(12)
            .iter()
            .map(|p| synthetic_view(&truth_k(), &d, p))
            .collect();
        let profile = calibrate_from_views(
            &views,
            (640, 480),
            &CheckerboardSpec::default(),
            &SolveOptions::default(),
        )
        .expect("calibration");
        let k = profile.intrinsics();
        assert_relative_eq!(k.fx, 820.0, max_relative = 1e-3);
        assert_relative_eq!(k.fy, 800.0, max_relative = 1e-3);
        assert_relative_eq!(k.cx, 330.0, epsilon = 0.5);
        assert_relative_eq!(k.cy, 235.0, epsilon = 0.5);
        assert!(profile.mean_error < 1e-3, "mean error {}", profile.mean_error);
        assert_eq!(profile.rvecs.len(), 12);
    }

    #[test]
    fn ten_identical_views_fit_with_near_zero_error() {
        let pose = Pose {
            rvec: Vector3::new(0.25, -0.15, 0.05),
            tvec: Vector3::new(-50.0, -70.0, 600.0),
        };
        let view = synthetic_view(&truth_k(), &Distortion::default(), &pose);
        let views = vec![view; 10];
        let profile = calibrate_from_views(
            &views,
            (640, 480),
            &CheckerboardSpec::default(),
            &SolveOptions::default(),
        )
        .expect("calibration");
        assert!(profile.mean_error < 0.01, "mean error {}", profile.mean_error);
    }

    #[test]
    fn nine_views_are_not_enough() {
        let views: Vec<_> = varied_poses(9)
            .iter()
            .map(|p| synthetic_view(&truth_k(), &Distortion::default(), p))
            .collect();
        let err = calibrate_from_views(
            &views,
            (640, 480),
            &CheckerboardSpec::default(),
            &SolveOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CalibrationError::TooFewViews {
                accepted: 9,
                required: 10
            }
        ));
    }

    #[test]
    fn short_view_is_rejected() {
        let mut views: Vec<_> = varied_poses(10)
            .iter()
            .map(|p| synthetic_view(&truth_k(), &Distortion::default(), p))
            .collect();
        views[3].pop();
        let err = calibrate_from_views(
            &views,
            (640, 480),
            &CheckerboardSpec::default(),
            &SolveOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CalibrationError::InvalidView { index: 3, .. }));
    }

    #[test]
    fn optimal_matrix_without_distortion_keeps_camera() {
        let (opt, roi) =
            optimal_new_camera_matrix(&truth_k(), &Distortion::default(), (640, 480)).unwrap();
        assert_relative_eq!(opt.fx, 820.0, epsilon = 1e-9);
        assert_relative_eq!(opt.cx, 330.0, epsilon = 1e-9);
        assert_eq!(roi, PixelRect::new(0, 0, 639, 479));
    }

    #[test]
    fn barrel_distortion_shrinks_valid_region() {
        let d = Distortion {
            k1: -0.3,
            ..Default::default()
        };
        let (opt, roi) = optimal_new_camera_matrix(&truth_k(), &d, (640, 480)).unwrap();
        assert!(opt.fx < 820.0);
        assert!(roi.x > 0 && roi.y > 0);
        assert!(roi.fits_within(640, 480));
    }

    #[test]
    fn too_few_frames_fail_before_detection() {
        let frames = vec![DynamicImage::new_luma8(32, 32); 9];
        let err = calibrate(&frames, &CheckerboardSpec::default(), &CalibrationParams::default())
            .unwrap_err();
        assert!(matches!(err, CalibrationError::TooFewImages { found: 9, .. }));
    }

    #[test]
    fn blank_frames_detect_nothing() {
        let frames = vec![DynamicImage::new_luma8(64, 64); 10];
        let err = calibrate(&frames, &CheckerboardSpec::default(), &CalibrationParams::default())
            .unwrap_err();
        assert!(matches!(err, CalibrationError::NoBoardDetected { frames: 10 }));
    }
}
