use image::DynamicImage;
use imageproc::filter::median_filter;
use log::info;
use motorsichel_core::MmPerPx;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::camera::Pose;
use crate::pose::solve_pnp;
use crate::{detect_checkerboard, CalibrationProfile, CheckerboardSpec, DetectParams, ScaleError};

/// Distance and scale measured from a checkerboard lying on the object plane.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScaleEstimate {
    /// Norm of the board translation, in millimeters.
    pub object_distance_mm: f64,
    pub mm_per_px: MmPerPx,
    pub pose: Pose,
}

/// Per-shoot scalars, fixed for the rest of a session.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneContext {
    pub object_distance_mm: f64,
    pub mm_per_px: MmPerPx,
    /// Object photo `(width, height)` before undistortion and crop.
    pub pre_crop: (u32, u32),
    pub post_crop: (u32, u32),
}

impl SceneContext {
    pub fn new(estimate: &ScaleEstimate, pre_crop: (u32, u32), post_crop: (u32, u32)) -> Self {
        Self {
            object_distance_mm: estimate.object_distance_mm,
            mm_per_px: estimate.mm_per_px,
            pre_crop,
            post_crop,
        }
    }
}

/// mm/px from two known spans of the detected grid: from the origin corner
/// along the fast index and along the slow index, averaged.
pub fn mm_per_px_from_grid(points: &[Point2<f64>], board: &CheckerboardSpec) -> Option<MmPerPx> {
    if points.len() != board.point_count() {
        return None;
    }
    let spans = board.scale_spans();
    let origin = points[spans.origin];
    let px_rows = (points[spans.along_rows] - origin).norm();
    let px_cols = (points[spans.along_cols] - origin).norm();
    let mm_rows = spans.along_rows_squares as f64 * board.square_size_mm;
    let mm_cols = spans.along_cols_squares as f64 * board.square_size_mm;
    if px_rows <= f64::EPSILON || px_cols <= f64::EPSILON {
        return None;
    }
    MmPerPx::new(0.5 * (mm_rows / px_rows + mm_cols / px_cols))
}

/// Detect the checkerboard in an undistorted, cropped scene photo and derive
/// the object distance and mm/px ratio.
///
/// The photo is median filtered (3x3) before detection. The pose is solved
/// with the profile's optimal intrinsics.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(photo, profile, params), fields(width = photo.width(), height = photo.height()))
)]
pub fn recover_scale(
    photo: &DynamicImage,
    profile: &CalibrationProfile,
    params: &DetectParams,
) -> Result<ScaleEstimate, ScaleError> {
    let k = profile.optimal_intrinsics();
    if !k.is_valid() {
        return Err(ScaleError::MissingCalibration);
    }
    let gray = median_filter(&photo.to_luma8(), 1, 1);
    let board = &profile.board;
    let corners =
        detect_checkerboard(&gray, board, params).ok_or(ScaleError::NoCheckerboard)?;
    let pose = solve_pnp(&board.object_points(), &corners, &k, &profile.distortion)
        .ok_or(ScaleError::PoseFailed)?;
    let mm_per_px = mm_per_px_from_grid(&corners, board).ok_or(ScaleError::DegenerateSpan)?;

    let estimate = ScaleEstimate {
        object_distance_mm: pose.distance(),
        mm_per_px,
        pose,
    };
    info!(
        "object distance {:.1} mm, {:.5} mm/px",
        estimate.object_distance_mm,
        mm_per_px.get()
    );
    Ok(estimate)
}
