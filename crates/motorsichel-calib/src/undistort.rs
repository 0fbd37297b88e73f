use image::{imageops, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_with, Interpolation};
use log::warn;

use crate::CalibrationProfile;

/// Remove lens distortion into the optimal camera and crop to the valid
/// region of interest.
///
/// Returns `None` when the frame resolution does not match the profile or the
/// profile cannot describe a valid crop.
pub fn undistort_and_crop(image: &RgbImage, profile: &CalibrationProfile) -> Option<RgbImage> {
    if image.dimensions() != profile.image_size {
        warn!(
            "frame is {:?}, calibration profile was computed at {:?}",
            image.dimensions(),
            profile.image_size
        );
        return None;
    }
    let (k, optimal, d) = (
        profile.intrinsics(),
        profile.optimal_intrinsics(),
        profile.distortion,
    );
    let roi = profile.roi;
    if !k.is_valid() || !optimal.is_valid() || roi.is_empty() {
        return None;
    }
    if !roi.fits_within(image.width(), image.height()) {
        return None;
    }

    // Output pixel -> optimal normalized ray -> distorted source pixel.
    let undistorted = warp_with(
        image,
        move |u, v| {
            let x = (u as f64 - optimal.cx) / optimal.fx;
            let y = (v as f64 - optimal.cy) / optimal.fy;
            let (xd, yd) = d.distort(x, y);
            let src = k.to_pixel(xd, yd);
            (src.x as f32, src.y as f32)
        },
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
    );
    Some(imageops::crop_imm(&undistorted, roi.x, roi.y, roi.width, roi.height).to_image())
}
