use motorsichel_core::{sample_bilinear, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Iterative saddle-point refinement settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubPixParams {
    /// Search window is `(2 * half_window + 1)` pixels wide.
    pub half_window: u32,
    pub max_iters: u32,
    /// Stop once the corner moves less than this many pixels.
    pub epsilon: f32,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 5,
            max_iters: 30,
            epsilon: 0.001,
        }
    }
}

/// Refine a corner to sub-pixel accuracy.
///
/// Every window pixel `q` with gradient `g` contributes the constraint
/// `g · (q - c) = 0`: at the true corner, image gradients are orthogonal to
/// the vector from the corner. The Gaussian-weighted normal equations are
/// solved repeatedly until the update falls below `epsilon`. A corner that
/// drifts out of its window keeps its initial position.
pub fn refine_corner(
    img: &GrayImageView<'_>,
    initial: Point2<f32>,
    params: &SubPixParams,
) -> Point2<f32> {
    let win = params.half_window as i32;
    if win == 0 {
        return initial;
    }
    let weights: Vec<f32> = (-win..=win)
        .map(|d| {
            let t = d as f32 / win as f32;
            (-t * t).exp()
        })
        .collect();

    let eps_sq = params.epsilon * params.epsilon;
    let mut c = initial;
    for _ in 0..params.max_iters {
        let (mut a, mut b, mut cc, mut bb1, mut bb2) = (0f32, 0f32, 0f32, 0f32, 0f32);
        for (wy, dy) in weights.iter().zip(-win..=win) {
            for (wx, dx) in weights.iter().zip(-win..=win) {
                let m = wx * wy;
                let (qx, qy) = (c.x + dx as f32, c.y + dy as f32);
                let gx = 0.5 * (sample_bilinear(img, qx + 1.0, qy) - sample_bilinear(img, qx - 1.0, qy));
                let gy = 0.5 * (sample_bilinear(img, qx, qy + 1.0) - sample_bilinear(img, qx, qy - 1.0));
                let (gxx, gxy, gyy) = (gx * gx * m, gx * gy * m, gy * gy * m);
                a += gxx;
                b += gxy;
                cc += gyy;
                bb1 += gxx * qx + gxy * qy;
                bb2 += gxy * qx + gyy * qy;
            }
        }

        let det = a * cc - b * b;
        if det.abs() <= f32::EPSILON * (a * cc).abs().max(1.0) {
            break;
        }
        let next = Point2::new((cc * bb1 - b * bb2) / det, (a * bb2 - b * bb1) / det);
        let step = (next - c).norm_squared();
        c = next;
        if (c.x - initial.x).abs() > win as f32 || (c.y - initial.y).abs() > win as f32 {
            return initial;
        }
        if step < eps_sq {
            break;
        }
    }
    c
}

pub fn refine_corners(
    img: &GrayImageView<'_>,
    corners: &[Point2<f32>],
    params: &SubPixParams,
) -> Vec<Point2<f32>> {
    corners
        .iter()
        .map(|&c| refine_corner(img, c, params))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use motorsichel_core::gray_view;

    // Saddle at (cx, cy), anti-aliased by 8x8 supersampling.
    fn saddle(cx: f32, cy: f32) -> GrayImage {
        GrayImage::from_fn(40, 40, |x, y| {
            let mut acc = 0u32;
            for sy in 0..8 {
                for sx in 0..8 {
                    let px = x as f32 + (sx as f32 + 0.5) / 8.0;
                    let py = y as f32 + (sy as f32 + 0.5) / 8.0;
                    if (px < cx) == (py < cy) {
                        acc += 255;
                    }
                }
            }
            Luma([(acc / 64) as u8])
        })
    }

    #[test]
    fn converges_to_saddle_point() {
        // Pixel centers sit at integer + 0.5 in the supersampled frame.
        let img = saddle(20.3, 19.7);
        let view = gray_view(&img);
        let refined = refine_corner(&view, Point2::new(18.0, 18.0), &SubPixParams::default());
        assert!((refined.x - 19.8).abs() < 0.1, "x = {}", refined.x);
        assert!((refined.y - 19.2).abs() < 0.1, "y = {}", refined.y);
    }

    #[test]
    fn flat_patch_keeps_initial_guess() {
        let img = GrayImage::from_pixel(30, 30, Luma([128]));
        let view = gray_view(&img);
        let p = Point2::new(15.0, 15.0);
        assert_eq!(refine_corner(&view, p, &SubPixParams::default()), p);
    }
}
