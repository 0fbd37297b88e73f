//! 8-bit HSV with hue in `0..180`, saturation and value in `0..=255`.

use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Three-channel image holding `[h, s, v]` per pixel.
pub type HsvImage = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// Largest hue value plus one.
pub const HUE_RANGE: u8 = 180;

#[inline]
fn round_u8(v: f32) -> u8 {
    (v + 0.5).floor().clamp(0.0, 255.0) as u8
}

pub fn rgb_to_hsv(px: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = px.map(f32::from);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;
    if v == 0.0 {
        return [0, 0, 0];
    }
    let s = round_u8(255.0 * diff / v);
    if diff == 0.0 {
        return [0, s, v as u8];
    }
    // Degrees halved so the full circle fits a byte.
    let mut h = if v == r {
        30.0 * (g - b) / diff
    } else if v == g {
        60.0 + 30.0 * (b - r) / diff
    } else {
        120.0 + 30.0 * (r - g) / diff
    };
    if h < 0.0 {
        h += f32::from(HUE_RANGE);
    }
    let mut h = round_u8(h);
    if h >= HUE_RANGE {
        h = 0;
    }
    [h, s, v as u8]
}

pub fn hsv_to_rgb(px: [u8; 3]) -> [u8; 3] {
    let h = f32::from(px[0] % HUE_RANGE) * 2.0 / 60.0;
    let s = f32::from(px[1]) / 255.0;
    let v = f32::from(px[2]);
    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match sector as u32 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    [round_u8(r), round_u8(g), round_u8(b)]
}

pub fn to_hsv(img: &RgbImage) -> HsvImage {
    let (w, h) = img.dimensions();
    HsvImage::from_fn(w, h, |x, y| Rgb(rgb_to_hsv(img.get_pixel(x, y).0)))
}

/// Inclusive lower/upper bounds on each HSV channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl Default for HsvRange {
    fn default() -> Self {
        Self {
            lower: [0, 0, 0],
            upper: [HUE_RANGE - 1, 255, 255],
        }
    }
}

impl HsvRange {
    pub fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    #[inline]
    pub fn contains(&self, px: [u8; 3]) -> bool {
        (0..3).all(|c| self.lower[c] <= px[c] && px[c] <= self.upper[c])
    }

    /// 255 where the pixel lies inside the range, 0 elsewhere.
    pub fn mask(&self, hsv: &HsvImage) -> GrayImage {
        let (w, h) = hsv.dimensions();
        GrayImage::from_fn(w, h, |x, y| {
            Luma([if self.contains(hsv.get_pixel(x, y).0) { 255 } else { 0 }])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primaries_map_to_half_degree_hues() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv([255, 255, 0]), [30, 255, 255]);
        assert_eq!(rgb_to_hsv([128, 128, 128]), [0, 0, 128]);
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
    }

    #[test]
    fn magenta_wraps_below_full_circle() {
        let [h, s, v] = rgb_to_hsv([255, 0, 255]);
        assert_eq!((h, s, v), (150, 255, 255));
        let [h, ..] = rgb_to_hsv([255, 0, 1]);
        assert!(h < HUE_RANGE);
    }

    #[test]
    fn pure_colors_survive_a_round_trip() {
        for rgb in [[255, 0, 0], [0, 255, 0], [0, 0, 255], [255, 255, 255], [0, 255, 255]] {
            assert_eq!(hsv_to_rgb(rgb_to_hsv(rgb)), rgb);
        }
    }

    #[test]
    fn range_bounds_are_inclusive() {
        let range = HsvRange::new([10, 50, 50], [20, 200, 200]);
        assert!(range.contains([10, 50, 50]));
        assert!(range.contains([20, 200, 200]));
        assert!(!range.contains([9, 50, 50]));
        assert!(!range.contains([20, 201, 200]));
    }
}
