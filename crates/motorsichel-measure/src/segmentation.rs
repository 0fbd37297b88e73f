use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::drawing::draw_line_segment_mut;
use serde::{Deserialize, Serialize};

use crate::hsv::{hsv_to_rgb, to_hsv, HsvImage, HsvRange, HUE_RANGE};
use crate::morphology::{apply_morphology, MorphMode};

/// Mask level above which a pixel counts as foreground.
pub const BINARY_THRESHOLD: u8 = 120;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationParams {
    pub channel1: HsvRange,
    /// Second range, OR-ed into the first when set (extended mode).
    pub channel2: Option<HsvRange>,
    pub morph: MorphMode,
}

/// Equalize each RGB channel independently.
pub fn equalize_rgb(img: &RgbImage) -> RgbImage {
    let (w, h) = img.dimensions();
    let channels: Vec<GrayImage> = (0..3)
        .map(|c| {
            let plane = GrayImage::from_fn(w, h, |x, y| Luma([img.get_pixel(x, y)[c]]));
            equalize_histogram(&plane)
        })
        .collect();
    RgbImage::from_fn(w, h, |x, y| {
        Rgb([
            channels[0].get_pixel(x, y)[0],
            channels[1].get_pixel(x, y)[0],
            channels[2].get_pixel(x, y)[0],
        ])
    })
}

/// Hard threshold at [`BINARY_THRESHOLD`]: strictly above becomes 255.
pub fn binarize(mask: &GrayImage) -> GrayImage {
    let (w, h) = mask.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        Luma([if mask.get_pixel(x, y)[0] > BINARY_THRESHOLD { 255 } else { 0 }])
    })
}

/// Object photo prepared once for repeated HSV thresholding.
#[derive(Clone, Debug)]
pub struct Segmenter {
    equalized: RgbImage,
    hsv: HsvImage,
}

impl Segmenter {
    pub fn new(object: &RgbImage) -> Self {
        let equalized = equalize_rgb(object);
        let hsv = to_hsv(&equalized);
        Self { equalized, hsv }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.hsv.dimensions()
    }

    pub fn equalized(&self) -> &RgbImage {
        &self.equalized
    }

    /// Channel 1 range mask, morphology applied, OR-ed with the channel 2 mask
    /// (morphology applied separately) in extended mode.
    pub fn mask(&self, params: &SegmentationParams) -> GrayImage {
        let mut mask = apply_morphology(&params.channel1.mask(&self.hsv), params.morph);
        if let Some(range) = params.channel2 {
            let second = apply_morphology(&range.mask(&self.hsv), params.morph);
            for (a, b) in mask.pixels_mut().zip(second.pixels()) {
                a[0] |= b[0];
            }
        }
        mask
    }

    /// The equalized photo with everything outside `mask` blacked out.
    pub fn masked(&self, mask: &GrayImage) -> RgbImage {
        let mut out = self.equalized.clone();
        for (px, m) in out.pixels_mut().zip(mask.pixels()) {
            if m[0] == 0 {
                *px = Rgb([0, 0, 0]);
            }
        }
        out
    }
}

const CHART_W: u32 = 540;
const CHART_H: u32 = 256;
const MARGIN_H: u32 = 90;
const MARGIN_V: u32 = 56;

/// Hue (x, three columns per step over `0..180`) against saturation
/// (y, `0..=255`) at full value, with axis ticks every 30 hue and 50
/// saturation steps.
pub fn hsv_reference_chart() -> RgbImage {
    let white = Rgb([255u8, 255, 255]);
    let mut chart = RgbImage::new(CHART_W + 2 * MARGIN_H, CHART_H + 2 * MARGIN_V);
    for x in 0..CHART_W {
        let hue = (x / 3).min(u32::from(HUE_RANGE) - 1) as u8;
        for s in 0..CHART_H {
            chart.put_pixel(MARGIN_H + x, MARGIN_V + s, Rgb(hsv_to_rgb([hue, s as u8, 255])));
        }
    }

    let (left, right) = (MARGIN_H as f32, (MARGIN_H + CHART_W) as f32);
    let (top, bottom) = (MARGIN_V as f32, (MARGIN_V + CHART_H) as f32);
    draw_line_segment_mut(&mut chart, (left - 15.0, bottom), (right + 15.0, bottom), white);
    draw_line_segment_mut(&mut chart, (left, bottom + 15.0), (left, top - 15.0), white);
    for hue in (0..=u32::from(HUE_RANGE)).step_by(30) {
        let x = left + (hue * 3) as f32;
        draw_line_segment_mut(&mut chart, (x, bottom - 5.0), (x, bottom + 5.0), white);
    }
    for s in (0..CHART_H).step_by(50) {
        let y = top + s as f32;
        draw_line_segment_mut(&mut chart, (left - 5.0, y), (left + 5.0, y), white);
    }
    chart
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hsv::rgb_to_hsv;

    fn two_patches() -> RgbImage {
        // Left half red, right half green.
        RgbImage::from_fn(20, 10, |x, _| {
            if x < 10 {
                Rgb([200, 20, 20])
            } else {
                Rgb([20, 200, 20])
            }
        })
    }

    fn plain(params: SegmentationParams) -> SegmentationParams {
        SegmentationParams {
            morph: MorphMode::None,
            ..params
        }
    }

    #[test]
    fn union_mode_keeps_pixels_from_either_channel() {
        // Build the HSV image directly so the range edges are exact.
        let rgb = two_patches();
        let seg = Segmenter {
            equalized: rgb.clone(),
            hsv: to_hsv(&rgb),
        };
        let red = rgb_to_hsv([200, 20, 20]);
        let green = rgb_to_hsv([20, 200, 20]);
        let only_red = plain(SegmentationParams {
            channel1: HsvRange::new(red, red),
            ..Default::default()
        });
        let mask = seg.mask(&only_red);
        assert_eq!(mask.get_pixel(0, 0)[0], 255);
        assert_eq!(mask.get_pixel(15, 0)[0], 0);

        let both = plain(SegmentationParams {
            channel1: HsvRange::new(red, red),
            channel2: Some(HsvRange::new(green, green)),
            ..Default::default()
        });
        let mask = seg.mask(&both);
        assert!(mask.pixels().all(|p| p[0] == 255));

        let shifted = [green[0] + 1, green[1], green[2]];
        let miss = plain(SegmentationParams {
            channel1: HsvRange::new(red, red),
            channel2: Some(HsvRange::new(shifted, shifted)),
            ..Default::default()
        });
        assert_eq!(seg.mask(&miss).get_pixel(15, 0)[0], 0);
    }

    #[test]
    fn masked_preview_blacks_out_background() {
        let seg = Segmenter::new(&two_patches());
        let mut mask = GrayImage::new(20, 10);
        mask.put_pixel(3, 3, Luma([255]));
        let preview = seg.masked(&mask);
        assert_eq!(preview.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(preview.get_pixel(3, 3), seg.equalized().get_pixel(3, 3));
    }

    #[test]
    fn binarize_is_strictly_above_threshold() {
        let mask = GrayImage::from_fn(3, 1, |x, _| Luma([[119, 120, 121][x as usize]]));
        let bin = binarize(&mask);
        assert_eq!(
            bin.pixels().map(|p| p[0]).collect::<Vec<_>>(),
            vec![0, 0, 255]
        );
    }

    #[test]
    fn chart_has_hue_on_x_and_saturation_on_y() {
        let chart = hsv_reference_chart();
        assert_eq!(chart.dimensions(), (720, 368));
        // Zero saturation row is white whatever the hue.
        assert_eq!(chart.get_pixel(MARGIN_H + 200, MARGIN_V), &Rgb([255, 255, 255]));
        let full = chart.get_pixel(MARGIN_H + 1, MARGIN_V + 255);
        assert_eq!(rgb_to_hsv(full.0)[0], 0);
        let green = chart.get_pixel(MARGIN_H + 181, MARGIN_V + 255);
        assert_eq!(rgb_to_hsv(green.0), [60, 255, 255]);
    }
}
