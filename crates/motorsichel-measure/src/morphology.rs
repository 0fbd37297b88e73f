use image::{GrayImage, Luma};
use imageproc::morphology::{
    grayscale_close, grayscale_dilate, grayscale_erode, grayscale_open, Mask,
};
use serde::{Deserialize, Serialize};

/// Post-threshold morphology applied to each channel mask.
///
/// Stored as its integer code `0..=4` in settings files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MorphMode {
    None,
    #[default]
    Dilate,
    Erode,
    Open,
    Close,
}

impl MorphMode {
    pub fn label(self) -> &'static str {
        match self {
            MorphMode::None => "none",
            MorphMode::Dilate => "dilate",
            MorphMode::Erode => "erode",
            MorphMode::Open => "open",
            MorphMode::Close => "close",
        }
    }
}

impl TryFrom<u8> for MorphMode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => MorphMode::None,
            1 => MorphMode::Dilate,
            2 => MorphMode::Erode,
            3 => MorphMode::Open,
            4 => MorphMode::Close,
            other => return Err(format!("morphology mode must be 0..=4, got {other}")),
        })
    }
}

impl From<MorphMode> for u8 {
    fn from(mode: MorphMode) -> Self {
        mode as u8
    }
}

impl std::fmt::Display for MorphMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// 5x5 elliptical structuring element.
///
/// ```text
/// . . # . .
/// # # # # #
/// # # # # #
/// # # # # #
/// . . # . .
/// ```
pub fn ellipse_5x5() -> Mask {
    let shape = GrayImage::from_fn(5, 5, |x, y| {
        let on = (1..=3).contains(&y) || x == 2;
        Luma([if on { 255 } else { 0 }])
    });
    Mask::from_image(&shape, 2, 2)
}

pub fn apply_morphology(mask: &GrayImage, mode: MorphMode) -> GrayImage {
    let element = ellipse_5x5();
    match mode {
        MorphMode::None => mask.clone(),
        MorphMode::Dilate => grayscale_dilate(mask, &element),
        MorphMode::Erode => grayscale_erode(mask, &element),
        MorphMode::Open => grayscale_open(mask, &element),
        MorphMode::Close => grayscale_close(mask, &element),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_dot() -> GrayImage {
        let mut img = GrayImage::new(11, 11);
        img.put_pixel(5, 5, Luma([255]));
        img
    }

    #[test]
    fn codes_round_trip_and_reject_out_of_range() {
        for code in 0..=4u8 {
            let mode = MorphMode::try_from(code).unwrap();
            assert_eq!(u8::from(mode), code);
        }
        assert!(MorphMode::try_from(5).is_err());
        assert_eq!(MorphMode::default(), MorphMode::Dilate);
    }

    #[test]
    fn dilation_stamps_the_ellipse() {
        let out = apply_morphology(&single_dot(), MorphMode::Dilate);
        assert_eq!(out.get_pixel(5, 3)[0], 255);
        assert_eq!(out.get_pixel(3, 5)[0], 255);
        assert_eq!(out.get_pixel(4, 4)[0], 255);
        assert_eq!(out.get_pixel(3, 3)[0], 0);
        let lit = out.pixels().filter(|p| p[0] == 255).count();
        assert_eq!(lit, 17);
    }

    #[test]
    fn opening_removes_specks() {
        let out = apply_morphology(&single_dot(), MorphMode::Open);
        assert!(out.pixels().all(|p| p[0] == 0));
        let out = apply_morphology(&single_dot(), MorphMode::None);
        assert_eq!(out, single_dot());
    }
}
