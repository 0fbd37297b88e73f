use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the rectangle lies inside an image of the given size.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x.checked_add(self.width).is_some_and(|r| r <= width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= height)
    }
}

/// Millimeters per pixel at the object plane. Always finite and positive.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct MmPerPx(f64);

impl MmPerPx {
    pub fn new(ratio: f64) -> Option<Self> {
        (ratio.is_finite() && ratio > 0.0).then_some(Self(ratio))
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }

    /// Pure linear scaling, no offset.
    #[inline]
    pub fn to_mm(self, px: f64) -> f64 {
        px * self.0
    }

    #[inline]
    pub fn point_to_mm(self, p: &Point2<f64>) -> Point2<f64> {
        Point2::new(p.x * self.0, p.y * self.0)
    }
}

impl TryFrom<f64> for MmPerPx {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("mm/px ratio must be finite and > 0, got {value}"))
    }
}

impl From<MmPerPx> for f64 {
    fn from(value: MmPerPx) -> Self {
        value.0
    }
}

/// Move coordinates into a frame whose origin is `origin`.
///
/// Implemented for single points and, recursively, for nested lists of them.
pub trait Reorigin {
    fn reorigin(&self, origin: &Point2<f64>) -> Self;
}

impl Reorigin for Point2<f64> {
    #[inline]
    fn reorigin(&self, origin: &Point2<f64>) -> Self {
        Point2::new(self.x - origin.x, self.y - origin.y)
    }
}

impl<T: Reorigin> Reorigin for Vec<T> {
    fn reorigin(&self, origin: &Point2<f64>) -> Self {
        self.iter().map(|item| item.reorigin(origin)).collect()
    }
}

impl<T: Reorigin> Reorigin for Option<T> {
    fn reorigin(&self, origin: &Point2<f64>) -> Self {
        self.as_ref().map(|item| item.reorigin(origin))
    }
}

/// Round to a fixed number of decimals (half away from zero).
#[inline]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Snap a pixel coordinate to the integer grid by adding one half and
/// truncating downwards.
#[inline]
pub fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}
