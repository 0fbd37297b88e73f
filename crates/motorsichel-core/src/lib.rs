//! Core types shared by every stage of the motorsichel measurement pipeline.
//!
//! Nothing in here knows about checkerboards, contours or drawings. The crate
//! holds the unit and coordinate primitives, a lightweight grayscale view with
//! bilinear sampling, the normalized DLT homography and the error taxonomy the
//! stage crates convert into.

mod error;
mod geometry;
mod homography;
mod image;
mod logger;

pub use error::PipelineError;
pub use geometry::{round_half_up, round_to, MmPerPx, PixelRect, Reorigin};
pub use homography::{estimate_homography, Homography};
pub use image::{gray_view, sample_bilinear, GrayImageView};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};
