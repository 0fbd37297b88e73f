//! Object-photo side of the motorsichel pipeline.
//!
//! HSV segmentation turns the undistorted object photo into a binary image,
//! contour extraction measures and classifies every outline, the reference
//! transform moves them to an operator-chosen origin and millimeters, and the
//! export writes the DXF drawing and the reference report.
//!
//! ```no_run
//! use std::path::Path;
//!
//! use motorsichel_core::MmPerPx;
//! use motorsichel_measure::{
//!     convert_to_millimeters, export_drawing, extract_contours, find_object_center,
//!     transform_all, ContourParams, DrawingName,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let binary = image::open("binary.png")?.to_luma8();
//! let photo = image::open("object.jpg")?.to_luma8();
//! let k = MmPerPx::new(0.21);
//!
//! let mut set = extract_contours(&binary, &ContourParams::default(), k)?;
//! let origin = find_object_center(&photo);
//! transform_all(&mut set.contours, origin.as_ref())?;
//! convert_to_millimeters(&mut set.contours, k)?;
//! let path = export_drawing(&set.contours, Path::new("result"), &DrawingName::default())?;
//! println!("wrote {}", path.display());
//! # Ok(())
//! # }
//! ```

mod contours;
mod error;
mod export;
mod hough;
mod hsv;
mod morphology;
mod preview;
mod reference;
mod report;
mod segmentation;

pub use contours::{
    correct_diameter, extract_contours, is_hole, measure_contour, Contour, ContourParams,
    ContourSet, Roundness,
};
pub use error::{ContourError, ExportError, ReferenceError};
pub use export::{
    export_drawing, next_free_path, DrawingName, CONTOUR_LAYER, DEFAULT_DRAWING_STEM, HOLE_LAYER,
};
pub use hough::{
    center_region, detect_circles, find_circles, find_object_center, CenterRegion, Circle,
    CircleTuner, HoughParams, TunerStep, DEFAULT_DP, DEFAULT_MIN_DIST, DP_STEP,
};
pub use hsv::{hsv_to_rgb, rgb_to_hsv, to_hsv, HsvImage, HsvRange, HUE_RANGE};
pub use morphology::{apply_morphology, ellipse_5x5, MorphMode};
pub use preview::{PreviewLoop, PreviewStep, StopFlag, DEFAULT_TICK};
pub use reference::{convert_to_millimeters, flip_y, transform_all};
pub use report::{
    annotate_holes, render_report_text, write_reference_report, ReportPaths, ShootMetadata,
};
pub use segmentation::{
    binarize, equalize_rgb, hsv_reference_chart, SegmentationParams, Segmenter,
    BINARY_THRESHOLD,
};
