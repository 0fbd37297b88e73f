//! Camera calibration for the motorsichel pipeline.
//!
//! The crate covers everything between raw checkerboard photos and a metric
//! image plane:
//!
//! - ChESS corner detection and grid assembly into board order,
//! - intrinsic and distortion estimation with a reprojection-error refinement,
//! - undistortion into the optimal camera with a crop to the valid region,
//! - checkerboard pose and mm/px recovery from a photo of the object plane,
//! - JSON calibration records keyed by owner, camera, lens and resolution.
//!
//! ```no_run
//! use motorsichel_calib::{calibrate, CalibrationParams, CheckerboardSpec};
//!
//! let frames: Vec<image::DynamicImage> = Vec::new();
//! let board = CheckerboardSpec::default();
//! match calibrate(&frames, &board, &CalibrationParams::default()) {
//!     Ok(profile) => println!("mean error {:.3} px", profile.mean_error),
//!     Err(err) => eprintln!("{err}"),
//! }
//! ```

mod board;
mod calibrate;
mod camera;
mod detect;
mod error;
mod grid;
mod lm;
mod pose;
mod record;
mod scale;
mod subpix;
mod undistort;

pub use board::{CheckerboardSpec, ScaleSpans};
pub use calibrate::{
    calibrate, calibrate_from_views, mean_reprojection_error, optimal_new_camera_matrix,
    CalibrationParams, CalibrationProfile, MIN_CALIBRATION_VIEWS,
};
pub use camera::{project_point, undistort_to_normalized, Distortion, Intrinsics, Pose};
pub use detect::{detect_checkerboard, detect_chess_corners, DetectParams};
pub use error::{CalibrationError, RecordError, ScaleError};
pub use grid::{assemble_grid, ChessCorner, GridParams};
pub use lm::SolveOptions;
pub use pose::solve_pnp;
pub use record::{CalibrationMeta, CalibrationRecord};
pub use scale::{mm_per_px_from_grid, recover_scale, ScaleEstimate, SceneContext};
pub use subpix::{refine_corner, refine_corners, SubPixParams};
pub use undistort::undistort_and_crop;
