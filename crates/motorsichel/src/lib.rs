//! High-level facade for the `motorsichel-*` workspace.
//!
//! This crate provides:
//! - re-exports of the stage crates (`core`, `calib`, `measure`),
//! - [`MeasurementSession`], the pipeline context that runs the stages in
//!   order and tracks their status,
//! - the persisted operator [`Settings`] and the [`Workspace`] layout,
//! - photo loading helpers that apply the settings scale factor.
//!
//! ## Quickstart
//!
//! ```no_run
//! use motorsichel::{io, MeasurementSession, Settings, Workspace};
//! use motorsichel::measure::{HsvRange, SegmentationParams};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let workspace = Workspace::new("shoot");
//! let settings = Settings::load_or_default(&workspace)?;
//! let scale = settings.scale_factor;
//! let mut session = MeasurementSession::new(settings, workspace);
//!
//! session.load_calibration("shoot/data/WorCanonEF5_1920x1080_calData.json")?;
//! session.load_chessboard_image(&io::load_image("board.jpg", scale)?)?;
//! session.load_object_image(&io::load_image("part.jpg", scale)?)?;
//! session.binarize(SegmentationParams {
//!     channel1: HsvRange::new([0, 0, 200], [179, 60, 255]),
//!     ..Default::default()
//! })?;
//! session.find_contours()?;
//! session.set_reference_auto()?;
//! let out = session.export()?;
//! println!("{}", out.drawing.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `motorsichel::core`: units, reference transforms, error taxonomy, logger.
//! - `motorsichel::calib`: checkerboard calibration, undistortion, scale recovery.
//! - `motorsichel::measure`: segmentation, contours, center search, export.

pub use motorsichel_calib as calib;
pub use motorsichel_core as core;
pub use motorsichel_measure as measure;

pub use motorsichel_core::PipelineError;

pub mod io;
mod session;
mod settings;

pub use session::{ExportPaths, MeasurementSession, PipelineEvent, Stage, StageStatus};
pub use settings::{Settings, SettingsError, Workspace, SETTINGS_FILE};
