//! The measurement session: one calibration, one shoot, one part.
//!
//! Every stage reads what earlier stages left behind and refuses to run with
//! [`PipelineError::MissingInput`] when something is absent. Each call records
//! a [`StageStatus`] and successful calls queue a [`PipelineEvent`] the host
//! drains with [`MeasurementSession::drain_events`].

use std::fmt;
use std::path::{Path, PathBuf};

use image::{imageops, DynamicImage, GrayImage, RgbImage};
use log::{info, warn};
use motorsichel_calib::{
    calibrate, recover_scale, undistort_and_crop, CalibrationMeta, CalibrationParams,
    CalibrationProfile, CalibrationRecord, CheckerboardSpec, DetectParams, SceneContext,
};
use motorsichel_core::PipelineError;
use motorsichel_measure::{
    convert_to_millimeters, correct_diameter, export_drawing, extract_contours,
    find_object_center, transform_all, write_reference_report, CircleTuner, Contour,
    ContourParams, DrawingName, PreviewLoop, PreviewStep, SegmentationParams, ShootMetadata,
};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::settings::{Settings, Workspace};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Calibration,
    ImageLoad,
    ChessboardImage,
    Binarize,
    Contours,
    Reference,
    DiameterCorrection,
    Export,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Calibration,
        Stage::ImageLoad,
        Stage::ChessboardImage,
        Stage::Binarize,
        Stage::Contours,
        Stage::Reference,
        Stage::DiameterCorrection,
        Stage::Export,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Calibration => "calibration",
            Stage::ImageLoad => "image load",
            Stage::ChessboardImage => "chessboard image",
            Stage::Binarize => "binarize",
            Stage::Contours => "contours",
            Stage::Reference => "reference",
            Stage::DiameterCorrection => "diameter correction",
            Stage::Export => "export",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    #[default]
    NotStarted,
    InProgress,
    Ok,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    CalibrationFinished { mean_error: f64 },
    ImageLoaded { width: u32, height: u32 },
    ChessboardLoaded { mm_per_px: f64, object_distance_mm: f64 },
    BinarizeFinished,
    ContoursFound { count: usize, holes: usize },
    ReferenceSet(Point2<f64>),
    DiameterCorrected { index: usize, diameter_mm: f64 },
    DataExported { drawing: PathBuf, report: PathBuf },
}

/// Files written by [`MeasurementSession::export`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportPaths {
    pub drawing: PathBuf,
    pub report_text: PathBuf,
    pub report_image: PathBuf,
}

pub struct MeasurementSession {
    settings: Settings,
    workspace: Workspace,
    calibration: Option<CalibrationRecord>,
    scene: Option<SceneContext>,
    object_photo: Option<RgbImage>,
    binary: Option<GrayImage>,
    contours: Option<Vec<Contour>>,
    contour_mask: Option<GrayImage>,
    reference: Option<Point2<f64>>,
    segmentation: SegmentationParams,
    name: DrawingName,
    report_stale: bool,
    status: [StageStatus; 8],
    events: Vec<PipelineEvent>,
}

impl MeasurementSession {
    pub fn new(settings: Settings, workspace: Workspace) -> Self {
        let segmentation = SegmentationParams {
            morph: settings.morph_mode,
            ..Default::default()
        };
        Self {
            settings,
            workspace,
            calibration: None,
            scene: None,
            object_photo: None,
            binary: None,
            contours: None,
            contour_mask: None,
            reference: None,
            segmentation,
            name: DrawingName::default(),
            report_stale: false,
            status: [StageStatus::NotStarted; 8],
            events: Vec::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.status[stage as usize]
    }

    pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn calibration(&self) -> Option<&CalibrationRecord> {
        self.calibration.as_ref()
    }

    pub fn scene(&self) -> Option<&SceneContext> {
        self.scene.as_ref()
    }

    pub fn object_photo(&self) -> Option<&RgbImage> {
        self.object_photo.as_ref()
    }

    pub fn binary_image(&self) -> Option<&GrayImage> {
        self.binary.as_ref()
    }

    pub fn contours(&self) -> Option<&[Contour]> {
        self.contours.as_deref()
    }

    /// Outline mask of the last extraction, when the settings ask for one.
    pub fn contour_mask(&self) -> Option<&GrayImage> {
        self.contour_mask.as_ref()
    }

    pub fn reference(&self) -> Option<Point2<f64>> {
        self.reference
    }

    /// A diameter was corrected after the last export.
    pub fn report_stale(&self) -> bool {
        self.report_stale
    }

    pub fn set_part_name(&mut self, name: DrawingName) {
        self.name = name;
    }

    fn begin(&mut self, stage: Stage) {
        self.status[stage as usize] = StageStatus::InProgress;
    }

    fn finish<T>(
        &mut self,
        stage: Stage,
        result: Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        self.status[stage as usize] = match &result {
            Ok(_) => StageStatus::Ok,
            Err(err) => {
                warn!("{stage} failed: {err}");
                StageStatus::Failed
            }
        };
        result
    }

    fn reset(&mut self, stages: &[Stage]) {
        for &stage in stages {
            self.status[stage as usize] = StageStatus::NotStarted;
        }
    }

    fn profile(&self) -> Result<CalibrationProfile, PipelineError> {
        self.calibration
            .as_ref()
            .map(CalibrationRecord::to_profile)
            .ok_or(PipelineError::MissingInput("calibration profile"))
    }

    // Calibration

    /// Calibrate from checkerboard frames and keep the result with its
    /// metadata. Nothing is written to disk; see [`Self::save_calibration`].
    pub fn calibrate(
        &mut self,
        frames: &[DynamicImage],
        board: &CheckerboardSpec,
        meta: &CalibrationMeta,
        params: &CalibrationParams,
    ) -> Result<&CalibrationRecord, PipelineError> {
        self.begin(Stage::Calibration);
        let result = meta
            .check()
            .map_err(PipelineError::from)
            .and_then(|_| calibrate(frames, board, params).map_err(PipelineError::from))
            .and_then(|profile| {
                CalibrationRecord::from_profile(&profile, meta).map_err(PipelineError::from)
            });
        let record = self.finish(Stage::Calibration, result)?;
        self.install_calibration(record);
        self.calibration
            .as_ref()
            .ok_or(PipelineError::MissingInput("calibration profile"))
    }

    /// Use a calibration record saved earlier.
    pub fn load_calibration(&mut self, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        self.begin(Stage::Calibration);
        let result = CalibrationRecord::load(path).map_err(PipelineError::from);
        let record = self.finish(Stage::Calibration, result)?;
        self.install_calibration(record);
        Ok(())
    }

    fn install_calibration(&mut self, record: CalibrationRecord) {
        info!(
            "calibration for {} / {} at {}x{}, mean error {:.4} px",
            record.cam_name,
            record.lens_name,
            record.image_size[0],
            record.image_size[1],
            record.mean_error
        );
        self.events.push(PipelineEvent::CalibrationFinished {
            mean_error: record.mean_error,
        });
        self.calibration = Some(record);
    }

    /// Write the current calibration into the workspace `data/` directory.
    pub fn save_calibration(&self) -> Result<PathBuf, PipelineError> {
        let record = self
            .calibration
            .as_ref()
            .ok_or(PipelineError::MissingInput("calibration profile"))?;
        Ok(record.save_to_dir(self.workspace.data_dir())?)
    }

    // Shoot

    /// Undistort the chessboard photo of the object plane and recover the
    /// object distance and mm/px ratio from it.
    pub fn load_chessboard_image(&mut self, raw: &DynamicImage) -> Result<(), PipelineError> {
        self.begin(Stage::ChessboardImage);
        let result = self.measure_scene(raw);
        let scene = self.finish(Stage::ChessboardImage, result)?;
        self.set_scene(scene);
        Ok(())
    }

    fn measure_scene(&self, raw: &DynamicImage) -> Result<SceneContext, PipelineError> {
        let profile = self.profile()?;
        let rgb = raw.to_rgb8();
        let cropped = undistort_and_crop(&rgb, &profile).ok_or_else(|| {
            PipelineError::InvalidParameter(format!(
                "chessboard photo {:?} cannot be undistorted with a profile for {:?}",
                rgb.dimensions(),
                profile.image_size
            ))
        })?;
        let estimate = recover_scale(
            &DynamicImage::ImageRgb8(cropped.clone()),
            &profile,
            &DetectParams::default(),
        )?;
        Ok(SceneContext::new(
            &estimate,
            rgb.dimensions(),
            cropped.dimensions(),
        ))
    }

    /// Use a scene measured elsewhere. Millimeter values of existing
    /// contours are recomputed on the next reference or export step.
    pub fn set_scene(&mut self, scene: SceneContext) {
        self.events.push(PipelineEvent::ChessboardLoaded {
            mm_per_px: scene.mm_per_px.get(),
            object_distance_mm: scene.object_distance_mm,
        });
        self.scene = Some(scene);
        self.status[Stage::ChessboardImage as usize] = StageStatus::Ok;
    }

    /// Undistort and crop the object photo, then use it.
    pub fn load_object_image(&mut self, raw: &DynamicImage) -> Result<(), PipelineError> {
        self.begin(Stage::ImageLoad);
        let result = self.profile().and_then(|profile| {
            let rgb = raw.to_rgb8();
            undistort_and_crop(&rgb, &profile).ok_or_else(|| {
                PipelineError::InvalidParameter(format!(
                    "object photo {:?} cannot be undistorted with a profile for {:?}",
                    rgb.dimensions(),
                    profile.image_size
                ))
            })
        });
        let photo = self.finish(Stage::ImageLoad, result)?;
        self.set_object_photo(photo);
        Ok(())
    }

    /// Use an already undistorted object photo. Everything derived from a
    /// previous photo is dropped.
    pub fn set_object_photo(&mut self, photo: RgbImage) {
        self.events.push(PipelineEvent::ImageLoaded {
            width: photo.width(),
            height: photo.height(),
        });
        self.object_photo = Some(photo);
        self.clear_binary();
        self.status[Stage::ImageLoad as usize] = StageStatus::Ok;
    }

    // Segmentation

    pub fn segmentation_params(&self) -> &SegmentationParams {
        &self.segmentation
    }

    /// Preview loop over the object photo, starting from the last parameters
    /// used. Hand its result to [`Self::set_binary_image`].
    pub fn segmentation_preview(&mut self) -> Result<PreviewLoop, PipelineError> {
        self.begin(Stage::Binarize);
        match &self.object_photo {
            Some(photo) => Ok(PreviewLoop::new(photo, self.segmentation)),
            None => self.finish(
                Stage::Binarize,
                Err(PipelineError::MissingInput("object photo")),
            ),
        }
    }

    /// Threshold the object photo once with `params`, without a preview.
    pub fn binarize(&mut self, params: SegmentationParams) -> Result<(), PipelineError> {
        self.segmentation = params;
        let mut preview = self.segmentation_preview()?;
        match preview.step() {
            PreviewStep::Rendered(_) => self.set_binary_image(preview.finish(), params),
            PreviewStep::Stopped => self.finish(
                Stage::Binarize,
                Err(PipelineError::MissingInput("thresholded pixels")),
            ),
        }
    }

    /// Accept the binary image a preview loop finished with. An all-black
    /// image means no threshold was ever accepted.
    pub fn set_binary_image(
        &mut self,
        binary: GrayImage,
        params: SegmentationParams,
    ) -> Result<(), PipelineError> {
        self.begin(Stage::Binarize);
        let result = if binary.pixels().all(|p| p[0] == 0) {
            Err(PipelineError::MissingInput("thresholded pixels"))
        } else {
            Ok(())
        };
        self.finish(Stage::Binarize, result)?;
        self.clear_contours();
        self.segmentation = params;
        self.binary = Some(binary);
        self.events.push(PipelineEvent::BinarizeFinished);
        Ok(())
    }

    fn clear_binary(&mut self) {
        self.binary = None;
        self.clear_contours();
        self.reset(&[Stage::Binarize]);
    }

    // Contours

    pub fn find_contours(&mut self) -> Result<&[Contour], PipelineError> {
        self.begin(Stage::Contours);
        let params = ContourParams {
            generate_mask: self.settings.generate_mask,
            ..ContourParams::for_scale(self.settings.scale_factor, self.settings.roundness_threshold)
        };
        let mm_per_px = self.scene.map(|s| s.mm_per_px);
        let result = self
            .binary
            .as_ref()
            .ok_or(PipelineError::MissingInput("binary image"))
            .and_then(|binary| {
                extract_contours(binary, &params, mm_per_px).map_err(PipelineError::from)
            });
        let set = self.finish(Stage::Contours, result)?;

        self.clear_contours();
        let holes = set.contours.iter().filter(|c| c.is_hole).count();
        self.events.push(PipelineEvent::ContoursFound {
            count: set.contours.len(),
            holes,
        });
        self.contour_mask = set.mask;
        self.contours = Some(set.contours);
        self.status[Stage::Contours as usize] = StageStatus::Ok;
        self.contours
            .as_deref()
            .ok_or(PipelineError::MissingInput("contour list"))
    }

    fn clear_contours(&mut self) {
        self.contours = None;
        self.contour_mask = None;
        self.reference = None;
        self.report_stale = false;
        self.reset(&[
            Stage::Contours,
            Stage::Reference,
            Stage::DiameterCorrection,
            Stage::Export,
        ]);
    }

    // Reference

    /// Interactive center search over the object photo.
    pub fn center_tuner(&self) -> Result<CircleTuner, PipelineError> {
        let photo = self
            .object_photo
            .as_ref()
            .ok_or(PipelineError::MissingInput("object photo"))?;
        Ok(CircleTuner::new(&imageops::grayscale(photo)))
    }

    /// Reference on the largest circle near the middle of the object photo.
    pub fn set_reference_auto(&mut self) -> Result<Point2<f64>, PipelineError> {
        self.begin(Stage::Reference);
        let result = self
            .object_photo
            .as_ref()
            .ok_or(PipelineError::MissingInput("object photo"))
            .and_then(|photo| {
                find_object_center(&imageops::grayscale(photo))
                    .ok_or(PipelineError::NoTargetDetected("circle"))
            });
        let center = self.finish(Stage::Reference, result)?;
        self.set_reference(center)?;
        Ok(center)
    }

    /// Reference on the center of hole `index`.
    pub fn set_reference_to_hole(&mut self, index: usize) -> Result<Point2<f64>, PipelineError> {
        self.begin(Stage::Reference);
        let result = self
            .contours
            .as_deref()
            .ok_or(PipelineError::MissingInput("contour list"))
            .and_then(|contours| {
                contours
                    .iter()
                    .find(|c| c.index == index && c.is_hole)
                    .map(|c| c.center_px)
                    .ok_or_else(|| PipelineError::InvalidParameter(format!("no hole {index}")))
            });
        let center = self.finish(Stage::Reference, result)?;
        self.set_reference(center)?;
        Ok(center)
    }

    /// Move every contour to `point` and, when the scale is known, to
    /// millimeters.
    pub fn set_reference(&mut self, point: Point2<f64>) -> Result<(), PipelineError> {
        self.begin(Stage::Reference);
        let mm_per_px = self.scene.map(|s| s.mm_per_px);
        let result = match self.contours.as_mut() {
            None => Err(PipelineError::MissingInput("contour list")),
            Some(contours) => transform_all(contours, Some(&point))
                .and_then(|_| match mm_per_px {
                    Some(k) => convert_to_millimeters(contours, Some(k)),
                    None => Ok(()),
                })
                .map_err(PipelineError::from),
        };
        self.finish(Stage::Reference, result)?;
        self.reference = Some(point);
        self.events.push(PipelineEvent::ReferenceSet(point));
        Ok(())
    }

    // Correction and export

    /// Override the diameter of hole `index`. Returns whether it changed.
    pub fn correct_diameter(
        &mut self,
        index: usize,
        diameter_mm: f64,
    ) -> Result<bool, PipelineError> {
        self.begin(Stage::DiameterCorrection);
        let result = match self.contours.as_mut() {
            None => Err(PipelineError::MissingInput("contour list")),
            Some(contours) => {
                correct_diameter(contours, index, diameter_mm).map_err(PipelineError::from)
            }
        };
        let changed = self.finish(Stage::DiameterCorrection, result)?;
        if changed {
            self.events.push(PipelineEvent::DiameterCorrected { index, diameter_mm });
            if self.status(Stage::Export) == StageStatus::Ok {
                self.report_stale = true;
            }
        }
        Ok(changed)
    }

    fn shoot_metadata(&self) -> ShootMetadata {
        let record = self.calibration.as_ref();
        let meta = record.map(CalibrationRecord::meta);
        let scene = self.scene.as_ref();
        ShootMetadata {
            name: self.name.clone(),
            camera_owner: meta.as_ref().map(|m| m.owner.clone()).unwrap_or_default(),
            camera_name: meta.as_ref().map(|m| m.camera.clone()).unwrap_or_default(),
            lens_name: meta.as_ref().map(|m| m.lens.clone()).unwrap_or_default(),
            focal_length_mm: meta.as_ref().map_or(0.0, |m| m.focal_length_mm),
            scale_factor: self.settings.scale_factor,
            pre_crop: scene.map_or((0, 0), |s| s.pre_crop),
            post_crop: scene.map_or((0, 0), |s| s.post_crop),
            board_cols: record.map_or(0, |r| r.cols),
            board_rows: record.map_or(0, |r| r.rows),
            square_size_mm: record.map_or(0.0, |r| r.square_size),
            mm_per_px: scene.map_or(0.0, |s| s.mm_per_px.get()),
            mean_error: record.map_or(0.0, |r| r.mean_error),
            object_distance_mm: scene.map_or(0.0, |s| s.object_distance_mm),
            reference_point: self.reference,
            roundness_threshold: self.settings.roundness_threshold,
            morph: self.segmentation.morph,
        }
    }

    /// Write the DXF drawing and the reference report into the workspace
    /// `result/` directory.
    pub fn export(&mut self) -> Result<ExportPaths, PipelineError> {
        self.begin(Stage::Export);
        let result = self.write_outputs();
        let paths = self.finish(Stage::Export, result)?;
        self.report_stale = false;
        self.events.push(PipelineEvent::DataExported {
            drawing: paths.drawing.clone(),
            report: paths.report_text.clone(),
        });
        Ok(paths)
    }

    fn write_outputs(&mut self) -> Result<ExportPaths, PipelineError> {
        let k = self
            .scene
            .map(|s| s.mm_per_px)
            .ok_or(PipelineError::MissingInput("mm/px ratio"))?;
        if self.reference.is_none() {
            return Err(PipelineError::MissingInput("reference point"));
        }
        let photo = self
            .object_photo
            .as_ref()
            .ok_or(PipelineError::MissingInput("object photo"))?;
        let contours = self
            .contours
            .as_mut()
            .ok_or(PipelineError::MissingInput("contour list"))?;
        convert_to_millimeters(contours, Some(k))?;

        let dir = self.workspace.result_dir();
        let drawing = export_drawing(contours, &dir, &self.name)?;
        let meta = self.shoot_metadata();
        let contours = self
            .contours
            .as_deref()
            .ok_or(PipelineError::MissingInput("contour list"))?;
        let report = write_reference_report(&dir, contours, photo, &meta)?;
        Ok(ExportPaths {
            drawing,
            report_text: report.text,
            report_image: report.image,
        })
    }

    // Undo

    /// Forget everything but the settings.
    pub fn restart(&mut self) {
        self.calibration = None;
        self.scene = None;
        self.object_photo = None;
        self.clear_binary();
        self.segmentation = SegmentationParams {
            morph: self.settings.morph_mode,
            ..Default::default()
        };
        self.name = DrawingName::default();
        self.events.clear();
        self.status = [StageStatus::NotStarted; 8];
        info!("session restarted");
    }

    /// Drop the calibration and the scale measured with it.
    pub fn undo_calibration_progress(&mut self) {
        self.calibration = None;
        self.scene = None;
        self.reset(&[Stage::Calibration, Stage::ChessboardImage]);
    }

    /// Drop the object photo and everything derived from it. Calibration and
    /// scale are kept.
    pub fn undo_process_progress(&mut self) {
        self.object_photo = None;
        self.clear_binary();
        self.reset(&[Stage::ImageLoad]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use imageproc::drawing::draw_filled_circle_mut;
    use motorsichel_calib::{Pose, ScaleEstimate};
    use motorsichel_core::{round_to, MmPerPx};
    use motorsichel_measure::{HsvRange, MorphMode};
    use nalgebra::Vector3;

    fn session(dir: &Path) -> MeasurementSession {
        let settings = Settings {
            scale_factor: 1.0,
            ..Default::default()
        };
        MeasurementSession::new(settings, Workspace::new(dir))
    }

    fn photo() -> RgbImage {
        let mut img = RgbImage::from_pixel(400, 300, Rgb([10, 10, 10]));
        draw_filled_circle_mut(&mut img, (200, 150), 30, Rgb([250, 250, 250]));
        for y in 40..110 {
            for x in 40..140 {
                img.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
        img
    }

    fn bright() -> SegmentationParams {
        SegmentationParams {
            channel1: HsvRange::new([0, 0, 255], [179, 255, 255]),
            channel2: None,
            morph: MorphMode::None,
        }
    }

    fn scene(k: f64) -> SceneContext {
        let estimate = ScaleEstimate {
            object_distance_mm: 500.0,
            mm_per_px: MmPerPx::new(k).unwrap(),
            pose: Pose {
                rvec: Vector3::zeros(),
                tvec: Vector3::new(0.0, 0.0, 500.0),
            },
        };
        SceneContext::new(&estimate, (400, 300), (400, 300))
    }

    #[test]
    fn stages_refuse_to_run_out_of_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        assert_eq!(
            s.find_contours().unwrap_err(),
            PipelineError::MissingInput("binary image")
        );
        assert_eq!(s.status(Stage::Contours), StageStatus::Failed);
        assert_eq!(
            s.set_reference(Point2::new(1.0, 1.0)).unwrap_err(),
            PipelineError::MissingInput("contour list")
        );
        assert_eq!(
            s.load_object_image(&DynamicImage::new_rgb8(8, 8)).unwrap_err(),
            PipelineError::MissingInput("calibration profile")
        );
        assert_eq!(
            s.export().unwrap_err(),
            PipelineError::MissingInput("mm/px ratio")
        );
        assert_eq!(s.status(Stage::Export), StageStatus::Failed);
        assert!(s.drain_events().is_empty());
    }

    #[test]
    fn blank_binary_is_not_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        let err = s
            .set_binary_image(GrayImage::new(10, 10), bright())
            .unwrap_err();
        assert_eq!(err, PipelineError::MissingInput("thresholded pixels"));
        assert_eq!(s.status(Stage::Binarize), StageStatus::Failed);
    }

    #[test]
    fn full_shoot_exports_and_tracks_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        s.set_scene(scene(0.5));
        s.set_object_photo(photo());
        s.binarize(bright()).unwrap();
        assert_eq!(s.status(Stage::Binarize), StageStatus::Ok);

        let contours = s.find_contours().unwrap();
        assert_eq!(contours.len(), 2);
        let hole = contours.iter().find(|c| c.is_hole).expect("disk").clone();
        assert!(hole.diameter_mm.is_some());

        let center = s.set_reference_auto().unwrap();
        assert!((center.x - 200.0).abs() <= 3.0 && (center.y - 150.0).abs() <= 3.0);
        s.set_reference_to_hole(hole.index).unwrap();
        let moved = s.contours().unwrap().iter().find(|c| c.is_hole).unwrap();
        assert_eq!(moved.center_mm, Some(Point2::new(0.0, 0.0)));

        let paths = s.export().unwrap();
        assert!(paths.drawing.ends_with("result/AVL_motorsichel.dxf"));
        assert!(paths.report_text.ends_with("result/reference.txt"));
        assert!(paths.report_image.exists());
        assert!(!s.report_stale());

        assert!(s.correct_diameter(hole.index, 31.25).unwrap());
        assert!(s.report_stale());
        assert!(!s.correct_diameter(hole.index, 31.25).unwrap());

        let events = s.drain_events();
        assert!(matches!(events[0], PipelineEvent::ChessboardLoaded { .. }));
        assert!(events.contains(&PipelineEvent::BinarizeFinished));
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::ContoursFound { count: 2, holes: 1 })));
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::DataExported { .. })));
        assert_eq!(
            events.last(),
            Some(&PipelineEvent::DiameterCorrected {
                index: hole.index,
                diameter_mm: 31.25
            })
        );
    }

    #[test]
    fn rescaled_scene_rescales_hole_diameters() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        s.set_scene(scene(0.5));
        s.set_object_photo(photo());
        s.binarize(bright()).unwrap();
        let hole = s
            .find_contours()
            .unwrap()
            .iter()
            .find(|c| c.is_hole)
            .expect("disk")
            .clone();
        assert_eq!(
            hole.diameter_mm,
            Some(round_to(hole.average_diameter_px * 0.5, 2))
        );

        s.set_scene(scene(1.0));
        s.set_reference_to_hole(hole.index).unwrap();
        let rescaled = s.contours().unwrap().iter().find(|c| c.is_hole).unwrap();
        assert_eq!(
            rescaled.diameter_mm,
            Some(round_to(hole.average_diameter_px, 2))
        );
        assert_eq!(rescaled.deviation_mm, Some(round_to(hole.deviation_px, 2)));
    }

    #[test]
    fn new_photo_invalidates_downstream_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        s.set_object_photo(photo());
        s.binarize(bright()).unwrap();
        s.find_contours().unwrap();
        assert_eq!(s.status(Stage::Contours), StageStatus::Ok);

        s.set_object_photo(photo());
        assert!(s.binary_image().is_none() && s.contours().is_none());
        assert_eq!(s.status(Stage::Binarize), StageStatus::NotStarted);
        assert_eq!(s.status(Stage::Contours), StageStatus::NotStarted);

        s.undo_process_progress();
        assert!(s.object_photo().is_none());
        assert_eq!(s.status(Stage::ImageLoad), StageStatus::NotStarted);

        s.set_scene(scene(0.3));
        s.undo_calibration_progress();
        assert!(s.scene().is_none());
        s.restart();
        assert!(Stage::ALL
            .iter()
            .all(|&stage| s.status(stage) == StageStatus::NotStarted));
    }

    #[test]
    fn blank_pixels_stay_dark_after_binarize() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session(dir.path());
        s.set_object_photo(photo());
        s.binarize(bright()).unwrap();
        let bin = s.binary_image().unwrap();
        assert_eq!(bin.get_pixel(200, 150), &Luma([255]));
        assert_eq!(bin.get_pixel(5, 5), &Luma([0]));
    }
}
