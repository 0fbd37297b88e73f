//! Persisted calibration records.
//!
//! A record is a flat JSON object carrying the calibration profile together
//! with the owner, camera and lens it was made for. Files are named after
//! that metadata and the frame resolution so several setups can share one
//! directory.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;
use motorsichel_core::PixelRect;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::Distortion;
use crate::{CalibrationProfile, CheckerboardSpec, RecordError};

/// Who and what a calibration was made for.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMeta {
    pub owner: String,
    pub camera: String,
    pub lens: String,
    pub focal_length_mm: f64,
    /// Factor the calibration images were resized by before detection.
    pub scale_factor: f64,
}

impl CalibrationMeta {
    /// Owner, camera and lens must be non-empty, the focal length positive
    /// and the scale factor in `(0, 1]`.
    pub fn check(&self) -> Result<(), RecordError> {
        if self.owner.trim().is_empty() {
            return Err(RecordError::MissingMetadata("owner"));
        }
        if self.camera.trim().is_empty() {
            return Err(RecordError::MissingMetadata("camera name"));
        }
        if self.lens.trim().is_empty() {
            return Err(RecordError::MissingMetadata("lens name"));
        }
        if !(self.focal_length_mm.is_finite() && self.focal_length_mm > 0.0) {
            return Err(RecordError::MissingMetadata("focal length"));
        }
        if !(self.scale_factor > 0.0 && self.scale_factor <= 1.0) {
            return Err(RecordError::MissingMetadata("scale factor"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub cam_name: String,
    pub lens_name: String,
    pub owner: String,
    pub foc_len: f64,
    pub scale: f64,
    pub mtx: [[f64; 3]; 3],
    pub new_mtx: [[f64; 3]; 3],
    /// `[k1, k2, p1, p2, k3]`
    pub dist: [f64; 5],
    pub rvecs: Vec<[f64; 3]>,
    pub tvecs: Vec<[f64; 3]>,
    /// `[x, y, width, height]`
    pub roi: [u32; 4],
    pub square_size: f64,
    pub mean_error: f64,
    pub rows: u32,
    pub cols: u32,
    pub image_size: [u32; 2],
}

fn matrix_rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    let mut out = [[0.0; 3]; 3];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = m[(r, c)];
        }
    }
    out
}

fn rows_matrix(rows: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::from_fn(|r, c| rows[r][c])
}

fn prefix(s: &str, n: usize) -> String {
    s.trim().chars().take(n).collect()
}

impl CalibrationRecord {
    /// Bundle a profile with its metadata. Owner, camera and lens are required.
    pub fn from_profile(
        profile: &CalibrationProfile,
        meta: &CalibrationMeta,
    ) -> Result<Self, RecordError> {
        meta.check()?;
        let roi = profile.roi;
        Ok(Self {
            cam_name: meta.camera.trim().to_owned(),
            lens_name: meta.lens.trim().to_owned(),
            owner: meta.owner.trim().to_owned(),
            foc_len: meta.focal_length_mm,
            scale: meta.scale_factor,
            mtx: matrix_rows(&profile.camera_matrix),
            new_mtx: matrix_rows(&profile.optimal_matrix),
            dist: profile.distortion.coefficients(),
            rvecs: profile.rvecs.iter().map(|v| [v.x, v.y, v.z]).collect(),
            tvecs: profile.tvecs.iter().map(|v| [v.x, v.y, v.z]).collect(),
            roi: [roi.x, roi.y, roi.width, roi.height],
            square_size: profile.board.square_size_mm,
            mean_error: profile.mean_error,
            rows: profile.board.rows,
            cols: profile.board.cols,
            image_size: [profile.image_size.0, profile.image_size.1],
        })
    }

    pub fn meta(&self) -> CalibrationMeta {
        CalibrationMeta {
            owner: self.owner.clone(),
            camera: self.cam_name.clone(),
            lens: self.lens_name.clone(),
            focal_length_mm: self.foc_len,
            scale_factor: self.scale,
        }
    }

    pub fn to_profile(&self) -> CalibrationProfile {
        let vectors = |vs: &[[f64; 3]]| -> Vec<Vector3<f64>> {
            vs.iter().map(|v| Vector3::new(v[0], v[1], v[2])).collect()
        };
        CalibrationProfile {
            image_size: (self.image_size[0], self.image_size[1]),
            camera_matrix: rows_matrix(&self.mtx),
            optimal_matrix: rows_matrix(&self.new_mtx),
            distortion: Distortion::from_coefficients(self.dist),
            rvecs: vectors(&self.rvecs),
            tvecs: vectors(&self.tvecs),
            roi: PixelRect::new(self.roi[0], self.roi[1], self.roi[2], self.roi[3]),
            mean_error: self.mean_error,
            board: CheckerboardSpec {
                rows: self.rows,
                cols: self.cols,
                square_size_mm: self.square_size,
            },
        }
    }

    /// `<owner[..3]><camera[..5]><lens[..3]>_<w>x<h>_calData.json`
    pub fn file_name(&self) -> String {
        format!(
            "{}{}{}_{}x{}_calData.json",
            prefix(&self.owner, 3),
            prefix(&self.cam_name, 5),
            prefix(&self.lens_name, 3),
            self.image_size[0],
            self.image_size[1]
        )
    }

    /// Write the record into `dir` under [`Self::file_name`]. The file is
    /// written next to its destination first and renamed into place.
    pub fn save_to_dir(&self, dir: impl AsRef<Path>) -> Result<PathBuf, RecordError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        tmp.persist(&path)?;
        info!("calibration record written to {}", path.display());
        Ok(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, RecordError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Intrinsics;
    use motorsichel_core::PipelineError;

    fn profile() -> CalibrationProfile {
        let k = Intrinsics {
            fx: 1200.0,
            fy: 1190.0,
            cx: 960.0,
            cy: 540.0,
        };
        CalibrationProfile {
            image_size: (1920, 1080),
            camera_matrix: k.matrix(),
            optimal_matrix: Intrinsics {
                fx: 1080.5,
                fy: 1071.25,
                cx: 955.0,
                cy: 537.5,
            }
            .matrix(),
            distortion: Distortion {
                k1: -0.12,
                k2: 0.03,
                ..Default::default()
            },
            rvecs: vec![Vector3::new(0.1, 0.2, 0.3)],
            tvecs: vec![Vector3::new(-10.0, 4.0, 500.0)],
            roi: PixelRect::new(12, 8, 1890, 1060),
            mean_error: 0.21,
            board: CheckerboardSpec::default(),
        }
    }

    fn meta() -> CalibrationMeta {
        CalibrationMeta {
            owner: "Workshop".into(),
            camera: "Canon EOS".into(),
            lens: "EF50".into(),
            focal_length_mm: 50.0,
            scale_factor: 1.0,
        }
    }

    #[test]
    fn metadata_is_required() {
        let mut m = meta();
        m.lens = "  ".into();
        let err = CalibrationRecord::from_profile(&profile(), &m).unwrap_err();
        assert!(matches!(err, RecordError::MissingMetadata("lens name")));

        let mut m = meta();
        m.focal_length_mm = 0.0;
        assert!(matches!(m.check(), Err(RecordError::MissingMetadata("focal length"))));
        m.focal_length_mm = f64::NAN;
        assert!(matches!(m.check(), Err(RecordError::MissingMetadata("focal length"))));

        for scale in [0.0, 1.5, f64::NAN] {
            let m = CalibrationMeta {
                scale_factor: scale,
                ..meta()
            };
            let err = CalibrationRecord::from_profile(&profile(), &m).unwrap_err();
            assert!(matches!(err, RecordError::MissingMetadata("scale factor")));
        }
        assert_eq!(
            PipelineError::from(RecordError::MissingMetadata("focal length")),
            PipelineError::MissingInput("focal length")
        );
    }

    #[test]
    fn file_name_uses_metadata_prefixes() {
        let rec = CalibrationRecord::from_profile(&profile(), &meta()).unwrap();
        assert_eq!(rec.file_name(), "WorCanonEF5_1920x1080_calData.json");

        let mut short = meta();
        short.owner = "Al".into();
        let rec = CalibrationRecord::from_profile(&profile(), &short).unwrap();
        assert_eq!(rec.file_name(), "AlCanonEF5_1920x1080_calData.json");
    }

    #[test]
    fn saved_record_reloads_as_same_profile() {
        let dir = tempfile::tempdir().unwrap();
        let rec = CalibrationRecord::from_profile(&profile(), &meta()).unwrap();
        let path = rec.save_to_dir(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(rec.file_name()));

        let text = std::fs::read_to_string(&path).unwrap();
        for key in ["\"cam_name\"", "\"new_mtx\"", "\"dist\"", "\"roi\"", "\"mean_error\""] {
            assert!(text.contains(key), "missing {key}");
        }

        let back = CalibrationRecord::load(&path).unwrap();
        assert_eq!(back, rec);
        assert_eq!(back.to_profile(), profile());
        assert_eq!(back.meta(), meta());
    }
}
