//! Photo loading: JPEG/PNG only, resized by the settings scale factor.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::DynamicImage;
use log::{debug, info};
use motorsichel_calib::MIN_CALIBRATION_VIEWS;
use motorsichel_core::PipelineError;

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("{0} is not a JPEG or PNG file")]
    UnsupportedFormat(PathBuf),
    #[error("{dir} holds {found} images, need at least {required}")]
    TooFewImages {
        dir: PathBuf,
        found: usize,
        required: usize,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl From<LoadError> for PipelineError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::UnsupportedFormat(_) => PipelineError::InvalidParameter(err.to_string()),
            LoadError::TooFewImages { .. } => PipelineError::MissingInput("calibration images"),
            other => PipelineError::Persistence(other.to_string()),
        }
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| matches!(e.as_str(), "jpg" | "jpeg" | "png"))
}

/// Resize by `factor` with cubic interpolation. A factor of 1 returns the
/// image untouched.
pub fn scale_image(img: DynamicImage, factor: f64) -> DynamicImage {
    if factor == 1.0 {
        return img;
    }
    let w = ((f64::from(img.width()) * factor).round() as u32).max(1);
    let h = ((f64::from(img.height()) * factor).round() as u32).max(1);
    img.resize_exact(w, h, FilterType::CatmullRom)
}

pub fn load_image(path: impl AsRef<Path>, scale_factor: f64) -> Result<DynamicImage, LoadError> {
    let path = path.as_ref();
    if !is_supported(path) {
        return Err(LoadError::UnsupportedFormat(path.to_path_buf()));
    }
    let img = image::open(path)?;
    debug!("loaded {} ({}x{})", path.display(), img.width(), img.height());
    Ok(scale_image(img, scale_factor))
}

/// JPEG and PNG files directly inside `dir`, sorted by name.
pub fn list_images(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, LoadError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_supported(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Every calibration photo in `dir`. Fewer than the minimum view count is an
/// error before anything is decoded.
pub fn load_calibration_images(
    dir: impl AsRef<Path>,
    scale_factor: f64,
) -> Result<Vec<DynamicImage>, LoadError> {
    let dir = dir.as_ref();
    let paths = list_images(dir)?;
    if paths.len() < MIN_CALIBRATION_VIEWS {
        return Err(LoadError::TooFewImages {
            dir: dir.to_path_buf(),
            found: paths.len(),
            required: MIN_CALIBRATION_VIEWS,
        });
    }
    info!("loading {} calibration images from {}", paths.len(), dir.display());
    paths.iter().map(|p| load_image(p, scale_factor)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn write_png(path: &Path, w: u32, h: u32) {
        GrayImage::from_pixel(w, h, Luma([128])).save(path).unwrap();
    }

    #[test]
    fn lists_only_supported_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("b.png"), 4, 4);
        write_png(&dir.path().join("a.PNG"), 4, 4);
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::create_dir(dir.path().join("sub.png")).unwrap();
        let names: Vec<_> = list_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.PNG", "b.png"]);
    }

    #[test]
    fn nine_images_are_not_enough() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..9 {
            write_png(&dir.path().join(format!("{i}.png")), 4, 4);
        }
        let err = load_calibration_images(dir.path(), 1.0).unwrap_err();
        assert!(matches!(err, LoadError::TooFewImages { found: 9, .. }));
        write_png(&dir.path().join("9.png"), 4, 4);
        assert_eq!(load_calibration_images(dir.path(), 1.0).unwrap().len(), 10);
    }

    #[test]
    fn scale_factor_resizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        write_png(&path, 100, 50);
        let img = load_image(&path, 0.2).unwrap();
        assert_eq!((img.width(), img.height()), (20, 10));
        assert!(matches!(
            load_image(dir.path().join("photo.bmp"), 1.0),
            Err(LoadError::UnsupportedFormat(_))
        ));
    }
}
