//! Operator settings and the workspace directory layout.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use motorsichel_core::PipelineError;
use motorsichel_measure::MorphMode;
use serde::{Deserialize, Serialize};

pub const SETTINGS_FILE: &str = "settings.json";

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("invalid setting: {0}")]
    Invalid(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),
}

impl From<SettingsError> for PipelineError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::Invalid(msg) => PipelineError::InvalidParameter(msg),
            other => PipelineError::Persistence(other.to_string()),
        }
    }
}

/// Persisted operator preferences.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workspace_dir: Option<PathBuf>,
    pub workspace_set: bool,
    /// Factor every loaded photo is resized by, in `(0, 1]`.
    pub scale_factor: f64,
    /// Largest fraction of the screen a displayed image may cover.
    pub max_screen: f64,
    /// How long intermediate images are shown, `None` to show nothing.
    pub show_duration: Option<u64>,
    pub debug_mode: bool,
    pub show_startup: bool,
    pub generate_mask: bool,
    pub roundness_threshold: f64,
    pub disclaimer_accepted: bool,
    pub morph_mode: MorphMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workspace_dir: None,
            workspace_set: false,
            scale_factor: 0.2,
            max_screen: 0.8,
            show_duration: Some(1000),
            debug_mode: false,
            show_startup: true,
            generate_mask: false,
            roundness_threshold: 0.9,
            disclaimer_accepted: false,
            morph_mode: MorphMode::Dilate,
        }
    }
}

fn unit_interval(name: &str, value: f64) -> Result<(), SettingsError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(SettingsError::Invalid(format!(
            "{name} must be in (0, 1], got {value}"
        )))
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        unit_interval("scale_factor", self.scale_factor)?;
        unit_interval("max_screen", self.max_screen)?;
        if !(self.roundness_threshold > 0.0 && self.roundness_threshold < 1.0) {
            return Err(SettingsError::Invalid(format!(
                "roundness_threshold must be in (0, 1), got {}",
                self.roundness_threshold
            )));
        }
        Ok(())
    }

    /// Load and validate a settings file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let raw = fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write as pretty JSON through a temporary sibling file.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        self.validate()?;
        let path = path.as_ref();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
        tmp.flush()?;
        tmp.persist(path)?;
        Ok(())
    }

    /// `<workspace>/data/settings.json`, or defaults when it does not exist.
    pub fn load_or_default(workspace: &Workspace) -> Result<Self, SettingsError> {
        let path = workspace.settings_path();
        if !path.exists() {
            debug!("no settings at {}, using defaults", path.display());
            return Ok(Self {
                workspace_dir: Some(workspace.root().to_path_buf()),
                ..Self::default()
            });
        }
        Self::load_json(path)
    }
}

/// Workspace root with its `data/`, `res/` and `result/` subdirectories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Calibration records and settings.
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Generated aids such as the HSV chart.
    pub fn res_dir(&self) -> PathBuf {
        self.root.join("res")
    }

    /// Drawings and reference reports.
    pub fn result_dir(&self) -> PathBuf {
        self.root.join("result")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir().join(SETTINGS_FILE)
    }

    /// Create the subdirectories that do not exist yet.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [self.data_dir(), self.res_dir(), self.result_dir()] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert_eq!(s.morph_mode, MorphMode::Dilate);
        assert_eq!(s.roundness_threshold, 0.9);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let s = Settings {
            scale_factor: 0.0,
            ..Default::default()
        };
        assert!(matches!(s.validate(), Err(SettingsError::Invalid(_))));
        let s = Settings {
            roundness_threshold: 1.0,
            ..Default::default()
        };
        let err: PipelineError = s.validate().unwrap_err().into();
        assert!(matches!(err, PipelineError::InvalidParameter(_)));
    }

    #[test]
    fn morph_mode_is_stored_as_its_code() {
        let json = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(json["morph_mode"], 1);
        let parsed: Settings = serde_json::from_str(r#"{"morph_mode": 4}"#).unwrap();
        assert_eq!(parsed.morph_mode, MorphMode::Close);
        assert!(serde_json::from_str::<Settings>(r#"{"morph_mode": 9}"#).is_err());
    }

    #[test]
    fn workspace_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        let fresh = Settings::load_or_default(&ws).unwrap();
        assert_eq!(fresh.workspace_dir.as_deref(), Some(dir.path()));

        ws.ensure().unwrap();
        assert!(ws.result_dir().is_dir() && ws.res_dir().is_dir());
        let custom = Settings {
            scale_factor: 0.5,
            show_duration: None,
            generate_mask: true,
            ..fresh
        };
        custom.write_json(ws.settings_path()).unwrap();
        assert_eq!(Settings::load_or_default(&ws).unwrap(), custom);
    }
}
