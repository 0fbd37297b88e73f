use motorsichel_core::PipelineError;

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("invalid checkerboard: {0}")]
    InvalidBoard(String),

    #[error("need at least {required} calibration images, got {found}")]
    TooFewImages { found: usize, required: usize },

    #[error("no checkerboard found in any of the {frames} frames")]
    NoBoardDetected { frames: usize },

    #[error("checkerboard found in {accepted} frames, need at least {required}")]
    TooFewViews { accepted: usize, required: usize },

    #[error("view {index} has {found} image points, board has {expected}")]
    InvalidView {
        index: usize,
        found: usize,
        expected: usize,
    },

    #[error("calibration solve did not produce a valid camera model")]
    SolveFailed,

    #[error("optimal camera matrix could not be computed")]
    OptimalMatrix,
}

#[derive(thiserror::Error, Debug)]
pub enum ScaleError {
    #[error("calibration profile has no usable camera matrix")]
    MissingCalibration,

    #[error("checkerboard not detected in scene photo")]
    NoCheckerboard,

    #[error("checkerboard pose could not be solved")]
    PoseFailed,

    #[error("degenerate pixel span between scale reference corners")]
    DegenerateSpan,
}

#[derive(thiserror::Error, Debug)]
pub enum RecordError {
    #[error("calibration record is missing a valid {0}")]
    MissingMetadata(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),
}

impl From<CalibrationError> for PipelineError {
    fn from(err: CalibrationError) -> Self {
        match err {
            CalibrationError::TooFewImages { .. } => {
                PipelineError::MissingInput("calibration images")
            }
            CalibrationError::NoBoardDetected { .. } | CalibrationError::TooFewViews { .. } => {
                PipelineError::NoTargetDetected("checkerboard")
            }
            other => PipelineError::InvalidParameter(other.to_string()),
        }
    }
}

impl From<ScaleError> for PipelineError {
    fn from(err: ScaleError) -> Self {
        match err {
            ScaleError::MissingCalibration => PipelineError::MissingInput("calibration profile"),
            ScaleError::NoCheckerboard => PipelineError::NoTargetDetected("checkerboard"),
            other => PipelineError::InvalidParameter(other.to_string()),
        }
    }
}

impl From<RecordError> for PipelineError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::MissingMetadata(field) => PipelineError::MissingInput(field),
            other => PipelineError::Persistence(other.to_string()),
        }
    }
}
