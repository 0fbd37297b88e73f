use motorsichel_core::PipelineError;

#[derive(thiserror::Error, Debug)]
pub enum ContourError {
    #[error("invalid contour parameter: {0}")]
    InvalidParameter(String),

    #[error("binary image is empty")]
    EmptyImage,

    #[error("no contour with index {0}")]
    UnknownContour(usize),

    #[error("contour {0} is not classified as a hole")]
    NotAHole(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum ReferenceError {
    #[error("no contours to transform")]
    NoContours,

    #[error("no reference point set")]
    NoReference,

    #[error("no mm/px ratio available")]
    NoScale,

    #[error("contour {0} has no reference-space coordinates")]
    NotTransformed(usize),

    #[error("contour {0} has no millimeter coordinates")]
    NotConverted(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    #[error("hole {0} has no millimeter diameter")]
    MissingHoleGeometry(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),

    #[error(transparent)]
    Dxf(#[from] dxf::DxfError),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl From<ContourError> for PipelineError {
    fn from(err: ContourError) -> Self {
        match err {
            ContourError::EmptyImage => PipelineError::MissingInput("binary image"),
            other => PipelineError::InvalidParameter(other.to_string()),
        }
    }
}

impl From<ReferenceError> for PipelineError {
    fn from(err: ReferenceError) -> Self {
        match err {
            ReferenceError::NoContours => PipelineError::MissingInput("contour list"),
            ReferenceError::NoReference => PipelineError::MissingInput("reference point"),
            ReferenceError::NoScale => PipelineError::MissingInput("mm/px ratio"),
            ReferenceError::NotTransformed(_) => {
                PipelineError::MissingInput("reference-space coordinates")
            }
            ReferenceError::NotConverted(_) => PipelineError::MissingInput("millimeter coordinates"),
        }
    }
}

impl From<ExportError> for PipelineError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Reference(err) => err.into(),
            ExportError::MissingHoleGeometry(_) => PipelineError::MissingInput("hole diameter"),
            other => PipelineError::Persistence(other.to_string()),
        }
    }
}
