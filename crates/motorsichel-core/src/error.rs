/// Error taxonomy every stage error maps into.
///
/// The session surfaces these to the operator; each stage crate keeps its own
/// richer enum and converts with `From`.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// A precondition object (image, contour list, reference point,
    /// calibration matrices) was absent when the operation started.
    #[error("missing input: {0}")]
    MissingInput(&'static str),

    /// A checkerboard or circle search found nothing.
    #[error("no target detected: {0}")]
    NoTargetDetected(&'static str),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Reading or writing a calibration, settings or output file failed.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl PipelineError {
    /// Detection failures are the only kind the operator is expected to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::NoTargetDetected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_detection_failures_are_retryable() {
        assert!(PipelineError::NoTargetDetected("checkerboard").is_retryable());
        assert!(!PipelineError::MissingInput("binary image").is_retryable());
        assert!(!PipelineError::Persistence("disk full".into()).is_retryable());
    }

    #[test]
    fn messages_name_the_missing_object() {
        let err = PipelineError::MissingInput("reference point");
        assert_eq!(err.to_string(), "missing input: reference point");
    }
}
