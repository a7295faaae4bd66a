//! Error types for the plot extraction pipeline.
//!
//! Failures are scoped: most variants are local to one capture or one plot
//! and the orchestrator logs and skips them. Only [`PipelineError::Config`]
//! (a missing required algorithm declaration) aborts a run.

/// Error type covering every failure mode of the pipeline core.
#[derive(Debug)]
pub enum PipelineError {
    /// A capture file lacks usable geospatial metadata (bounds or EPSG).
    Georeference(String),
    /// A required algorithm declaration is missing or empty. Run-fatal.
    Config(String),
    /// The algorithm returned a value shape the contract rejects.
    UnsupportedType(String),
    /// The algorithm returned the wrong number of values.
    Arity { expected: usize, actual: usize },
    /// A raster or point-cloud crop could not be performed.
    Clip(String),
    /// No file in the input list has a supported extension.
    NoSupportedFiles(String),
    /// I/O error during file operations.
    Io(std::io::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Georeference(e) => write!(f, "georeference error: {e}"),
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::UnsupportedType(e) => write!(f, "unsupported type: {e}"),
            Self::Arity { expected, actual } => write!(
                f,
                "incorrect number of values returned, expected {expected} and received {actual}"
            ),
            Self::Clip(e) => write!(f, "clip error: {e}"),
            Self::NoSupportedFiles(e) => write!(f, "no supported files: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<csv::Error> for PipelineError {
    fn from(e: csv::Error) -> Self {
        match e.into_kind() {
            csv::ErrorKind::Io(io) => Self::Io(io),
            other => Self::Io(std::io::Error::other(format!("CSV error: {other:?}"))),
        }
    }
}
