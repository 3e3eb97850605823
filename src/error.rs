use std::{fmt, io, path::PathBuf};

use machine_learning::MlErr;

/// All errors that can occur while loading data, training or scoring.
#[derive(Debug)]
pub enum BeautyError {
    /// A file could not be read or written.
    Io { path: PathBuf, source: io::Error },
    /// The manifest is missing a column or has a malformed row.
    Csv { path: PathBuf, source: csv::Error },
    /// An image could not be decoded.
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    /// A dataset snapshot is corrupt or doesn't match the configuration.
    Snapshot(String),
    /// A tensor doesn't have the shape the model expects.
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// A metric outside of the range a score can be derived from.
    InvalidMetric(f32),
    /// Invalid configuration, caught before touching any data.
    InvalidConfig(String),
    /// No samples were left to work with.
    EmptyDataset,
    Ml(MlErr),
}

pub type Result<T> = std::result::Result<T, BeautyError>;

impl BeautyError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl fmt::Display for BeautyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "io error on {}: {source}", path.display()),
            Self::Csv { path, source } => {
                write!(f, "invalid manifest {}: {source}", path.display())
            }
            Self::Image { path, source } => {
                write!(f, "failed to decode image {}: {source}", path.display())
            }
            Self::Snapshot(msg) => write!(f, "invalid snapshot: {msg}"),
            Self::ShapeMismatch { expected, got } => {
                write!(f, "expected an image of shape {expected:?}, got {got:?}")
            }
            Self::InvalidMetric(mse) => write!(f, "mse {mse} is outside of [0, 1]"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::EmptyDataset => write!(f, "the dataset has no samples"),
            Self::Ml(e) => write!(f, "model error: {e}"),
        }
    }
}

impl std::error::Error for BeautyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Csv { source, .. } => Some(source),
            Self::Image { source, .. } => Some(source),
            Self::Ml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for BeautyError {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<safetensors::SafeTensorError> for BeautyError {
    fn from(e: safetensors::SafeTensorError) -> Self {
        Self::Snapshot(e.to_string())
    }
}

impl From<ndarray::ShapeError> for BeautyError {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Snapshot(e.to_string())
    }
}
