use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use ndarray::ShapeError;
use safetensors::SafeTensorError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    InvalidArchitecture(String),
    InvalidInit(String),
    EmptyDataset,
    BackwardBeforeForward {
        layer: &'static str,
    },
    Shape(ShapeError),
    Io {
        path: PathBuf,
        source: io::Error,
    },
    Json(serde_json::Error),
    SafeTensors(SafeTensorError),
    InvalidTensor {
        name: String,
        reason: String,
    },
}

impl MlErr {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch for {what}, got {got} and expected {expected}"
            ),
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a shape mismatch for {what}, got {got:?} and expected {expected:?}"
            ),
            MlErr::InvalidArchitecture(msg) => write!(f, "invalid architecture: {msg}"),
            MlErr::InvalidInit(msg) => write!(f, "invalid parameter initializer: {msg}"),
            MlErr::EmptyDataset => write!(f, "the dataset has no samples"),
            MlErr::BackwardBeforeForward { layer } => {
                write!(f, "backward called on a {layer} layer before any forward pass")
            }
            MlErr::Shape(e) => write!(f, "shape error: {e}"),
            MlErr::Io { path, source } => write!(f, "io error on {}: {source}", path.display()),
            MlErr::Json(e) => write!(f, "invalid architecture json: {e}"),
            MlErr::SafeTensors(e) => write!(f, "invalid weights file: {e}"),
            MlErr::InvalidTensor { name, reason } => write!(f, "invalid tensor {name}: {reason}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            MlErr::Io { source, .. } => Some(source),
            MlErr::Json(e) => Some(e),
            MlErr::SafeTensors(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(e: ShapeError) -> Self {
        Self::Shape(e)
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<SafeTensorError> for MlErr {
    fn from(e: SafeTensorError) -> Self {
        Self::SafeTensors(e)
    }
}
