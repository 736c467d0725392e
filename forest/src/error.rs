use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire forest module.
pub type Result<T> = std::result::Result<T, ForestErr>;

/// The forest module's error type.
#[derive(Debug)]
pub enum ForestErr {
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    EmptyDataset,
    EmptyEnsemble,
    InvalidParams(String),
    Malformed(String),
    MissingColumn(String),
    Csv {
        line: usize,
        reason: String,
    },
    Codec(serde_json::Error),
    Io(io::Error),
}

impl Display for ForestErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForestErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch between {a} and {b}, got {got} and expected {expected}"
            ),
            ForestErr::EmptyDataset => write!(f, "The dataset has no rows"),
            ForestErr::EmptyEnsemble => write!(f, "Cannot predict with an empty ensemble"),
            ForestErr::InvalidParams(detail) => write!(f, "Invalid forest parameters: {detail}"),
            ForestErr::Malformed(detail) => write!(f, "Malformed component: {detail}"),
            ForestErr::MissingColumn(name) => write!(f, "The dataset has no column named '{name}'"),
            ForestErr::Csv { line, reason } => write!(f, "dataset line {line}: {reason}"),
            ForestErr::Codec(e) => write!(f, "component codec error: {e}"),
            ForestErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for ForestErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ForestErr::Codec(e) => Some(e),
            ForestErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ForestErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

impl From<io::Error> for ForestErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ForestErr> for io::Error {
    fn from(value: ForestErr) -> Self {
        match value {
            ForestErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
