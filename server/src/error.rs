use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use comms::specs::ClientId;
use forest::ForestErr;

use crate::aggregation::AggregationErr;

/// The server's result type.
pub type Result<T> = std::result::Result<T, ServerErr>;

/// Every failure the coordinator and its service can run into.
#[derive(Debug)]
pub enum ServerErr {
    Io(io::Error),
    Forest(ForestErr),
    Aggregation(AggregationErr),
    Config(String),
    DuplicateSubmission { client_id: ClientId, round: usize },
    AggregationFailed(String),
    RoundAbandoned(usize),
    WorkerPanicked,
    PoolClosed,
}

impl Display for ServerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Forest(e) => write!(f, "model error: {e}"),
            Self::Aggregation(e) => write!(f, "aggregation error: {e}"),
            Self::Config(reason) => write!(f, "invalid configuration: {reason}"),
            Self::DuplicateSubmission { client_id, round } => write!(
                f,
                "client {client_id} already submitted its components for round {round}"
            ),
            Self::AggregationFailed(reason) => write!(f, "aggregation failed: {reason}"),
            Self::RoundAbandoned(round) => {
                write!(f, "round {round} was reset before releasing its uploads")
            }
            Self::WorkerPanicked => f.write_str("a worker pool job panicked"),
            Self::PoolClosed => f.write_str("the worker pool dropped a job"),
        }
    }
}

impl Error for ServerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Forest(e) => Some(e),
            Self::Aggregation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ServerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ForestErr> for ServerErr {
    fn from(value: ForestErr) -> Self {
        Self::Forest(value)
    }
}

impl From<AggregationErr> for ServerErr {
    fn from(value: AggregationErr) -> Self {
        Self::Aggregation(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ServerErr> for io::Error {
    fn from(value: ServerErr) -> Self {
        match value {
            ServerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
