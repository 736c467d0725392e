use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use forest::ForestErr;

/// The client's result type.
pub type Result<T> = std::result::Result<T, ClientErr>;

/// Client runtime failures, every one of them aborts the run.
#[derive(Debug)]
pub enum ClientErr {
    Io(io::Error),
    Forest(ForestErr),
    Config(String),
    RoundTimeout { round: usize, server_round: usize },
    RoundRejected(usize),
    Blocking(String),
}

impl Display for ClientErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Forest(e) => write!(f, "model error: {e}"),
            Self::Config(reason) => write!(f, "invalid configuration: {reason}"),
            Self::RoundTimeout {
                round,
                server_round,
            } => write!(
                f,
                "timed out waiting for the server to move from round {server_round} to {round}"
            ),
            Self::RoundRejected(round) => {
                write!(f, "the server refused to close round {round}")
            }
            Self::Blocking(reason) => write!(f, "blocking task failed: {reason}"),
        }
    }
}

impl Error for ClientErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Forest(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ForestErr> for ClientErr {
    fn from(value: ForestErr) -> Self {
        Self::Forest(value)
    }
}

impl From<tokio::task::JoinError> for ClientErr {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Blocking(value.to_string())
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ClientErr> for io::Error {
    fn from(value: ClientErr) -> Self {
        match value {
            ClientErr::Io(e) => e,
            ClientErr::RoundTimeout { .. } => io::Error::new(io::ErrorKind::TimedOut, value),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
