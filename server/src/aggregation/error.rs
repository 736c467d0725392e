use std::{
    error::Error,
    fmt::{self, Display},
};

use forest::ForestErr;

pub type Result<T> = std::result::Result<T, AggregationErr>;

#[derive(Debug)]
pub enum AggregationErr {
    NoSubmissions,
    Forest(ForestErr),
}

impl Display for AggregationErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSubmissions => f.write_str("there are no submissions to choose from"),
            Self::Forest(e) => write!(f, "cannot score a component: {e}"),
        }
    }
}

impl Error for AggregationErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Forest(e) => Some(e),
            Self::NoSubmissions => None,
        }
    }
}

impl From<ForestErr> for AggregationErr {
    fn from(value: ForestErr) -> Self {
        Self::Forest(value)
    }
}
