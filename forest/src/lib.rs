mod component;
mod dataset;
mod error;
mod forest;
pub mod metrics;
mod results;
mod tree;

pub use component::{Component, decode_all, encode_all, predict_mean};
pub use dataset::{Dataset, DatasetSpec};
pub use error::{ForestErr, Result};
pub use forest::{ForestParams, fit_forest};
pub use results::{MetricsFile, RoundMetrics};
pub use tree::Tree;
