//! Synthetic components with known predictions, shared by the unit tests.

use std::sync::Arc;

use comms::specs::ClientId;
use forest::{Component, Dataset, ForestErr};
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::aggregation::Submission;

/// Predicts the same fixed values whatever the features are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixed {
    pub id: u32,
    pub predictions: Vec<f32>,
}

impl Fixed {
    pub fn new(id: u32, predictions: Vec<f32>) -> Self {
        Self { id, predictions }
    }
}

impl Component for Fixed {
    fn predict(&self, features: ArrayView2<f32>) -> forest::Result<Array1<f32>> {
        if features.nrows() != self.predictions.len() {
            return Err(ForestErr::SizeMismatch {
                a: "features",
                b: "predictions",
                got: features.nrows(),
                expected: self.predictions.len(),
            });
        }

        Ok(Array1::from(self.predictions.clone()))
    }

    fn encode(&self) -> forest::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn decode(bytes: &[u8]) -> forest::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A dataset with a single zeroed feature and the given labels.
pub fn validation(labels: &[f32]) -> Dataset {
    let features = Array2::zeros((labels.len(), 1));
    Dataset::new(features, Array1::from(labels.to_vec())).unwrap()
}

pub fn submission(client_id: ClientId, components: Vec<Fixed>) -> Submission<Fixed> {
    Submission::new(client_id, components.into_iter().map(Arc::new).collect())
}

/// Encodes `amount` components whose ids start at `first`.
pub fn encoded(first: u32, amount: u32) -> Vec<Vec<u8>> {
    (first..first + amount)
        .map(|id| Fixed::new(id, vec![id as f32]).encode().unwrap())
        .collect()
}
