//! Turns the submissions of a round into the next global ensemble.

mod aggregator;
mod error;
mod strategy;

use std::sync::Arc;

use comms::specs::ClientId;
use forest::{Component, Dataset};

pub use aggregator::Aggregator;
pub use error::{AggregationErr, Result};
pub use strategy::Strategy;

/// The components a single client submitted during a round.
#[derive(Debug)]
pub struct Submission<C> {
    pub client_id: ClientId,
    pub components: Vec<Arc<C>>,
}

impl<C> Submission<C> {
    pub fn new(client_id: ClientId, components: Vec<Arc<C>>) -> Self {
        Self {
            client_id,
            components,
        }
    }
}

impl<C> Clone for Submission<C> {
    fn clone(&self) -> Self {
        Self {
            client_id: self.client_id,
            components: self.components.clone(),
        }
    }
}

/// The single contract every aggregation policy fulfills.
pub trait Aggregate<C: Component>: Send + Sync {
    /// Chooses the components of the next global ensemble.
    ///
    /// # Arguments
    /// * `submissions` - Every submission of the round, in arrival order.
    /// * `validation` - The server side rows used to score components.
    fn select(&self, submissions: &[Submission<C>], validation: &Dataset) -> Result<Vec<Arc<C>>>;
}
