use forest::{Component, Dataset, metrics, predict_mean};
use log::debug;

/// Scores of an ensemble against the client's held-out split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub absolute_error: f64,
    pub squared_error: f64,
    pub pearson: f64,
}

impl Evaluation {
    /// Scores the mean prediction of `components` on `data`.
    pub fn of<C: Component>(components: &[C], data: &Dataset) -> forest::Result<Self> {
        let predicted = predict_mean(components, data.features())?;
        let truth = data.labels();

        Ok(Self {
            absolute_error: metrics::mean_absolute_error(truth, predicted.view())?,
            squared_error: metrics::mean_squared_error(truth, predicted.view())?,
            pearson: metrics::pearson(truth, predicted.view())?,
        })
    }
}

/// Which side the retention rule kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kept {
    Local,
    Received,
}

/// The ensemble this client retains and contributes.
#[derive(Debug)]
pub struct LocalModel<C> {
    components: Vec<C>,
}

impl<C: Component> LocalModel<C> {
    pub fn new(components: Vec<C>) -> Self {
        Self { components }
    }

    pub fn components(&self) -> &[C] {
        &self.components
    }

    pub fn into_components(self) -> Vec<C> {
        self.components
    }

    /// Keeps whichever of the retained and the received ensembles has the lower absolute
    /// error on `data`, a tie keeps the received one.
    ///
    /// # Arguments
    /// * `received` - The ensemble just downloaded from the server.
    /// * `data` - The client's held-out split.
    ///
    /// # Returns
    /// The side that was kept along with its scores.
    pub fn retain_better(
        &mut self,
        received: Vec<C>,
        data: &Dataset,
    ) -> forest::Result<(Kept, Evaluation)> {
        let local = Evaluation::of(&self.components, data)?;

        if received.is_empty() {
            return Ok((Kept::Local, local));
        }

        let global = Evaluation::of(&received, data)?;

        debug!(
            local_mae = local.absolute_error,
            received_mae = global.absolute_error;
            "comparing the local and received ensembles"
        );

        if local.absolute_error < global.absolute_error {
            return Ok((Kept::Local, local));
        }

        self.components = received;
        Ok((Kept::Received, global))
    }
}
