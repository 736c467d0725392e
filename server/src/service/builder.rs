use std::sync::Arc;

use forest::{Tree, fit_forest};
use log::info;
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::FedServer;
use crate::{
    aggregation::Aggregator,
    config::ServerConfig,
    coordinator::{Bootstrap, Coordinator, RoundSettings},
    error::Result,
    pool::WorkerPool,
};

/// The server's own rows used to fit the bootstrap ensemble of every round.
const PLACEHOLDER_ROWS: usize = 2;

/// Builds a `FedServer` of decision trees from a configuration.
pub struct ServerBuilder<'a> {
    config: &'a ServerConfig,
}

impl<'a> ServerBuilder<'a> {
    /// Creates a new `ServerBuilder`.
    ///
    /// # Arguments
    /// * `config` - A validated server configuration.
    pub fn new(config: &'a ServerConfig) -> Self {
        Self { config }
    }

    /// Loads the dataset, splits the server's placeholder and validation rows off it and
    /// wires the coordinator together.
    ///
    /// # Returns
    /// A server ready to accept clients, or the first configuration, data or model error.
    pub fn build(&self) -> Result<FedServer<Tree>> {
        let config = self.config;
        let mut rng = self.generate_rng(config.seed);

        let dataset = config.dataset.load()?;
        let (train, test) = dataset.train_test_split(config.dataset.test_ratio, &mut rng)?;

        let placeholder = train.head(PLACEHOLDER_ROWS)?;
        let validation = test.tail(config.dataset.validate_size)?;

        info!(
            rows = dataset.len(),
            placeholder = placeholder.len(),
            validation = validation.len();
            "dataset loaded"
        );

        let params = config.forest;
        let seed: u64 = rng.random();
        let bootstrap: Bootstrap<Tree> = Arc::new(move |round, n_trees| {
            fit_forest(n_trees, &placeholder, &params, seed.wrapping_add(round as u64))
        });

        let aggregator = Arc::new(Aggregator::new(config.strategy(), config.seed));
        let pool = WorkerPool::new(config.server.jobs)?;

        let coordinator = Coordinator::new(
            RoundSettings::from(config),
            aggregator,
            bootstrap,
            validation,
            pool,
        )?
        .with_metrics(config.metrics_file()?);

        Ok(FedServer::new(Arc::new(coordinator), config.grace_period()))
    }

    /// Generates a random number generator given (or not) a seed.
    fn generate_rng(&self, seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}
