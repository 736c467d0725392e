//! The round coordinator: the barrier, the exactly once aggregation and the round lifecycle.

mod ensemble;
mod round;
mod supervisor;
#[cfg(test)]
mod tests;

use std::{sync::Arc, time::Instant};

use comms::specs::{ClientId, Settings};
use forest::{Component, Dataset, MetricsFile, RoundMetrics, decode_all};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::{sync::Notify, task};
use tokio_util::sync::CancellationToken;

pub use ensemble::GlobalEnsemble;
pub use round::{AggregationStatus, Outcome};

use self::round::{Release, RoundState, Runtime};
use crate::{
    aggregation::{Aggregate, Submission},
    config::{AggregationFailurePolicy, BarrierPolicy, Schedule, ServerConfig},
    error::{Result, ServerErr},
    pool::WorkerPool,
};

/// Fits the fresh ensemble a round starts with, given the round index and its component budget.
pub type Bootstrap<C> = Arc<dyn Fn(usize, usize) -> forest::Result<Vec<C>> + Send + Sync>;

/// The fixed parameters of the run.
#[derive(Debug, Clone, Copy)]
pub struct RoundSettings {
    pub expected_clients: usize,
    pub rounds: usize,
    pub schedule: Schedule,
    pub barrier: BarrierPolicy,
    pub on_failure: AggregationFailurePolicy,
}

impl From<&ServerConfig> for RoundSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            expected_clients: config.clients,
            rounds: config.rounds,
            schedule: config.schedule(),
            barrier: config.server.barrier,
            on_failure: config.server.on_aggregation_failure,
        }
    }
}

/// Drives the rounds of the federation.
///
/// All the bookkeeping of a round lives behind a single lock which is never held across an
/// await point. A lazily spawned supervisor task owns the aggregation of each round.
pub struct Coordinator<C: Component> {
    state: Mutex<RoundState<C>>,
    arrivals: Notify,
    settings: RoundSettings,
    aggregator: Arc<dyn Aggregate<C>>,
    bootstrap: Bootstrap<C>,
    validation: Arc<Dataset>,
    pool: WorkerPool,
    metrics: Option<MetricsFile>,
    shutdown: CancellationToken,
}

impl<C: Component> Coordinator<C> {
    /// Creates a new `Coordinator` sitting at round 0 with a freshly bootstrapped ensemble.
    ///
    /// # Arguments
    /// * `settings` - The fixed parameters of the run.
    /// * `aggregator` - The aggregation policy.
    /// * `bootstrap` - Fits the ensemble each round starts with.
    /// * `validation` - The rows used to score submissions.
    /// * `pool` - Where CPU bound work runs.
    pub fn new(
        settings: RoundSettings,
        aggregator: Arc<dyn Aggregate<C>>,
        bootstrap: Bootstrap<C>,
        validation: Dataset,
        pool: WorkerPool,
    ) -> Result<Self> {
        let budget = settings.schedule.components_per_client(0);
        let components = bootstrap(0, budget)?;
        let ensemble = GlobalEnsemble::encode(components.into_iter().map(Arc::new).collect())?;

        info!(
            clients = settings.expected_clients,
            rounds = settings.rounds,
            components = ensemble.len();
            "coordinator ready"
        );

        Ok(Self {
            state: Mutex::new(RoundState::new(0, ensemble)),
            arrivals: Notify::new(),
            settings,
            aggregator,
            bootstrap,
            validation: Arc::new(validation),
            pool,
            metrics: None,
            shutdown: CancellationToken::new(),
        })
    }

    /// Persists a report of every finished round into `file`.
    pub fn with_metrics(mut self, file: MetricsFile) -> Self {
        self.metrics = Some(file);
        self
    }

    /// The index of the running round.
    pub fn round(&self) -> usize {
        self.state.lock().index
    }

    /// The terminal signal, cancelled once the last round finishes.
    pub fn shutdown(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The budget of the running round and its index, never waits on aggregation.
    pub fn get_settings(&self, client_id: ClientId) -> Settings {
        let current_round = self.state.lock().index;
        debug!(client_id = client_id, round = current_round; "settings requested");

        Settings {
            components_per_client: self.settings.schedule.components_per_client(current_round),
            current_round,
        }
    }

    /// Opens the client's runtime record and returns the current snapshot.
    ///
    /// A repeated download overwrites the start instant.
    pub fn download_model(&self, client_id: ClientId) -> GlobalEnsemble<C> {
        let mut state = self.state.lock();

        let runtime = Runtime {
            start: Instant::now(),
            end: None,
        };
        state.runtimes.insert(client_id, runtime);

        info!(
            client_id = client_id,
            round = state.index,
            components = state.ensemble.len();
            "client downloading the global model"
        );

        state.ensemble.clone()
    }

    /// Submits a client's components and waits until the round's aggregation is released.
    ///
    /// # Arguments
    /// * `client_id` - The submitting client.
    /// * `encoded` - Its complete, already drained, upload stream.
    ///
    /// # Returns
    /// The snapshot carried by the release. `DuplicateSubmission` if the client already
    /// submitted this round, `AggregationFailed` if aggregation failed under `Propagate`.
    pub async fn upload_components(
        self: &Arc<Self>,
        client_id: ClientId,
        encoded: Vec<Vec<u8>>,
    ) -> Result<GlobalEnsemble<C>> {
        let components = self
            .pool
            .run(move || decode_all::<C, _>(encoded.as_slice()))
            .await??;

        let components: Vec<_> = components.into_iter().map(Arc::new).collect();

        let (round, mut release, spawn_supervisor) = {
            let mut state = self.state.lock();
            let round = state.index;

            if state.connected.contains(&client_id) {
                return Err(ServerErr::DuplicateSubmission { client_id, round });
            }

            if state.status != AggregationStatus::Idle {
                warn!(
                    client_id = client_id,
                    round = round;
                    "late upload, the aggregation of this round already started"
                );

                (round, state.release.subscribe(), false)
            } else {
                let amount = components.len();
                state.connected.insert(client_id);
                state.submissions.push(Submission::new(client_id, components));

                info!(
                    client_id = client_id,
                    round = round,
                    components = amount,
                    connected = state.connected.len(),
                    expected = self.settings.expected_clients;
                    "components submitted"
                );

                let spawn = !state.supervisor_spawned;
                state.supervisor_spawned = true;
                (round, state.release.subscribe(), spawn)
            }
        };

        if spawn_supervisor {
            tokio::spawn(Arc::clone(self).supervise(round));
        }

        self.arrivals.notify_one();

        let released = match release.wait_for(Option::is_some).await {
            Ok(released) => released.clone(),
            Err(_) => None,
        };

        let Some(Release { outcome, snapshot }) = released else {
            return Err(ServerErr::RoundAbandoned(round));
        };

        match (outcome, self.settings.on_failure) {
            (Outcome::Failed(reason), AggregationFailurePolicy::Propagate) => {
                Err(ServerErr::AggregationFailed(reason))
            }
            _ => Ok(snapshot),
        }
    }

    /// Closes the client's runtime record and counts it as a respondent.
    ///
    /// The last expected respondent persists the round report, then resets the round and
    /// advances the index, or cancels the shutdown token after the last round.
    pub async fn end_of_round(&self, client_id: ClientId) -> Result<()> {
        let expected = self.settings.expected_clients;

        let (round, report) = {
            let mut state = self.state.lock();

            if let Some(runtime) = state.runtimes.get_mut(&client_id) {
                runtime.end = Some(Instant::now());
            }

            state.respondents += 1;

            info!(
                client_id = client_id,
                round = state.index,
                respondents = state.respondents,
                expected = expected;
                "client finished the round"
            );

            if state.respondents != expected {
                return Ok(());
            }

            let budget = self.settings.schedule.components_per_client(state.index);
            (state.index, state.report(budget, expected))
        };

        self.persist(round, report).await;

        let next = round + 1;

        if next >= self.settings.rounds {
            {
                let mut state = self.state.lock();
                let ensemble = state.ensemble.clone();
                state.reset(next, ensemble);
            }

            info!(rounds = next; "last round finished, shutting down");
            self.shutdown.cancel();
            return Ok(());
        }

        let budget = self.settings.schedule.components_per_client(next);
        let bootstrap = Arc::clone(&self.bootstrap);

        let fitted = self
            .pool
            .run(move || -> forest::Result<GlobalEnsemble<C>> {
                let components = bootstrap(next, budget)?;
                GlobalEnsemble::encode(components.into_iter().map(Arc::new).collect())
            })
            .await
            .and_then(|fitted| fitted.map_err(ServerErr::from));

        let mut state = self.state.lock();

        let ensemble = match fitted {
            Ok(ensemble) => ensemble,
            Err(e) => {
                error!(round = next; "cannot bootstrap the round, keeping the last ensemble: {e}");
                state.ensemble.clone()
            }
        };

        state.reset(next, ensemble);
        info!(round = next, components_per_client = budget; "round started");
        Ok(())
    }

    async fn persist(&self, round: usize, report: RoundMetrics) {
        let Some(file) = self.metrics.clone() else {
            return;
        };

        match task::spawn_blocking(move || file.record(round, report)).await {
            Ok(Ok(())) => debug!(round = round; "round metrics persisted"),
            Ok(Err(e)) => error!(round = round; "cannot persist the round metrics: {e}"),
            Err(e) => error!(round = round; "metrics task failed: {e}"),
        }
    }
}
