//! The per round state machine of a client.

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use comms::{
    OnoReceiver, OnoSender,
    specs::{ClientId, Settings},
};
use forest::{
    Dataset, ForestParams, MetricsFile, RoundMetrics, Tree, decode_all, encode_all, fit_forest,
    predict_mean,
};
use log::{debug, info, warn};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::json;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    task, time,
};

use crate::{
    config::ClientConfig,
    error::{ClientErr, Result},
    local::{Evaluation, Kept, LocalModel},
    net::FedClient,
};

/// How a client paces and sizes its rounds.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub rounds: usize,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub round_delay: Duration,
    pub inference_samples: usize,
    pub forest: ForestParams,
    pub seed: u64,
}

impl DriverSettings {
    pub fn from_config(config: &ClientConfig, seed: u64) -> Self {
        Self {
            rounds: config.rounds,
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
            round_delay: config.round_delay(),
            inference_samples: config.client.inference_samples,
            forest: config.forest,
            seed,
        }
    }
}

/// The seed of this client's randomness, derived from the shared seed when there is one.
pub fn client_seed(config: &ClientConfig, client_id: ClientId) -> u64 {
    match config.seed {
        Some(seed) => seed.wrapping_add(client_id as u64),
        None => rand::rng().random(),
    }
}

/// Draws this client's sample of the dataset and splits it into a train and a test part.
pub fn load_partition(config: &ClientConfig, seed: u64) -> Result<(Dataset, Dataset)> {
    let mut rng = StdRng::seed_from_u64(seed);

    let dataset = config.dataset.load()?;
    let sampled = dataset.sample_percentage(config.dataset.sample_percentage, &mut rng)?;
    let (train, test) = sampled.train_test_split(config.dataset.test_ratio, &mut rng)?;

    info!(
        rows = dataset.len(),
        train = train.len(),
        test = test.len();
        "partition loaded"
    );

    Ok((train, test))
}

/// Runs every round of a single client against the coordinator.
pub struct Driver<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    client: FedClient<R, W>,
    settings: DriverSettings,
    train: Arc<Dataset>,
    test: Arc<Dataset>,
    metrics: Option<MetricsFile>,
}

impl<R, W> Driver<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new `Driver`.
    ///
    /// # Arguments
    /// * `client` - The connection to the coordinator.
    /// * `settings` - The pacing and sizing of the rounds.
    /// * `train` - The rows local forests are fitted on.
    /// * `test` - The held-out rows every evaluation runs on.
    pub fn new(client: FedClient<R, W>, settings: DriverSettings, train: Dataset, test: Dataset) -> Self {
        Self {
            client,
            settings,
            train: Arc::new(train),
            test: Arc::new(test),
            metrics: None,
        }
    }

    /// Builds a `Driver` from the shared configuration, loading this client's partition.
    pub fn from_config(
        config: &ClientConfig,
        client_id: ClientId,
        rx: OnoReceiver<R>,
        tx: OnoSender<W>,
    ) -> Result<Self> {
        let seed = client_seed(config, client_id);
        let (train, test) = load_partition(config, seed)?;

        let client = FedClient::new(client_id, rx, tx);
        let settings = DriverSettings::from_config(config, seed);

        Ok(Self::new(client, settings, train, test).with_metrics(config.metrics_file(client_id)?))
    }

    /// Persists every round's metrics into `file`.
    pub fn with_metrics(mut self, file: MetricsFile) -> Self {
        self.metrics = Some(file);
        self
    }

    /// Runs every round and disconnects.
    ///
    /// # Returns
    /// The metrics of every round keyed by the server's round index.
    pub async fn run(mut self) -> Result<BTreeMap<usize, RoundMetrics>> {
        let client_id = self.client.client_id();
        let mut history = BTreeMap::new();

        for round in 0..self.settings.rounds {
            let (server_round, metrics) = self.round(round).await?;
            persist(self.metrics.clone(), server_round, metrics.clone()).await?;
            history.insert(server_round, metrics);

            if round + 1 < self.settings.rounds {
                time::sleep(self.settings.round_delay).await;
            }
        }

        self.client.disconnect().await?;
        info!(client_id = client_id; "every round finished");
        Ok(history)
    }

    async fn round(&mut self, round: usize) -> Result<(usize, RoundMetrics)> {
        let client_id = self.client.client_id();
        let started = Instant::now();
        let round_start_time = unix_secs();

        info!(client_id = client_id, round = round; "round started");

        let settings = self.wait_for_round(round).await?;
        let budget = settings.components_per_client;

        let downloaded = self.client.download_model().await?;
        let first_server_bytes = byte_size(&downloaded);
        let first_server_components = downloaded.len();
        let received = blocking(move || decode_all::<Tree, _>(downloaded.as_slice())).await?;

        let train = Arc::clone(&self.train);
        let params = self.settings.forest;
        let seed = self.settings.seed.wrapping_add(round as u64);

        let fit_started = Instant::now();
        let local = blocking(move || fit_forest(budget, &train, &params, seed)).await?;
        let fit_time = fit_started.elapsed();

        let (model, kept, eval) =
            retain(Arc::clone(&self.test), LocalModel::new(local), received).await?;
        log_evaluation(round, "initial", kept, eval.absolute_error);

        let (model, encoded) = blocking(move || {
            let encoded = encode_all(model.components())?;
            Ok((model, encoded))
        })
        .await?;
        let client_bytes = byte_size(&encoded);

        let aggregated = self.client.upload_components(&encoded).await?;
        let final_server_bytes = byte_size(&aggregated);
        info!(client_id = client_id, components = aggregated.len(); "received the aggregated model");

        if !self.client.end_of_round().await? {
            warn!(client_id = client_id, round = round; "the server could not close the round");
            return Err(ClientErr::RoundRejected(settings.current_round));
        }

        let aggregated = blocking(move || decode_all::<Tree, _>(aggregated.as_slice())).await?;

        let evaluate_started = Instant::now();
        let (model, kept, eval) = retain(Arc::clone(&self.test), model, aggregated).await?;
        let evaluate_time = evaluate_started.elapsed();
        log_evaluation(round, "final", kept, eval.absolute_error);

        let round_end_time = unix_secs();
        let round_time = started.elapsed();

        let samples = self.test.head(self.settings.inference_samples)?;
        let inference_started = Instant::now();
        blocking(move || predict_mean(model.components(), samples.features()).map(drop)).await?;
        let inference_time = inference_started.elapsed();

        let metrics = json!({
            "components_per_client": budget,
            "first_server_ensemble_bytes": first_server_bytes,
            "first_server_ensemble_components": first_server_components,
            "fit_time": fit_time.as_secs_f64(),
            "client_ensemble_bytes": client_bytes,
            "final_server_ensemble_bytes": final_server_bytes,
            "absolute_error": eval.absolute_error,
            "squared_error": eval.squared_error,
            "pearson_corr": eval.pearson,
            "round_time": round_time.as_secs_f64(),
            "round_start_time": round_start_time,
            "round_end_time": round_end_time,
            "evaluate_time": evaluate_time.as_secs_f64(),
            "inference_time": inference_time.as_secs_f64(),
        });

        let metrics = match metrics {
            serde_json::Value::Object(map) => map,
            _ => RoundMetrics::new(),
        };

        Ok((settings.current_round, metrics))
    }

    /// Polls the settings until the server reaches `round`.
    ///
    /// # Returns
    /// The settings of `round`, or `RoundTimeout` once the wait exceeds the timeout.
    async fn wait_for_round(&mut self, round: usize) -> Result<Settings> {
        let waiting = Instant::now();
        let mut settings = self.client.get_settings().await?;

        while settings.current_round < round {
            if waiting.elapsed() > self.settings.timeout {
                return Err(ClientErr::RoundTimeout {
                    round,
                    server_round: settings.current_round,
                });
            }

            info!(
                round = round,
                server_round = settings.current_round;
                "waiting for the server to reach the round"
            );

            time::sleep(self.settings.poll_interval).await;
            settings = self.client.get_settings().await?;
        }

        Ok(settings)
    }
}

/// Applies the retention rule on a blocking thread.
async fn retain(
    test: Arc<Dataset>,
    mut model: LocalModel<Tree>,
    received: Vec<Tree>,
) -> Result<(LocalModel<Tree>, Kept, Evaluation)> {
    blocking(move || {
        let (kept, eval) = model.retain_better(received, &test)?;
        Ok((model, kept, eval))
    })
    .await
}

async fn persist(file: Option<MetricsFile>, round: usize, metrics: RoundMetrics) -> Result<()> {
    let Some(file) = file else {
        return Ok(());
    };

    task::spawn_blocking(move || file.record(round, metrics)).await??;
    debug!(round = round; "round metrics persisted");
    Ok(())
}

/// Runs CPU bound model work off the runtime's threads.
async fn blocking<F, T>(job: F) -> Result<T>
where
    F: FnOnce() -> forest::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(task::spawn_blocking(job).await??)
}

fn byte_size(components: &[Vec<u8>]) -> usize {
    components.iter().map(Vec::len).sum()
}

fn unix_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}

fn log_evaluation(round: usize, stage: &str, kept: Kept, absolute_error: f64) {
    info!(
        round = round,
        stage = stage,
        kept:? = kept,
        absolute_error = absolute_error;
        "evaluated the ensembles"
    );
}
