use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use comms::specs::ClientId;
use forest::RoundMetrics;
use serde_json::json;
use tokio::sync::watch;

use super::GlobalEnsemble;
use crate::aggregation::Submission;

/// Where the single aggregation of a round stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationStatus {
    Idle,
    Running,
    Done,
}

/// How the aggregation of a round ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Aggregated,
    Failed(String),
}

/// Broadcast once per round to every suspended upload.
pub struct Release<C> {
    pub outcome: Outcome,
    pub snapshot: GlobalEnsemble<C>,
}

impl<C> Clone for Release<C> {
    fn clone(&self) -> Self {
        Self {
            outcome: self.outcome.clone(),
            snapshot: self.snapshot.clone(),
        }
    }
}

/// The span between a client's download and its end of round.
#[derive(Debug, Clone, Copy)]
pub struct Runtime {
    pub start: Instant,
    pub end: Option<Instant>,
}

/// Every piece of bookkeeping of the running round, only ever touched under the coordinator's lock.
pub struct RoundState<C> {
    pub index: usize,
    pub connected: HashSet<ClientId>,
    pub submissions: Vec<Submission<C>>,
    pub status: AggregationStatus,
    pub respondents: usize,
    pub runtimes: HashMap<ClientId, Runtime>,
    pub supervisor_spawned: bool,
    pub release: watch::Sender<Option<Release<C>>>,
    pub started: Instant,
    pub aggregation_time: Option<Duration>,
    pub aggregation_failed: bool,
    pub ensemble: GlobalEnsemble<C>,
}

impl<C> RoundState<C> {
    pub fn new(index: usize, ensemble: GlobalEnsemble<C>) -> Self {
        let (release, _) = watch::channel(None);

        Self {
            index,
            connected: HashSet::new(),
            submissions: Vec::new(),
            status: AggregationStatus::Idle,
            respondents: 0,
            runtimes: HashMap::new(),
            supervisor_spawned: false,
            release,
            started: Instant::now(),
            aggregation_time: None,
            aggregation_failed: false,
            ensemble,
        }
    }

    /// Clears every round local collection and arms a fresh barrier for `index`.
    pub fn reset(&mut self, index: usize, ensemble: GlobalEnsemble<C>) {
        *self = Self::new(index, ensemble);
    }

    /// Sum of the closed runtime spans divided by the expected amount of clients.
    pub fn avg_execution_time(&self, expected_clients: usize) -> f64 {
        let total: f64 = self
            .runtimes
            .values()
            .filter_map(|rt| rt.end.map(|end| end.duration_since(rt.start).as_secs_f64()))
            .sum();

        total / expected_clients as f64
    }
}

impl<C: forest::Component> RoundState<C> {
    /// The metrics persisted once the last expected client ends the round.
    pub fn report(&self, components_per_client: usize, expected_clients: usize) -> RoundMetrics {
        let report = json!({
            "components_per_client": components_per_client,
            "submissions": self.submissions.len(),
            "connected_clients": self.connected.len(),
            "aggregation_time": self.aggregation_time.map(|d| d.as_secs_f64()),
            "aggregation_failed": self.aggregation_failed,
            "avg_execution_time": self.avg_execution_time(expected_clients),
            "round_time": self.started.elapsed().as_secs_f64(),
            "global_components": self.ensemble.len(),
            "global_ensemble_bytes": self.ensemble.byte_size(),
        });

        match report {
            serde_json::Value::Object(map) => map,
            _ => RoundMetrics::new(),
        }
    }
}
