use std::{sync::Arc, time::Duration};

use forest::Component;
use log::{debug, error, info, warn};
use tokio::time::{self, Instant};

use super::{
    Coordinator, GlobalEnsemble,
    round::{AggregationStatus, Outcome, Release},
};
use crate::{config::BarrierPolicy, error::Result};

impl<C: Component> Coordinator<C> {
    /// The body of the single supervisor task of `round`.
    ///
    /// It alone flips the status from `Idle` to `Running`, so aggregation runs exactly once.
    pub(super) async fn supervise(self: Arc<Self>, round: usize) {
        self.await_barrier(round).await;

        let submissions = {
            let mut state = self.state.lock();

            if state.index != round || state.status != AggregationStatus::Idle {
                warn!(round = round; "supervisor outlived its round");
                return;
            }

            state.status = AggregationStatus::Running;
            state.submissions.clone()
        };

        info!(round = round, submissions = submissions.len(); "aggregation started");

        let aggregator = Arc::clone(&self.aggregator);
        let validation = Arc::clone(&self.validation);
        let started = Instant::now();

        let result = self
            .pool
            .run(move || -> Result<GlobalEnsemble<C>> {
                let selected = aggregator.select(&submissions, &validation)?;
                Ok(GlobalEnsemble::encode(selected)?)
            })
            .await
            .and_then(|res| res);

        let elapsed = started.elapsed();
        let mut state = self.state.lock();

        let outcome = match result {
            Ok(ensemble) => {
                info!(
                    round = round,
                    components = ensemble.len(),
                    secs = elapsed.as_secs_f64();
                    "aggregation finished"
                );

                state.ensemble = ensemble;
                Outcome::Aggregated
            }
            Err(e) => {
                error!(round = round; "aggregation failed, keeping the previous ensemble: {e}");
                state.aggregation_failed = true;
                Outcome::Failed(e.to_string())
            }
        };

        state.status = AggregationStatus::Done;
        state.aggregation_time = Some(elapsed);

        let snapshot = state.ensemble.clone();
        state.release.send_replace(Some(Release { outcome, snapshot }));
    }

    /// Waits until every expected client submitted, or the straggler deadline passes.
    async fn await_barrier(&self, round: usize) {
        let expected = self.settings.expected_clients;

        let deadline = match self.settings.barrier {
            BarrierPolicy::Indefinite => None,
            BarrierPolicy::Timeout { secs } => Some(Instant::now() + Duration::from_secs(secs)),
        };

        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state.lock();
                let connected = state.connected.len();

                if state.index != round || connected >= expected {
                    return;
                }

                debug!(
                    round = round,
                    connected = connected,
                    expected = expected;
                    "waiting for clients"
                );
            }

            let Some(deadline) = deadline else {
                notified.await;
                continue;
            };

            if time::timeout_at(deadline, notified).await.is_err() {
                let connected = self.state.lock().connected.len();
                warn!(
                    round = round,
                    connected = connected,
                    expected = expected;
                    "barrier timed out, aggregating a partial set"
                );
                return;
            }
        }
    }
}
