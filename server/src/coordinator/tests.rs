use std::{
    env,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use forest::{Dataset, MetricsFile};
use futures::future::join_all;
use tokio::time;

use super::*;
use crate::{
    aggregation::{AggregationErr, Aggregator, Strategy},
    testing::{Fixed, encoded, validation},
};

/// Wraps a real aggregator and counts how many times it runs.
struct Counting {
    inner: Aggregator,
    calls: AtomicUsize,
}

impl Aggregate<Fixed> for Counting {
    fn select(
        &self,
        submissions: &[Submission<Fixed>],
        validation: &Dataset,
    ) -> crate::aggregation::Result<Vec<Arc<Fixed>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.select(submissions, validation)
    }
}

struct Failing;

impl Aggregate<Fixed> for Failing {
    fn select(
        &self,
        _: &[Submission<Fixed>],
        _: &Dataset,
    ) -> crate::aggregation::Result<Vec<Arc<Fixed>>> {
        Err(AggregationErr::NoSubmissions)
    }
}

fn settings(expected_clients: usize, rounds: usize) -> RoundSettings {
    RoundSettings {
        expected_clients,
        rounds,
        schedule: Schedule {
            initial: 3,
            increment: 2,
        },
        barrier: BarrierPolicy::Indefinite,
        on_failure: AggregationFailurePolicy::RetainStale,
    }
}

/// Bootstrapped components get ids from 1000 on so they are told apart from uploads.
fn bootstrap() -> Bootstrap<Fixed> {
    Arc::new(|_, n| Ok((0..n as u32).map(|i| Fixed::new(1000 + i, vec![0.0])).collect()))
}

fn coordinator(settings: RoundSettings, aggregator: Arc<dyn Aggregate<Fixed>>) -> Arc<Coordinator<Fixed>> {
    let pool = WorkerPool::new(2).unwrap();
    let coordinator =
        Coordinator::new(settings, aggregator, bootstrap(), validation(&[0.0]), pool).unwrap();

    Arc::new(coordinator)
}

fn keep_all() -> Arc<dyn Aggregate<Fixed>> {
    Arc::new(Aggregator::new(Strategy::Random { ratio: 1.0 }, Some(7)))
}

fn ids(ensemble: &GlobalEnsemble<Fixed>) -> Vec<u32> {
    let mut ids: Vec<_> = ensemble.components().iter().map(|c| c.id).collect();
    ids.sort_unstable();
    ids
}

async fn wait_connected(coordinator: &Coordinator<Fixed>, amount: usize) {
    while coordinator.state.lock().connected.len() < amount {
        time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn aggregation_runs_exactly_once() {
    for clients in [1usize, 2, 10] {
        let counting = Arc::new(Counting {
            inner: Aggregator::new(Strategy::Random { ratio: 1.0 }, Some(1)),
            calls: AtomicUsize::new(0),
        });

        let coordinator = coordinator(settings(clients, 3), counting.clone());

        let uploads = (0..clients as u32).map(|id| {
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.upload_components(id, encoded(id * 10, 3)).await }
        });

        let snapshots = join_all(uploads).await;

        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

        for snapshot in snapshots {
            let snapshot = snapshot.unwrap();
            assert_eq!(snapshot.len(), clients * 3);
            assert!(ids(&snapshot).iter().all(|&id| id < 1000));
        }

        assert_eq!(coordinator.state.lock().status, AggregationStatus::Done);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn round_advances_after_every_respondent() {
    let coordinator = coordinator(settings(3, 5), keep_all());

    assert_eq!(coordinator.get_settings(0).components_per_client, 3);
    assert_eq!(coordinator.download_model(0).len(), 3);

    let uploads = (0..3u32).map(|id| {
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.upload_components(id, encoded(id * 10, 3)).await }
    });
    for snapshot in join_all(uploads).await {
        assert_eq!(snapshot.unwrap().len(), 9);
    }

    coordinator.end_of_round(0).await.unwrap();
    coordinator.end_of_round(1).await.unwrap();
    assert_eq!(coordinator.round(), 0);

    coordinator.end_of_round(2).await.unwrap();
    assert_eq!(coordinator.round(), 1);

    {
        let state = coordinator.state.lock();
        assert!(state.connected.is_empty());
        assert!(state.submissions.is_empty());
        assert!(state.runtimes.is_empty());
        assert_eq!(state.respondents, 0);
        assert_eq!(state.status, AggregationStatus::Idle);
        assert!(!state.supervisor_spawned);
    }

    let settings = coordinator.get_settings(0);
    assert_eq!(settings.current_round, 1);
    assert_eq!(settings.components_per_client, 5);

    let fresh = coordinator.download_model(0);
    assert_eq!(ids(&fresh), vec![1000, 1001, 1002, 1003, 1004]);
    assert!(!coordinator.shutdown().is_cancelled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_submissions_are_rejected() {
    let coordinator = coordinator(settings(2, 3), keep_all());

    let first = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.upload_components(1, encoded(10, 3)).await }
    });

    wait_connected(&coordinator, 1).await;

    let duplicate = coordinator.upload_components(1, encoded(20, 3)).await;
    assert!(matches!(
        duplicate,
        Err(ServerErr::DuplicateSubmission {
            client_id: 1,
            round: 0
        })
    ));

    let second = coordinator.upload_components(2, encoded(30, 3)).await.unwrap();
    let first = first.await.unwrap().unwrap();

    assert_eq!(ids(&first), ids(&second));
    assert_eq!(ids(&second), vec![10, 11, 12, 30, 31, 32]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn indefinite_barrier_waits_for_every_client() {
    let coordinator = coordinator(settings(2, 3), keep_all());

    let pending = time::timeout(
        Duration::from_millis(200),
        coordinator.upload_components(1, encoded(10, 3)),
    )
    .await;

    assert!(pending.is_err());
    assert_eq!(coordinator.state.lock().status, AggregationStatus::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_barrier_aggregates_the_partial_set() {
    let mut settings = settings(3, 3);
    settings.barrier = BarrierPolicy::Timeout { secs: 1 };
    let coordinator = coordinator(settings, keep_all());

    let snapshot = time::timeout(
        Duration::from_secs(5),
        coordinator.upload_components(1, encoded(10, 3)),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(ids(&snapshot), vec![10, 11, 12]);

    let late = time::timeout(
        Duration::from_secs(1),
        coordinator.upload_components(2, encoded(20, 3)),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(ids(&late), vec![10, 11, 12]);

    let state = coordinator.state.lock();
    assert_eq!(state.submissions.len(), 1);
    assert!(!state.connected.contains(&2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_aggregation_retains_the_stale_ensemble() {
    let coordinator = coordinator(settings(1, 3), Arc::new(Failing));

    let snapshot = coordinator.upload_components(1, encoded(10, 3)).await.unwrap();
    assert_eq!(ids(&snapshot), vec![1000, 1001, 1002]);

    let state = coordinator.state.lock();
    assert!(state.aggregation_failed);
    assert_eq!(state.status, AggregationStatus::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_aggregation_can_be_propagated() {
    let mut settings = settings(2, 3);
    settings.on_failure = AggregationFailurePolicy::Propagate;
    let coordinator = coordinator(settings, Arc::new(Failing));

    let uploads = (0..2u32).map(|id| {
        let coordinator = Arc::clone(&coordinator);
        async move { coordinator.upload_components(id, encoded(id * 10, 3)).await }
    });

    for res in join_all(uploads).await {
        assert!(matches!(res, Err(ServerErr::AggregationFailed(_))));
    }
}

#[tokio::test]
async fn undecodable_uploads_are_rejected_before_registering() {
    let coordinator = coordinator(settings(1, 3), keep_all());

    let res = coordinator
        .upload_components(1, vec![b"not a component".to_vec()])
        .await;

    assert!(matches!(res, Err(ServerErr::Forest(_))));
    assert!(coordinator.state.lock().connected.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_round_cancels_the_shutdown_token_and_persists_metrics() {
    let dir = env::temp_dir().join(format!("fedt-coordinator-{}", std::process::id()));
    let file = MetricsFile::next_in(&dir, "random_server").unwrap();
    let path = file.path().to_path_buf();

    let coordinator = Coordinator::new(
        settings(1, 1),
        keep_all(),
        bootstrap(),
        validation(&[0.0]),
        WorkerPool::new(1).unwrap(),
    )
    .unwrap()
    .with_metrics(file);
    let coordinator = Arc::new(coordinator);

    let token = coordinator.shutdown();

    coordinator.download_model(1);
    coordinator.upload_components(1, encoded(10, 4)).await.unwrap();
    coordinator.end_of_round(1).await.unwrap();

    assert!(token.is_cancelled());
    assert_eq!(coordinator.round(), 1);
    assert_eq!(ids(&coordinator.download_model(1)), vec![10, 11, 12, 13]);

    let history = MetricsFile::new(&path).load().unwrap();
    let round = &history["0"];
    assert_eq!(round["components_per_client"], 3);
    assert_eq!(round["submissions"], 1);
    assert_eq!(round["connected_clients"], 1);
    assert_eq!(round["global_components"], 4);
    assert_eq!(round["aggregation_failed"], false);
    assert!(round["aggregation_time"].as_f64().unwrap() >= 0.0);

    std::fs::remove_dir_all(dir).ok();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_bootstrap_still_advances_the_round() {
    let bootstrap: Bootstrap<Fixed> = Arc::new(|round: usize, n: usize| {
        if round == 1 {
            return Err(forest::ForestErr::EmptyDataset);
        }
        Ok((0..n as u32).map(|i| Fixed::new(1000 + i, vec![0.0])).collect())
    });

    let coordinator = Coordinator::new(
        settings(1, 3),
        keep_all(),
        bootstrap,
        validation(&[0.0]),
        WorkerPool::new(1).unwrap(),
    )
    .unwrap();
    let coordinator = Arc::new(coordinator);

    coordinator.download_model(1);
    coordinator.upload_components(1, encoded(10, 3)).await.unwrap();
    coordinator.end_of_round(1).await.unwrap();

    assert_eq!(coordinator.round(), 1);
    {
        let state = coordinator.state.lock();
        assert_eq!(state.respondents, 0);
        assert_eq!(state.status, AggregationStatus::Idle);
    }
    assert_eq!(ids(&coordinator.download_model(1)), vec![10, 11, 12]);

    coordinator.upload_components(1, encoded(20, 5)).await.unwrap();
    coordinator.end_of_round(1).await.unwrap();

    assert_eq!(coordinator.round(), 2);
    assert_eq!(
        ids(&coordinator.download_model(1)),
        (1000..1007).collect::<Vec<_>>()
    );
}
