use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::sync::oneshot;

use crate::error::{Result, ServerErr};

/// A bounded pool of threads for the CPU bound work of the coordinator.
///
/// Scoring, encoding and decoding never run on the async runtime's threads, any rayon
/// parallelism started inside a job stays within this pool.
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<ThreadPool>,
}

impl WorkerPool {
    /// Creates a new `WorkerPool`.
    ///
    /// # Arguments
    /// * `jobs` - The amount of threads, at least one.
    pub fn new(jobs: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .thread_name(|i| format!("fedt-worker-{i}"))
            .build()
            .map_err(|e| ServerErr::Config(format!("cannot build the worker pool: {e}")))?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `job` on the pool and waits for its output without blocking the runtime.
    ///
    /// # Returns
    /// `WorkerPanicked` if the job panicked.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        self.pool.spawn(move || {
            let out = panic::catch_unwind(AssertUnwindSafe(job));
            let _ = tx.send(out);
        });

        match rx.await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(_)) => Err(ServerErr::WorkerPanicked),
            Err(_) => Err(ServerErr::PoolClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use rayon::prelude::*;

    use super::*;

    #[tokio::test]
    async fn runs_jobs_inside_the_pool() {
        let pool = WorkerPool::new(2).unwrap();
        assert_eq!(pool.threads(), 2);

        let (sum, threads) = pool
            .run(|| {
                let sum: u64 = (1..=100u64).into_par_iter().sum();
                (sum, rayon::current_num_threads())
            })
            .await
            .unwrap();

        assert_eq!(sum, 5050);
        assert_eq!(threads, 2);
    }

    #[tokio::test]
    async fn panics_become_errors() {
        let pool = WorkerPool::new(1).unwrap();

        let res = pool.run(|| -> u8 { panic!("boom") }).await;
        assert!(matches!(res, Err(ServerErr::WorkerPanicked)));

        assert_eq!(pool.run(|| 7).await.unwrap(), 7);
    }
}
