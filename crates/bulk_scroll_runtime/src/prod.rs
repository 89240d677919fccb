use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::{
    Runtime,
    SpawnRejected,
};

/// Production [`Runtime`], backed directly by Tokio.
///
/// The worker pool is a bounded semaphore rather than a queue: when every
/// permit is held, `spawn_worker` rejects immediately instead of queueing
/// unboundedly, matching the driver's "scheduling rejection is fatal"
/// contract.
#[derive(Clone)]
pub struct TokioRuntime {
    worker_permits: Arc<Semaphore>,
}

impl TokioRuntime {
    pub fn new(max_concurrent_workers: usize) -> Self {
        Self {
            worker_permits: Arc::new(Semaphore::new(max_concurrent_workers)),
        }
    }
}

#[async_trait]
impl Runtime for TokioRuntime {
    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }

    async fn wait(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }

    async fn spawn_worker<F, T>(&self, f: F) -> Result<T, SpawnRejected>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let Ok(_permit) = self.worker_permits.clone().try_acquire_owned() else {
            return Err(SpawnRejected::AtCapacity);
        };
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| SpawnRejected::Panicked(e.to_string()))
    }

    fn rng(&self) -> Box<dyn rand::RngCore + Send> {
        Box::new(StdRng::from_entropy())
    }

    fn spawn_detached(&self, fut: impl Future<Output = ()> + Send + 'static) {
        tokio::spawn(fut);
    }
}
