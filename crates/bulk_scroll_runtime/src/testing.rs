use std::future::Future;
use std::sync::atomic::{
    AtomicUsize,
    Ordering,
};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::Instant;

use crate::{
    Runtime,
    SpawnRejected,
};

/// Deterministic [`Runtime`] for unit tests: `wait` resolves immediately
/// (recording the requested duration instead of sleeping) and the worker
/// pool never rejects unless told to, so tests exercise the driver's retry
/// and batching logic without real wall-clock delay.
#[derive(Clone)]
pub struct TestDriverRuntime {
    start: Instant,
    waited: Arc<Mutex<Vec<Duration>>>,
    reject_workers: Arc<AtomicUsize>,
}

impl TestDriverRuntime {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            waited: Arc::new(Mutex::new(Vec::new())),
            reject_workers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The durations passed to `wait`, in call order.
    pub fn waited_durations(&self) -> Vec<Duration> {
        self.waited.lock().clone()
    }

    pub fn total_waited(&self) -> Duration {
        self.waited.lock().iter().sum()
    }

    /// Make the next `n` calls to `spawn_worker` reject with `AtCapacity`.
    pub fn reject_next_workers(&self, n: usize) {
        self.reject_workers.store(n, Ordering::SeqCst);
    }
}

impl Default for TestDriverRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runtime for TestDriverRuntime {
    fn monotonic_now(&self) -> Instant {
        self.start
    }

    async fn wait(&self, d: Duration) {
        self.waited.lock().push(d);
    }

    async fn spawn_worker<F, T>(&self, f: F) -> Result<T, SpawnRejected>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let remaining = self.reject_workers.load(Ordering::SeqCst);
        if remaining > 0 {
            self.reject_workers.store(remaining - 1, Ordering::SeqCst);
            return Err(SpawnRejected::AtCapacity);
        }
        Ok(f())
    }

    fn rng(&self) -> Box<dyn rand::RngCore + Send> {
        Box::new(StdRng::seed_from_u64(0))
    }

    /// Runs on the ambient Tokio test executor, same as production. Tests
    /// that assert on its side effects should `tokio::task::yield_now()`
    /// once to let it run before inspecting state.
    fn spawn_detached(&self, fut: impl Future<Output = ()> + Send + 'static) {
        tokio::spawn(fut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_records_without_sleeping() {
        let rt = TestDriverRuntime::new();
        rt.wait(Duration::from_secs(600)).await;
        rt.wait(Duration::from_millis(30)).await;
        assert_eq!(rt.total_waited(), Duration::from_secs(600) + Duration::from_millis(30));
    }

    #[tokio::test]
    async fn spawn_worker_rejects_on_demand() {
        let rt = TestDriverRuntime::new();
        rt.reject_next_workers(1);
        let first = rt.spawn_worker(|| 1).await;
        assert!(matches!(first, Err(SpawnRejected::AtCapacity)));
        let second = rt.spawn_worker(|| 2).await;
        assert_eq!(second.unwrap(), 2);
    }
}
