//! Runtime trait for abstracting away OS/async-runtime facilities, so the
//! bulk-by-scroll driver runs identically in production and against a
//! deterministic test clock.

mod prod;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use thiserror::Error;
use tokio::time::Instant;

pub use prod::TokioRuntime;

#[derive(Error, Debug)]
pub enum SpawnRejected {
    #[error("worker pool is at capacity")]
    AtCapacity,
    #[error("worker task panicked: {0}")]
    Panicked(String),
}

/// Abstracts over time, spawning, and randomness for the bulk-by-scroll
/// control loop.
///
/// `wait` is the only suspension point the retry executor uses outside of
/// RPC calls, so it is the one piece of "real time" a test needs to skip.
#[async_trait]
pub trait Runtime: Send + Sync + Clone + 'static {
    /// A monotonic clock reading, used for `started_at`/`elapsed` bookkeeping.
    fn monotonic_now(&self) -> Instant;

    /// Suspend the current task for approximately `d`. Implementations used
    /// in tests may resolve immediately while still recording `d`.
    async fn wait(&self, d: Duration);

    /// Run `f` on the runtime's bounded worker pool, used for document
    /// transforms so they don't block the network reply path. Rejection is
    /// reported to the caller rather than silently queued, since the driver
    /// treats worker-pool rejection as fatal.
    async fn spawn_worker<F, T>(&self, f: F) -> Result<T, SpawnRejected>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static;

    /// A boxed source of randomness, used by jittered retry policies and by
    /// test fixtures. The default backoff schedule does not consume this.
    fn rng(&self) -> Box<dyn RngCore + Send>;

    /// Run `fut` in the background without awaiting it. Used for the
    /// scroll-release call, which must fire on every exit path but must
    /// never delay handing the response back to the caller.
    fn spawn_detached(&self, fut: impl Future<Output = ()> + Send + 'static);
}
