use std::time::Duration;

use rand::RngCore;

use crate::progress::ProgressRecord;

/// Exponential backoff schedule. `delay(n) = initial + 10ms * (floor(exp(0.8
/// * n)) - 1)` for `n` in `0..max_retries`. This matches the historical
/// schedule whose sum, for `initial = 500ms` and `max_retries = 11`, is
/// exactly 59,460ms — a fixed, testable total rather than an incidental
/// approximation.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    initial: Duration,
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(initial: Duration, max_retries: u32) -> Self {
        Self { initial, max_retries }
    }

    /// The engine's default policy: 500ms initial, 11 retries.
    pub fn default_policy() -> Self {
        Self::new(Duration::from_millis(500), 11)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn delay_at(&self, n: u32) -> Duration {
        let extra_ms = 10.0 * ((0.8 * n as f64).exp().floor() - 1.0);
        self.initial + Duration::from_millis(extra_ms.max(0.0) as u64)
    }

    /// The full sequence of delays this policy would hand out, in order.
    pub fn delays(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|n| self.delay_at(n)).collect()
    }

    pub fn total_delay(&self) -> Duration {
        self.delays().into_iter().sum()
    }

    pub fn iter(&self) -> RetryIter {
        RetryIter { policy: *self, next: 0 }
    }

    /// A full-jitter variant of this schedule: each delay is a uniform
    /// random draw in `[0, delay_at(n)]`, drawn from `rng` (ordinarily
    /// `Runtime::rng()`, so it stays mockable in tests) rather than this
    /// policy's own deterministic schedule. Not the default: the default
    /// policy must stay exactly reproducible so I7's 59,460ms total is a
    /// fixed, testable number. Offered for production deployments where
    /// thundering-herd avoidance across many concurrent requests matters
    /// more than a single request's exact backoff total.
    pub fn jittered_iter(&self, rng: Box<dyn RngCore + Send>) -> JitteredRetryIter {
        JitteredRetryIter { policy: *self, next: 0, rng }
    }
}

/// Lazily yields this policy's delays, one per call to [`RetryIter::next`].
pub struct RetryIter {
    policy: RetryPolicy,
    next: u32,
}

impl Iterator for RetryIter {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.next >= self.policy.max_retries {
            return None;
        }
        let delay = self.policy.delay_at(self.next);
        self.next += 1;
        Some(delay)
    }
}

/// Full-jitter counterpart to [`RetryIter`]: yields the same number of
/// delays as the underlying policy, but each is a uniform random fraction
/// of the deterministic schedule's value rather than the value itself.
pub struct JitteredRetryIter {
    policy: RetryPolicy,
    next: u32,
    rng: Box<dyn RngCore + Send>,
}

impl JitteredRetryIter {
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.next >= self.policy.max_retries {
            return None;
        }
        let base = self.policy.delay_at(self.next);
        self.next += 1;
        let fraction = self.rng.next_u32() as f64 / u32::MAX as f64;
        Some(Duration::from_secs_f64(base.as_secs_f64() * fraction))
    }
}

/// Wraps a [`RetryPolicy`] so every delay taken is also recorded on the
/// request's [`ProgressRecord`]. The count reflects delays *taken*, not
/// attempts *made* — with `max_retries = N` the observed count after a
/// fully exhausted policy is `N`, but an earlier success can stop it short.
pub struct CountingRetryIter {
    inner: RetryIter,
    progress: ProgressRecord,
}

impl CountingRetryIter {
    pub fn new(policy: RetryPolicy, progress: ProgressRecord) -> Self {
        Self {
            inner: policy.iter(),
            progress,
        }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.inner.next()?;
        self.progress.count_retry();
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_has_eleven_retries() {
        assert_eq!(RetryPolicy::default_policy().max_retries(), 11);
    }

    #[test]
    fn default_policy_total_delay_is_exactly_59460ms() {
        let total = RetryPolicy::default_policy().total_delay();
        assert_eq!(total, Duration::from_millis(59_460));
    }

    #[test]
    fn default_policy_individual_delays_match_canonical_schedule() {
        let delays: Vec<u64> = RetryPolicy::default_policy()
            .delays()
            .into_iter()
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![500, 510, 530, 600, 730, 1030, 1700, 3190, 6500, 13880, 30290]
        );
    }

    #[test]
    fn iterator_is_exhausted_after_max_retries() {
        let mut iter = RetryPolicy::new(Duration::from_millis(10), 2).iter();
        assert!(iter.next().is_some());
        assert!(iter.next().is_some());
        assert!(iter.next().is_none());
    }

    #[test]
    fn jittered_iter_never_exceeds_the_deterministic_schedule() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let policy = RetryPolicy::new(Duration::from_millis(500), 11);
        let deterministic = policy.delays();
        let mut jittered = policy.jittered_iter(Box::new(StdRng::seed_from_u64(42)));
        for bound in deterministic {
            let delay = jittered.next_delay().expect("same length as deterministic schedule");
            assert!(delay <= bound);
        }
        assert!(jittered.next_delay().is_none());
    }

    #[test]
    fn counting_iter_increments_progress_only_for_delays_taken() {
        let progress = ProgressRecord::new();
        let mut iter = CountingRetryIter::new(RetryPolicy::new(Duration::from_millis(1), 3), progress.clone());
        iter.next_delay();
        iter.next_delay();
        assert_eq!(progress.snapshot().retries, 2);
    }
}
