use std::time::{
    Duration,
    Instant,
};

use prometheus::HistogramVec;

/// Timer that reports to a `status`-labeled histogram on drop, defaulting to
/// `status="error"` unless a terminal status is recorded first.
pub struct StatusTimer {
    start: Instant,
    histogram: &'static HistogramVec,
    status: &'static str,
    done: bool,
}

impl StatusTimer {
    pub fn new(histogram: &'static HistogramVec) -> Self {
        Self {
            start: Instant::now(),
            histogram,
            status: "error",
            done: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(mut self) -> Duration {
        self.finish_with("ok")
    }

    pub fn finish_cancelled(mut self) -> Duration {
        self.finish_with("cancelled")
    }

    pub fn finish_with(mut self, status: &'static str) -> Duration {
        self.status = status;
        let elapsed = self.elapsed();
        self.done = true;
        elapsed
    }
}

impl Drop for StatusTimer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        let elapsed = self.start.elapsed().as_secs_f64();
        self.histogram.with_label_values(&[self.status]).observe(elapsed);
        if !self.done {
            tracing::debug!(status = self.status, elapsed, "bulk_scroll request finished");
        }
    }
}
