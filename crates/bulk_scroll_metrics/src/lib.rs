//! Prometheus metrics for the bulk-by-scroll engine, registered against a
//! process-global registry independent of any single request's in-memory
//! [`ProgressRecord`](../bulk_scroll_core/struct.ProgressRecord.html) — this
//! crate is for operators watching every request at once.

mod macros;
mod timer;

use std::sync::LazyLock;

pub use prometheus;
pub use timer::StatusTimer;

static REGISTRY: LazyLock<prometheus::Registry> = LazyLock::new(prometheus::Registry::new);

pub fn registry() -> &'static prometheus::Registry {
    &REGISTRY
}

pub fn encode_text() -> anyhow::Result<String> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buf = Vec::new();
    encoder.encode(&metric_families, &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

register_bulk_scroll_counter!(
    pub BULK_SCROLL_BATCHES_TOTAL,
    "Number of scroll batches processed",
    &["kind"]
);
register_bulk_scroll_counter!(
    pub BULK_SCROLL_RETRIES_TOTAL,
    "Number of bulk retries taken due to transient rejection",
    &["kind"]
);
register_bulk_scroll_counter!(
    pub BULK_SCROLL_VERSION_CONFLICTS_TOTAL,
    "Number of per-document version conflicts observed",
    &["kind"]
);
register_bulk_scroll_counter!(
    pub BULK_SCROLL_NOOPS_TOTAL,
    "Number of hits skipped as a transform noop",
    &["kind"]
);
register_bulk_scroll_counter!(
    pub BULK_SCROLL_CANCELLED_TOTAL,
    "Number of requests that finished via cancellation",
    &["kind"]
);
register_bulk_scroll_counter!(
    pub BULK_SCROLL_FATAL_ERRORS_TOTAL,
    "Number of requests that finished with a fatal error",
    &["kind"]
);
register_bulk_scroll_histogram!(
    pub BULK_SCROLL_BATCH_SECONDS,
    "Latency of one bulk round-trip, including retries",
    &["kind"]
);
register_bulk_scroll_histogram!(
    pub BULK_SCROLL_REQUEST_SECONDS,
    "Latency of an entire bulk-by-scroll request",
    &["status"]
);

pub fn log_batch(kind: &str) {
    BULK_SCROLL_BATCHES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn log_retry(kind: &str) {
    BULK_SCROLL_RETRIES_TOTAL.with_label_values(&[kind]).inc();
}

pub fn log_version_conflict(kind: &str) {
    BULK_SCROLL_VERSION_CONFLICTS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn log_noop(kind: &str) {
    BULK_SCROLL_NOOPS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn log_cancelled(kind: &str) {
    BULK_SCROLL_CANCELLED_TOTAL.with_label_values(&[kind]).inc();
}

pub fn log_fatal_error(kind: &str) {
    BULK_SCROLL_FATAL_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn request_timer() -> StatusTimer {
    StatusTimer::new(&BULK_SCROLL_REQUEST_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_register_once_and_accumulate() {
        log_batch("reindex");
        log_batch("reindex");
        assert_eq!(
            BULK_SCROLL_BATCHES_TOTAL.with_label_values(&["reindex"]).get(),
            2
        );
    }

    #[test]
    fn text_encoding_includes_registered_families() {
        log_retry("update_by_query");
        let text = encode_text().expect("encode");
        assert!(text.contains("bulk_scroll_retries_total"));
    }
}
