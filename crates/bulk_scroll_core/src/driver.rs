use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use bulk_scroll_client::{
    BulkItemOutcome,
    BulkRequest,
    BulkResponse,
    SearchClient,
    SearchRequest,
    SearchResponse,
    ShardFailure,
};
use bulk_scroll_errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
};
use bulk_scroll_runtime::Runtime;
use tracing::{
    debug,
    error,
    warn,
};

use crate::cancellation::CancellationHandle;
use crate::progress::{
    ProgressRecord,
    ProgressSnapshot,
};
use crate::request::BulkByScrollRequest;
use crate::retry::CountingRetryIter;
use crate::transform::DocumentTransform;

/// The terminal outcome of a successful (non-erroring) request. A failed
/// request never produces one of these: it produces an `anyhow::Error`
/// instead (see [`ScrollDriver::run`]).
#[derive(Debug, Clone, PartialEq)]
pub struct BulkByScrollResponse {
    pub elapsed: Duration,
    pub progress: ProgressSnapshot,
    pub indexing_failures: Vec<String>,
    pub search_failures: Vec<ShardFailure>,
    pub timed_out: bool,
}

/// Minimum cluster version this engine is willing to run against.
pub const MIN_SUPPORTED_CLUSTER_VERSION: (u32, u32, u32) = (2, 3, 0);

/// The single-writer state machine that drives one reindex /
/// update-by-query / delete-by-query request from start to finish.
///
/// `run` is the entire lifecycle: it owns the request end to end and calls
/// through to `search`/`scroll`/`bulk`/`refresh`/`clear_scroll` as ordinary
/// awaited async calls, rather than a chain of callback objects invoked by
/// an RPC layer. That keeps "at most one state transition active at a
/// time" true by construction instead of by synchronization.
pub struct ScrollDriver<RT: Runtime> {
    request: BulkByScrollRequest,
    client: Arc<dyn SearchClient>,
    transform: Arc<dyn DocumentTransform>,
    runtime: RT,
    progress: ProgressRecord,
    cancellation: CancellationHandle,
}

/// Outcome of draining the scroll to completion, prior to the refresh step
/// and final response assembly. Distinguishes "stopped because cancelled"
/// (skip refresh) from every other stopping point (apply the refresh
/// policy normally).
struct DrainOutcome {
    destination_indices: BTreeSet<String>,
    indexing_failures: Vec<String>,
    search_failures: Vec<ShardFailure>,
    timed_out: bool,
    cancelled: bool,
}

impl<RT: Runtime> ScrollDriver<RT> {
    pub fn new(
        request: BulkByScrollRequest,
        client: Arc<dyn SearchClient>,
        transform: Arc<dyn DocumentTransform>,
        runtime: RT,
    ) -> Self {
        Self {
            request,
            client,
            transform,
            runtime,
            progress: ProgressRecord::new(),
            cancellation: CancellationHandle::new(),
        }
    }

    /// A handle to this request's progress counters, safe to poll from
    /// another task while `run` is in flight.
    pub fn progress(&self) -> ProgressRecord {
        self.progress.clone()
    }

    /// A handle to cancel this request from another task. Cancellation is
    /// cooperative: it takes effect the next time the driver checks between
    /// state transitions, not immediately.
    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    /// Run the request to completion. `cluster_version` gates the
    /// `(2, 3, 0)` minimum-version precondition (see
    /// [`MIN_SUPPORTED_CLUSTER_VERSION`]).
    ///
    /// On every exit path, including an early `?`-propagated error, the
    /// scroll cursor (if one was ever opened) is released via a
    /// fire-and-forget `clear_scroll` that does not delay the response.
    pub async fn run(mut self, cluster_version: (u32, u32, u32)) -> anyhow::Result<BulkByScrollResponse> {
        self.request.validate()?;
        if cluster_version < MIN_SUPPORTED_CLUSTER_VERSION {
            return Err(anyhow::anyhow!(
                "Refusing to execute [{}] because the entire cluster has not been upgraded to 2.3",
                self.request.kind.as_label()
            )
            .context(ErrorMetadata::cluster_version_unsupported(
                "cluster version precondition failed",
            )));
        }

        let kind = self.request.kind.as_label();
        let started_at = self.runtime.monotonic_now();
        let request_timer = bulk_scroll_metrics::request_timer();
        let mut scroll_id: Option<String> = None;

        let drain_result = self.drain(&mut scroll_id).await;

        if let Some(id) = scroll_id.take() {
            self.release_scroll(id);
        }

        let outcome = match drain_result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, kind, "bulk-by-scroll request failed");
                bulk_scroll_metrics::log_fatal_error(kind);
                request_timer.finish_with("error");
                return Err(e);
            },
        };

        if outcome.cancelled {
            bulk_scroll_metrics::log_cancelled(kind);
            request_timer.finish_with("cancelled");
        } else {
            if self.request.refresh && !outcome.destination_indices.is_empty() {
                let indices: Vec<String> = outcome.destination_indices.iter().cloned().collect();
                if let Err(e) = self.client.refresh(&indices, &self.request.context).await {
                    error!(error = %e, kind, "refresh after bulk-by-scroll failed");
                    bulk_scroll_metrics::log_fatal_error(kind);
                    request_timer.finish_with("error");
                    return Err(e);
                }
            }
            if !outcome.indexing_failures.is_empty() || !outcome.search_failures.is_empty() {
                request_timer.finish_with("partial_failure");
            } else {
                request_timer.finish();
            }
        }

        Ok(BulkByScrollResponse {
            elapsed: self.runtime.monotonic_now().duration_since(started_at),
            progress: self.progress.snapshot(),
            indexing_failures: outcome.indexing_failures,
            search_failures: outcome.search_failures,
            timed_out: outcome.timed_out,
        })
    }

    fn release_scroll(&self, scroll_id: String) {
        let client = self.client.clone();
        let context = self.request.context.clone();
        self.runtime.spawn_detached(async move {
            match client.clear_scroll(&[scroll_id.clone()], &context).await {
                Ok(_) => debug!(scroll_id, "cleared scroll"),
                Err(e) => warn!(scroll_id, error = %e, "failed to clear scroll"),
            }
        });
    }

    /// Drains the scroll to its natural stopping point: an empty page, a
    /// search/indexing failure, the size limit, or cancellation. Never
    /// attempts the refresh step itself; that's the caller's job once it
    /// knows whether this stopped because of cancellation.
    async fn drain(&mut self, scroll_id: &mut Option<String>) -> anyhow::Result<DrainOutcome> {
        let kind = self.request.kind.as_label();
        let mut destination_indices = BTreeSet::new();
        let mut indexing_failures = Vec::new();

        let search_source = self.request.effective_search_source();
        let mut resp = self
            .client
            .search(
                SearchRequest {
                    indices: self.request.source_indices.clone(),
                    source: search_source,
                },
                self.request.scroll_keepalive,
                &self.request.context,
            )
            .await?;

        loop {
            if self.cancellation.is_cancelled() {
                self.progress
                    .set_cancelled_reason(self.cancellation.reason().unwrap_or_default());
                return Ok(DrainOutcome {
                    destination_indices,
                    indexing_failures,
                    search_failures: Vec::new(),
                    timed_out: false,
                    cancelled: true,
                });
            }

            *scroll_id = resp.scroll_id.clone();

            if !resp.shard_failures.is_empty() || resp.timed_out {
                return Ok(DrainOutcome {
                    destination_indices,
                    indexing_failures,
                    search_failures: resp.shard_failures,
                    timed_out: resp.timed_out,
                    cancelled: false,
                });
            }

            let clamp = if self.request.size == -1 {
                u64::MAX
            } else {
                self.request.size as u64
            };
            self.progress.set_total(resp.total_hits.min(clamp));

            if resp.hits.is_empty() {
                return Ok(DrainOutcome {
                    destination_indices,
                    indexing_failures,
                    search_failures: Vec::new(),
                    timed_out: false,
                    cancelled: false,
                });
            }

            self.progress.count_batch();
            bulk_scroll_metrics::log_batch(kind);

            let remaining = if self.request.size == -1 {
                usize::MAX
            } else {
                (self.request.size as u64)
                    .saturating_sub(self.progress.successfully_processed()) as usize
            };
            let hits: Vec<_> = resp.hits.into_iter().take(remaining).collect();

            let transform = self.transform.clone();
            let timeout = self.request.timeout;
            let consistency = self.request.consistency;
            let build_result = self
                .runtime
                .spawn_worker(move || transform.build_bulk(&hits, timeout, consistency))
                .await;

            let (bulk, noop_count) = match build_result {
                Err(rejected) => {
                    return Err(anyhow::anyhow!(rejected.to_string())
                        .context(ErrorMetadata::operational_internal_server_error()));
                },
                Ok(Err(transform_err)) => {
                    return Err(anyhow::anyhow!(transform_err.to_string())
                        .context(ErrorMetadata::operational_internal_server_error()));
                },
                Ok(Ok(pair)) => pair,
            };

            for _ in 0..noop_count {
                self.progress.count_noop();
                bulk_scroll_metrics::log_noop(kind);
            }

            if bulk.items.is_empty() {
                resp = self.next_scroll(scroll_id).await?;
                continue;
            }

            if self.cancellation.is_cancelled() {
                self.progress
                    .set_cancelled_reason(self.cancellation.reason().unwrap_or_default());
                return Ok(DrainOutcome {
                    destination_indices,
                    indexing_failures,
                    search_failures: Vec::new(),
                    timed_out: false,
                    cancelled: true,
                });
            }

            let bulk_resp = self.send_bulk_with_retry(bulk).await?;

            if self.cancellation.is_cancelled() {
                self.progress
                    .set_cancelled_reason(self.cancellation.reason().unwrap_or_default());
                return Ok(DrainOutcome {
                    destination_indices,
                    indexing_failures,
                    search_failures: Vec::new(),
                    timed_out: false,
                    cancelled: true,
                });
            }

            self.apply_bulk_response(bulk_resp, &mut destination_indices, &mut indexing_failures);

            if !indexing_failures.is_empty() {
                return Ok(DrainOutcome {
                    destination_indices,
                    indexing_failures,
                    search_failures: Vec::new(),
                    timed_out: false,
                    cancelled: false,
                });
            }

            if self.request.size != -1 && self.progress.successfully_processed() >= self.request.size as u64 {
                return Ok(DrainOutcome {
                    destination_indices,
                    indexing_failures,
                    search_failures: Vec::new(),
                    timed_out: false,
                    cancelled: false,
                });
            }

            resp = self.next_scroll(scroll_id).await?;
        }
    }

    fn apply_bulk_response(
        &self,
        bulk_resp: BulkResponse,
        destination_indices: &mut BTreeSet<String>,
        indexing_failures: &mut Vec<String>,
    ) {
        let kind = self.request.kind.as_label();
        for item in bulk_resp.items {
            match item.outcome {
                BulkItemOutcome::Created => {
                    self.progress.count_created();
                    destination_indices.insert(item.index);
                },
                BulkItemOutcome::Updated => {
                    self.progress.count_updated();
                    destination_indices.insert(item.index);
                },
                BulkItemOutcome::Deleted => {
                    self.progress.count_deleted();
                    destination_indices.insert(item.index);
                },
                BulkItemOutcome::Noop => {
                    self.progress.count_noop();
                    bulk_scroll_metrics::log_noop(kind);
                },
                BulkItemOutcome::VersionConflict { reason, .. } => {
                    self.progress.count_version_conflict();
                    bulk_scroll_metrics::log_version_conflict(kind);
                    if self.request.abort_on_version_conflict {
                        indexing_failures.push(format!(
                            "[{}][{}]: version conflict, {reason}",
                            item.index, item.id
                        ));
                    }
                },
                BulkItemOutcome::Failure { status, reason } => {
                    indexing_failures.push(format!(
                        "[{}][{}]: {reason} (status {status})",
                        item.index, item.id
                    ));
                },
            }
        }
    }

    async fn next_scroll(&self, scroll_id: &Option<String>) -> anyhow::Result<SearchResponse> {
        let id = scroll_id
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("scroll response carried no scroll id to continue from"))?;
        self.client
            .scroll(id, self.request.scroll_keepalive, &self.request.context)
            .await
    }

    async fn send_bulk_with_retry(&self, bulk: BulkRequest) -> anyhow::Result<BulkResponse> {
        let kind = self.request.kind.as_label();
        let mut retries = CountingRetryIter::new(self.request.retry_policy(), self.progress.clone());
        loop {
            let start = self.runtime.monotonic_now();
            let result = self.client.bulk(bulk.clone(), &self.request.context).await;
            let elapsed = self.runtime.monotonic_now().duration_since(start);
            bulk_scroll_metrics::BULK_SCROLL_BATCH_SECONDS
                .with_label_values(&[kind])
                .observe(elapsed.as_secs_f64());

            match result {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_overloaded() => match retries.next_delay() {
                    Some(delay) => {
                        bulk_scroll_metrics::log_retry(kind);
                        debug!(kind, delay_ms = delay.as_millis() as u64, "retrying bulk after rejection");
                        self.runtime.wait(delay).await;
                        continue;
                    },
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bulk_scroll_client::{
        FakeDocument,
        FakeSearchClient,
    };
    use bulk_scroll_runtime::testing::TestDriverRuntime;

    use super::*;
    use crate::request::{
        BulkByScrollRequest,
        RequestKind,
    };
    use crate::transform::{
        DeleteByQueryTransform,
        UpdateByQueryTransform,
    };

    fn doc(index: &str, id: &str) -> FakeDocument {
        FakeDocument {
            index: index.to_string(),
            id: id.to_string(),
            version: 1,
            source: serde_json::json!({ "touched": false }),
        }
    }

    fn mark_touched_script() -> UpdateByQueryTransform {
        UpdateByQueryTransform::with_script(|ctx| {
            ctx.source = serde_json::json!({ "touched": true });
            Ok(())
        })
    }

    #[tokio::test]
    async fn empty_result_set_produces_zeroed_response() {
        let client = Arc::new(FakeSearchClient::new(vec![], 10));
        let request = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        let driver = ScrollDriver::new(
            request,
            client,
            Arc::new(mark_touched_script()),
            TestDriverRuntime::new(),
        );
        let resp = driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await.unwrap();
        assert_eq!(resp.progress.batches, 0);
        assert_eq!(resp.progress.successfully_processed(), 0);
        assert!(resp.indexing_failures.is_empty());
    }

    #[tokio::test]
    async fn single_batch_all_updated() {
        let docs = vec![doc("a", "1"), doc("a", "2"), doc("a", "3")];
        let client = Arc::new(FakeSearchClient::new(docs, 10));
        let request = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        let driver = ScrollDriver::new(
            request,
            client,
            Arc::new(mark_touched_script()),
            TestDriverRuntime::new(),
        );
        let resp = driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await.unwrap();
        assert_eq!(resp.progress.batches, 1);
        assert_eq!(resp.progress.updated, 3);
        assert!(resp.indexing_failures.is_empty());
    }

    #[tokio::test]
    async fn rejection_then_success_counts_retries_and_succeeds() {
        let docs = vec![doc("a", "1")];
        let client = Arc::new(FakeSearchClient::new(docs, 10));
        client.reject_next_bulks(2);
        let mut request = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        request.max_retries = 3;
        request.retry_backoff_initial = Duration::from_millis(1);
        let driver = ScrollDriver::new(
            request,
            client,
            Arc::new(mark_touched_script()),
            TestDriverRuntime::new(),
        );
        let resp = driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await.unwrap();
        assert_eq!(resp.progress.retries, 2);
        assert!(resp.indexing_failures.is_empty());
    }

    #[tokio::test]
    async fn rejection_exhausted_surfaces_as_fatal_error() {
        let docs = vec![doc("a", "1")];
        let client = Arc::new(FakeSearchClient::new(docs, 10));
        client.reject_next_bulks(2);
        let mut request = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        request.max_retries = 1;
        request.retry_backoff_initial = Duration::from_millis(1);
        let driver = ScrollDriver::new(
            request,
            client,
            Arc::new(mark_touched_script()),
            TestDriverRuntime::new(),
        );
        let err = driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await.unwrap_err();
        assert!(err.is_overloaded());
    }

    #[tokio::test]
    async fn version_conflicts_proceed_when_abort_is_disabled() {
        let client = Arc::new(FakeSearchClient::new(
            vec![doc("a", "1"), doc("a", "2")],
            10,
        ));
        client.force_version_conflict("1");
        let mut request = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        request.abort_on_version_conflict = false;
        let driver = ScrollDriver::new(
            request,
            client,
            Arc::new(mark_touched_script()),
            TestDriverRuntime::new(),
        );
        let resp = driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await.unwrap();
        assert!(resp.indexing_failures.is_empty());
        assert_eq!(resp.progress.version_conflicts, 1);
        assert_eq!(resp.progress.updated, 1);
    }

    #[tokio::test]
    async fn version_conflicts_reported_when_abort_is_enabled() {
        let client = Arc::new(FakeSearchClient::new(vec![doc("a", "1")], 10));
        client.force_version_conflict("1");
        let request = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        let driver = ScrollDriver::new(
            request,
            client,
            Arc::new(mark_touched_script()),
            TestDriverRuntime::new(),
        );
        let resp = driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await.unwrap();
        assert_eq!(resp.indexing_failures.len(), 1);
        assert_eq!(resp.progress.version_conflicts, 1);
    }

    #[tokio::test]
    async fn refresh_still_runs_when_batch_has_reported_failures() {
        let client = Arc::new(FakeSearchClient::new(vec![doc("a", "1"), doc("a", "2")], 10));
        client.force_version_conflict("1");
        let mut request = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        request.refresh = true;
        let driver = ScrollDriver::new(
            request,
            client.clone(),
            Arc::new(mark_touched_script()),
            TestDriverRuntime::new(),
        );
        let resp = driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await.unwrap();
        assert_eq!(resp.indexing_failures.len(), 1);
        assert_eq!(client.refreshed_indices(), vec![vec!["a".to_string()]]);
    }

    #[tokio::test]
    async fn shard_failure_on_scroll_is_reported_not_retried() {
        let client = Arc::new(FakeSearchClient::new(vec![doc("a", "1")], 10));
        client.fail_next_page_with_shard_failure();
        let request = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        let driver = ScrollDriver::new(
            request,
            client,
            Arc::new(mark_touched_script()),
            TestDriverRuntime::new(),
        );
        let resp = driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await.unwrap();
        assert_eq!(resp.search_failures.len(), 1);
        assert_eq!(resp.progress.batches, 0);
    }

    #[tokio::test]
    async fn cancellation_skips_refresh_and_reports_reason() {
        let client = Arc::new(FakeSearchClient::new(vec![doc("a", "1")], 10));
        let mut request = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        request.refresh = true;
        let driver = ScrollDriver::new(
            request,
            client.clone(),
            Arc::new(mark_touched_script()),
            TestDriverRuntime::new(),
        );
        let cancellation = driver.cancellation_handle();
        let progress = driver.progress();
        cancellation.cancel("user requested stop");
        let resp = driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await.unwrap();
        assert_eq!(progress.snapshot().reason_cancelled, Some("user requested stop".to_string()));
        assert!(resp.indexing_failures.is_empty());
        assert!(client.refreshed_indices().is_empty());
    }

    #[tokio::test]
    async fn refresh_runs_only_when_requested_and_destinations_nonempty() {
        let client = Arc::new(FakeSearchClient::new(vec![doc("a", "1")], 10));
        let mut request = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        request.refresh = true;
        let driver = ScrollDriver::new(
            request,
            client.clone(),
            Arc::new(mark_touched_script()),
            TestDriverRuntime::new(),
        );
        driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await.unwrap();
        assert_eq!(client.refreshed_indices(), vec![vec!["a".to_string()]]);
    }

    #[tokio::test]
    async fn size_clamp_stops_before_a_third_scroll() {
        let docs = vec![doc("a", "1"), doc("a", "2"), doc("a", "3"), doc("a", "4")];
        let client = Arc::new(FakeSearchClient::new(docs, 2));
        let mut request = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        request.size = 3;
        let driver = ScrollDriver::new(
            request,
            client,
            Arc::new(mark_touched_script()),
            TestDriverRuntime::new(),
        );
        let resp = driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await.unwrap();
        assert_eq!(resp.progress.successfully_processed(), 3);
        assert_eq!(resp.progress.batches, 2);
    }

    #[tokio::test]
    async fn context_and_headers_propagate_to_every_sub_request() {
        let client = Arc::new(FakeSearchClient::new(vec![doc("a", "1")], 10));
        let mut request = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        request.refresh = true;
        request.context.insert("trace-id".to_string(), "abc123".to_string());
        let driver = ScrollDriver::new(
            request,
            client.clone(),
            Arc::new(mark_touched_script()),
            TestDriverRuntime::new(),
        );
        driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await.unwrap();
        tokio::task::yield_now().await;
        for ctx in client.recorded_contexts() {
            assert_eq!(ctx.get("trace-id"), Some(&"abc123".to_string()));
        }
    }

    #[tokio::test]
    async fn delete_by_query_deletes_every_matching_hit() {
        let docs = vec![doc("a", "1"), doc("a", "2")];
        let client = Arc::new(FakeSearchClient::new(docs, 10));
        let request = BulkByScrollRequest::new(RequestKind::DeleteByQuery, vec!["a".to_string()]);
        let driver = ScrollDriver::new(
            request,
            client.clone(),
            Arc::new(DeleteByQueryTransform::new()),
            TestDriverRuntime::new(),
        );
        let resp = driver.run(MIN_SUPPORTED_CLUSTER_VERSION).await.unwrap();
        assert_eq!(resp.progress.deleted, 2);
        assert!(client.documents().is_empty());
    }

    #[tokio::test]
    async fn below_minimum_cluster_version_fails_with_stable_message() {
        let client = Arc::new(FakeSearchClient::new(vec![], 10));
        let request = BulkByScrollRequest::new(RequestKind::UpdateByQuery, vec!["a".to_string()]);
        let driver = ScrollDriver::new(
            request,
            client,
            Arc::new(mark_touched_script()),
            TestDriverRuntime::new(),
        );
        let err = driver.run((2, 2, 0)).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("because the entire cluster has not been upgraded to 2.3"));
    }
}
