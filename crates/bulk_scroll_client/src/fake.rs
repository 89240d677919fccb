use std::collections::BTreeMap;
use std::sync::atomic::{
    AtomicU64,
    Ordering,
};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    BulkItemOutcome,
    BulkItemResponse,
    BulkOpType,
    BulkRequest,
    BulkResponse,
    ClearScrollResponse,
    RefreshResponse,
    RequestContext,
    SearchClient,
    SearchHit,
    SearchRequest,
    SearchResponse,
    ShardFailure,
};

#[derive(Debug, Clone)]
pub struct FakeDocument {
    pub index: String,
    pub id: String,
    pub version: i64,
    pub source: serde_json::Value,
}

struct ScrollCursor {
    index_filter: Option<String>,
    offset: usize,
}

struct State {
    docs: Vec<FakeDocument>,
    scrolls: BTreeMap<String, ScrollCursor>,
    recorded_contexts: Vec<RequestContext>,
    refreshed_indices: Vec<Vec<String>>,
    reject_bulk_remaining: usize,
    shard_failure_on_next_page: bool,
    timed_out_on_next_page: bool,
    forced_version_conflicts: Vec<String>,
}

/// In-memory [`SearchClient`] double. Holds a fixed set of documents and
/// pages through them a fixed `page_size` at a time, so tests can assert
/// exact batch boundaries instead of guessing at a real cluster's
/// scheduling.
pub struct FakeSearchClient {
    state: Mutex<State>,
    page_size: usize,
    next_scroll_id: AtomicU64,
}

impl FakeSearchClient {
    pub fn new(docs: Vec<FakeDocument>, page_size: usize) -> Self {
        Self {
            state: Mutex::new(State {
                docs,
                scrolls: BTreeMap::new(),
                recorded_contexts: Vec::new(),
                refreshed_indices: Vec::new(),
                reject_bulk_remaining: 0,
                shard_failure_on_next_page: false,
                timed_out_on_next_page: false,
                forced_version_conflicts: Vec::new(),
            }),
            page_size,
            next_scroll_id: AtomicU64::new(1),
        }
    }

    /// Snapshot of every document currently stored, for post-run assertions.
    pub fn documents(&self) -> Vec<FakeDocument> {
        self.state.lock().docs.clone()
    }

    pub fn recorded_contexts(&self) -> Vec<RequestContext> {
        self.state.lock().recorded_contexts.clone()
    }

    pub fn refreshed_indices(&self) -> Vec<Vec<String>> {
        self.state.lock().refreshed_indices.clone()
    }

    /// Make the next `n` bulk dispatches fail with a transient rejection.
    pub fn reject_next_bulks(&self, n: usize) {
        self.state.lock().reject_bulk_remaining = n;
    }

    pub fn fail_next_page_with_shard_failure(&self) {
        self.state.lock().shard_failure_on_next_page = true;
    }

    pub fn time_out_next_page(&self) {
        self.state.lock().timed_out_on_next_page = true;
    }

    /// Simulate a concurrent writer: the next bulk item targeting `id`
    /// reports a version conflict instead of applying, once.
    pub fn force_version_conflict(&self, id: impl Into<String>) {
        self.state.lock().forced_version_conflicts.push(id.into());
    }

    fn page(&self, state: &mut State, index_filter: Option<String>, offset: usize) -> SearchResponse {
        let matching: Vec<&FakeDocument> = state
            .docs
            .iter()
            .filter(|d| index_filter.as_deref().map_or(true, |idx| d.index == idx))
            .collect();
        let total_hits = matching.len() as u64;

        if state.shard_failure_on_next_page {
            state.shard_failure_on_next_page = false;
            return SearchResponse {
                scroll_id: None,
                total_hits,
                hits: Vec::new(),
                shard_failures: vec![ShardFailure {
                    shard: 0,
                    index: index_filter.unwrap_or_default(),
                    reason: "simulated shard failure".to_string(),
                }],
                timed_out: false,
            };
        }
        if state.timed_out_on_next_page {
            state.timed_out_on_next_page = false;
            return SearchResponse {
                scroll_id: None,
                total_hits,
                hits: Vec::new(),
                shard_failures: Vec::new(),
                timed_out: true,
            };
        }

        let hits: Vec<SearchHit> = matching
            .into_iter()
            .skip(offset)
            .take(self.page_size)
            .map(|d| SearchHit {
                index: d.index.clone(),
                doc_type: "_doc".to_string(),
                id: d.id.clone(),
                version: d.version,
                routing: None,
                parent: None,
                timestamp: None,
                ttl: None,
                source: d.source.clone(),
            })
            .collect();

        let next_offset = offset + hits.len();
        let has_more = (next_offset as u64) < total_hits;
        let scroll_id = if has_more || !hits.is_empty() {
            let id = format!("scroll-{}", self.next_scroll_id.fetch_add(1, Ordering::SeqCst));
            state.scrolls.insert(
                id.clone(),
                ScrollCursor {
                    index_filter,
                    offset: next_offset,
                },
            );
            Some(id)
        } else {
            None
        };

        SearchResponse {
            scroll_id,
            total_hits,
            hits,
            shard_failures: Vec::new(),
            timed_out: false,
        }
    }
}

#[async_trait]
impl SearchClient for FakeSearchClient {
    async fn search(
        &self,
        request: SearchRequest,
        _scroll_keepalive: Duration,
        context: &RequestContext,
    ) -> anyhow::Result<SearchResponse> {
        let mut state = self.state.lock();
        state.recorded_contexts.push(context.clone());
        let index_filter = request.indices.first().cloned();
        Ok(self.page(&mut state, index_filter, 0))
    }

    async fn scroll(
        &self,
        scroll_id: &str,
        _keepalive: Duration,
        context: &RequestContext,
    ) -> anyhow::Result<SearchResponse> {
        let mut state = self.state.lock();
        state.recorded_contexts.push(context.clone());
        let cursor = state
            .scrolls
            .remove(scroll_id)
            .ok_or_else(|| anyhow::anyhow!("unknown scroll id {scroll_id}"))?;
        Ok(self.page(&mut state, cursor.index_filter, cursor.offset))
    }

    async fn clear_scroll(
        &self,
        scroll_ids: &[String],
        context: &RequestContext,
    ) -> anyhow::Result<ClearScrollResponse> {
        let mut state = self.state.lock();
        state.recorded_contexts.push(context.clone());
        for id in scroll_ids {
            state.scrolls.remove(id);
        }
        Ok(ClearScrollResponse { succeeded: true })
    }

    async fn refresh(
        &self,
        indices: &[String],
        context: &RequestContext,
    ) -> anyhow::Result<RefreshResponse> {
        let mut state = self.state.lock();
        state.recorded_contexts.push(context.clone());
        state.refreshed_indices.push(indices.to_vec());
        Ok(RefreshResponse {
            shards_acknowledged: indices.len() as u32,
        })
    }

    async fn bulk(&self, request: BulkRequest, context: &RequestContext) -> anyhow::Result<BulkResponse> {
        let mut state = self.state.lock();
        state.recorded_contexts.push(context.clone());

        if state.reject_bulk_remaining > 0 {
            state.reject_bulk_remaining -= 1;
            return Err(anyhow::anyhow!("bulk rejected, too many requests in flight")
                .context(bulk_scroll_errors::ErrorMetadata::overloaded(
                    "TooManyRequests",
                    "simulated backend backpressure",
                )));
        }

        let mut items = Vec::with_capacity(request.items.len());
        for req_item in request.items {
            let existing_pos = state
                .docs
                .iter()
                .position(|d| d.index == req_item.index && d.id == req_item.id);

            let outcome = match req_item.op {
                BulkOpType::Delete => match existing_pos {
                    Some(pos) => {
                        state.docs.remove(pos);
                        BulkItemOutcome::Deleted
                    },
                    None => BulkItemOutcome::Noop,
                },
                BulkOpType::Index | BulkOpType::Create => {
                    if let Some(pos) = state
                        .forced_version_conflicts
                        .iter()
                        .position(|id| id == &req_item.id)
                    {
                        state.forced_version_conflicts.remove(pos);
                        items.push(BulkItemResponse {
                            op: req_item.op,
                            index: req_item.index,
                            id: req_item.id,
                            outcome: BulkItemOutcome::VersionConflict {
                                status: 409,
                                reason: "version conflict".to_string(),
                            },
                        });
                        continue;
                    }
                    if let (Some(expected), Some(pos)) = (req_item.version, existing_pos) {
                        if state.docs[pos].version != expected {
                            items.push(BulkItemResponse {
                                op: req_item.op,
                                index: req_item.index,
                                id: req_item.id,
                                outcome: BulkItemOutcome::VersionConflict {
                                    status: 409,
                                    reason: "version conflict".to_string(),
                                },
                            });
                            continue;
                        }
                    }
                    let source = req_item.source.unwrap_or(serde_json::Value::Null);
                    match existing_pos {
                        Some(pos) => {
                            state.docs[pos].source = source;
                            state.docs[pos].version += 1;
                            BulkItemOutcome::Updated
                        },
                        None => {
                            state.docs.push(FakeDocument {
                                index: req_item.index.clone(),
                                id: req_item.id.clone(),
                                version: 1,
                                source,
                            });
                            BulkItemOutcome::Created
                        },
                    }
                },
            };
            items.push(BulkItemResponse {
                op: req_item.op,
                index: req_item.index,
                id: req_item.id,
                outcome,
            });
        }

        Ok(BulkResponse { items })
    }
}
