//! The external search-backend contract the bulk-by-scroll engine is
//! written against, plus an in-memory fake used by the engine's own tests
//! and the CLI demo. Implementing a wire client against a real cluster is
//! out of scope for this crate.

mod fake;
mod wire;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

pub use fake::{
    FakeDocument,
    FakeSearchClient,
};
pub use wire::{
    BulkItemOutcome,
    BulkItemResponse,
    BulkOpType,
    BulkRequest,
    BulkRequestItem,
    BulkResponse,
    ClearScrollResponse,
    RefreshResponse,
    SearchHit,
    SearchRequest,
    SearchResponse,
    ShardFailure,
    WriteConsistency,
};

/// The set of headers/context every sub-request the driver issues must
/// carry verbatim (see the propagation invariant in the root spec).
pub type RequestContext = BTreeMap<String, String>;

/// Everything the driver needs from the backend it scrolls and bulk-writes
/// against. Modeled as a trait so the driver can run against a real wire
/// client in production and an in-memory fake in tests.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(
        &self,
        request: SearchRequest,
        scroll_keepalive: Duration,
        context: &RequestContext,
    ) -> anyhow::Result<SearchResponse>;

    async fn scroll(
        &self,
        scroll_id: &str,
        keepalive: Duration,
        context: &RequestContext,
    ) -> anyhow::Result<SearchResponse>;

    async fn clear_scroll(
        &self,
        scroll_ids: &[String],
        context: &RequestContext,
    ) -> anyhow::Result<ClearScrollResponse>;

    async fn refresh(
        &self,
        indices: &[String],
        context: &RequestContext,
    ) -> anyhow::Result<RefreshResponse>;

    async fn bulk(
        &self,
        request: BulkRequest,
        context: &RequestContext,
    ) -> anyhow::Result<BulkResponse>;
}
