//! The bulk-by-scroll state machine: drives a reindex, update-by-query, or
//! delete-by-query request from an initial search through as many scroll
//! pages as it takes, dispatching one bulk mutation per page with retry
//! under backpressure, until the scroll is exhausted, the request's `size`
//! limit is hit, a failure is reported, or the caller cancels.
//!
//! See [`driver::ScrollDriver`] for the control loop and
//! [`request::BulkByScrollRequest`] for the envelope it executes.

pub mod cancellation;
pub mod driver;
pub mod progress;
pub mod request;
pub mod retry;
pub mod transform;
pub mod wire;

pub use cancellation::CancellationHandle;
pub use driver::{
    BulkByScrollResponse,
    ScrollDriver,
    MIN_SUPPORTED_CLUSTER_VERSION,
};
pub use progress::{
    ProgressRecord,
    ProgressSnapshot,
};
pub use request::{
    conflicts_string_to_abort,
    BulkByScrollRequest,
    RequestKind,
};
pub use retry::{
    CountingRetryIter,
    JitteredRetryIter,
    RetryIter,
    RetryPolicy,
};
pub use transform::{
    DeleteByQueryTransform,
    DocumentTransform,
    ReindexTransform,
    TransformError,
    UpdateByQueryTransform,
};
