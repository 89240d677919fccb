use std::collections::BTreeMap;
use std::time::Duration;

use bulk_scroll_client::WriteConsistency;
use serde_json::{
    json,
    Value,
};

use crate::retry::RetryPolicy;

/// Which shape of bulk mutation this request drives. The shape only
/// determines which [`crate::transform::DocumentTransform`] runs; the
/// control loop in [`crate::driver::ScrollDriver`] is identical across all
/// three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Reindex,
    UpdateByQuery,
    DeleteByQuery,
}

impl RequestKind {
    pub fn as_label(&self) -> &'static str {
        match self {
            RequestKind::Reindex => "reindex",
            RequestKind::UpdateByQuery => "update_by_query",
            RequestKind::DeleteByQuery => "delete_by_query",
        }
    }
}

/// The "proceed" / "abort" string a caller passes for version-conflict
/// handling; any other value is a validation error.
pub fn conflicts_string_to_abort(value: &str) -> anyhow::Result<bool> {
    match value {
        "abort" => Ok(true),
        "proceed" => Ok(false),
        other => anyhow::bail!("conflicts must be \"proceed\" or \"abort\", got {other:?}"),
    }
}

/// The full request envelope: everything the driver needs to run one
/// reindex / update-by-query / delete-by-query from end to end.
#[derive(Debug, Clone)]
pub struct BulkByScrollRequest {
    pub kind: RequestKind,
    pub source_indices: Vec<String>,
    pub destination_index: Option<String>,
    pub search_source: Value,
    pub size: i64,
    pub abort_on_version_conflict: bool,
    pub refresh: bool,
    pub timeout: Duration,
    pub consistency: WriteConsistency,
    pub retry_backoff_initial: Duration,
    pub max_retries: u32,
    pub scroll_keepalive: Duration,
    pub context: BTreeMap<String, String>,
}

pub const DEFAULT_BATCH_SIZE: u64 = 100;
const DEFAULT_SCROLL_KEEPALIVE: Duration = Duration::from_secs(5 * 60);
const DEFAULT_RETRY_BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const DEFAULT_MAX_RETRIES: u32 = 11;

impl BulkByScrollRequest {
    pub fn new(kind: RequestKind, source_indices: Vec<String>) -> Self {
        Self {
            kind,
            source_indices,
            destination_index: None,
            search_source: Value::Null,
            size: -1,
            abort_on_version_conflict: true,
            refresh: false,
            timeout: Duration::from_secs(60),
            consistency: WriteConsistency::default(),
            retry_backoff_initial: DEFAULT_RETRY_BACKOFF_INITIAL,
            max_retries: DEFAULT_MAX_RETRIES,
            scroll_keepalive: DEFAULT_SCROLL_KEEPALIVE,
            context: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let mut violations = Vec::new();
        if self.size != -1 && self.size <= 0 {
            violations.push("size should be greater than 0 if the request is to be size-limited, or -1 otherwise".to_string());
        }
        if self.kind == RequestKind::Reindex && self.destination_index.is_none() {
            violations.push("reindex requires a destination index".to_string());
        }
        if violations.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(violations.join("; "))
        }
    }

    /// Retries cannot be negative by type (`u32`), so the source's "retries
    /// cannot be negative" check is only reachable through the signed
    /// constructor used when parsing an external, loosely-typed request.
    pub fn with_max_retries_from_i64(mut self, max_retries: i64) -> anyhow::Result<Self> {
        if max_retries < 0 {
            anyhow::bail!("retries cannot be negative");
        }
        self.max_retries = max_retries as u32;
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_backoff_initial, self.max_retries)
    }

    /// The default search source: sorts by insertion order, requests
    /// document versions, and pages `DEFAULT_BATCH_SIZE` hits at a time.
    /// Merges the request's user-supplied source into this template, with
    /// user values winning key-by-key.
    pub fn effective_search_source(&self) -> Value {
        let mut merged = default_search_source();
        deep_merge(&mut merged, &self.search_source);
        merged
    }
}

fn default_search_source() -> Value {
    json!({
        "version": true,
        "sort": ["_doc"],
        "size": DEFAULT_BATCH_SIZE,
    })
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                deep_merge(base_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        },
        (base_slot, overlay_value) => {
            if !overlay_value.is_null() {
                *base_slot = overlay_value.clone();
            }
        },
    }
}
