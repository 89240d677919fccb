use std::sync::atomic::{
    AtomicI64,
    AtomicU64,
    Ordering,
};
use std::sync::Arc;

use serde::{
    Deserialize,
    Serialize,
};

/// Accumulates outcome counts for one bulk-by-scroll request without
/// blocking the driver. Every count operation is a single atomic increment;
/// `snapshot` is the only place field-level tearing across counters is
/// possible, which readers must tolerate (only `batches` needs to be
/// monotone for callers that poll it).
#[derive(Clone)]
pub struct ProgressRecord {
    inner: Arc<Counters>,
}

struct Counters {
    total: AtomicI64,
    updated: AtomicU64,
    created: AtomicU64,
    deleted: AtomicU64,
    batches: AtomicU64,
    version_conflicts: AtomicU64,
    noops: AtomicU64,
    retries: AtomicU64,
    reason_cancelled: parking_lot_like::OnceString,
}

/// A tiny write-once string cell. `ProgressRecord` only ever needs "set the
/// cancellation reason once, read it many times," so a full `Mutex<Option<String>>`
/// would be overkill; this keeps the reads lock-free.
mod parking_lot_like {
    use std::sync::atomic::{
        AtomicBool,
        Ordering,
    };
    use std::sync::Mutex;

    pub struct OnceString {
        set: AtomicBool,
        value: Mutex<Option<String>>,
    }

    impl OnceString {
        pub fn new() -> Self {
            Self {
                set: AtomicBool::new(false),
                value: Mutex::new(None),
            }
        }

        pub fn set_once(&self, s: String) {
            if self
                .set
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                *self.value.lock().expect("poisoned") = Some(s);
            }
        }

        pub fn get(&self) -> Option<String> {
            self.value.lock().expect("poisoned").clone()
        }
    }
}

/// -1 means "not yet known"; the request's total is learned from the first
/// search response.
const TOTAL_UNSET: i64 = -1;

impl ProgressRecord {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Counters {
                total: AtomicI64::new(TOTAL_UNSET),
                updated: AtomicU64::new(0),
                created: AtomicU64::new(0),
                deleted: AtomicU64::new(0),
                batches: AtomicU64::new(0),
                version_conflicts: AtomicU64::new(0),
                noops: AtomicU64::new(0),
                retries: AtomicU64::new(0),
                reason_cancelled: parking_lot_like::OnceString::new(),
            }),
        }
    }

    /// Set the total hit count once. Subsequent calls are a no-op: the
    /// engine's own scroll responses may repeat a total, and the first
    /// value is authoritative (resolved open question, see design docs).
    pub fn set_total(&self, total: u64) {
        self.inner
            .total
            .compare_exchange(TOTAL_UNSET, total as i64, Ordering::SeqCst, Ordering::SeqCst)
            .ok();
    }

    pub fn count_created(&self) {
        self.inner.created.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count_updated(&self) {
        self.inner.updated.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count_deleted(&self) {
        self.inner.deleted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count_noop(&self) {
        self.inner.noops.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count_version_conflict(&self) {
        self.inner.version_conflicts.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count_batch(&self) {
        self.inner.batches.fetch_add(1, Ordering::SeqCst);
    }

    pub fn count_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_cancelled_reason(&self, reason: String) {
        self.inner.reason_cancelled.set_once(reason);
    }

    pub fn successfully_processed(&self) -> u64 {
        self.inner.created.load(Ordering::SeqCst)
            + self.inner.updated.load(Ordering::SeqCst)
            + self.inner.deleted.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> Option<u64> {
        let t = self.inner.total.load(Ordering::SeqCst);
        if t == TOTAL_UNSET {
            None
        } else {
            Some(t as u64)
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total(),
            updated: self.inner.updated.load(Ordering::SeqCst),
            created: self.inner.created.load(Ordering::SeqCst),
            deleted: self.inner.deleted.load(Ordering::SeqCst),
            batches: self.inner.batches.load(Ordering::SeqCst),
            version_conflicts: self.inner.version_conflicts.load(Ordering::SeqCst),
            noops: self.inner.noops.load(Ordering::SeqCst),
            retries: self.inner.retries.load(Ordering::SeqCst),
            reason_cancelled: self.inner.reason_cancelled.get(),
        }
    }
}

impl Default for ProgressRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable, wire-serializable read of a [`ProgressRecord`] at a point
/// in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: Option<u64>,
    pub updated: u64,
    pub created: u64,
    pub deleted: u64,
    pub batches: u64,
    pub version_conflicts: u64,
    pub noops: u64,
    pub retries: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason_cancelled: Option<String>,
}

impl ProgressSnapshot {
    /// Build a snapshot from loosely-typed counters, e.g. ones decoded from
    /// an external JSON document that isn't guaranteed to respect this
    /// type's `u64` fields. Named counters keep negative values out of a
    /// live `ProgressRecord` by construction; this is the validation path
    /// for values that didn't come from one.
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw_counts(
        total: Option<i64>,
        updated: i64,
        created: i64,
        deleted: i64,
        batches: i64,
        version_conflicts: i64,
        noops: i64,
        retries: i64,
        reason_cancelled: Option<String>,
    ) -> anyhow::Result<Self> {
        fn non_negative(name: &str, value: i64) -> anyhow::Result<u64> {
            u64::try_from(value).map_err(|_| anyhow::anyhow!("{name} must be greater than 0 but was [{value}]"))
        }
        Ok(Self {
            total: total.map(|t| non_negative("total", t)).transpose()?,
            updated: non_negative("updated", updated)?,
            created: non_negative("created", created)?,
            deleted: non_negative("deleted", deleted)?,
            batches: non_negative("batches", batches)?,
            version_conflicts: non_negative("version_conflicts", version_conflicts)?,
            noops: non_negative("noops", noops)?,
            retries: non_negative("retries", retries)?,
            reason_cancelled,
        })
    }

    pub fn successfully_processed(&self) -> u64 {
        self.created + self.updated + self.deleted
    }

    /// Validates the round-trip invariant that every counter is
    /// non-negative and `created + updated + deleted <= total` once a
    /// total is known. Snapshots built from live counters can never fail
    /// this (counters only increment), but a snapshot decoded off the wire
    /// might be corrupt.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(total) = self.total {
            let processed = self.successfully_processed();
            if processed > total {
                anyhow::bail!(
                    "successfully processed count ({processed}) exceeds total ({total})"
                );
            }
        }
        Ok(())
    }

    /// The status-endpoint JSON form named in `spec.md` §6: the same
    /// counters as the `Serialize` impl above, but with a field dropped
    /// per request kind (a delete-only request has no `created` to report;
    /// an update-only request has no `deleted`) and the cancellation
    /// reason surfaced as a plain `canceled` flag rather than the internal
    /// reason string. Field order is fixed to match the spec's declared
    /// order, via an ordered `Map` rather than relying on `serde_json`'s
    /// (incidentally ordered, but not contractually so) struct encoding.
    pub fn status_json(&self, kind: crate::request::RequestKind) -> serde_json::Value {
        use crate::request::RequestKind;

        let mut map = serde_json::Map::new();
        map.insert("total".to_string(), serde_json::json!(self.total));
        map.insert("updated".to_string(), serde_json::json!(self.updated));
        if kind != RequestKind::DeleteByQuery {
            map.insert("created".to_string(), serde_json::json!(self.created));
        }
        if kind != RequestKind::UpdateByQuery {
            map.insert("deleted".to_string(), serde_json::json!(self.deleted));
        }
        map.insert("batches".to_string(), serde_json::json!(self.batches));
        map.insert(
            "version_conflicts".to_string(),
            serde_json::json!(self.version_conflicts),
        );
        map.insert("noops".to_string(), serde_json::json!(self.noops));
        map.insert("retries".to_string(), serde_json::json!(self.retries));
        if self.reason_cancelled.is_some() {
            map.insert("canceled".to_string(), serde_json::json!(true));
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_total_is_set_once() {
        let progress = ProgressRecord::new();
        progress.set_total(10);
        progress.set_total(999);
        assert_eq!(progress.total(), Some(10));
    }

    #[test]
    fn counters_accumulate_and_successfully_processed_sums_three_fields() {
        let progress = ProgressRecord::new();
        progress.count_created();
        progress.count_created();
        progress.count_updated();
        progress.count_deleted();
        progress.count_noop();
        let snap = progress.snapshot();
        assert_eq!(snap.created, 2);
        assert_eq!(snap.updated, 1);
        assert_eq!(snap.deleted, 1);
        assert_eq!(snap.noops, 1);
        assert_eq!(snap.successfully_processed(), 4);
    }

    #[test]
    fn cancellation_reason_is_set_once() {
        let progress = ProgressRecord::new();
        progress.set_cancelled_reason("first".to_string());
        progress.set_cancelled_reason("second".to_string());
        assert_eq!(progress.snapshot().reason_cancelled, Some("first".to_string()));
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let progress = ProgressRecord::new();
        progress.set_total(5);
        progress.count_created();
        let snap = progress.snapshot();
        let encoded = serde_json::to_string(&snap).unwrap();
        let decoded: ProgressSnapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(snap, decoded);
    }

    #[test]
    fn validate_rejects_processed_count_exceeding_total() {
        let snap = ProgressSnapshot {
            total: Some(1),
            updated: 0,
            created: 2,
            deleted: 0,
            batches: 1,
            version_conflicts: 0,
            noops: 0,
            retries: 0,
            reason_cancelled: None,
        };
        assert!(snap.validate().is_err());
    }

    #[test]
    fn from_raw_counts_rejects_negative_field_and_names_it() {
        let err = ProgressSnapshot::from_raw_counts(Some(10), 0, 0, -3, 0, 0, 0, 0, None)
            .expect_err("negative deleted count must be rejected");
        assert!(err.to_string().contains("deleted"));
    }

    #[test]
    fn from_raw_counts_accepts_valid_input() {
        let snap = ProgressSnapshot::from_raw_counts(Some(10), 1, 2, 3, 1, 0, 0, 0, None).unwrap();
        assert_eq!(snap.successfully_processed(), 6);
    }

    #[test]
    fn status_json_omits_created_for_delete_only_requests() {
        use crate::request::RequestKind;

        let progress = ProgressRecord::new();
        progress.count_deleted();
        let json = progress.snapshot().status_json(RequestKind::DeleteByQuery);
        assert!(json.get("created").is_none());
        assert!(json.get("deleted").is_some());
    }

    #[test]
    fn status_json_omits_deleted_for_update_only_requests() {
        use crate::request::RequestKind;

        let progress = ProgressRecord::new();
        progress.count_updated();
        let json = progress.snapshot().status_json(RequestKind::UpdateByQuery);
        assert!(json.get("deleted").is_none());
        assert!(json.get("updated").is_some());
    }

    #[test]
    fn status_json_carries_canceled_flag_only_when_cancelled() {
        use crate::request::RequestKind;

        let progress = ProgressRecord::new();
        let json = progress.snapshot().status_json(RequestKind::Reindex);
        assert!(json.get("canceled").is_none());

        progress.set_cancelled_reason("stopped".to_string());
        let json = progress.snapshot().status_json(RequestKind::Reindex);
        assert_eq!(json.get("canceled"), Some(&serde_json::json!(true)));
    }
}
