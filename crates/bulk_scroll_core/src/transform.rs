use bulk_scroll_client::{
    BulkOpType,
    BulkRequest,
    BulkRequestItem,
    SearchHit,
    WriteConsistency,
};
use std::time::Duration;

/// Identity/routing fields a transform script may read but must never
/// mutate. Named individually so a violation can report exactly which
/// field was touched.
pub const FORBIDDEN_MUTABLE_FIELDS: &[&str] = &[
    "_index",
    "_type",
    "_id",
    "_version",
    "_routing",
    "_parent",
    "_timestamp",
    "_ttl",
];

#[derive(thiserror::Error, Debug)]
pub enum TransformError {
    #[error("Modifying [{field}] not allowed")]
    ForbiddenFieldMutation { field: &'static str },
}

/// Maps one search hit to a bulk operation, or to nothing (a noop). Called
/// once per batch, off the network reply path.
pub trait DocumentTransform: Send + Sync {
    /// Transform a single hit. `Ok(None)` means the hit requires no
    /// mutation (contributes to the noop counter, not the bulk request).
    fn transform_one(&self, hit: &SearchHit) -> Result<Option<BulkRequestItem>, TransformError>;

    /// Build the bulk request for an entire batch. Returns `(request,
    /// noop_count)`; an empty request tells the driver to skip the bulk
    /// dispatch and advance straight to the next scroll.
    fn build_bulk(
        &self,
        hits: &[SearchHit],
        timeout: Duration,
        consistency: WriteConsistency,
    ) -> Result<(BulkRequest, usize), TransformError> {
        let mut items = Vec::with_capacity(hits.len());
        let mut noops = 0;
        for hit in hits {
            match self.transform_one(hit)? {
                Some(item) => items.push(item),
                None => noops += 1,
            }
        }
        Ok((
            BulkRequest {
                items,
                timeout,
                consistency,
            },
            noops,
        ))
    }
}

/// The mutable view a user script sees: the document body, plus the
/// identity/routing fields a script may read but (per
/// [`FORBIDDEN_MUTABLE_FIELDS`]) must not change.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptContext {
    pub index: String,
    pub doc_type: String,
    pub id: String,
    pub version: i64,
    pub routing: Option<String>,
    pub parent: Option<String>,
    pub timestamp: Option<String>,
    pub ttl: Option<u64>,
    pub source: serde_json::Value,
}

impl ScriptContext {
    fn from_hit(hit: &SearchHit) -> Self {
        Self {
            index: hit.index.clone(),
            doc_type: hit.doc_type.clone(),
            id: hit.id.clone(),
            version: hit.version,
            routing: hit.routing.clone(),
            parent: hit.parent.clone(),
            timestamp: hit.timestamp.clone(),
            ttl: hit.ttl,
            source: hit.source.clone(),
        }
    }

    /// Fails with the name of the first forbidden field the script changed,
    /// relative to the hit it started from. `changed` is built in the same
    /// order as [`FORBIDDEN_MUTABLE_FIELDS`] so the two stay in lockstep.
    fn check_identity_unchanged(&self, hit: &SearchHit) -> Result<(), TransformError> {
        let changed = [
            self.index != hit.index,
            self.doc_type != hit.doc_type,
            self.id != hit.id,
            self.version != hit.version,
            self.routing != hit.routing,
            self.parent != hit.parent,
            self.timestamp != hit.timestamp,
            self.ttl != hit.ttl,
        ];
        for (was_changed, field) in changed.into_iter().zip(FORBIDDEN_MUTABLE_FIELDS.iter().copied()) {
            if was_changed {
                return Err(TransformError::ForbiddenFieldMutation { field });
            }
        }
        Ok(())
    }
}

/// update-by-query: rewrites each hit in place. Destination index, type,
/// id, and routing are copied verbatim from the hit; the document body is
/// the hit's own source (optionally passed through a user script) and the
/// version is preserved so the backend can detect concurrent writes.
pub struct UpdateByQueryTransform {
    script: Option<Box<dyn Fn(&mut ScriptContext) -> Result<(), TransformError> + Send + Sync>>,
}

impl UpdateByQueryTransform {
    pub fn new() -> Self {
        Self { script: None }
    }

    pub fn with_script(
        script: impl Fn(&mut ScriptContext) -> Result<(), TransformError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Some(Box::new(script)),
        }
    }
}

impl Default for UpdateByQueryTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentTransform for UpdateByQueryTransform {
    fn transform_one(&self, hit: &SearchHit) -> Result<Option<BulkRequestItem>, TransformError> {
        let mut ctx = ScriptContext::from_hit(hit);
        if let Some(script) = &self.script {
            script(&mut ctx)?;
            ctx.check_identity_unchanged(hit)?;
        }
        if ctx.source == hit.source {
            return Ok(None);
        }
        Ok(Some(BulkRequestItem {
            op: BulkOpType::Index,
            index: hit.index.clone(),
            doc_type: hit.doc_type.clone(),
            id: hit.id.clone(),
            routing: hit.routing.clone(),
            version: Some(hit.version),
            source: Some(ctx.source),
        }))
    }
}

/// reindex-from-one-index-to-another: every hit becomes an index op
/// against the destination index, id/routing preserved, version not
/// enforced (the destination is a distinct index with its own version
/// history).
pub struct ReindexTransform {
    pub destination_index: String,
}

impl ReindexTransform {
    pub fn new(destination_index: impl Into<String>) -> Self {
        Self {
            destination_index: destination_index.into(),
        }
    }
}

impl DocumentTransform for ReindexTransform {
    fn transform_one(&self, hit: &SearchHit) -> Result<Option<BulkRequestItem>, TransformError> {
        Ok(Some(BulkRequestItem {
            op: BulkOpType::Index,
            index: self.destination_index.clone(),
            doc_type: hit.doc_type.clone(),
            id: hit.id.clone(),
            routing: hit.routing.clone(),
            version: None,
            source: Some(hit.source.clone()),
        }))
    }
}

/// delete-by-query: every hit becomes an unconditional delete against its
/// own index. A script may still veto individual hits (returning a noop),
/// but cannot redirect the delete to a different document.
pub struct DeleteByQueryTransform {
    veto: Option<Box<dyn Fn(&SearchHit) -> bool + Send + Sync>>,
}

impl DeleteByQueryTransform {
    pub fn new() -> Self {
        Self { veto: None }
    }

    pub fn with_veto(veto: impl Fn(&SearchHit) -> bool + Send + Sync + 'static) -> Self {
        Self {
            veto: Some(Box::new(veto)),
        }
    }
}

impl Default for DeleteByQueryTransform {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentTransform for DeleteByQueryTransform {
    fn transform_one(&self, hit: &SearchHit) -> Result<Option<BulkRequestItem>, TransformError> {
        if let Some(veto) = &self.veto {
            if veto(hit) {
                return Ok(None);
            }
        }
        Ok(Some(BulkRequestItem {
            op: BulkOpType::Delete,
            index: hit.index.clone(),
            doc_type: hit.doc_type.clone(),
            id: hit.id.clone(),
            routing: hit.routing.clone(),
            version: None,
            source: None,
        }))
    }
}
