use serde::{
    Deserialize,
    Serialize,
};

/// An opaque search-source payload. The engine never interprets this value
/// beyond the default-source merge described in the request envelope.
pub type SearchSource = serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub indices: Vec<String>,
    pub source: SearchSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub index: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub id: String,
    pub version: i64,
    pub routing: Option<String>,
    /// Legacy parent-join identity, carried through untouched by every
    /// shipped transform; a script may read it but never reassign it.
    #[serde(default)]
    pub parent: Option<String>,
    /// Legacy per-document timestamp metadata field.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Legacy per-document time-to-live, in milliseconds.
    #[serde(default)]
    pub ttl: Option<u64>,
    pub source: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShardFailure {
    pub shard: i32,
    pub index: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub scroll_id: Option<String>,
    pub total_hits: u64,
    pub hits: Vec<SearchHit>,
    pub shard_failures: Vec<ShardFailure>,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkOpType {
    Index,
    Create,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRequestItem {
    pub op: BulkOpType,
    pub index: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub id: String,
    pub routing: Option<String>,
    pub version: Option<i64>,
    pub source: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkRequest {
    pub items: Vec<BulkRequestItem>,
    pub timeout: std::time::Duration,
    pub consistency: WriteConsistency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WriteConsistency {
    One,
    #[default]
    Quorum,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkItemOutcome {
    Created,
    Updated,
    Deleted,
    Noop,
    VersionConflict { status: u16, reason: String },
    Failure { status: u16, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemResponse {
    pub op: BulkOpType,
    pub index: String,
    pub id: String,
    pub outcome: BulkItemOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkResponse {
    pub items: Vec<BulkItemResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClearScrollResponse {
    pub succeeded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RefreshResponse {
    pub shards_acknowledged: u32,
}
