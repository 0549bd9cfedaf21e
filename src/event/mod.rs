use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Dimension fields attached to every half-event.
///
/// Producers may omit any subset; omitted dimensions stay `None` through the
/// whole pipeline (the row store never fills defaults in).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Shard identifier, e.g. "0".
    #[serde(rename = "ShardID", default, skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<String>,

    /// Index the request operated on.
    #[serde(rename = "IndexName", default, skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,

    /// Request id. Start and end halves of one request share it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,

    /// Thread id the request ran on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,

    /// Operation name (shardquery, shardfetch, shardbulk).
    #[serde(rename = "Operation", default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    /// Primary / Replica / NA.
    #[serde(rename = "ShardRole", default, skip_serializing_if = "Option::is_none")]
    pub shard_role: Option<String>,

    /// Number of documents processed (bulk operations only).
    #[serde(rename = "DocCount", default, skip_serializing_if = "Option::is_none")]
    pub doc_count: Option<i64>,
}

/// The single timestamp a half-event carries, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    Start(i64),
    End(i64),
}

/// One ingested half-event: a start or end marker plus dimensions.
#[derive(Debug, Clone)]
pub struct HalfEvent {
    pub stamp: Stamp,
    pub dims: Dimensions,
}

impl HalfEvent {
    pub fn start(st: i64, dims: Dimensions) -> Self {
        Self {
            stamp: Stamp::Start(st),
            dims,
        }
    }

    pub fn end(et: i64, dims: Dimensions) -> Self {
        Self {
            stamp: Stamp::End(et),
            dims,
        }
    }
}

/// Failure parsing a wire event line.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid event json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event carries both start and end timestamps")]
    BothStamps,

    #[error("event carries neither start nor end timestamp")]
    NoStamp,
}

/// Wire shape of a half-event: one NDJSON object per line.
///
/// Unknown keys land in `extra` and are dropped at this boundary rather than
/// carried through the engine as an open map.
#[derive(Debug, Deserialize)]
struct WireEvent {
    #[serde(default)]
    st: Option<i64>,

    #[serde(default)]
    et: Option<i64>,

    #[serde(flatten)]
    dims: Dimensions,

    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

/// Parses one NDJSON line into a half-event.
///
/// Exactly one of `st` / `et` must be present. Unknown keys are logged at
/// debug and discarded.
pub fn parse_line(line: &str) -> Result<HalfEvent, ParseError> {
    let wire: WireEvent = serde_json::from_str(line)?;

    if !wire.extra.is_empty() {
        let keys: Vec<&str> = wire.extra.keys().map(String::as_str).collect();
        debug!(?keys, "dropping unknown event keys");
    }

    let stamp = match (wire.st, wire.et) {
        (Some(_), Some(_)) => return Err(ParseError::BothStamps),
        (Some(st), None) => Stamp::Start(st),
        (None, Some(et)) => Stamp::End(et),
        (None, None) => return Err(ParseError::NoStamp),
    };

    Ok(HalfEvent {
        stamp,
        dims: wire.dims,
    })
}
