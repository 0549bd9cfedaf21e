use std::collections::BTreeMap;

use tracing::warn;

use super::store::Row;

/// One merged record per `(rid, operation)` group: the null-tolerant max of
/// every column across that group's half-events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoalescedRecord {
    pub shard_id: Option<String>,
    pub index_name: Option<String>,
    pub rid: Option<String>,
    pub tid: Option<String>,
    pub operation: Option<String>,
    pub shard_role: Option<String>,
    pub doc_count: Option<i64>,
    pub st: Option<i64>,
    pub et: Option<i64>,
}

/// Groups rows by `(rid, operation)` and merges each group column-wise.
///
/// Rows missing `rid` or `operation` group together under the absent key,
/// matching SQL GROUP BY semantics over NULL. Output is ordered by group key
/// so repeated calls over the same rows yield identical results.
pub(crate) fn group_by_rid_op(rows: &[Row]) -> Vec<CoalescedRecord> {
    let mut groups: BTreeMap<(Option<String>, Option<String>), CoalescedRecord> = BTreeMap::new();

    for row in rows {
        let key = (row.dims.rid.clone(), row.dims.operation.clone());
        let rec = groups.entry(key).or_insert_with(|| CoalescedRecord {
            rid: row.dims.rid.clone(),
            operation: row.dims.operation.clone(),
            ..Default::default()
        });

        merge_dim(&mut rec.shard_id, &row.dims.shard_id, "ShardID", &row.dims);
        merge_dim(
            &mut rec.index_name,
            &row.dims.index_name,
            "IndexName",
            &row.dims,
        );
        merge_dim(&mut rec.tid, &row.dims.tid, "tid", &row.dims);
        merge_dim(
            &mut rec.shard_role,
            &row.dims.shard_role,
            "ShardRole",
            &row.dims,
        );
        rec.doc_count = max_opt(rec.doc_count, row.dims.doc_count);
        rec.st = max_opt(rec.st, row.st);
        rec.et = max_opt(rec.et, row.et);
    }

    groups.into_values().collect()
}

/// Null-tolerant max: `max(NULL, x) = x`.
fn max_opt(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Merges a string dimension into the group, keeping the lexical max.
///
/// Half-events of one `(rid, operation)` group are expected to agree on
/// every dimension; a mismatch is reconciled by the max rule but flagged,
/// since it means a producer tagged the two halves differently.
fn merge_dim(
    slot: &mut Option<String>,
    incoming: &Option<String>,
    field: &'static str,
    dims: &crate::event::Dimensions,
) {
    match (slot.as_deref(), incoming.as_deref()) {
        (Some(have), Some(got)) if have != got => {
            warn!(
                field,
                rid = dims.rid.as_deref().unwrap_or(""),
                operation = dims.operation.as_deref().unwrap_or(""),
                have,
                got,
                "conflicting dimension values within request group"
            );
            if got > have {
                *slot = incoming.clone();
            }
        }
        (None, Some(_)) => *slot = incoming.clone(),
        _ => {}
    }
}
