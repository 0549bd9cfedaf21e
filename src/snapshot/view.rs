use std::collections::BTreeMap;

use super::coalesce::CoalescedRecord;

/// Per-request latency: a coalesced record with both timestamps observed.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyRow {
    pub shard_id: Option<String>,
    pub index_name: Option<String>,
    pub rid: Option<String>,
    pub tid: Option<String>,
    pub operation: Option<String>,
    pub shard_role: Option<String>,
    pub st: i64,
    pub et: i64,
    pub lat: i64,
    pub doc_count: Option<i64>,
}

/// Latency aggregated over `(shard, index, operation, role)`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpLatencyRow {
    pub shard_id: Option<String>,
    pub index_name: Option<String>,
    pub operation: Option<String>,
    pub shard_role: Option<String>,
    pub sum_lat: i64,
    pub avg_lat: f64,
    pub min_lat: i64,
    pub max_lat: i64,
    pub count: u64,
    /// Sum of non-null doc counts; `None` when no request in the group
    /// carried one.
    pub doc_count: Option<i64>,
}

/// A coalesced record clamped to the window, with time spent inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClippedRow {
    pub shard_id: Option<String>,
    pub index_name: Option<String>,
    pub rid: Option<String>,
    pub tid: Option<String>,
    pub operation: Option<String>,
    pub shard_role: Option<String>,
    pub st: i64,
    pub et: i64,
    pub lat: i64,
}

/// A clipped row joined with its thread's total in-window time.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadUtilRow {
    pub shard_id: Option<String>,
    pub index_name: Option<String>,
    pub rid: Option<String>,
    pub tid: String,
    pub operation: Option<String>,
    pub shard_role: Option<String>,
    pub st: i64,
    pub et: i64,
    pub lat: i64,
    pub ttime: i64,
    pub t_util: f64,
}

/// Records with both timestamps, attaching `lat = et - st`.
///
/// Records with an inverted interval are malformed (an end-event from a
/// previous thread incarnation, or producer clock trouble) and excluded.
pub(crate) fn latency(records: &[CoalescedRecord]) -> Vec<LatencyRow> {
    records
        .iter()
        .filter_map(|r| {
            let (st, et) = (r.st?, r.et?);
            if et < st {
                return None;
            }
            Some(LatencyRow {
                shard_id: r.shard_id.clone(),
                index_name: r.index_name.clone(),
                rid: r.rid.clone(),
                tid: r.tid.clone(),
                operation: r.operation.clone(),
                shard_role: r.shard_role.clone(),
                st,
                et,
                lat: et - st,
                doc_count: r.doc_count,
            })
        })
        .collect()
}

type OpKey = (
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// Aggregates latency rows by `(shard, index, operation, role)`.
pub(crate) fn latency_by_op(rows: &[LatencyRow]) -> Vec<OpLatencyRow> {
    let mut groups: BTreeMap<OpKey, OpLatencyRow> = BTreeMap::new();

    for row in rows {
        let key = (
            row.shard_id.clone(),
            row.index_name.clone(),
            row.operation.clone(),
            row.shard_role.clone(),
        );

        let agg = groups.entry(key).or_insert_with(|| OpLatencyRow {
            shard_id: row.shard_id.clone(),
            index_name: row.index_name.clone(),
            operation: row.operation.clone(),
            shard_role: row.shard_role.clone(),
            sum_lat: 0,
            avg_lat: 0.0,
            min_lat: i64::MAX,
            max_lat: i64::MIN,
            count: 0,
            doc_count: None,
        });

        agg.sum_lat += row.lat;
        agg.count += 1;
        agg.min_lat = agg.min_lat.min(row.lat);
        agg.max_lat = agg.max_lat.max(row.lat);
        if let Some(dc) = row.doc_count {
            *agg.doc_count.get_or_insert(0) += dc;
        }
    }

    groups
        .into_values()
        .map(|mut agg| {
            // Groups are never empty, so the division is safe.
            agg.avg_lat = agg.sum_lat as f64 / agg.count as f64;
            agg
        })
        .collect()
}

/// Clamps every record's interval to `[window_start, window_end]`.
///
/// A missing start defaults to the window start, a missing end to the window
/// end, and both bounds are clamped into the window: a record entirely on
/// one side collapses to zero length, a straddling record covers the full
/// window. Malformed records whose clamped interval is still inverted are
/// excluded, so every emitted row spends a non-negative time in the window.
pub(crate) fn time_spent_per_request(
    records: &[CoalescedRecord],
    window_start: i64,
    window_end: i64,
) -> Vec<ClippedRow> {
    records
        .iter()
        .filter_map(|r| {
            let st = r.st.unwrap_or(window_start).clamp(window_start, window_end);
            let et = r.et.unwrap_or(window_end).clamp(window_start, window_end);
            if et < st {
                return None;
            }
            Some(ClippedRow {
                shard_id: r.shard_id.clone(),
                index_name: r.index_name.clone(),
                rid: r.rid.clone(),
                tid: r.tid.clone(),
                operation: r.operation.clone(),
                shard_role: r.shard_role.clone(),
                st,
                et,
                lat: et - st,
            })
        })
        .collect()
}

/// Joins clipped rows with per-thread totals and computes each request's
/// share of its thread's in-window time.
///
/// Rows without a thread id cannot join and are excluded, as are threads
/// whose total is zero (every contributing request clipped to nothing).
pub(crate) fn thread_utilization(clipped: &[ClippedRow]) -> Vec<ThreadUtilRow> {
    let mut totals: BTreeMap<&str, i64> = BTreeMap::new();
    for row in clipped {
        if let Some(tid) = row.tid.as_deref() {
            *totals.entry(tid).or_insert(0) += row.lat;
        }
    }

    clipped
        .iter()
        .filter_map(|row| {
            let tid = row.tid.as_deref()?;
            let ttime = totals[tid];
            if ttime == 0 {
                return None;
            }
            Some(ThreadUtilRow {
                shard_id: row.shard_id.clone(),
                index_name: row.index_name.clone(),
                rid: row.rid.clone(),
                tid: tid.to_string(),
                operation: row.operation.clone(),
                shard_role: row.shard_role.clone(),
                st: row.st,
                et: row.et,
                lat: row.lat,
                ttime,
                t_util: row.lat as f64 / ttime as f64,
            })
        })
        .collect()
}
