use std::collections::BTreeMap;

use crate::event::Dimensions;

use super::coalesce::CoalescedRecord;

/// An open request worth carrying into the next window: original dimensions
/// plus its start timestamp. Re-inserted downstream as a start-only event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InflightRow {
    pub dims: Dimensions,
    pub st: i64,
}

/// Selects the open records that plausibly represent still-running work.
///
/// A thread runs at most one request at a time, so among a thread's open
/// records only the one matching the thread's newest observed start can
/// still be running; every older open record lost its end-event and is
/// dropped. The newest-start comparison includes completed records: a
/// completed request that started later proves the older open one is an
/// orphan. Starts at or past the expiry horizon are dropped as stale, and
/// records without a thread id cannot be disambiguated at all.
///
/// At most one row per thread is returned; should two open records tie on
/// the newest start, the greater `(rid, operation)` wins to keep the output
/// deterministic.
pub(crate) fn detect(
    records: &[CoalescedRecord],
    window_start: i64,
    expire_after_ms: i64,
) -> Vec<InflightRow> {
    let mut latest: BTreeMap<&str, i64> = BTreeMap::new();
    for r in records {
        if let (Some(tid), Some(st)) = (r.tid.as_deref(), r.st) {
            let entry = latest.entry(tid).or_insert(st);
            if st > *entry {
                *entry = st;
            }
        }
    }

    let mut chosen: BTreeMap<&str, &CoalescedRecord> = BTreeMap::new();
    for r in records {
        let Some(tid) = r.tid.as_deref() else {
            continue;
        };
        let Some(st) = r.st else {
            continue;
        };
        if r.et.is_some() {
            continue;
        }
        if st <= window_start - expire_after_ms {
            continue;
        }
        if st != latest[tid] {
            continue;
        }

        match chosen.get(tid) {
            Some(cur) if (cur.rid.as_ref(), cur.operation.as_ref()) >= (r.rid.as_ref(), r.operation.as_ref()) => {}
            _ => {
                chosen.insert(tid, r);
            }
        }
    }

    chosen
        .into_values()
        .map(|r| InflightRow {
            dims: Dimensions {
                shard_id: r.shard_id.clone(),
                index_name: r.index_name.clone(),
                rid: r.rid.clone(),
                tid: r.tid.clone(),
                operation: r.operation.clone(),
                shard_role: r.shard_role.clone(),
                doc_count: r.doc_count,
            },
            st: r.st.unwrap_or_default(),
        })
        .collect()
}
