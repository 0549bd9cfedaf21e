use shardscope::config::MetricsConfig;
use shardscope::event::Dimensions;
use shardscope::reader::MetricsReader;
use shardscope::snapshot::ShardRequestSnapshot;

const W: i64 = 1_535_065_340_000;
const DELTA: i64 = 5_000;

fn dims(rid: &str, tid: &str, op: &str) -> Dimensions {
    Dimensions {
        shard_id: Some("0".to_string()),
        index_name: Some("sonested".to_string()),
        rid: Some(rid.to_string()),
        tid: Some(tid.to_string()),
        operation: Some(op.to_string()),
        shard_role: Some("NA".to_string()),
        doc_count: None,
    }
}

fn snapshot(window_start: i64) -> ShardRequestSnapshot {
    ShardRequestSnapshot::new(window_start, &MetricsConfig::default())
}

#[test]
fn simple_request_complete_within_window() {
    let snap = snapshot(W);
    let d = dims("A", "T1", "shardquery");
    snap.put_start(1_535_065_340_330, d.clone()).expect("append");
    snap.put_end(1_535_065_340_625, d).expect("append");

    let latency = snap.fetch_latency();
    assert_eq!(latency.len(), 1);
    assert_eq!(latency[0].lat, 295);

    let by_op = snap.fetch_latency_by_op();
    assert_eq!(by_op.len(), 1);
    let agg = &by_op[0];
    assert_eq!(agg.shard_id.as_deref(), Some("0"));
    assert_eq!(agg.index_name.as_deref(), Some("sonested"));
    assert_eq!(agg.operation.as_deref(), Some("shardquery"));
    assert_eq!(agg.shard_role.as_deref(), Some("NA"));
    assert_eq!(agg.sum_lat, 295);
    assert_eq!(agg.avg_lat, 295.0);
    assert_eq!(agg.min_lat, 295);
    assert_eq!(agg.max_lat, 295);
    assert_eq!(agg.count, 1);
}

#[test]
fn straddling_request_is_clipped_to_window() {
    let snap = snapshot(W);
    let d = dims("A", "T1", "shardquery");
    snap.put_start(1_535_065_339_000, d.clone()).expect("append");
    snap.put_end(1_535_065_341_000, d).expect("append");

    // Unclipped latency spans both windows.
    assert_eq!(snap.fetch_latency()[0].lat, 2_000);

    // Time spent inside this window counts only from the window start.
    let clipped = snap.time_spent_per_request();
    assert_eq!(clipped[0].st, W);
    assert_eq!(clipped[0].et, 1_535_065_341_000);
    assert_eq!(clipped[0].lat, 1_000);
}

#[test]
fn inflight_request_rolls_into_next_window() {
    let reader = MetricsReader::new(MetricsConfig::default(), W);
    reader.put_start(1_535_065_342_000, dims("B", "T2", "shardquery"));

    let prev = reader.rotate_to(W + DELTA).expect("previous snapshot");
    let inflight = prev.fetch_inflight();
    assert_eq!(inflight.len(), 1);
    assert_eq!(inflight[0].dims.rid.as_deref(), Some("B"));
    assert_eq!(inflight[0].st, 1_535_065_342_000);

    // The successor contains exactly that row as a start-only event, with
    // identical dimensions and start timestamp.
    let next = reader.current_snapshot().expect("current");
    let rows = next.fetch_all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].dims, dims("B", "T2", "shardquery"));
    assert_eq!(rows[0].st, Some(1_535_065_342_000));
    assert_eq!(rows[0].et, None);
}

#[test]
fn orphaned_starts_on_reused_thread_are_dropped() {
    let snap = snapshot(W);
    snap.put_start(1_535_064_000_000, dims("X", "T3", "shardquery"))
        .expect("append");
    snap.put_start(1_535_065_340_100, dims("Y", "T3", "shardquery"))
        .expect("append");
    snap.put_start(1_535_065_341_500, dims("Z", "T3", "shardquery"))
        .expect("append");

    // One request per thread at a time: everything older than the thread's
    // newest start lost its end-event.
    let inflight = snap.fetch_inflight();
    assert_eq!(inflight.len(), 1);
    assert_eq!(inflight[0].dims.rid.as_deref(), Some("Z"));
    assert_eq!(inflight[0].st, 1_535_065_341_500);
}

#[test]
fn stale_start_is_expired_at_rollover() {
    let snap = snapshot(W);
    // 601s before the window start, past the expiry horizon.
    snap.put_start(1_535_064_739_000, dims("A", "T1", "shardquery"))
        .expect("append");

    assert!(snap.fetch_inflight().is_empty());
}

#[test]
fn thread_utilization_ratios_sum_to_one() {
    let snap = snapshot(W);
    for (rid, op, st, et) in [
        ("A", "shardquery", W + 100, W + 355),
        ("B", "shardquery", W + 400, W + 665),
        ("C", "shardfetch", W + 700, W + 701),
        ("D", "shardfetch", W + 800, W + 803),
    ] {
        snap.put_start(st, dims(rid, "T4", op)).expect("append");
        snap.put_end(et, dims(rid, "T4", op)).expect("append");
    }

    let rows = snap.fetch_thread_utilization_ratio();
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.ttime == 524));

    let util = |rid: &str| {
        rows.iter()
            .find(|r| r.rid.as_deref() == Some(rid))
            .expect("row")
            .t_util
    };
    assert!((util("A") - 0.4866).abs() < 1e-3);
    assert!((util("B") - 0.5057).abs() < 1e-3);
    assert!((util("C") - 0.0019).abs() < 1e-3);
    assert!((util("D") - 0.0057).abs() < 1e-3);

    let sum: f64 = rows.iter().map(|r| r.t_util).sum();
    assert!((sum - 1.0).abs() < 1e-9);
}

#[test]
fn mixed_window_satisfies_view_invariants() {
    let snap = snapshot(W);

    // Complete request.
    snap.put_start(W + 100, dims("A", "T1", "shardquery")).expect("append");
    snap.put_end(W + 400, dims("A", "T1", "shardquery")).expect("append");
    // Duplicate halves of the same request.
    snap.put_start(W + 100, dims("A", "T1", "shardquery")).expect("append");
    // Straddler from the previous window.
    snap.put_start(W - 2_500, dims("B", "T2", "shardquery")).expect("append");
    snap.put_end(W + 1_500, dims("B", "T2", "shardquery")).expect("append");
    // Open request.
    snap.put_start(W + 3_000, dims("C", "T3", "shardfetch")).expect("append");
    // End-only orphan.
    snap.put_end(W + 200, dims("D", "T4", "shardquery")).expect("append");

    // At most one coalesced record per (rid, op).
    let records = snap.group_by_rid_op();
    let mut keys: Vec<_> = records
        .iter()
        .map(|r| (r.rid.clone(), r.operation.clone()))
        .collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), records.len());

    // Latency is never negative.
    assert!(snap.fetch_latency().iter().all(|r| r.lat >= 0));

    // Clipped intervals stay inside the window.
    for row in snap.time_spent_per_request() {
        assert!(W <= row.st && row.st <= row.et && row.et <= W + DELTA);
    }

    // Utilization ratios per thread sum to one.
    let util = snap.fetch_thread_utilization_ratio();
    let mut per_thread: std::collections::BTreeMap<&str, f64> = std::collections::BTreeMap::new();
    for row in &util {
        *per_thread.entry(row.tid.as_str()).or_insert(0.0) += row.t_util;
    }
    for (tid, sum) in per_thread {
        assert!((sum - 1.0).abs() < 1e-9, "thread {tid} sums to {sum}");
    }

    // At most one inflight row per thread, none stale.
    let inflight = snap.fetch_inflight();
    let mut tids: Vec<_> = inflight
        .iter()
        .map(|r| r.dims.tid.clone().expect("inflight rows carry a tid"))
        .collect();
    tids.sort();
    tids.dedup();
    assert_eq!(tids.len(), inflight.len());
    assert!(inflight.iter().all(|r| r.st > W - 600_000));
}

#[test]
fn rollover_preserves_the_inflight_set() {
    let reader = MetricsReader::new(MetricsConfig::default(), W);
    reader.put_start(W + 1_000, dims("A", "T1", "shardquery"));
    reader.put_start(W + 2_000, dims("B", "T2", "shardfetch"));
    reader.put_start(W + 100, dims("C", "T3", "shardquery"));
    reader.put_end(W + 200, dims("C", "T3", "shardquery"));

    let prev = reader.rotate_to(W + DELTA).expect("previous snapshot");
    let inflight = prev.fetch_inflight();
    assert_eq!(inflight.len(), 2);

    let next = reader.current_snapshot().expect("current");
    let rows = next.fetch_all();
    assert_eq!(rows.len(), inflight.len());
    for row in &inflight {
        assert!(
            rows.iter()
                .any(|r| r.dims == row.dims && r.st == Some(row.st) && r.et.is_none()),
            "inflight row missing after rollover: {row:?}"
        );
    }
}

#[test]
fn request_completing_after_rollover_yields_latency_in_new_window() {
    let reader = MetricsReader::new(MetricsConfig::default(), W);
    reader.put_start(W + 2_000, dims("B", "T2", "shardquery"));

    reader.rotate_to(W + DELTA);

    // The end-event arrives in the next window and pairs with the carried
    // start.
    reader.put_end(W + DELTA + 500, dims("B", "T2", "shardquery"));

    let snap = reader.current_snapshot().expect("current");
    let latency = snap.fetch_latency();
    assert_eq!(latency.len(), 1);
    assert_eq!(latency[0].lat, 3_500);

    // Fully accounted for now: nothing left to carry.
    assert!(snap.fetch_inflight().is_empty());

    // Its time inside the new window is clipped at the window start.
    let clipped = snap.time_spent_per_request();
    assert_eq!(clipped[0].st, W + DELTA);
    assert_eq!(clipped[0].et, W + DELTA + 500);
    assert_eq!(clipped[0].lat, 500);
}

#[test]
fn bulk_doc_counts_flow_into_op_aggregates() {
    let snap = snapshot(W);
    let mut d = dims("A", "T1", "shardbulk");
    snap.put_start(W + 100, d.clone()).expect("append");
    d.doc_count = Some(120);
    snap.put_end(W + 900, d).expect("append");

    let mut d2 = dims("B", "T1", "shardbulk");
    d2.doc_count = Some(80);
    snap.put_start(W + 1_000, d2.clone()).expect("append");
    snap.put_end(W + 1_400, d2).expect("append");

    let by_op = snap.fetch_latency_by_op();
    assert_eq!(by_op.len(), 1);
    assert_eq!(by_op[0].count, 2);
    assert_eq!(by_op[0].doc_count, Some(200));
    assert_eq!(by_op[0].sum_lat, 1_200);
}
