pub mod coalesce;
pub mod inflight;
pub mod view;

mod store;

use thiserror::Error;
use tracing::debug;

use crate::config::MetricsConfig;
use crate::event::{Dimensions, HalfEvent, Stamp};

pub use coalesce::CoalescedRecord;
pub use inflight::InflightRow;
pub use store::Row;
pub use view::{ClippedRow, LatencyRow, OpLatencyRow, ThreadUtilRow};

use store::EventStore;

/// Failures of a snapshot's ingest or rollover path. View computations are
/// infallible over the in-memory store.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("{table}: event buffer full at {capacity} rows, dropping input")]
    BufferFull { table: String, capacity: usize },

    #[error("rollover of {carried} inflight rows into {table} failed")]
    Rollover { table: String, carried: usize },
}

/// One window's worth of shard-request half-events plus the derived views
/// over them.
///
/// Producers append concurrently through the ingest lock; every view takes
/// a point-in-time copy of the rows, so a view never observes a half-open
/// batch and repeated calls without new inserts yield identical output.
pub struct ShardRequestSnapshot {
    window_start: i64,
    window_end: i64,
    expire_after: i64,
    table: String,
    store: EventStore,
}

impl ShardRequestSnapshot {
    /// Creates the snapshot for the window beginning at `window_start`
    /// (epoch-ms, a multiple of the sampling interval).
    pub fn new(window_start: i64, cfg: &MetricsConfig) -> Self {
        Self {
            window_start,
            window_end: window_start + cfg.sampling_interval_ms(),
            expire_after: cfg.expiry_horizon_ms(),
            table: format!("shard_rq_{window_start}"),
            store: EventStore::new(cfg.max_buffer_rows),
        }
    }

    /// Identifier of this window's backing table, `shard_rq_<W>`.
    pub fn name(&self) -> &str {
        &self.table
    }

    pub fn window_start(&self) -> i64 {
        self.window_start
    }

    pub fn window_end(&self) -> i64 {
        self.window_end
    }

    /// Number of raw half-event rows ingested so far.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    /// Appends a start-marker row.
    pub fn put_start(&self, st: i64, dims: Dimensions) -> Result<(), SnapshotError> {
        self.append(Row {
            dims,
            st: Some(st),
            et: None,
        })
    }

    /// Appends an end-marker row.
    pub fn put_end(&self, et: i64, dims: Dimensions) -> Result<(), SnapshotError> {
        self.append(Row {
            dims,
            st: None,
            et: Some(et),
        })
    }

    /// Appends a batch of half-events under one lock acquisition.
    pub fn put_batch(&self, events: Vec<HalfEvent>) -> Result<(), SnapshotError> {
        let rows = events
            .into_iter()
            .map(|ev| match ev.stamp {
                Stamp::Start(st) => Row {
                    dims: ev.dims,
                    st: Some(st),
                    et: None,
                },
                Stamp::End(et) => Row {
                    dims: ev.dims,
                    st: None,
                    et: Some(et),
                },
            })
            .collect();

        self.store
            .append_batch(rows)
            .map_err(|e| SnapshotError::BufferFull {
                table: self.table.clone(),
                capacity: e.capacity,
            })
    }

    fn append(&self, row: Row) -> Result<(), SnapshotError> {
        self.store.append(row).map_err(|e| SnapshotError::BufferFull {
            table: self.table.clone(),
            capacity: e.capacity,
        })
    }

    /// Raw buffer dump, unordered and uncoalesced.
    pub fn fetch_all(&self) -> Vec<Row> {
        self.store.rows()
    }

    /// One merged record per `(rid, operation)`.
    pub fn group_by_rid_op(&self) -> Vec<CoalescedRecord> {
        coalesce::group_by_rid_op(&self.store.rows())
    }

    /// Per-request latency over complete records.
    pub fn fetch_latency(&self) -> Vec<LatencyRow> {
        view::latency(&self.group_by_rid_op())
    }

    /// Latency aggregated by `(shard, index, operation, role)`.
    pub fn fetch_latency_by_op(&self) -> Vec<OpLatencyRow> {
        view::latency_by_op(&self.fetch_latency())
    }

    /// Per-request time spent inside this window.
    pub fn time_spent_per_request(&self) -> Vec<ClippedRow> {
        view::time_spent_per_request(&self.group_by_rid_op(), self.window_start, self.window_end)
    }

    /// Each request's share of its thread's in-window time.
    pub fn fetch_thread_utilization_ratio(&self) -> Vec<ThreadUtilRow> {
        view::thread_utilization(&self.time_spent_per_request())
    }

    /// Open requests that should be carried into the successor window.
    pub fn fetch_inflight(&self) -> Vec<InflightRow> {
        inflight::detect(&self.group_by_rid_op(), self.window_start, self.expire_after)
    }

    /// Re-inserts `prev`'s inflight rows into this snapshot as start-only
    /// events, preserving their dimensions and original start timestamps.
    /// Returns the number of rows carried.
    pub fn rollover_inflight(&self, prev: &ShardRequestSnapshot) -> Result<usize, SnapshotError> {
        let inflight = prev.fetch_inflight();
        let carried = inflight.len();

        let events = inflight
            .into_iter()
            .map(|row| HalfEvent::start(row.st, row.dims))
            .collect();

        self.put_batch(events).map_err(|_| SnapshotError::Rollover {
            table: self.table.clone(),
            carried,
        })?;

        debug!(
            from = prev.name(),
            to = %self.table,
            carried,
            "carried inflight shard requests"
        );

        Ok(carried)
    }
}
