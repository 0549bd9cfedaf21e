use anyhow::Result;
use tracing::{debug, info};

use crate::snapshot::{InflightRow, LatencyRow, OpLatencyRow, ShardRequestSnapshot, ThreadUtilRow};

/// All derived views of one closed window, collected for publication.
#[derive(Debug, Clone)]
pub struct WindowReport {
    /// Backing table identifier, `shard_rq_<W>`.
    pub table: String,
    pub window_start: i64,
    pub window_end: i64,
    /// Raw half-event rows ingested into the window.
    pub rows: usize,
    pub latency: Vec<LatencyRow>,
    pub latency_by_op: Vec<OpLatencyRow>,
    pub thread_utilization: Vec<ThreadUtilRow>,
    /// Open requests carried into the successor window.
    pub inflight: Vec<InflightRow>,
}

impl WindowReport {
    /// Computes every view of a closed snapshot.
    pub fn collect(snap: &ShardRequestSnapshot) -> Self {
        Self {
            table: snap.name().to_string(),
            window_start: snap.window_start(),
            window_end: snap.window_end(),
            rows: snap.len(),
            latency: snap.fetch_latency(),
            latency_by_op: snap.fetch_latency_by_op(),
            thread_utilization: snap.fetch_thread_utilization_ratio(),
            inflight: snap.fetch_inflight(),
        }
    }
}

/// Publisher hands closed-window reports to a downstream consumer.
///
/// Enum dispatch keeps the async publish call monomorphic; a long-term
/// metrics store would slot in as another variant.
pub enum Publisher {
    Log(LogPublisher),
}

impl Publisher {
    /// Returns the publisher name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Log(p) => p.name(),
        }
    }

    /// Publish one closed window's views.
    pub async fn publish(&self, report: &WindowReport) -> Result<()> {
        match self {
            Self::Log(p) => p.publish(report).await,
        }
    }
}

/// Publishes window reports to the process log.
#[derive(Debug, Default)]
pub struct LogPublisher;

impl LogPublisher {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &str {
        "log"
    }

    pub async fn publish(&self, report: &WindowReport) -> Result<()> {
        info!(
            table = %report.table,
            window_start = report.window_start,
            rows = report.rows,
            requests = report.latency.len(),
            operations = report.latency_by_op.len(),
            inflight = report.inflight.len(),
            "window closed"
        );

        for op in &report.latency_by_op {
            debug!(
                shard = op.shard_id.as_deref().unwrap_or(""),
                index = op.index_name.as_deref().unwrap_or(""),
                operation = op.operation.as_deref().unwrap_or(""),
                role = op.shard_role.as_deref().unwrap_or(""),
                sum_lat = op.sum_lat,
                avg_lat = op.avg_lat,
                min_lat = op.min_lat,
                max_lat = op.max_lat,
                count = op.count,
                doc_count = op.doc_count.unwrap_or(0),
                "operation latency"
            );
        }

        for row in &report.thread_utilization {
            debug!(
                tid = %row.tid,
                rid = row.rid.as_deref().unwrap_or(""),
                operation = row.operation.as_deref().unwrap_or(""),
                lat = row.lat,
                ttime = row.ttime,
                t_util = row.t_util,
                "thread utilization"
            );
        }

        Ok(())
    }
}
