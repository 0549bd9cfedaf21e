//! Windowed shard-request metrics snapshot engine.
//!
//! Collects per-shard request half-events (start-only or end-only rows),
//! coalesces them into complete request records per sampling window, and
//! derives latency, per-operation aggregate, and thread-utilization views.
//! Requests still running at a window boundary are carried into the next
//! window; stalled requests are discarded using the one-active-request-per-
//! thread invariant.

pub mod clock;
pub mod config;
pub mod event;
pub mod ingest;
pub mod publish;
pub mod reader;
pub mod snapshot;
