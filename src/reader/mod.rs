use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::MetricsConfig;
use crate::event::{Dimensions, HalfEvent};
use crate::publish::{Publisher, WindowReport};
use crate::snapshot::ShardRequestSnapshot;

use self::atomic_snapshot::AtomicSnapshot;

/// Owns the live window snapshot and drives rollover.
///
/// Producers append into the current snapshot through a lock-free pointer
/// load, so the window flip is atomic from their perspective: an event
/// targets whichever buffer is current at its instant of arrival. The run
/// loop is the single analysis path; it reacts to window changes by swapping
/// in a fresh snapshot, carrying the old one's inflight requests forward,
/// publishing the old one's views, and dropping it.
pub struct MetricsReader {
    cfg: MetricsConfig,

    /// Atomic pointer to the current window's snapshot.
    current: Arc<AtomicSnapshot>,

    /// Queue of window flips consumed by the run loop.
    rotation_tx: mpsc::UnboundedSender<i64>,
    /// Rotation receiver, taken by `start`.
    rotation_rx: Option<mpsc::UnboundedReceiver<i64>>,

    publishers: Vec<Publisher>,

    /// Handle for the reader run task.
    run_task: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl MetricsReader {
    /// Creates a reader with an initial snapshot for `window_start`.
    pub fn new(cfg: MetricsConfig, window_start: i64) -> Self {
        let (rotation_tx, rotation_rx) = mpsc::unbounded_channel();

        let current = Arc::new(AtomicSnapshot::new());
        current.store(ShardRequestSnapshot::new(window_start, &cfg));

        Self {
            cfg,
            current,
            rotation_tx,
            rotation_rx: Some(rotation_rx),
            publishers: Vec::with_capacity(2),
            run_task: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Registers a view publisher.
    pub fn add_publisher(&mut self, publisher: Publisher) {
        self.publishers.push(publisher);
    }

    /// The snapshot currently receiving events.
    pub fn current_snapshot(&self) -> Option<Arc<ShardRequestSnapshot>> {
        self.current.load()
    }

    /// Appends a start-marker event to the current window.
    ///
    /// Ingest failures never propagate: the event is logged and dropped.
    pub fn put_start(&self, st: i64, dims: Dimensions) {
        let Some(snap) = self.current.load() else {
            warn!("no active window buffer, dropping start event");
            return;
        };
        if let Err(e) = snap.put_start(st, dims) {
            warn!(error = %e, "start event dropped");
        }
    }

    /// Appends an end-marker event to the current window.
    pub fn put_end(&self, et: i64, dims: Dimensions) {
        let Some(snap) = self.current.load() else {
            warn!("no active window buffer, dropping end event");
            return;
        };
        if let Err(e) = snap.put_end(et, dims) {
            warn!(error = %e, "end event dropped");
        }
    }

    /// Appends a batch of half-events to the current window.
    pub fn put_batch(&self, events: Vec<HalfEvent>) {
        let Some(snap) = self.current.load() else {
            warn!(count = events.len(), "no active window buffer, dropping batch");
            return;
        };
        let count = events.len();
        if let Err(e) = snap.put_batch(events) {
            warn!(error = %e, count, "event batch dropped");
        }
    }

    /// Window-change hook; wired to the window clock.
    pub fn on_window_changed(&self, window_start: i64) {
        if self.rotation_tx.send(window_start).is_err() {
            warn!(window_start, "rotation queue closed, dropping window flip");
        }
    }

    /// Swaps in a snapshot for `window_start`, carries the previous window's
    /// inflight requests into it, and returns the previous snapshot for
    /// publication.
    ///
    /// If the carry fails the new window starts with an empty buffer rather
    /// than a partially populated one.
    pub fn rotate_to(&self, window_start: i64) -> Option<Arc<ShardRequestSnapshot>> {
        Self::rotate(&self.current, &self.cfg, window_start)
    }

    fn rotate(
        current: &AtomicSnapshot,
        cfg: &MetricsConfig,
        window_start: i64,
    ) -> Option<Arc<ShardRequestSnapshot>> {
        let next = Arc::new(ShardRequestSnapshot::new(window_start, cfg));
        let prev = current.swap_arc(Arc::clone(&next));

        if let Some(prev) = &prev {
            if let Err(e) = next.rollover_inflight(prev) {
                warn!(
                    error = %e,
                    window_start,
                    "inflight rollover failed, starting window with an empty buffer"
                );
                current.store(ShardRequestSnapshot::new(window_start, cfg));
            }
        }

        prev
    }

    /// Publishes a closed snapshot's views, bounded by the rotation deadline.
    async fn publish_window(
        publishers: &[Publisher],
        deadline: Duration,
        snap: &ShardRequestSnapshot,
    ) {
        if publishers.is_empty() {
            return;
        }

        let report = WindowReport::collect(snap);

        for publisher in publishers {
            match tokio::time::timeout(deadline, publisher.publish(&report)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        publisher = publisher.name(),
                        table = %report.table,
                        error = %e,
                        "window publication failed"
                    );
                }
                Err(_) => {
                    error!(
                        publisher = publisher.name(),
                        table = %report.table,
                        "publication deadline exceeded, dropping window"
                    );
                }
            }
        }
    }

    /// Starts the run loop.
    pub async fn start(&mut self, ctx: tokio_util::sync::CancellationToken) -> Result<()> {
        let mut rotation_rx = self
            .rotation_rx
            .take()
            .expect("start called more than once");
        let publishers = std::mem::take(&mut self.publishers);

        let current = Arc::clone(&self.current);
        let cfg = self.cfg.clone();
        let deadline = cfg.rotation_interval;

        let run_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        // Drain pending flips so the final buffer is the
                        // newest one, then flush it.
                        while let Ok(window_start) = rotation_rx.try_recv() {
                            if let Some(prev) = MetricsReader::rotate(&current, &cfg, window_start) {
                                MetricsReader::publish_window(&publishers, deadline, &prev).await;
                            }
                        }

                        if let Some(last) = current.take() {
                            MetricsReader::publish_window(&publishers, deadline, &last).await;
                            debug!(table = last.name(), "final snapshot dropped");
                        }

                        return;
                    }

                    Some(window_start) = rotation_rx.recv() => {
                        if let Some(prev) = MetricsReader::rotate(&current, &cfg, window_start) {
                            MetricsReader::publish_window(&publishers, deadline, &prev).await;
                            debug!(table = prev.name(), "snapshot dropped");
                        }
                    }
                }
            }
        });
        *self.run_task.lock().await = Some(run_task);

        info!(
            sampling_interval = ?self.cfg.sampling_interval,
            rotation_interval = ?self.cfg.rotation_interval,
            "metrics reader started"
        );

        Ok(())
    }

    /// Waits for the run task to finish.
    pub async fn wait_for_shutdown(&self) {
        let run_task = { self.run_task.lock().await.take() };
        if let Some(run_task) = run_task {
            if let Err(e) = run_task.await {
                warn!(error = %e, "metrics reader task join failed");
            }
        }
    }
}

/// Atomic snapshot wrapper using `Arc<ShardRequestSnapshot>` with lock-free
/// swap. Loads on the producer hot path never contend with rollover.
mod atomic_snapshot {
    use arc_swap::ArcSwapOption;
    use std::sync::Arc;

    use crate::snapshot::ShardRequestSnapshot;

    pub struct AtomicSnapshot {
        inner: ArcSwapOption<ShardRequestSnapshot>,
    }

    impl AtomicSnapshot {
        pub fn new() -> Self {
            Self {
                inner: ArcSwapOption::empty(),
            }
        }

        /// Stores a new snapshot.
        pub fn store(&self, snap: ShardRequestSnapshot) {
            self.inner.store(Some(Arc::new(snap)));
        }

        /// Loads the current snapshot, returning a clone of the Arc.
        pub fn load(&self) -> Option<Arc<ShardRequestSnapshot>> {
            self.inner.load_full()
        }

        /// Swaps in a new snapshot, returning the old one.
        pub fn swap_arc(&self, snap: Arc<ShardRequestSnapshot>) -> Option<Arc<ShardRequestSnapshot>> {
            self.inner.swap(Some(snap))
        }

        /// Takes the snapshot out, leaving None.
        pub fn take(&self) -> Option<Arc<ShardRequestSnapshot>> {
            self.inner.swap(None)
        }
    }
}
