use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Callback invoked with the new window's start time when the sampling
/// window flips.
pub type WindowChangedFn = Box<dyn Fn(i64) + Send + Sync>;

/// Wall clock that slices epoch time into fixed sampling windows.
///
/// Every window start is a multiple of the sampling interval; producers and
/// the rollover controller both derive their window from this clock, so an
/// event is routed by its wall-clock instant of arrival.
pub struct WindowClock {
    sampling_interval_ms: i64,
    current_window: Arc<AtomicI64>,
    callbacks: Arc<parking_lot::Mutex<Vec<WindowChangedFn>>>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for WindowClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowClock")
            .field("sampling_interval_ms", &self.sampling_interval_ms)
            .finish()
    }
}

impl WindowClock {
    /// Create a new clock for the given sampling interval.
    pub fn new(sampling_interval: Duration) -> Result<Self> {
        let sampling_interval_ms = sampling_interval.as_millis() as i64;
        if sampling_interval_ms == 0 {
            bail!("sampling interval must be at least 1ms");
        }

        let window = window_start(now_epoch_ms(), sampling_interval_ms);

        Ok(Self {
            sampling_interval_ms,
            current_window: Arc::new(AtomicI64::new(window)),
            callbacks: Arc::new(parking_lot::Mutex::new(Vec::with_capacity(4))),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        })
    }

    /// Return the start of the current sampling window in epoch-ms.
    pub fn current_window_start(&self) -> i64 {
        self.current_window.load(Ordering::Relaxed)
    }

    /// Register a callback that fires when the window flips.
    pub fn on_window_changed(&self, f: WindowChangedFn) {
        self.callbacks.lock().push(f);
    }

    /// Start the background window polling task.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return; // Already running.
        }

        let sampling_interval_ms = self.sampling_interval_ms;
        let current_window = Arc::clone(&self.current_window);
        let callbacks = Arc::clone(&self.callbacks);
        let cancel = self.cancel.clone();

        info!(sampling_interval_ms, "window clock started");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(100));

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("window clock stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let new_window = window_start(now_epoch_ms(), sampling_interval_ms);
                        let old_window = current_window.load(Ordering::Relaxed);

                        if new_window != old_window {
                            current_window.store(new_window, Ordering::Relaxed);
                            debug!(window_start = new_window, "window changed");

                            let cbs = callbacks.lock();
                            for cb in cbs.iter() {
                                cb(new_window);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Stop the background task.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64
}

/// Align a timestamp down to the start of its sampling window.
fn window_start(epoch_ms: i64, sampling_interval_ms: i64) -> i64 {
    (epoch_ms / sampling_interval_ms) * sampling_interval_ms
}
