use parking_lot::Mutex;

use crate::event::Dimensions;

/// One raw half-event row. Exactly one of `st` / `et` is set by the
/// producer API; both stay optional through coalescing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub dims: Dimensions,
    pub st: Option<i64>,
    pub et: Option<i64>,
}

/// Returned when an append would push the store past its row capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoreFull {
    pub capacity: usize,
}

/// Append-only row store backing one window's snapshot.
///
/// Appends serialize on the mutex; readers take a point-in-time copy so view
/// computations never hold the ingest lock.
pub(crate) struct EventStore {
    rows: Mutex<Vec<Row>>,
    capacity: usize,
}

impl EventStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Appends a single row.
    pub fn append(&self, row: Row) -> Result<(), StoreFull> {
        let mut rows = self.rows.lock();
        if rows.len() >= self.capacity {
            return Err(StoreFull {
                capacity: self.capacity,
            });
        }
        rows.push(row);
        Ok(())
    }

    /// Appends a batch under a single lock acquisition. All-or-nothing: a
    /// batch that would exceed capacity is rejected whole.
    pub fn append_batch(&self, batch: Vec<Row>) -> Result<(), StoreFull> {
        let mut rows = self.rows.lock();
        if rows.len() + batch.len() > self.capacity {
            return Err(StoreFull {
                capacity: self.capacity,
            });
        }
        rows.extend(batch);
        Ok(())
    }

    /// Point-in-time copy of all rows. Inserts that land after this call are
    /// not reflected in the returned vector.
    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }
}
